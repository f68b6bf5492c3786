//! CPU side of a frame: which objects get drawn and with which uniforms.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::camera::Camera;
use crate::scene::{Scene, SceneObject, UniformValue, Uniforms, COLOR_ATTRIBUTE, POSITION_ATTRIBUTE};

pub const WORLD_VIEW_PROJECTION_UNIFORM: &str = "world_view_projection";
pub const TINT_UNIFORM: &str = "tint";

/// Everything the GPU stage needs to draw one object.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall<'a> {
    pub id: u64,
    pub name: &'a str,
    pub uniforms: Uniforms,
    pub positions: &'a [f32],
    pub colors: Option<&'a [f32]>,
}

impl DrawCall<'_> {
    pub fn point_count(&self) -> usize {
        self.positions.len() / 3
    }
}

/// Merges uniforms for one draw: the matrix first, then `shared`, then the
/// object's own uniforms. Later entries win on key collisions.
pub fn merge_uniforms(world_view_projection: Mat4, shared: &Uniforms, object: &Uniforms) -> Uniforms {
    let mut merged = Uniforms::new();
    merged.insert(
        WORLD_VIEW_PROJECTION_UNIFORM.to_string(),
        UniformValue::Mat4(world_view_projection),
    );
    merged.extend(shared.iter().map(|(name, value)| (name.clone(), *value)));
    merged.extend(object.iter().map(|(name, value)| (name.clone(), *value)));
    merged
}

/// Produces one draw call per scene object carrying a position attribute.
///
/// The camera's model matrix ends up holding the view matrix of the last
/// object drawn.
pub fn build_draw_list<'a>(scene: &'a Scene, camera: &mut Camera, shared: &Uniforms) -> Vec<DrawCall<'a>> {
    scene
        .iter()
        .filter_map(|object| {
            let positions = object.attribute(POSITION_ATTRIBUTE)?;
            let matrix = camera.world_view_projection_matrix(object.model_matrix());
            Some(DrawCall {
                id: object.id(),
                name: object.name(),
                uniforms: merge_uniforms(matrix, shared, object.uniforms()),
                positions,
                colors: object.attribute(COLOR_ATTRIBUTE),
            })
        })
        .collect()
}

/// Per-object uniform block as laid out in the shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectUniform {
    pub world_view_projection: [[f32; 4]; 4],
    pub tint: [f32; 4],
}

impl ObjectUniform {
    pub fn from_uniforms(uniforms: &Uniforms) -> Self {
        let world_view_projection = match uniforms.get(WORLD_VIEW_PROJECTION_UNIFORM) {
            Some(UniformValue::Mat4(matrix)) => *matrix,
            _ => Mat4::IDENTITY,
        };
        let tint = match uniforms.get(TINT_UNIFORM) {
            Some(UniformValue::Vec4(tint)) => *tint,
            Some(UniformValue::Vec3(tint)) => tint.extend(1.0),
            Some(UniformValue::Float(gray)) => Vec4::new(*gray, *gray, *gray, 1.0),
            _ => Vec4::ONE,
        };
        Self {
            world_view_projection: world_view_projection.to_cols_array_2d(),
            tint: tint.to_array(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

/// Interleaves positions with colors; points without colors are white.
pub fn interleave(positions: &[f32], colors: Option<&[f32]>) -> Vec<PointVertex> {
    let colors = colors.map(|colors| colors.chunks_exact(3));
    let mut colors = colors.into_iter().flatten();
    positions
        .chunks_exact(3)
        .map(|xyz| PointVertex {
            position: [xyz[0], xyz[1], xyz[2]],
            color: colors
                .next()
                .map(|rgb| [rgb[0], rgb[1], rgb[2]])
                .unwrap_or([1.0; 3]),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::point_cloud::PointCloud;

    fn scene_with_cloud() -> Scene {
        let mut scene = Scene::new();
        scene.add(Camera::default());
        let cloud = PointCloud::from_attributes(
            "pair.pcd",
            vec![0.0, 0.0, 0.0, 2.0, 4.0, -2.0],
            Some(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
        )
        .unwrap();
        scene.add(cloud);
        scene
    }

    #[test]
    fn later_uniform_sources_win() {
        let mut shared = Uniforms::new();
        shared.insert("tint".into(), Vec4::new(0.5, 0.5, 0.5, 1.0).into());
        shared.insert("point_size".into(), 2.0f32.into());
        let mut object = Uniforms::new();
        object.insert("tint".into(), Vec4::ONE.into());
        object.insert(WORLD_VIEW_PROJECTION_UNIFORM.into(), Mat4::ZERO.into());

        let merged = merge_uniforms(Mat4::IDENTITY, &shared, &object);
        assert_eq!(merged["tint"], UniformValue::Vec4(Vec4::ONE));
        assert_eq!(merged["point_size"], UniformValue::Float(2.0));
        assert_eq!(merged[WORLD_VIEW_PROJECTION_UNIFORM], UniformValue::Mat4(Mat4::ZERO));
    }

    #[test]
    fn shared_uniforms_override_the_matrix() {
        let mut shared = Uniforms::new();
        shared.insert(WORLD_VIEW_PROJECTION_UNIFORM.into(), Mat4::ZERO.into());
        let merged = merge_uniforms(Mat4::IDENTITY, &shared, &Uniforms::new());
        assert_eq!(merged[WORLD_VIEW_PROJECTION_UNIFORM], UniformValue::Mat4(Mat4::ZERO));
    }

    #[test]
    fn draw_list_skips_objects_without_positions() {
        let scene = scene_with_cloud();
        let mut camera = Camera::default();
        camera.set_perspective(1.0, 1.0, 0.1, 100.0);

        let draws = build_draw_list(&scene, &mut camera, &Uniforms::new());
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].name, "pair.pcd");
        assert_eq!(draws[0].point_count(), 2);
        assert!(draws[0].colors.is_some());
    }

    #[test]
    fn draw_call_carries_world_view_projection() {
        let mut scene = scene_with_cloud();
        if let Some(cloud) = scene.get_mut("pair.pcd").and_then(|entity| entity.as_point_cloud_mut()) {
            cloud.apply_settings(&Default::default());
        }
        let world = scene.get("pair.pcd").unwrap().model_matrix();
        let mut camera = Camera::default();
        camera.set_perspective(1.0, 1.0, 0.1, 100.0);
        let expected = camera.clone().world_view_projection_matrix(world);

        let draws = build_draw_list(&scene, &mut camera, &Uniforms::new());
        assert_eq!(
            draws[0].uniforms[WORLD_VIEW_PROJECTION_UNIFORM],
            UniformValue::Mat4(expected)
        );
    }

    #[test]
    fn object_uniform_defaults_tint_to_white() {
        let merged = merge_uniforms(Mat4::from_translation(Vec3::X), &Uniforms::new(), &Uniforms::new());
        let block = ObjectUniform::from_uniforms(&merged);
        assert_eq!(block.tint, [1.0; 4]);
        assert_eq!(
            block.world_view_projection,
            Mat4::from_translation(Vec3::X).to_cols_array_2d()
        );

        let mut tinted = Uniforms::new();
        tinted.insert(TINT_UNIFORM.into(), Vec3::new(0.2, 0.4, 0.6).into());
        assert_eq!(ObjectUniform::from_uniforms(&tinted).tint, [0.2, 0.4, 0.6, 1.0]);
    }

    #[test]
    fn interleave_pairs_positions_with_colors() {
        let vertices = interleave(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Some(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6][..]));
        assert_eq!(vertices[1].position, [4.0, 5.0, 6.0]);
        assert_eq!(vertices[1].color, [0.4, 0.5, 0.6]);

        let white = interleave(&[1.0, 2.0, 3.0], None);
        assert_eq!(white[0].color, [1.0, 1.0, 1.0]);
    }
}
