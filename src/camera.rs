//! Free-flying yaw/pitch camera.

use glam::{Mat4, Vec3};

use crate::input::KeySnapshot;
use crate::point::Point;
use crate::scene::{ObjectState, SceneObject};
use crate::settings::{CameraSettings, MovementBindings};

/// Pitch is kept strictly inside this bound (degrees) to avoid flipping at the poles.
pub const PITCH_LIMIT: f32 = 89.0;

#[derive(Debug, Clone)]
pub struct Camera {
    state: ObjectState,
    /// Degrees, clamped to `[-PITCH_LIMIT, PITCH_LIMIT]`.
    pitch: f32,
    /// Degrees, unbounded.
    yaw: f32,
    front: Vec3,
    up: Vec3,
    projection_matrix: Mat4,
    pub settings: CameraSettings,
}

impl Camera {
    pub const DEFAULT_POSITION: Point = Point::new(0.0, 0.0, 3.0);
    pub const DEFAULT_PITCH: f32 = 0.0;
    pub const DEFAULT_YAW: f32 = -90.0;

    pub fn new(position: Point) -> Self {
        Self {
            state: ObjectState::new("camera", position),
            pitch: Self::DEFAULT_PITCH,
            yaw: Self::DEFAULT_YAW,
            front: Vec3::NEG_Z,
            up: Vec3::Y,
            projection_matrix: Mat4::IDENTITY,
            settings: CameraSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: CameraSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Degrees.
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Degrees.
    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Points the camera; pitch is clamped like mouse input.
    pub fn set_orientation(&mut self, yaw: f32, pitch: f32) {
        self.yaw = yaw;
        self.pitch = pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    pub fn front(&self) -> Vec3 {
        self.front
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection_matrix
    }

    /// Moves the camera for every held movement key, then rebuilds the model
    /// matrix with [`Camera::move_to`].
    ///
    /// Displacements of simultaneous keys are summed without normalization,
    /// so diagonal movement is faster than movement along a single axis.
    pub fn process_keyboard_input(&mut self, keys: &KeySnapshot, bindings: &MovementBindings) {
        let speed = self.settings.speed;
        let forward = self.front * speed;
        let strafe = self.front.cross(self.up).normalize() * speed;

        let mut position = self.position().vec();
        if keys.is_down(bindings.forward) {
            position += forward;
        }
        if keys.is_down(bindings.backward) {
            position -= forward;
        }
        if keys.is_down(bindings.left) {
            position -= strafe;
        }
        if keys.is_down(bindings.right) {
            position += strafe;
        }

        self.move_to(position);
    }

    pub fn process_mouse_input(&mut self, x_offset: f32, y_offset: f32) {
        self.yaw += x_offset;
        self.pitch = (self.pitch + y_offset).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    /// Recomputes `front` from yaw and pitch and returns the look-at target.
    pub fn recompute_direction(&mut self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        self.front = Vec3::new(
            yaw.cos() * pitch.cos(),
            pitch.sin(),
            yaw.sin() * pitch.cos(),
        )
        .normalize();
        self.direction()
    }

    /// Look-at target derived from the last recomputed `front`.
    pub fn direction(&self) -> Vec3 {
        self.position().vec() + self.front
    }

    /// Places the camera and sets the model matrix to the inverse of the
    /// translation to `position`.
    pub fn move_to<P: Into<Point>>(&mut self, position: P) {
        self.set_position(position);
        let translation = Mat4::from_translation(self.position().vec());
        self.set_model_matrix(translation.inverse());
    }

    /// Rebuilds the projection from scratch. `fov` is in radians.
    pub fn set_perspective(&mut self, fov: f32, aspect: f32, z_near: f32, z_far: f32) {
        self.projection_matrix = Mat4::perspective_rh(fov, aspect, z_near, z_far);
    }

    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let view = Mat4::look_at_rh(self.position().vec(), target, up);
        self.set_model_matrix(view);
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix * self.model_matrix()
    }

    /// Replaces the model matrix with the look-at view for the current
    /// orientation and returns `projection * view * world`.
    pub fn world_view_projection_matrix(&mut self, world: Mat4) -> Mat4 {
        let target = self.recompute_direction();
        self.look_at(target, self.up);
        self.view_projection_matrix() * world
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Self::DEFAULT_POSITION)
    }
}

impl SceneObject for Camera {
    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ObjectState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;
    use crate::input::KeyCode;

    const EPSILON: f32 = 1e-5;

    fn keys(names: &[char]) -> KeySnapshot {
        names.iter().map(|ch| KeyCode::Character(*ch)).collect()
    }

    #[test]
    fn defaults_look_down_negative_z() {
        let mut camera = Camera::default();
        assert_eq!(camera.name(), "camera");
        assert_eq!(camera.position(), Point::new(0.0, 0.0, 3.0));
        let target = camera.recompute_direction();
        assert!(camera.front().abs_diff_eq(Vec3::NEG_Z, EPSILON));
        assert!(target.abs_diff_eq(Vec3::new(0.0, 0.0, 2.0), EPSILON));
    }

    #[test]
    fn front_is_unit_length_for_all_orientations() {
        let mut camera = Camera::default();
        for yaw in (-720..=720).step_by(45) {
            for pitch in (-89..=89).step_by(17) {
                camera.set_orientation(yaw as f32, pitch as f32);
                let target = camera.recompute_direction();
                assert!((camera.front().length() - 1.0).abs() < EPSILON);
                assert!((target - camera.position().vec()).abs_diff_eq(camera.front(), EPSILON));
            }
        }
    }

    #[test]
    fn direction_accessor_does_not_recompute() {
        let mut camera = Camera::default();
        camera.set_orientation(0.0, 0.0);
        assert!(camera.direction().abs_diff_eq(Vec3::new(0.0, 0.0, 2.0), EPSILON));
        camera.recompute_direction();
        assert!(camera.direction().abs_diff_eq(Vec3::new(1.0, 0.0, 3.0), EPSILON));
    }

    #[test]
    fn mouse_input_clamps_pitch_but_not_yaw() {
        let mut camera = Camera::default();
        camera.set_orientation(Camera::DEFAULT_YAW, 85.0);
        camera.process_mouse_input(0.0, 10.0);
        assert_eq!(camera.pitch(), 89.0);

        camera.process_mouse_input(0.0, -1000.0);
        assert_eq!(camera.pitch(), -89.0);

        for _ in 0..10 {
            camera.process_mouse_input(100.0, 0.0);
        }
        assert_eq!(camera.yaw(), -90.0 + 1000.0);
    }

    #[test]
    fn set_orientation_clamps_pitch() {
        let mut camera = Camera::default();
        camera.set_orientation(720.0, 120.0);
        assert_eq!(camera.yaw(), 720.0);
        assert_eq!(camera.pitch(), PITCH_LIMIT);
        camera.set_orientation(0.0, -90.0);
        assert_eq!(camera.pitch(), -PITCH_LIMIT);
        camera.recompute_direction();
        assert!(camera.front().y > -1.0 && camera.front().y < 0.0);
    }

    #[test]
    fn forward_moves_along_front() {
        let mut camera = Camera::default();
        camera.process_keyboard_input(&keys(&['W']), &MovementBindings::default());
        assert!(camera
            .position()
            .vec()
            .abs_diff_eq(Vec3::new(0.0, 0.0, 2.9), EPSILON));

        camera.process_keyboard_input(&keys(&['S']), &MovementBindings::default());
        assert!(camera
            .position()
            .vec()
            .abs_diff_eq(Vec3::new(0.0, 0.0, 3.0), EPSILON));
    }

    #[test]
    fn strafing_follows_front_cross_up() {
        let mut camera = Camera::default();
        camera.process_keyboard_input(&keys(&['D']), &MovementBindings::default());
        assert!(camera
            .position()
            .vec()
            .abs_diff_eq(Vec3::new(0.1, 0.0, 3.0), EPSILON));
        camera.process_keyboard_input(&keys(&['A', 'A']), &MovementBindings::default());
        assert!(camera
            .position()
            .vec()
            .abs_diff_eq(Vec3::new(0.0, 0.0, 3.0), EPSILON));
    }

    #[test]
    fn diagonal_movement_is_not_normalized() {
        let start = Camera::default().position().vec();
        let mut camera = Camera::default();
        camera.process_keyboard_input(&keys(&['W', 'D']), &MovementBindings::default());
        let moved = camera.position().vec() - start;

        assert!(moved.abs_diff_eq(Vec3::new(0.1, 0.0, -0.1), EPSILON));
        // Faster than moving along either key alone.
        assert!(moved.length() > camera.settings.speed + EPSILON);
    }

    #[test]
    fn keyboard_input_rebuilds_inverse_translation() {
        let mut camera = Camera::default();
        camera.process_keyboard_input(&KeySnapshot::default(), &MovementBindings::default());
        let expected = Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0));
        assert!(camera.model_matrix().abs_diff_eq(expected, EPSILON));
    }

    #[test]
    fn world_view_projection_composes_projection_view_world() {
        let mut camera = Camera::default();
        camera.set_perspective(60f32.to_radians(), 1.5, 0.1, 100.0);
        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));

        let combined = camera.world_view_projection_matrix(world);

        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 3.0), Vec3::new(0.0, 0.0, 2.0), Vec3::Y);
        let projection = Mat4::perspective_rh(60f32.to_radians(), 1.5, 0.1, 100.0);
        assert!(combined.abs_diff_eq(projection * view * world, EPSILON));
        assert!(camera.model_matrix().abs_diff_eq(view, EPSILON));
    }

    #[test]
    fn points_in_front_of_camera_land_inside_clip_space() {
        let mut camera = Camera::default();
        camera.set_perspective(60f32.to_radians(), 1.0, 0.1, 100.0);
        let clip = camera.world_view_projection_matrix(Mat4::IDENTITY) * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < EPSILON && ndc.y.abs() < EPSILON);
        assert!((0.0..=1.0).contains(&ndc.z));
    }

    #[test]
    fn set_perspective_replaces_previous_projection() {
        let mut camera = Camera::default();
        camera.set_perspective(1.0, 1.0, 0.1, 10.0);
        camera.set_perspective(0.5, 2.0, 1.0, 50.0);
        assert!(camera
            .projection_matrix()
            .abs_diff_eq(Mat4::perspective_rh(0.5, 2.0, 1.0, 50.0), EPSILON));
    }
}
