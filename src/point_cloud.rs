//! Point cloud scene object and its per-frame normalization.
//!
//! Every frame the model matrix is rebuilt as
//! `scale * rot_x * rot_y * rot_z * translate(center_offset)`, which moves the
//! centre of the raw bounding box to the origin before the cloud is rotated
//! and scaled around it.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::point::Point;
use crate::scene::{ObjectState, SceneObject, COLOR_ATTRIBUTE, POSITION_ATTRIBUTE};
use crate::settings::PointCloudSettings;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PointCloudError {
    #[error("point cloud contains no points")]
    Empty,
    #[error("position buffer length {len} is not a multiple of 3")]
    MisalignedPositions { len: usize },
    #[error("color buffer has {colors} values but positions have {positions}")]
    ColorLengthMismatch { positions: usize, colors: usize },
}

/// Axis-aligned bounding box of a point set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extents {
    pub min: Vec3,
    pub max: Vec3,
}

impl Extents {
    /// Scans flat `xyz` triples. Returns `None` when there is no complete triple.
    pub fn from_positions(positions: &[f32]) -> Option<Self> {
        let mut triples = positions.chunks_exact(3).map(Vec3::from_slice);
        let first = triples.next()?;
        Some(triples.fold(
            Self {
                min: first,
                max: first,
            },
            |extents, point| Self {
                min: extents.min.min(point),
                max: extents.max.max(point),
            },
        ))
    }

    pub fn center(&self) -> Vec3 {
        (self.max - self.min) * 0.5 + self.min
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// A loaded point set. Its attribute buffers cannot be replaced after
/// construction:
///
/// ```compile_fail
/// use cloudview::{PointCloud, SceneObject};
///
/// let mut cloud = PointCloud::from_attributes("scan", vec![0.0; 3], None).unwrap();
/// cloud.set_attribute("position", vec![1.0; 6]);
/// ```
#[derive(Debug, Clone)]
pub struct PointCloud {
    state: ObjectState,
    point_count: usize,
}

impl PointCloud {
    /// Builds a cloud from flat `xyz` positions and optional `rgb` colors.
    ///
    /// The buffers are stored as the `position` and `color` attributes and are
    /// not modified afterwards; only the model matrix and position change.
    pub fn from_attributes(
        name: impl Into<String>,
        positions: Vec<f32>,
        colors: Option<Vec<f32>>,
    ) -> Result<Self, PointCloudError> {
        if positions.is_empty() {
            return Err(PointCloudError::Empty);
        }
        if positions.len() % 3 != 0 {
            return Err(PointCloudError::MisalignedPositions {
                len: positions.len(),
            });
        }
        if let Some(colors) = &colors {
            if colors.len() != positions.len() {
                return Err(PointCloudError::ColorLengthMismatch {
                    positions: positions.len(),
                    colors: colors.len(),
                });
            }
        }

        let point_count = positions.len() / 3;
        let mut cloud = Self {
            state: ObjectState::new(name, Point::default()),
            point_count,
        };
        cloud.state.set_attribute(POSITION_ATTRIBUTE, positions);
        if let Some(colors) = colors {
            cloud.state.set_attribute(COLOR_ATTRIBUTE, colors);
        }
        Ok(cloud)
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn has_colors(&self) -> bool {
        self.attribute(COLOR_ATTRIBUTE).is_some()
    }

    pub fn positions(&self) -> &[f32] {
        self.attribute(POSITION_ATTRIBUTE).unwrap_or_default()
    }

    /// Bounding box of the raw positions.
    pub fn extents(&self) -> Extents {
        Extents::from_positions(self.positions()).unwrap_or(Extents {
            min: Vec3::ZERO,
            max: Vec3::ZERO,
        })
    }

    /// Translation that moves the centre of the raw bounding box to the origin.
    pub fn center_offset(&self) -> Vec3 {
        -self.extents().center()
    }

    /// Resets the model matrix and opens a transform pass for this frame.
    pub fn begin_transform(&mut self) -> TransformPass<'_> {
        self.reset_transform();
        TransformPass { cloud: self }
    }

    /// Runs the full per-frame sequence: reset, scale, rotate, center.
    pub fn apply_settings(&mut self, settings: &PointCloudSettings) {
        self.begin_transform()
            .scale(settings.scale)
            .rotate(settings.rotation_x, settings.rotation_y, settings.rotation_z)
            .center();
    }

    /// Raw positions mapped through the current model matrix.
    pub fn transformed_positions(&self) -> Vec<f32> {
        let model = self.model_matrix();
        self.positions()
            .chunks_exact(3)
            .flat_map(|xyz| model.transform_point3(Vec3::from_slice(xyz)).to_array())
            .collect()
    }
}

impl SceneObject for PointCloud {
    fn state(&self) -> &ObjectState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ObjectState {
        &mut self.state
    }
}

/// Accumulates transforms into a freshly reset model matrix.
///
/// Each step right-multiplies, so it acts in the local space of the
/// previous ones. The order scale, rotate, center is the one the viewer uses.
#[must_use = "a transform pass only changes the model matrix through its methods"]
pub struct TransformPass<'a> {
    cloud: &'a mut PointCloud,
}

impl<'a> TransformPass<'a> {
    fn append(&mut self, transform: Mat4) {
        let model = self.cloud.model_matrix() * transform;
        self.cloud.set_model_matrix(model);
    }

    pub fn scale(mut self, factor: f32) -> Self {
        self.append(Mat4::from_scale(Vec3::splat(factor)));
        self
    }

    /// Rotates about X, then Y, then Z. Angles are in degrees.
    pub fn rotate(mut self, x: f32, y: f32, z: f32) -> Self {
        self.append(Mat4::from_rotation_x(x.to_radians()));
        self.append(Mat4::from_rotation_y(y.to_radians()));
        self.append(Mat4::from_rotation_z(z.to_radians()));
        self
    }

    /// Moves the cloud's position to its centre offset and appends the
    /// matching translation.
    pub fn center(mut self) -> &'a mut PointCloud {
        let offset = self.cloud.center_offset();
        self.cloud.set_position(offset);
        self.append(Mat4::from_translation(offset));
        self.cloud
    }

    /// Ends the pass without centering.
    pub fn finish(self) -> &'a mut PointCloud {
        self.cloud
    }
}
