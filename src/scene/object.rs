use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::point::Point;

/// Attribute key holding flat `xyz` position triples.
pub const POSITION_ATTRIBUTE: &str = "position";
/// Attribute key holding flat `rgb` color triples in `[0, 1]`.
pub const COLOR_ATTRIBUTE: &str = "color";

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Shader parameter attached to an object or shared by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UniformValue {
    Float(f32),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<Vec3> for UniformValue {
    fn from(value: Vec3) -> Self {
        Self::Vec3(value)
    }
}

impl From<Vec4> for UniformValue {
    fn from(value: Vec4) -> Self {
        Self::Vec4(value)
    }
}

impl From<Mat4> for UniformValue {
    fn from(value: Mat4) -> Self {
        Self::Mat4(value)
    }
}

pub type Uniforms = BTreeMap<String, UniformValue>;

/// State shared by every object that can live in a [`Scene`](crate::Scene).
#[derive(Debug, Clone)]
pub struct ObjectState {
    id: u64,
    name: String,
    position: Point,
    model_matrix: Mat4,
    uniforms: Uniforms,
    attributes: BTreeMap<String, Vec<f32>>,
}

impl ObjectState {
    pub fn new(name: impl Into<String>, position: Point) -> Self {
        Self {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            position,
            model_matrix: Mat4::IDENTITY,
            uniforms: Uniforms::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Attribute buffers are filled while an object is built and stay fixed
    /// once it is handed out.
    pub(crate) fn set_attribute(&mut self, name: &str, data: Vec<f32>) {
        self.attributes.insert(name.to_string(), data);
    }
}

/// Transform and render-data accessors shared by cameras and point clouds.
///
/// `model_matrix` is only meaningful right after a transform pass; reading it
/// after a mutation without recomputing returns the previous frame's value.
pub trait SceneObject {
    fn state(&self) -> &ObjectState;
    fn state_mut(&mut self) -> &mut ObjectState;

    /// Identity that is unique for the lifetime of the process.
    fn id(&self) -> u64 {
        self.state().id
    }

    fn name(&self) -> &str {
        &self.state().name
    }

    fn position(&self) -> Point {
        self.state().position
    }

    fn set_position<P: Into<Point>>(&mut self, position: P)
    where
        Self: Sized,
    {
        self.state_mut().position = position.into();
    }

    fn model_matrix(&self) -> Mat4 {
        self.state().model_matrix
    }

    fn set_model_matrix(&mut self, matrix: Mat4) {
        self.state_mut().model_matrix = matrix;
    }

    /// Resets the model matrix to identity. Must precede any transform that
    /// accumulates into the matrix within a frame.
    fn reset_transform(&mut self) {
        self.state_mut().model_matrix = Mat4::IDENTITY;
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.state_mut().uniforms.insert(name.to_string(), value);
    }

    fn uniforms(&self) -> &Uniforms {
        &self.state().uniforms
    }

    fn attribute(&self, name: &str) -> Option<&[f32]> {
        self.state().attributes.get(name).map(Vec::as_slice)
    }

    fn attributes(&self) -> &BTreeMap<String, Vec<f32>> {
        &self.state().attributes
    }
}
