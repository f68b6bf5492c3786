use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Mutable position in world space.
///
/// Components are not validated; non-finite values propagate into every
/// matrix built from the point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Returns the point as a vector.
    pub fn vec(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    /// Overwrites all three components from `position`.
    pub fn set(&mut self, position: Vec3) {
        self.x = position.x;
        self.y = position.y;
        self.z = position.z;
    }
}

impl From<Vec3> for Point {
    fn from(value: Vec3) -> Self {
        Self::new(value.x, value.y, value.z)
    }
}

impl From<[f32; 3]> for Point {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl From<Point> for Vec3 {
    fn from(value: Point) -> Self {
        value.vec()
    }
}
