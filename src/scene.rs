mod object;

pub use object::{
    ObjectState, SceneObject, UniformValue, Uniforms, COLOR_ATTRIBUTE, POSITION_ATTRIBUTE,
};

use crate::camera::Camera;
use crate::point_cloud::PointCloud;

/// Any object that can be stored in a [`Scene`].
#[derive(Debug, Clone)]
pub enum SceneEntity {
    Camera(Camera),
    PointCloud(PointCloud),
}

impl SceneEntity {
    pub fn as_point_cloud(&self) -> Option<&PointCloud> {
        match self {
            Self::PointCloud(cloud) => Some(cloud),
            Self::Camera(_) => None,
        }
    }

    pub fn as_point_cloud_mut(&mut self) -> Option<&mut PointCloud> {
        match self {
            Self::PointCloud(cloud) => Some(cloud),
            Self::Camera(_) => None,
        }
    }

    pub fn as_camera(&self) -> Option<&Camera> {
        match self {
            Self::Camera(camera) => Some(camera),
            Self::PointCloud(_) => None,
        }
    }
}

impl SceneObject for SceneEntity {
    fn state(&self) -> &ObjectState {
        match self {
            Self::Camera(camera) => camera.state(),
            Self::PointCloud(cloud) => cloud.state(),
        }
    }

    fn state_mut(&mut self) -> &mut ObjectState {
        match self {
            Self::Camera(camera) => camera.state_mut(),
            Self::PointCloud(cloud) => cloud.state_mut(),
        }
    }
}

impl From<Camera> for SceneEntity {
    fn from(value: Camera) -> Self {
        Self::Camera(value)
    }
}

impl From<PointCloud> for SceneEntity {
    fn from(value: PointCloud) -> Self {
        Self::PointCloud(value)
    }
}

/// Flat collection of scene objects keyed by name.
///
/// Iteration follows insertion order; replacing an object keeps its slot.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    objects: Vec<SceneEntity>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `object`, replacing and returning any object with the same name.
    pub fn add(&mut self, object: impl Into<SceneEntity>) -> Option<SceneEntity> {
        let object = object.into();
        match self.position_of(object.name()) {
            Some(index) => Some(std::mem::replace(&mut self.objects[index], object)),
            None => {
                self.objects.push(object);
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<SceneEntity> {
        let index = self.position_of(name)?;
        Some(self.objects.remove(index))
    }

    /// Removes the stored object that shares `object`'s name.
    pub fn remove_object<O: SceneObject>(&mut self, object: &O) -> Option<SceneEntity> {
        self.remove(object.name())
    }

    pub fn get(&self, name: &str) -> Option<&SceneEntity> {
        self.objects.iter().find(|object| object.name() == name)
    }

    /// Looks up the stored object that shares `object`'s name.
    pub fn get_object<O: SceneObject>(&self, object: &O) -> Option<&SceneEntity> {
        self.get(object.name())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SceneEntity> {
        self.objects.iter_mut().find(|object| object.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position_of(name).is_some()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneEntity> {
        self.objects.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SceneEntity> {
        self.objects.iter_mut()
    }

    /// Calls `visitor` once for every stored object.
    pub fn for_each<F>(&self, visitor: F)
    where
        F: FnMut(&SceneEntity),
    {
        self.objects.iter().for_each(visitor);
    }

    fn position_of(&self, name: &str) -> Option<usize> {
        self.objects.iter().position(|object| object.name() == name)
    }
}
