//! Building blocks of a point cloud viewer.
//!
//! A [`Viewer`] owns a [`Scene`] holding the loaded [`PointCloud`], a
//! free-flying [`Camera`] and a background [`CloudLoader`]. Every frame the
//! cloud is re-centred on the origin, scaled and rotated from its settings,
//! and the camera is moved by the keyboard and mouse state collected in
//! [`InputState`]. Rendering is split into a pure draw-list stage and a wgpu
//! backend so that everything above the GPU stays testable headless.

pub mod app;
pub mod camera;
pub mod input;
pub mod loader;
pub mod pcd;
pub mod point;
pub mod point_cloud;
pub mod render;
pub mod scene;
pub mod settings;

pub use app::{CloudSummary, Viewer};
pub use camera::Camera;
pub use input::{InputState, KeyCode, KeySnapshot, NamedKey};
pub use loader::{load_point_cloud, CloudLoader, LoadError, PointCloudFormat};
pub use pcd::PcdError;
pub use point::Point;
pub use point_cloud::{Extents, PointCloud, PointCloudError, TransformPass};
pub use render::{DrawCall, GraphicsUnavailable, Renderer};
pub use scene::{Scene, SceneEntity, SceneObject, UniformValue, Uniforms};
pub use settings::{
    CameraSettings, MovementBindings, PointCloudSettings, Setting, SettingRange, ViewerSettings,
};
