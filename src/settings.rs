use anyhow::{anyhow, Context, Result};
use log::warn;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::input::KeyCode;

/// Inclusive range a user-adjustable value may take.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettingRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl SettingRange {
    pub const fn new(min: f32, max: f32, step: f32) -> Self {
        Self { min, max, step }
    }

    pub fn contains(&self, value: f32) -> bool {
        (self.min..=self.max).contains(&value)
    }

    /// Clamps `value` into the range, logging when it had to be adjusted.
    pub fn clamp(&self, name: &str, value: f32) -> f32 {
        if self.contains(value) {
            return value;
        }
        let clamped = value.clamp(self.min, self.max);
        warn!("{name} = {value} is outside [{}, {}]; using {clamped}", self.min, self.max);
        clamped
    }
}

/// Camera parameters adjustable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub z_near: f32,
    pub z_far: f32,
    /// Distance travelled per frame while a movement key is held.
    pub speed: f32,
    /// Degrees of rotation per pixel of mouse drag.
    pub sensitivity: f32,
}

impl CameraSettings {
    pub const FOV_RANGE: SettingRange = SettingRange::new(1.0, 180.0, 1.0);
    pub const Z_NEAR_RANGE: SettingRange = SettingRange::new(0.01, f32::MAX, 0.01);
    pub const Z_FAR_RANGE: SettingRange = SettingRange::new(1.0, f32::MAX, 1.0);
    pub const SPEED_RANGE: SettingRange = SettingRange::new(0.1, 1.0, 0.1);
    pub const SENSITIVITY_RANGE: SettingRange = SettingRange::new(0.1, 1.0, 0.1);

    pub fn clamped(self) -> Self {
        Self {
            fov: Self::FOV_RANGE.clamp("camera fov", self.fov),
            z_near: Self::Z_NEAR_RANGE.clamp("camera z-near", self.z_near),
            z_far: Self::Z_FAR_RANGE.clamp("camera z-far", self.z_far),
            speed: Self::SPEED_RANGE.clamp("camera speed", self.speed),
            sensitivity: Self::SENSITIVITY_RANGE.clamp("camera sensitivity", self.sensitivity),
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fov: 60.0,
            z_near: 0.1,
            z_far: 5000.0,
            speed: 0.1,
            sensitivity: 0.2,
        }
    }
}

/// Transform applied to whichever point cloud is currently loaded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointCloudSettings {
    pub scale: f32,
    /// Rotations in degrees, applied X first, then Y, then Z.
    pub rotation_x: f32,
    pub rotation_y: f32,
    pub rotation_z: f32,
}

impl PointCloudSettings {
    pub const SCALE_RANGE: SettingRange = SettingRange::new(0.1, 10.0, 0.1);
    pub const ROTATION_RANGE: SettingRange = SettingRange::new(-180.0, 180.0, 0.1);

    pub fn clamped(self) -> Self {
        Self {
            scale: Self::SCALE_RANGE.clamp("point cloud scale", self.scale),
            rotation_x: Self::ROTATION_RANGE.clamp("point cloud rotation x", self.rotation_x),
            rotation_y: Self::ROTATION_RANGE.clamp("point cloud rotation y", self.rotation_y),
            rotation_z: Self::ROTATION_RANGE.clamp("point cloud rotation z", self.rotation_z),
        }
    }
}

impl Default for PointCloudSettings {
    fn default() -> Self {
        Self {
            scale: 1.0,
            rotation_x: 0.0,
            rotation_y: 0.0,
            rotation_z: 0.0,
        }
    }
}

/// Keys that move the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementBindings {
    pub forward: KeyCode,
    pub backward: KeyCode,
    pub left: KeyCode,
    pub right: KeyCode,
}

impl Default for MovementBindings {
    fn default() -> Self {
        Self {
            forward: KeyCode::Character('W'),
            backward: KeyCode::Character('S'),
            left: KeyCode::Character('A'),
            right: KeyCode::Character('D'),
        }
    }
}

/// One user-adjustable value of [`ViewerSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Setting {
    Fov,
    ZNear,
    ZFar,
    Speed,
    Sensitivity,
    Scale,
    RotationX,
    RotationY,
    RotationZ,
}

impl Setting {
    pub const ALL: [Setting; 9] = [
        Setting::Fov,
        Setting::ZNear,
        Setting::ZFar,
        Setting::Speed,
        Setting::Sensitivity,
        Setting::Scale,
        Setting::RotationX,
        Setting::RotationY,
        Setting::RotationZ,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Fov => "camera fov",
            Self::ZNear => "camera z-near",
            Self::ZFar => "camera z-far",
            Self::Speed => "camera speed",
            Self::Sensitivity => "camera sensitivity",
            Self::Scale => "point cloud scale",
            Self::RotationX => "point cloud rotation x",
            Self::RotationY => "point cloud rotation y",
            Self::RotationZ => "point cloud rotation z",
        }
    }

    pub fn range(self) -> SettingRange {
        match self {
            Self::Fov => CameraSettings::FOV_RANGE,
            Self::ZNear => CameraSettings::Z_NEAR_RANGE,
            Self::ZFar => CameraSettings::Z_FAR_RANGE,
            Self::Speed => CameraSettings::SPEED_RANGE,
            Self::Sensitivity => CameraSettings::SENSITIVITY_RANGE,
            Self::Scale => PointCloudSettings::SCALE_RANGE,
            Self::RotationX | Self::RotationY | Self::RotationZ => {
                PointCloudSettings::ROTATION_RANGE
            }
        }
    }
}

/// Startup configuration of the viewer, adjustable while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewerSettings {
    pub camera: CameraSettings,
    pub point_cloud: PointCloudSettings,
    pub bindings: MovementBindings,
}

impl ViewerSettings {
    pub fn clamped(self) -> Self {
        Self {
            camera: self.camera.clamped(),
            point_cloud: self.point_cloud.clamped(),
            bindings: self.bindings,
        }
    }

    pub fn get(&self, setting: Setting) -> f32 {
        match setting {
            Setting::Fov => self.camera.fov,
            Setting::ZNear => self.camera.z_near,
            Setting::ZFar => self.camera.z_far,
            Setting::Speed => self.camera.speed,
            Setting::Sensitivity => self.camera.sensitivity,
            Setting::Scale => self.point_cloud.scale,
            Setting::RotationX => self.point_cloud.rotation_x,
            Setting::RotationY => self.point_cloud.rotation_y,
            Setting::RotationZ => self.point_cloud.rotation_z,
        }
    }

    fn slot(&mut self, setting: Setting) -> &mut f32 {
        match setting {
            Setting::Fov => &mut self.camera.fov,
            Setting::ZNear => &mut self.camera.z_near,
            Setting::ZFar => &mut self.camera.z_far,
            Setting::Speed => &mut self.camera.speed,
            Setting::Sensitivity => &mut self.camera.sensitivity,
            Setting::Scale => &mut self.point_cloud.scale,
            Setting::RotationX => &mut self.point_cloud.rotation_x,
            Setting::RotationY => &mut self.point_cloud.rotation_y,
            Setting::RotationZ => &mut self.point_cloud.rotation_z,
        }
    }

    /// Stores `value` clamped into the setting's range and returns what was stored.
    pub fn set(&mut self, setting: Setting, value: f32) -> f32 {
        let value = setting.range().clamp(setting.label(), value);
        *self.slot(setting) = value;
        value
    }

    /// Moves a setting by whole multiples of its range step.
    pub fn step(&mut self, setting: Setting, steps: i32) -> f32 {
        let value = self.get(setting) + steps as f32 * setting.range().step;
        self.set(setting, value)
    }

    /// Parses a settings document. Missing tags keep their defaults and
    /// out-of-range values are clamped.
    ///
    /// ```xml
    /// <viewer>
    ///   <camera><fov>75</fov><speed>0.5</speed></camera>
    ///   <point-cloud><scale>2</scale><rotation>0 90 0</rotation></point-cloud>
    ///   <controls><forward>Up</forward></controls>
    /// </viewer>
    /// ```
    pub fn from_xml(xml: &str) -> Result<Self> {
        let document = Document::parse(xml).context("invalid settings XML")?;
        let root = document.root_element();
        if !root.has_tag_name("viewer") {
            return Err(anyhow!(
                "expected <viewer> root element, found <{}>",
                root.tag_name().name()
            ));
        }

        let mut settings = Self::default();

        if let Some(camera) = child(&root, "camera") {
            let defaults = settings.camera;
            settings.camera = CameraSettings {
                fov: parse_f32(optional_text(&camera, "fov"), defaults.fov)?,
                z_near: parse_f32(optional_text(&camera, "z-near"), defaults.z_near)?,
                z_far: parse_f32(optional_text(&camera, "z-far"), defaults.z_far)?,
                speed: parse_f32(optional_text(&camera, "speed"), defaults.speed)?,
                sensitivity: parse_f32(
                    optional_text(&camera, "sensitivity"),
                    defaults.sensitivity,
                )?,
            }
            .clamped();
        }

        if let Some(cloud) = child(&root, "point-cloud") {
            let defaults = settings.point_cloud;
            let [rotation_x, rotation_y, rotation_z] = parse_triple(
                optional_text(&cloud, "rotation"),
                [defaults.rotation_x, defaults.rotation_y, defaults.rotation_z],
            )?;
            settings.point_cloud = PointCloudSettings {
                scale: parse_f32(optional_text(&cloud, "scale"), defaults.scale)?,
                rotation_x,
                rotation_y,
                rotation_z,
            }
            .clamped();
        }

        if let Some(controls) = child(&root, "controls") {
            let defaults = settings.bindings;
            settings.bindings = MovementBindings {
                forward: parse_key(optional_text(&controls, "forward"), defaults.forward)?,
                backward: parse_key(optional_text(&controls, "backward"), defaults.backward)?,
                left: parse_key(optional_text(&controls, "left"), defaults.left)?,
                right: parse_key(optional_text(&controls, "right"), defaults.right)?,
            };
        }

        Ok(settings)
    }
}

fn child<'a, 'input>(node: &Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|child| child.has_tag_name(tag))
}

fn optional_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    child(node, tag)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(|text| text.to_string())
}

fn parse_f32(value: Option<String>, default: f32) -> Result<f32> {
    match value {
        Some(value) => value
            .parse::<f32>()
            .map_err(|err| anyhow!("failed to parse float {value:?}: {err}")),
        None => Ok(default),
    }
}

fn parse_triple(value: Option<String>, default: [f32; 3]) -> Result<[f32; 3]> {
    let Some(value) = value else {
        return Ok(default);
    };
    let numbers = value
        .split_whitespace()
        .map(|component| {
            component
                .parse::<f32>()
                .map_err(|err| anyhow!("failed to parse float {component:?}: {err}"))
        })
        .collect::<Result<Vec<_>>>()?;
    match numbers.as_slice() {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => Err(anyhow!(
            "expected three components, found {} in {value:?}",
            numbers.len()
        )),
    }
}

fn parse_key(value: Option<String>, default: KeyCode) -> Result<KeyCode> {
    match value {
        Some(name) => KeyCode::from_name(&name).ok_or_else(|| anyhow!("unknown key name {name:?}")),
        None => Ok(default),
    }
}
