use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use glam::Vec3;
use log::{error, info};

use crate::camera::Camera;
use crate::input::{InputState, KeyCode, NamedKey};
use crate::loader::{CloudLoader, LoadError};
use crate::point_cloud::{Extents, PointCloud};
use crate::render::{build_draw_list, DrawCall};
use crate::scene::{Scene, SceneEntity, SceneObject, UniformValue, Uniforms};
use crate::settings::{Setting, ViewerSettings};

/// Owns the scene, the camera and the loader, and advances them once per frame.
#[derive(Debug)]
pub struct Viewer {
    scene: Scene,
    camera: Camera,
    settings: ViewerSettings,
    input: Arc<InputState>,
    loader: CloudLoader,
    active_cloud: Option<String>,
    notification: Option<String>,
    shared_uniforms: Uniforms,
    selected: Setting,
}

impl Viewer {
    pub const TITLE: &'static str = "cloudview";

    pub fn new(settings: ViewerSettings) -> Self {
        let settings = settings.clamped();
        Self {
            scene: Scene::new(),
            camera: Camera::default().with_settings(settings.camera),
            settings,
            input: Arc::new(InputState::new()),
            loader: CloudLoader::new(),
            active_cloud: None,
            notification: None,
            shared_uniforms: Uniforms::new(),
            selected: Setting::Fov,
        }
    }

    /// Input sink shared with the window event handlers.
    pub fn input(&self) -> Arc<InputState> {
        Arc::clone(&self.input)
    }

    pub fn settings(&self) -> &ViewerSettings {
        &self.settings
    }

    /// Changes one setting, clamped into its range. Settings are read again
    /// on every [`Viewer::update`].
    pub fn set_setting(&mut self, setting: Setting, value: f32) -> f32 {
        self.settings.set(setting, value)
    }

    /// Setting the adjustment keys currently act on.
    pub fn selected_setting(&self) -> Setting {
        self.selected
    }

    pub fn select_setting(&mut self, setting: Setting) {
        self.selected = setting;
    }

    /// Moves the selected setting by `steps` range steps.
    pub fn adjust_setting(&mut self, steps: i32) -> f32 {
        let value = self.settings.step(self.selected, steps);
        info!("{} = {value}", self.selected.label());
        value
    }

    /// Runtime controls: digits 1 to 9 pick a setting, Up/Down move it one
    /// step and PageUp/PageDown ten. Keys bound to movement are left alone.
    /// Returns `true` when the key was consumed.
    pub fn handle_control_key(&mut self, key: KeyCode) -> bool {
        let bindings = self.settings.bindings;
        if [bindings.forward, bindings.backward, bindings.left, bindings.right].contains(&key) {
            return false;
        }
        let steps = match key {
            KeyCode::Digit(digit @ 1..=9) => {
                self.select_setting(Setting::ALL[usize::from(digit) - 1]);
                return true;
            }
            KeyCode::Named(NamedKey::Up) => 1,
            KeyCode::Named(NamedKey::Down) => -1,
            KeyCode::Named(NamedKey::PageUp) => 10,
            KeyCode::Named(NamedKey::PageDown) => -10,
            _ => return false,
        };
        self.adjust_setting(steps);
        true
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn set_shared_uniform(&mut self, name: &str, value: UniformValue) {
        self.shared_uniforms.insert(name.to_string(), value);
    }

    pub fn active_cloud(&self) -> Option<&PointCloud> {
        let name = self.active_cloud.as_deref()?;
        self.scene.get(name).and_then(SceneEntity::as_point_cloud)
    }

    /// Last load failure shown to the user, cleared by the next successful load.
    pub fn notification(&self) -> Option<&str> {
        self.notification.as_deref()
    }

    pub fn dismiss_notification(&mut self) {
        self.notification = None;
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_pending()
    }

    /// Window title reflecting the selected setting, then the loaded cloud,
    /// a pending load or the last error.
    pub fn title(&self) -> String {
        let prefix = format!(
            "{} [{} = {}]",
            Self::TITLE,
            self.selected.label(),
            self.settings.get(self.selected)
        );
        if let Some(message) = &self.notification {
            return format!("{prefix} - {message}");
        }
        if let Some(pending) = self.loader.pending_name() {
            return format!("{prefix} - loading {pending}");
        }
        match &self.active_cloud {
            Some(name) => format!("{prefix} - {name}"),
            None => prefix,
        }
    }

    /// Starts loading `path` in the background. A rejected request leaves the
    /// current cloud in place and is reported through the notification.
    pub fn request_load(&mut self, path: impl Into<PathBuf>) -> Result<(), LoadError> {
        match self.loader.request(path) {
            Ok(()) => {
                self.notification = None;
                Ok(())
            }
            Err(err) => {
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Installs a finished load, if one is ready. Returns `true` when a new
    /// cloud replaced the scene contents.
    pub fn poll_loads(&mut self) -> bool {
        match self.loader.poll() {
            Some(result) => self.finish_load(result),
            None => false,
        }
    }

    /// Blocks until the pending load finishes and installs it.
    pub fn wait_for_load(&mut self) -> bool {
        match self.loader.wait() {
            Some(result) => self.finish_load(result),
            None => false,
        }
    }

    fn finish_load(&mut self, result: Result<PointCloud, LoadError>) -> bool {
        match result {
            Ok(cloud) => {
                self.install(cloud);
                true
            }
            Err(err) => {
                self.report(&err);
                false
            }
        }
    }

    fn install(&mut self, cloud: PointCloud) {
        let name = cloud.name().to_string();
        info!(
            "showing {name} ({} points{})",
            cloud.point_count(),
            if cloud.has_colors() { ", colored" } else { "" }
        );
        self.scene.clear();
        self.scene.add(cloud);
        self.active_cloud = Some(name);
        self.notification = None;
    }

    fn report(&mut self, err: &LoadError) {
        let message = anyhow::Chain::new(err)
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(": ");
        error!("{message}");
        self.notification = Some(message);
    }

    /// Advances one frame for a viewport of the given size in pixels.
    pub fn update(&mut self, viewport_width: u32, viewport_height: u32) {
        let keys = self.input.key_snapshot();
        let drag = self.input.take_drag_motion();
        self.camera.settings = self.settings.camera;

        let sensitivity = self.camera.settings.sensitivity;
        self.camera
            .process_mouse_input(drag.x * sensitivity, -drag.y * sensitivity);

        let active = self
            .active_cloud
            .as_deref()
            .and_then(|name| self.scene.get_mut(name))
            .and_then(SceneEntity::as_point_cloud_mut);
        if let Some(cloud) = active {
            cloud.apply_settings(&self.settings.point_cloud);
        }

        let aspect = if viewport_height == 0 {
            1.0
        } else {
            viewport_width as f32 / viewport_height as f32
        };
        let camera = self.camera.settings;
        self.camera.reset_transform();
        self.camera
            .set_perspective(camera.fov.to_radians(), aspect, camera.z_near, camera.z_far);

        self.camera
            .process_keyboard_input(&keys, &self.settings.bindings);
    }

    /// Draw calls for the current frame; call after [`Viewer::update`].
    pub fn draw_list(&mut self) -> Vec<DrawCall<'_>> {
        build_draw_list(&self.scene, &mut self.camera, &self.shared_uniforms)
    }
}

/// Headless description of a transformed cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudSummary {
    pub name: String,
    pub point_count: usize,
    pub has_colors: bool,
    pub extents: Extents,
    pub center_offset: Vec3,
    /// Bounding box of the positions after the model matrix was applied.
    pub transformed: Option<Extents>,
}

impl CloudSummary {
    pub fn of(cloud: &PointCloud) -> Self {
        Self {
            name: cloud.name().to_string(),
            point_count: cloud.point_count(),
            has_colors: cloud.has_colors(),
            extents: cloud.extents(),
            center_offset: cloud.center_offset(),
            transformed: Extents::from_positions(&cloud.transformed_positions()),
        }
    }
}

impl fmt::Display for CloudSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vec = |v: Vec3| format!("({:.3}, {:.3}, {:.3})", v.x, v.y, v.z);
        writeln!(f, "Point cloud: {}", self.name)?;
        writeln!(f, "Points: {}", self.point_count)?;
        writeln!(f, "Colors: {}", if self.has_colors { "yes" } else { "no" })?;
        writeln!(
            f,
            "Extents: min={} max={}",
            vec(self.extents.min),
            vec(self.extents.max)
        )?;
        write!(f, "Center offset: {}", vec(self.center_offset))?;
        if let Some(transformed) = self.transformed {
            write!(
                f,
                "\nTransformed extents: min={} max={}",
                vec(transformed.min),
                vec(transformed.max)
            )?;
        }
        Ok(())
    }
}
