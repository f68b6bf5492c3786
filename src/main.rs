use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use glam::Vec2;
use log::{info, warn};
use pollster::block_on;
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{DeviceEvent, DeviceId, ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode as WinitKeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use cloudview::{
    load_point_cloud, CloudSummary, InputState, KeyCode, NamedKey, Renderer, Viewer,
    ViewerSettings,
};

const USAGE: &str = "Usage: cloudview [FILE] [--settings PATH] [--summary-only]

Controls: W/A/S/D move, drag to look, 1-9 select a setting,
Up/Down adjust it (PageUp/PageDown by ten steps), Esc quits.";

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse(env::args().skip(1))?;
    if options.help {
        println!("{USAGE}");
        return Ok(());
    }

    let settings = match &options.settings {
        Some(path) => {
            let xml = fs::read_to_string(path)
                .with_context(|| format!("unable to read settings {}", path.display()))?;
            ViewerSettings::from_xml(&xml)
                .with_context(|| format!("invalid settings file {}", path.display()))?
        }
        None => ViewerSettings::default(),
    };

    if options.summary_only {
        let path = options
            .path
            .ok_or_else(|| anyhow!("--summary-only needs a FILE. {USAGE}"))?;
        print_summary(path, &settings)
    } else {
        run_interactive(options.path, settings)
    }
}

fn print_summary(path: PathBuf, settings: &ViewerSettings) -> Result<()> {
    let mut cloud = load_point_cloud(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    cloud.apply_settings(&settings.point_cloud);
    println!("{}", CloudSummary::of(&cloud));
    Ok(())
}

fn run_interactive(path: Option<PathBuf>, settings: ViewerSettings) -> Result<()> {
    let mut viewer = Viewer::new(settings);
    if let Some(path) = path {
        // Failures are surfaced through the window title.
        viewer.request_load(path).ok();
    }

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = ViewerApp::new(viewer);
    event_loop
        .run_app(&mut app)
        .context("event loop terminated abnormally")?;

    match app.fatal {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

struct ViewerApp {
    viewer: Viewer,
    input: Arc<InputState>,
    renderer: Option<Renderer>,
    title: String,
    fatal: Option<anyhow::Error>,
}

impl ViewerApp {
    fn new(viewer: Viewer) -> Self {
        Self {
            input: viewer.input(),
            viewer,
            renderer: None,
            title: String::new(),
            fatal: None,
        }
    }

    fn create_renderer(event_loop: &ActiveEventLoop) -> Result<Renderer> {
        let window = event_loop
            .create_window(
                Window::default_attributes()
                    .with_title(Viewer::TITLE)
                    .with_inner_size(LogicalSize::new(1280.0, 720.0)),
            )
            .context("failed to create window")?;
        let renderer = block_on(Renderer::new(Arc::new(window))).context("graphics unavailable")?;
        Ok(renderer)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        self.fatal = Some(err);
        event_loop.exit();
    }

    fn redraw(&mut self) -> Result<()> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Ok(());
        };

        self.viewer.poll_loads();
        let size = renderer.window().inner_size();
        self.viewer.update(size.width, size.height);

        let title = self.viewer.title();
        if title != self.title {
            renderer.window().set_title(&title);
            self.title = title;
        }

        let draws = self.viewer.draw_list();
        match renderer.render(&draws) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => renderer.reconfigure(),
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(anyhow!("GPU is out of memory")),
            Err(err) => warn!("surface error: {err}; retrying next frame"),
        }
        Ok(())
    }

    fn handle_keyboard(&self, event: &KeyEvent) -> Option<KeyCode> {
        let PhysicalKey::Code(code) = event.physical_key else {
            return None;
        };
        let key = map_keycode(code)?;
        match event.state {
            ElementState::Pressed => self.input.set_key_down(key),
            ElementState::Released => self.input.set_key_up(key),
        }
        Some(key)
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }
        match Self::create_renderer(event_loop) {
            Ok(renderer) => {
                info!("window ready ({}x{})", renderer.size().width, renderer.size().height);
                self.renderer = Some(renderer);
            }
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        if window_id != renderer.window_id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => renderer.resize(size),
            WindowEvent::Focused(false) => self.input.release_all(),
            WindowEvent::KeyboardInput { event, .. } => match self.handle_keyboard(&event) {
                Some(KeyCode::Named(NamedKey::Escape)) => event_loop.exit(),
                Some(key) if event.state == ElementState::Pressed => {
                    self.viewer.handle_control_key(key);
                }
                _ => {}
            },
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => match state {
                ElementState::Pressed => self.input.begin_drag(),
                ElementState::Released => self.input.end_drag(),
            },
            WindowEvent::DroppedFile(path) => {
                self.viewer.request_load(path).ok();
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw() {
                    self.fail(event_loop, err);
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            self.input.add_drag_motion(Vec2::new(dx as f32, dy as f32));
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = &self.renderer {
            renderer.window().request_redraw();
        }
    }
}

fn map_keycode(code: WinitKeyCode) -> Option<KeyCode> {
    use WinitKeyCode as Key;
    Some(match code {
        Key::Space => KeyCode::Named(NamedKey::Space),
        Key::Enter => KeyCode::Named(NamedKey::Enter),
        Key::Tab => KeyCode::Named(NamedKey::Tab),
        Key::ArrowLeft => KeyCode::Named(NamedKey::Left),
        Key::ArrowRight => KeyCode::Named(NamedKey::Right),
        Key::ArrowUp => KeyCode::Named(NamedKey::Up),
        Key::ArrowDown => KeyCode::Named(NamedKey::Down),
        Key::Escape => KeyCode::Named(NamedKey::Escape),
        Key::Backspace => KeyCode::Named(NamedKey::Backspace),
        Key::Home => KeyCode::Named(NamedKey::Home),
        Key::End => KeyCode::Named(NamedKey::End),
        Key::PageUp => KeyCode::Named(NamedKey::PageUp),
        Key::PageDown => KeyCode::Named(NamedKey::PageDown),
        Key::ShiftLeft => KeyCode::Named(NamedKey::LeftShift),
        Key::ShiftRight => KeyCode::Named(NamedKey::RightShift),
        Key::ControlLeft => KeyCode::Named(NamedKey::LeftCtrl),
        Key::ControlRight => KeyCode::Named(NamedKey::RightCtrl),
        Key::AltLeft => KeyCode::Named(NamedKey::LeftAlt),
        Key::AltRight => KeyCode::Named(NamedKey::RightAlt),
        Key::Digit0 => KeyCode::Digit(0),
        Key::Digit1 => KeyCode::Digit(1),
        Key::Digit2 => KeyCode::Digit(2),
        Key::Digit3 => KeyCode::Digit(3),
        Key::Digit4 => KeyCode::Digit(4),
        Key::Digit5 => KeyCode::Digit(5),
        Key::Digit6 => KeyCode::Digit(6),
        Key::Digit7 => KeyCode::Digit(7),
        Key::Digit8 => KeyCode::Digit(8),
        Key::Digit9 => KeyCode::Digit(9),
        Key::KeyA => KeyCode::Character('A'),
        Key::KeyB => KeyCode::Character('B'),
        Key::KeyC => KeyCode::Character('C'),
        Key::KeyD => KeyCode::Character('D'),
        Key::KeyE => KeyCode::Character('E'),
        Key::KeyF => KeyCode::Character('F'),
        Key::KeyG => KeyCode::Character('G'),
        Key::KeyH => KeyCode::Character('H'),
        Key::KeyI => KeyCode::Character('I'),
        Key::KeyJ => KeyCode::Character('J'),
        Key::KeyK => KeyCode::Character('K'),
        Key::KeyL => KeyCode::Character('L'),
        Key::KeyM => KeyCode::Character('M'),
        Key::KeyN => KeyCode::Character('N'),
        Key::KeyO => KeyCode::Character('O'),
        Key::KeyP => KeyCode::Character('P'),
        Key::KeyQ => KeyCode::Character('Q'),
        Key::KeyR => KeyCode::Character('R'),
        Key::KeyS => KeyCode::Character('S'),
        Key::KeyT => KeyCode::Character('T'),
        Key::KeyU => KeyCode::Character('U'),
        Key::KeyV => KeyCode::Character('V'),
        Key::KeyW => KeyCode::Character('W'),
        Key::KeyX => KeyCode::Character('X'),
        Key::KeyY => KeyCode::Character('Y'),
        Key::KeyZ => KeyCode::Character('Z'),
        Key::F1 => KeyCode::Function(1),
        Key::F2 => KeyCode::Function(2),
        Key::F3 => KeyCode::Function(3),
        Key::F4 => KeyCode::Function(4),
        Key::F5 => KeyCode::Function(5),
        Key::F6 => KeyCode::Function(6),
        Key::F7 => KeyCode::Function(7),
        Key::F8 => KeyCode::Function(8),
        Key::F9 => KeyCode::Function(9),
        Key::F10 => KeyCode::Function(10),
        Key::F11 => KeyCode::Function(11),
        Key::F12 => KeyCode::Function(12),
        _ => return None,
    })
}

#[derive(Debug, Default, PartialEq)]
struct CliOptions {
    path: Option<PathBuf>,
    settings: Option<PathBuf>,
    summary_only: bool,
    help: bool,
}

impl CliOptions {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut options = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--summary-only" => options.summary_only = true,
                "--settings" => {
                    let path = args
                        .next()
                        .ok_or_else(|| anyhow!("--settings needs a PATH. {USAGE}"))?;
                    options.settings = Some(PathBuf::from(path));
                }
                "-h" | "--help" => options.help = true,
                other if other.starts_with('-') => {
                    return Err(anyhow!("Unknown argument: {other}. {USAGE}"));
                }
                _ if options.path.is_some() => {
                    return Err(anyhow!("Only one FILE may be given. {USAGE}"));
                }
                _ => options.path = Some(PathBuf::from(arg)),
            }
        }
        Ok(options)
    }
}
