use std::collections::HashSet;

use glam::Vec2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Identifier for a physical keyboard key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    Named(NamedKey),
    Character(char),
    Digit(u8),
    Function(u8),
}

impl KeyCode {
    pub fn from_name(name: &str) -> Option<Self> {
        if let Some(key) = parse_named_key(name) {
            return Some(key);
        }
        let mut chars = name.chars();
        if let (Some(ch), None) = (chars.next(), chars.next()) {
            if ch.is_ascii_alphabetic() {
                return Some(Self::Character(ch.to_ascii_uppercase()));
            }
            if ch.is_ascii_digit() {
                return Some(Self::Digit(ch as u8 - b'0'));
            }
        }
        if let Some(function) = name.strip_prefix('F').or_else(|| name.strip_prefix('f')) {
            if let Ok(index) = function.parse::<u8>() {
                if (1..=25).contains(&index) {
                    return Some(Self::Function(index));
                }
            }
        }
        None
    }
}

fn parse_named_key(name: &str) -> Option<KeyCode> {
    use NamedKey::*;
    let key = match name {
        "Space" => Space,
        "Enter" | "Return" => Enter,
        "Tab" => Tab,
        "Left" => Left,
        "Right" => Right,
        "Up" => Up,
        "Down" => Down,
        "Escape" | "Esc" => Escape,
        "Backspace" => Backspace,
        "Home" => Home,
        "End" => End,
        "PageUp" => PageUp,
        "PageDown" => PageDown,
        "LeftShift" | "LShift" => LeftShift,
        "RightShift" | "RShift" => RightShift,
        "LeftCtrl" | "LControl" => LeftCtrl,
        "RightCtrl" | "RControl" => RightCtrl,
        "LeftAlt" | "LAlt" => LeftAlt,
        "RightAlt" | "RAlt" => RightAlt,
        _ => return None,
    };
    Some(KeyCode::Named(key))
}

/// Friendly names for keys that are not letters, digits or function keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamedKey {
    Space,
    Enter,
    Tab,
    Left,
    Right,
    Up,
    Down,
    Escape,
    Backspace,
    Home,
    End,
    PageUp,
    PageDown,
    LeftShift,
    RightShift,
    LeftCtrl,
    RightCtrl,
    LeftAlt,
    RightAlt,
}

/// Keys held down at the moment the snapshot was taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySnapshot {
    keys: HashSet<KeyCode>,
}

impl KeySnapshot {
    pub fn is_down(&self, key: KeyCode) -> bool {
        self.keys.contains(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<KeyCode> for KeySnapshot {
    fn from_iter<I: IntoIterator<Item = KeyCode>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Default)]
struct DragState {
    active: bool,
    delta: Vec2,
}

/// Input written by window event handlers and read once per frame.
///
/// Handlers may fire any number of times between frames; the frame sees the
/// last written key state and the sum of all drag motion since it last ran.
#[derive(Debug, Default)]
pub struct InputState {
    keys: RwLock<HashSet<KeyCode>>,
    drag: RwLock<DragState>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_key_down(&self, key: KeyCode) {
        self.keys.write().insert(key);
    }

    pub fn set_key_up(&self, key: KeyCode) {
        self.keys.write().remove(&key);
    }

    pub fn is_key_down(&self, key: KeyCode) -> bool {
        self.keys.read().contains(&key)
    }

    /// Copies the currently pressed keys.
    pub fn key_snapshot(&self) -> KeySnapshot {
        KeySnapshot {
            keys: self.keys.read().clone(),
        }
    }

    /// Starts a drag session (pointer down).
    pub fn begin_drag(&self) {
        self.drag.write().active = true;
    }

    /// Ends the drag session (pointer up). Motion already accumulated is kept
    /// for the next frame.
    pub fn end_drag(&self) {
        self.drag.write().active = false;
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.read().active
    }

    /// Adds relative pointer motion; ignored outside a drag session.
    pub fn add_drag_motion(&self, delta: Vec2) {
        let mut drag = self.drag.write();
        if drag.active {
            drag.delta += delta;
        }
    }

    /// Returns and clears the motion accumulated since the last call.
    pub fn take_drag_motion(&self) -> Vec2 {
        std::mem::take(&mut self.drag.write().delta)
    }

    /// Releases every key, e.g. when the window loses focus.
    pub fn release_all(&self) {
        self.keys.write().clear();
        *self.drag.write() = DragState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_and_character_keys() {
        assert_eq!(
            KeyCode::from_name("Space"),
            Some(KeyCode::Named(NamedKey::Space))
        );
        assert_eq!(KeyCode::from_name("a"), Some(KeyCode::Character('A')));
        assert_eq!(KeyCode::from_name("7"), Some(KeyCode::Digit(7)));
        assert_eq!(KeyCode::from_name("F12"), Some(KeyCode::Function(12)));
        assert_eq!(KeyCode::from_name("F30"), None);
        assert_eq!(KeyCode::from_name("é"), None);
    }

    #[test]
    fn snapshot_is_last_write_wins() {
        let state = InputState::new();
        let w = KeyCode::Character('W');
        state.set_key_down(w);
        state.set_key_up(w);
        state.set_key_down(w);
        let snapshot = state.key_snapshot();
        state.set_key_up(w);
        assert!(snapshot.is_down(w));
        assert!(!state.is_key_down(w));
    }

    #[test]
    fn drag_motion_only_accumulates_while_dragging() {
        let state = InputState::new();
        state.add_drag_motion(Vec2::new(5.0, 5.0));
        assert_eq!(state.take_drag_motion(), Vec2::ZERO);

        state.begin_drag();
        state.add_drag_motion(Vec2::new(2.0, -1.0));
        state.add_drag_motion(Vec2::new(3.0, 4.0));
        state.end_drag();
        state.add_drag_motion(Vec2::new(100.0, 100.0));

        assert_eq!(state.take_drag_motion(), Vec2::new(5.0, 3.0));
        assert_eq!(state.take_drag_motion(), Vec2::ZERO);
    }

    #[test]
    fn release_all_clears_keys_and_drag() {
        let state = InputState::new();
        state.set_key_down(KeyCode::Character('A'));
        state.begin_drag();
        state.release_all();
        assert!(state.key_snapshot().is_empty());
        assert!(!state.is_dragging());
    }
}
