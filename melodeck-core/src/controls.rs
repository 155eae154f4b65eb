//! Keyboard shortcuts of the player window.
//!
//! | Key          | Action                 |
//! |--------------|------------------------|
//! | `Space`      | toggle play/pause      |
//! | `Ctrl+Right` | next song              |
//! | `Ctrl+Left`  | previous song          |
//! | `Escape`     | close the mirror view  |

use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Space,
    ArrowLeft,
    ArrowRight,
    Escape,
    Char(char),
}

/// A key with its modifier state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub key: Key,
    pub ctrl: bool,
}

impl KeyPress {
    #[must_use]
    pub const fn new(key: Key) -> Self {
        Self { key, ctrl: false }
    }

    #[must_use]
    pub const fn ctrl(key: Key) -> Self {
        Self { key, ctrl: true }
    }
}

/// Shortcut notation that does not name a key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseKeyError {
    #[error("unknown key {part:?} in {input:?}")]
    UnknownKey { part: String, input: String },

    #[error("no key in {0:?}")]
    MissingKey(String),
}

/// Parses shortcut notation such as `"Space"` or `"Ctrl+Right"`
impl FromStr for KeyPress {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ctrl = false;
        let mut key = None;

        for part in s.split('+').map(str::trim) {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => ctrl = true,
                "space" => key = Some(Key::Space),
                "left" | "arrowleft" => key = Some(Key::ArrowLeft),
                "right" | "arrowright" => key = Some(Key::ArrowRight),
                "esc" | "escape" => key = Some(Key::Escape),
                other => {
                    let mut chars = other.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => key = Some(Key::Char(c)),
                        _ => {
                            return Err(ParseKeyError::UnknownKey {
                                part: part.to_string(),
                                input: s.to_string(),
                            })
                        }
                    }
                }
            }
        }

        key.map(|key| Self { key, ctrl })
            .ok_or_else(|| ParseKeyError::MissingKey(s.to_string()))
    }
}

/// What a shortcut does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    TogglePlay,
    Next,
    Previous,
    CloseMirror,
}

/// Map a key press to its action. Arrows only act with Ctrl held.
#[must_use]
pub const fn map_key(press: KeyPress) -> Option<ControlAction> {
    match (press.key, press.ctrl) {
        (Key::Space, _) => Some(ControlAction::TogglePlay),
        (Key::ArrowRight, true) => Some(ControlAction::Next),
        (Key::ArrowLeft, true) => Some(ControlAction::Previous),
        (Key::Escape, _) => Some(ControlAction::CloseMirror),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_key() {
        assert_eq!(map_key(KeyPress::new(Key::Space)), Some(ControlAction::TogglePlay));
        assert_eq!(map_key(KeyPress::ctrl(Key::ArrowRight)), Some(ControlAction::Next));
        assert_eq!(map_key(KeyPress::ctrl(Key::ArrowLeft)), Some(ControlAction::Previous));
        assert_eq!(map_key(KeyPress::new(Key::Escape)), Some(ControlAction::CloseMirror));
    }

    #[test]
    fn test_arrows_need_ctrl() {
        assert_eq!(map_key(KeyPress::new(Key::ArrowRight)), None);
        assert_eq!(map_key(KeyPress::new(Key::ArrowLeft)), None);
        assert_eq!(map_key(KeyPress::ctrl(Key::Char('x'))), None);
    }

    #[test]
    fn test_parse_key_press() {
        assert_eq!("Space".parse::<KeyPress>().unwrap(), KeyPress::new(Key::Space));
        assert_eq!(
            "Ctrl+Right".parse::<KeyPress>().unwrap(),
            KeyPress::ctrl(Key::ArrowRight)
        );
        assert_eq!(
            "ctrl + arrowleft".parse::<KeyPress>().unwrap(),
            KeyPress::ctrl(Key::ArrowLeft)
        );
        assert_eq!("Esc".parse::<KeyPress>().unwrap(), KeyPress::new(Key::Escape));
        assert_eq!("q".parse::<KeyPress>().unwrap(), KeyPress::new(Key::Char('q')));
    }

    #[test]
    fn test_parse_invalid_key_press() {
        assert_eq!(
            "Ctrl".parse::<KeyPress>(),
            Err(ParseKeyError::MissingKey("Ctrl".to_string()))
        );
        assert_eq!(
            "Ctrl+Banana".parse::<KeyPress>(),
            Err(ParseKeyError::UnknownKey {
                part: "Banana".to_string(),
                input: "Ctrl+Banana".to_string(),
            })
        );
        assert!(matches!(
            "".parse::<KeyPress>(),
            Err(ParseKeyError::UnknownKey { .. } | ParseKeyError::MissingKey(_))
        ));
    }
}
