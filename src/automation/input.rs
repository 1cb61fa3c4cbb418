//! Keyboard, clipboard and mouse input for driving the Topaz apps.
//!
//! Everything goes through SendInput, so the target window must be in the
//! foreground. Key combos are written as `"ctrl+o"`, `"ctrl+shift+s"`,
//! `"esc"`; modifiers go down in order and come up in reverse.

use crate::error::InputError;

/// Input actions the sequencer needs.
pub trait InputDriver {
    fn press_keys(&self, combo: &str) -> Result<(), InputError>;

    /// Puts `text` on the clipboard and pastes it with Ctrl+V.
    fn paste_text(&self, text: &str) -> Result<(), InputError>;

    /// Left click at absolute screen coordinates.
    fn click(&self, x: i32, y: i32) -> Result<(), InputError>;
}

/// One key in a combo.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Ctrl,
    Shift,
    Alt,
    Enter,
    Escape,
    Tab,
    Space,
    Backspace,
    Delete,
    Home,
    End,
    Left,
    Up,
    Right,
    Down,
    /// F1 to F12
    Function(u8),
    /// A letter or digit
    Char(char),
}

impl Key {
    pub fn parse(name: &str) -> Result<Key, InputError> {
        let lower = name.trim().to_ascii_lowercase();
        let key = match lower.as_str() {
            "ctrl" | "control" => Key::Ctrl,
            "shift" => Key::Shift,
            "alt" => Key::Alt,
            "enter" | "return" => Key::Enter,
            "esc" | "escape" => Key::Escape,
            "tab" => Key::Tab,
            "space" => Key::Space,
            "backspace" => Key::Backspace,
            "delete" | "del" => Key::Delete,
            "home" => Key::Home,
            "end" => Key::End,
            "left" => Key::Left,
            "up" => Key::Up,
            "right" => Key::Right,
            "down" => Key::Down,
            _ => {
                let mut chars = lower.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphanumeric() => Key::Char(c),
                    (Some('f'), Some(_)) => match lower[1..].parse::<u8>() {
                        Ok(n @ 1..=12) => Key::Function(n),
                        _ => return Err(InputError::UnknownKey(name.to_string())),
                    },
                    _ => return Err(InputError::UnknownKey(name.to_string())),
                }
            }
        };
        Ok(key)
    }

    /// Windows virtual-key code.
    pub fn virtual_key(&self) -> u16 {
        match self {
            Key::Ctrl => 0x11,
            Key::Shift => 0x10,
            Key::Alt => 0x12,
            Key::Enter => 0x0D,
            Key::Escape => 0x1B,
            Key::Tab => 0x09,
            Key::Space => 0x20,
            Key::Backspace => 0x08,
            Key::Delete => 0x2E,
            Key::Home => 0x24,
            Key::End => 0x23,
            Key::Left => 0x25,
            Key::Up => 0x26,
            Key::Right => 0x27,
            Key::Down => 0x28,
            Key::Function(n) => 0x70 + (*n as u16 - 1),
            Key::Char(c) => c.to_ascii_uppercase() as u16,
        }
    }

    /// Navigation keys need the extended-key flag.
    pub fn is_extended(&self) -> bool {
        matches!(
            self,
            Key::Delete | Key::Home | Key::End | Key::Left | Key::Up | Key::Right | Key::Down
        )
    }
}

/// Parses `"ctrl+shift+s"` into keys.
pub fn parse_combo(combo: &str) -> Result<Vec<Key>, InputError> {
    combo.split('+').map(Key::parse).collect()
}

/// Key events for a combo: every key down in order, then up in reverse.
/// `true` means key down.
pub fn key_events(keys: &[Key]) -> Vec<(Key, bool)> {
    keys.iter()
        .map(|&k| (k, true))
        .chain(keys.iter().rev().map(|&k| (k, false)))
        .collect()
}

/// SendInput-backed driver for the live desktop.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopInput;

impl DesktopInput {
    pub fn new() -> Self {
        Self
    }
}

impl InputDriver for DesktopInput {
    fn press_keys(&self, combo: &str) -> Result<(), InputError> {
        let keys = parse_combo(combo)?;
        tracing::debug!("Pressing {}", combo);
        platform::send_keys(&key_events(&keys))
    }

    fn paste_text(&self, text: &str) -> Result<(), InputError> {
        platform::set_clipboard_text(text)?;
        std::thread::sleep(std::time::Duration::from_millis(100));
        self.press_keys("ctrl+v")
    }

    fn click(&self, x: i32, y: i32) -> Result<(), InputError> {
        tracing::debug!("Clicking at ({}, {})", x, y);
        platform::click(x, y)
    }
}

#[cfg(windows)]
mod platform {
    use std::time::Duration;

    use windows::Win32::Foundation::{HANDLE, HWND};
    use windows::Win32::System::DataExchange::{
        CloseClipboard, EmptyClipboard, OpenClipboard, SetClipboardData,
    };
    use windows::Win32::System::Memory::{GMEM_MOVEABLE, GlobalAlloc, GlobalLock, GlobalUnlock};
    use windows::Win32::System::Ole::CF_UNICODETEXT;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBD_EVENT_FLAGS, KEYBDINPUT,
        KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, MOUSE_EVENT_FLAGS, MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_LEFTDOWN,
        MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MOVE, MOUSEEVENTF_VIRTUALDESK, MOUSEINPUT, SendInput,
        VIRTUAL_KEY,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
        SM_YVIRTUALSCREEN,
    };

    use super::Key;
    use crate::error::InputError;

    fn send(inputs: &[INPUT]) -> Result<(), InputError> {
        let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            return Err(InputError::Backend(format!(
                "SendInput accepted {} of {} events",
                sent,
                inputs.len()
            )));
        }
        Ok(())
    }

    pub fn send_keys(events: &[(Key, bool)]) -> Result<(), InputError> {
        let inputs: Vec<INPUT> = events
            .iter()
            .map(|&(key, down)| {
                let mut flags = KEYBD_EVENT_FLAGS(0);
                if key.is_extended() {
                    flags |= KEYEVENTF_EXTENDEDKEY;
                }
                if !down {
                    flags |= KEYEVENTF_KEYUP;
                }
                INPUT {
                    r#type: INPUT_KEYBOARD,
                    Anonymous: INPUT_0 {
                        ki: KEYBDINPUT {
                            wVk: VIRTUAL_KEY(key.virtual_key()),
                            dwFlags: flags,
                            ..Default::default()
                        },
                    },
                }
            })
            .collect();
        send(&inputs)
    }

    pub fn set_clipboard_text(text: &str) -> Result<(), InputError> {
        let backend = |what: &str, e: windows::core::Error| {
            InputError::Backend(format!("{} failed: {}", what, e))
        };
        let wide: Vec<u16> = text.encode_utf16().chain(std::iter::once(0)).collect();
        let bytes = wide.len() * std::mem::size_of::<u16>();

        unsafe {
            OpenClipboard(HWND::default()).map_err(|e| backend("OpenClipboard", e))?;
            let result = (|| {
                EmptyClipboard().map_err(|e| backend("EmptyClipboard", e))?;
                let memory =
                    GlobalAlloc(GMEM_MOVEABLE, bytes).map_err(|e| backend("GlobalAlloc", e))?;
                let target = GlobalLock(memory) as *mut u16;
                if target.is_null() {
                    return Err(InputError::Backend("GlobalLock failed".to_string()));
                }
                std::ptr::copy_nonoverlapping(wide.as_ptr(), target, wide.len());
                let _ = GlobalUnlock(memory);
                // The clipboard owns the memory from here on
                SetClipboardData(CF_UNICODETEXT.0 as u32, HANDLE(memory.0))
                    .map_err(|e| backend("SetClipboardData", e))?;
                Ok(())
            })();
            let _ = CloseClipboard();
            result
        }
    }

    pub fn click(x: i32, y: i32) -> Result<(), InputError> {
        let (vx, vy, vw, vh) = unsafe {
            (
                GetSystemMetrics(SM_XVIRTUALSCREEN),
                GetSystemMetrics(SM_YVIRTUALSCREEN),
                GetSystemMetrics(SM_CXVIRTUALSCREEN),
                GetSystemMetrics(SM_CYVIRTUALSCREEN),
            )
        };
        if vw <= 1 || vh <= 1 {
            return Err(InputError::Backend("no virtual screen".to_string()));
        }

        // Normalize to 0-65535 across the virtual desktop
        let norm_x = (((x - vx) as i64 * 65535) / (vw - 1) as i64) as i32;
        let norm_y = (((y - vy) as i64 * 65535) / (vh - 1) as i64) as i32;
        let mouse = |flags: MOUSE_EVENT_FLAGS| INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx: norm_x,
                    dy: norm_y,
                    dwFlags: flags | MOUSEEVENTF_MOVE | MOUSEEVENTF_ABSOLUTE | MOUSEEVENTF_VIRTUALDESK,
                    ..Default::default()
                },
            },
        };

        send(&[mouse(MOUSE_EVENT_FLAGS(0))])?;
        std::thread::sleep(Duration::from_millis(100));
        send(&[mouse(MOUSEEVENTF_LEFTDOWN)])?;
        std::thread::sleep(Duration::from_millis(50));
        send(&[mouse(MOUSEEVENTF_LEFTUP)])
    }
}

#[cfg(not(windows))]
mod platform {
    use super::Key;
    use crate::error::InputError;

    pub fn send_keys(_events: &[(Key, bool)]) -> Result<(), InputError> {
        Err(InputError::Unsupported)
    }

    pub fn set_clipboard_text(_text: &str) -> Result<(), InputError> {
        Err(InputError::Unsupported)
    }

    pub fn click(_x: i32, _y: i32) -> Result<(), InputError> {
        Err(InputError::Unsupported)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_combo() {
        assert_eq!(parse_combo("ctrl+o").unwrap(), vec![Key::Ctrl, Key::Char('o')]);
        assert_eq!(
            parse_combo("Ctrl+Shift+S").unwrap(),
            vec![Key::Ctrl, Key::Shift, Key::Char('s')]
        );
        assert_eq!(parse_combo("esc").unwrap(), vec![Key::Escape]);
        assert_eq!(parse_combo("ctrl+0").unwrap(), vec![Key::Ctrl, Key::Char('0')]);
        assert_eq!(parse_combo("f12").unwrap(), vec![Key::Function(12)]);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(matches!(parse_combo("ctrl+banana"), Err(InputError::UnknownKey(k)) if k == "banana"));
        assert!(parse_combo("f13").is_err());
        assert!(parse_combo("ctrl+").is_err());
    }

    #[test]
    fn test_modifiers_release_in_reverse() {
        let keys = parse_combo("ctrl+shift+s").unwrap();
        assert_eq!(
            key_events(&keys),
            vec![
                (Key::Ctrl, true),
                (Key::Shift, true),
                (Key::Char('s'), true),
                (Key::Char('s'), false),
                (Key::Shift, false),
                (Key::Ctrl, false),
            ]
        );
    }

    #[test]
    fn test_virtual_keys() {
        assert_eq!(Key::Char('a').virtual_key(), 0x41);
        assert_eq!(Key::Char('0').virtual_key(), 0x30);
        assert_eq!(Key::Function(1).virtual_key(), 0x70);
        assert_eq!(Key::Right.virtual_key(), 0x27);
        assert!(Key::Right.is_extended());
        assert!(!Key::Enter.is_extended());
    }
}
