//! Window discovery by title.
//!
//! Topaz windows carry the product name plus the open file in their title,
//! so lookup is a case-insensitive substring match over visible, titled
//! top-level windows.

use super::region::Region;
use crate::error::WindowError;

/// Opaque top-level window handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

/// A visible top-level window.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub title: String,
    pub rect: Region,
}

/// Case-insensitive substring test used for every title comparison.
pub fn title_matches(title: &str, substring: &str) -> bool {
    title.to_lowercase().contains(&substring.to_lowercase())
}

/// OS window queries needed by the detector and the sequencer.
pub trait WindowLocator {
    /// Visible windows with a non-empty title, in Z order.
    fn list_windows(&self) -> Vec<WindowInfo>;

    fn window_rect(&self, handle: WindowHandle) -> Option<Region>;

    /// Title of the foreground window, if any.
    fn active_window_title(&self) -> Option<String>;

    /// Restores the window if minimized and brings it to the foreground.
    fn activate(&self, handle: WindowHandle) -> Result<(), WindowError>;

    fn find_window(&self, title_substring: &str) -> Option<WindowHandle> {
        self.list_windows()
            .into_iter()
            .find(|w| title_matches(&w.title, title_substring))
            .map(|w| w.handle)
    }

    /// Finds and activates a window in one go.
    fn activate_by_title(&self, title_substring: &str) -> Result<WindowHandle, WindowError> {
        let handle = self
            .find_window(title_substring)
            .ok_or_else(|| WindowError::NotFound(title_substring.to_string()))?;
        self.activate(handle)?;
        Ok(handle)
    }
}

/// Window queries against the live desktop.
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopWindows;

impl DesktopWindows {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(windows)]
mod platform {
    use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT, TRUE};
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetForegroundWindow, GetWindowRect, GetWindowTextLengthW, GetWindowTextW,
        IsIconic, IsWindow, IsWindowVisible, SW_RESTORE, SetForegroundWindow, ShowWindow,
    };

    use super::{DesktopWindows, WindowHandle, WindowInfo, WindowLocator};
    use crate::capture::region::Region;
    use crate::error::WindowError;

    fn to_hwnd(handle: WindowHandle) -> HWND {
        HWND(handle.0 as *mut std::ffi::c_void)
    }

    fn to_region(rect: &RECT) -> Region {
        Region::new(
            rect.left,
            rect.top,
            (rect.right - rect.left).max(0) as u32,
            (rect.bottom - rect.top).max(0) as u32,
        )
    }

    fn window_title(hwnd: HWND) -> String {
        unsafe {
            let title_len = GetWindowTextLengthW(hwnd);
            if title_len <= 0 {
                return String::new();
            }
            let mut title_buf: Vec<u16> = vec![0; (title_len + 1) as usize];
            let copied = GetWindowTextW(hwnd, &mut title_buf);
            String::from_utf16_lossy(&title_buf[..copied.max(0) as usize])
        }
    }

    unsafe extern "system" fn enum_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
        unsafe {
            let windows = &mut *(lparam.0 as *mut Vec<WindowInfo>);

            // Skip invisible windows
            if !IsWindowVisible(hwnd).as_bool() {
                return TRUE;
            }

            // Skip windows without title (usually not main windows)
            let title = window_title(hwnd);
            if title.is_empty() {
                return TRUE;
            }

            let mut rect = RECT::default();
            if GetWindowRect(hwnd, &mut rect).is_err() {
                return TRUE;
            }

            windows.push(WindowInfo {
                handle: WindowHandle(hwnd.0 as isize),
                title,
                rect: to_region(&rect),
            });
            TRUE
        }
    }

    impl WindowLocator for DesktopWindows {
        fn list_windows(&self) -> Vec<WindowInfo> {
            let mut windows: Vec<WindowInfo> = Vec::new();
            unsafe {
                let _ = EnumWindows(
                    Some(enum_callback),
                    LPARAM(&mut windows as *mut Vec<WindowInfo> as isize),
                );
            }
            windows
        }

        fn window_rect(&self, handle: WindowHandle) -> Option<Region> {
            let hwnd = to_hwnd(handle);
            let mut rect = RECT::default();
            unsafe {
                if !IsWindow(hwnd).as_bool() {
                    return None;
                }
                GetWindowRect(hwnd, &mut rect).ok()?;
            }
            Some(to_region(&rect))
        }

        fn active_window_title(&self) -> Option<String> {
            let hwnd = unsafe { GetForegroundWindow() };
            if hwnd.is_invalid() {
                return None;
            }
            Some(window_title(hwnd))
        }

        fn activate(&self, handle: WindowHandle) -> Result<(), WindowError> {
            let hwnd = to_hwnd(handle);
            unsafe {
                if !IsWindow(hwnd).as_bool() {
                    return Err(WindowError::Backend("window no longer exists".to_string()));
                }
                if IsIconic(hwnd).as_bool() {
                    let _ = ShowWindow(hwnd, SW_RESTORE);
                }
                if !SetForegroundWindow(hwnd).as_bool() {
                    return Err(WindowError::Backend(
                        "SetForegroundWindow refused".to_string(),
                    ));
                }
            }
            Ok(())
        }
    }
}

#[cfg(not(windows))]
mod platform {
    use super::{DesktopWindows, WindowHandle, WindowInfo, WindowLocator};
    use crate::capture::region::Region;
    use crate::error::WindowError;

    impl WindowLocator for DesktopWindows {
        fn list_windows(&self) -> Vec<WindowInfo> {
            Vec::new()
        }

        fn window_rect(&self, _handle: WindowHandle) -> Option<Region> {
            None
        }

        fn active_window_title(&self) -> Option<String> {
            None
        }

        fn activate(&self, _handle: WindowHandle) -> Result<(), WindowError> {
            Err(WindowError::Unsupported)
        }
    }
}
