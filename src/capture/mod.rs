//! Screen access for the detector.
//!
//! This module provides:
//! - Region types (`Region`, `RelativeRect`, `RegionSpec`)
//! - Region capture (`RegionCapturer`, `ScreenCapturer`)
//! - Window lookup by title (`WindowLocator`, `DesktopWindows`)

pub mod region;
pub mod screen;
pub mod window;

pub use region::{Region, RegionSpec, RelativeRect};
pub use screen::{RegionCapturer, ScreenCapturer};
pub use window::{DesktopWindows, WindowHandle, WindowInfo, WindowLocator, title_matches};
