//! Completion detection for Topaz UI operations.
//!
//! This module provides:
//! - The pure completion state machines (`machines`)
//! - The polling `Detector` that feeds them from screen captures
//! - Window-title waits
//! - `Verdict`, the fail-open outcome every wait returns

pub mod clock;
pub mod detector;
pub mod machines;
pub mod title;
pub mod verdict;

pub use clock::{Clock, SystemClock};
pub use detector::Detector;
pub use verdict::{DetectionMethod, Verdict};
