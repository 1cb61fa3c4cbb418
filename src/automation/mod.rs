//! Batch automation of the Topaz applications.
//!
//! This module provides:
//! - Keyboard, clipboard and mouse input (`InputDriver`)
//! - Input discovery and output file helpers
//! - The Gigapixel per-image workflow and the Photo AI batch workflow
//! - JSON run history

pub mod files;
pub mod gigapixel;
pub mod history;
pub mod input;
pub mod photoai;

pub use files::{Discovery, discover_images};
pub use gigapixel::run_batch;
pub use history::{RunHistory, recent};
pub use input::DesktopInput;
pub use photoai::PhotoAiBatch;

/// Counts from one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchResults {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}
