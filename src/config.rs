//! Configuration types.
//!
//! Loads settings from config.json at startup. Provides detection thresholds,
//! OCR backend settings, wait timings and per-application UI constants.
//! Every field has a default, so a partial config.json is fine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use crate::capture::{Region, RelativeRect};

/// Global configuration instance, initialized once at startup.
static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Timing for one polling wait, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitTiming {
    /// Grace period before the first check
    pub initial_wait_ms: u64,
    /// Sleep between checks
    pub check_interval_ms: u64,
    /// Total budget, counted from call entry
    pub timeout_ms: u64,
}

impl WaitTiming {
    pub const fn new(initial_wait_ms: u64, check_interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            initial_wait_ms,
            check_interval_ms,
            timeout_ms,
        }
    }

    pub fn initial_wait(&self) -> Duration {
        Duration::from_millis(self.initial_wait_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Template matching and detector behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Threshold for buttons and other opaque templates
    pub default_threshold: f32,
    /// Threshold for status icons
    pub icon_threshold: f32,
    /// Threshold for status words matched as glyph templates
    pub text_template_threshold: f32,
    /// Per-template overrides (transparent icons need less)
    pub template_thresholds: HashMap<String, f32>,
    /// Scale factors tried for every template
    pub scales: Vec<f32>,
    /// When no backend can verify a wait, sleep `fallback_delay_ms` and proceed
    pub time_fallback: bool,
    pub fallback_delay_ms: u64,
    /// Save every polled frame to `debug_dir`
    pub debug: bool,
    pub debug_dir: Option<PathBuf>,
    /// Overrides `<exe_dir>/resources/templates`
    pub template_dir: Option<PathBuf>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let mut template_thresholds = HashMap::new();
        template_thresholds.insert("complete_check".to_string(), 0.6);
        template_thresholds.insert("analyzing_spinner".to_string(), 0.6);

        Self {
            default_threshold: 0.8,
            icon_threshold: 0.7,
            text_template_threshold: 0.7,
            template_thresholds,
            scales: vec![0.3, 0.5, 0.75, 1.0, 1.25, 1.5, 2.0, 2.5, 3.0],
            time_fallback: true,
            fallback_delay_ms: 10_000,
            debug: false,
            debug_dir: None,
            template_dir: None,
        }
    }
}

impl DetectionConfig {
    /// Returns the override for `name`, or `fallback` if there is none.
    pub fn threshold_for(&self, name: &str, fallback: f32) -> f32 {
        self.template_thresholds
            .get(name)
            .copied()
            .unwrap_or(fallback)
    }

    pub fn resolved_debug_dir(&self) -> PathBuf {
        self.debug_dir
            .clone()
            .unwrap_or_else(crate::paths::get_debug_dir)
    }

    pub fn resolved_template_dir(&self) -> PathBuf {
        self.template_dir
            .clone()
            .unwrap_or_else(crate::paths::get_template_dir)
    }
}

/// OCR backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Explicit tesseract executable; searched for when unset
    pub tesseract_path: Option<PathBuf>,
    /// Explicit tessdata directory; the engine default is used when unset and not found
    pub tessdata_dir: Option<PathBuf>,
    pub language: String,
    /// Tesseract page segmentation mode
    pub psm: u8,
    /// Words at or below this confidence are dropped before matching
    pub min_word_confidence: f32,
    /// Base URL of the secondary OCR server; `None` disables it
    pub remote_url: Option<String>,
    pub remote_timeout_ms: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_path: None,
            tessdata_dir: None,
            language: "eng".to_string(),
            psm: 6,
            min_word_confidence: 30.0,
            remote_url: Some("http://127.0.0.1:8866".to_string()),
            remote_timeout_ms: 10_000,
        }
    }
}

/// Topaz Gigapixel settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GigapixelConfig {
    pub window_title: String,
    /// Shown in the preview panel while the preview renders
    pub processing_text: String,
    /// Shown in the export queue while saving
    pub save_processing_text: String,
    pub save_done_text: String,
    /// Preview panel, relative to the main window
    pub preview_region: RelativeRect,
    /// Export dialog queue, absolute screen coordinates
    pub queue_region: Region,
    /// Fixed pause before watching the preview
    pub processing_wait_ms: u64,
    pub preview_timing: WaitTiming,
    pub save_timing: WaitTiming,
    /// Files whose stem ends with one of these are outputs, not inputs
    pub processed_suffixes: Vec<String>,
    /// When set, each image is saved as `<stem>_upscaled.<ext>` here and the
    /// file is waited for. Otherwise Gigapixel's own export settings apply.
    pub output_dir: Option<PathBuf>,
    /// How long to wait for the saved file to appear
    pub output_wait_ms: u64,
}

impl Default for GigapixelConfig {
    fn default() -> Self {
        Self {
            window_title: "Topaz Gigapixel".to_string(),
            processing_text: "Enhancing".to_string(),
            save_processing_text: "Processing".to_string(),
            save_done_text: "Done".to_string(),
            // Right-hand panel of a maximized 1920x1080 window
            preview_region: RelativeRect {
                x: 0.755,
                y: 0.028,
                width: 0.235,
                height: 0.278,
            },
            queue_region: Region::new(140, 130, 720, 150),
            processing_wait_ms: 5_000,
            preview_timing: WaitTiming::new(3_000, 2_000, 300_000),
            save_timing: WaitTiming::new(2_000, 2_000, 300_000),
            processed_suffixes: [
                "_upscaled",
                "-gigapixel",
                "_2x",
                "_4x",
                "_6x",
                "-enhanced",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            output_dir: None,
            output_wait_ms: 30_000,
        }
    }
}

/// A fallback click position in absolute screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonPosition {
    pub x: i32,
    pub y: i32,
}

/// Topaz Photo AI settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoAiConfig {
    pub window_title: String,
    /// Check mark shown on an item once its filters are applied
    pub complete_icon: String,
    /// Any of these visible means the item is still being analyzed
    pub processing_templates: Vec<String>,
    pub autopilot_button: String,
    pub confirm_button: String,
    pub export_button: String,
    pub autopilot_fallback: Option<ButtonPosition>,
    pub export_fallback: Option<ButtonPosition>,
    /// Grace period for a manual click when a button cannot be found
    pub manual_click_wait_ms: u64,
    pub item_timing: WaitTiming,
    /// Delay before re-checking a tentative completion icon
    pub settle_ms: u64,
    pub export_wait_per_image_ms: u64,
    pub processed_suffixes: Vec<String>,
}

impl Default for PhotoAiConfig {
    fn default() -> Self {
        Self {
            window_title: "Photo AI".to_string(),
            complete_icon: "complete_check".to_string(),
            processing_templates: vec![
                "analyzing_spinner".to_string(),
                "analyzing_text".to_string(),
            ],
            autopilot_button: "apply_autopilot".to_string(),
            confirm_button: "apply_confirm".to_string(),
            export_button: "export_button".to_string(),
            autopilot_fallback: None,
            export_fallback: None,
            manual_click_wait_ms: 5_000,
            item_timing: WaitTiming::new(3_000, 2_000, 30_000),
            settle_ms: 3_000,
            export_wait_per_image_ms: 10_000,
            processed_suffixes: ["_photoai", "-photoai", "_enhanced", "-enhanced", "_ai"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,
    pub detection: DetectionConfig,
    pub ocr: OcrConfig,
    /// Title-bar polling (image load, dialog close)
    pub title_timing: WaitTiming,
    pub gigapixel: GigapixelConfig,
    pub photoai: PhotoAiConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            detection: DetectionConfig::default(),
            ocr: OcrConfig::default(),
            title_timing: WaitTiming::new(0, 500, 15_000),
            gigapixel: GigapixelConfig::default(),
            photoai: PhotoAiConfig::default(),
        }
    }
}

/// How `load_config_from` got its result.
///
/// Loading runs before the log subscriber exists, so the outcome is kept and
/// reported with [`ConfigLoad::log`] once logging is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLoad {
    Loaded,
    Missing,
    Unreadable(String),
    Invalid(String),
}

impl ConfigLoad {
    pub fn log(&self, path: &Path) {
        tracing::info!("Looking for config at: {}", path.display());
        match self {
            ConfigLoad::Loaded => tracing::info!("Config loaded from {}", path.display()),
            ConfigLoad::Missing => {
                tracing::info!("{} not found. Using default config.", path.display())
            }
            ConfigLoad::Unreadable(e) => {
                tracing::warn!("Failed to read {}: {}. Using defaults.", path.display(), e)
            }
            ConfigLoad::Invalid(e) => {
                tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e)
            }
        }
    }
}

/// Loads configuration from `path`, or returns defaults.
pub fn load_config_from(path: &Path) -> (AppConfig, ConfigLoad) {
    if !path.exists() {
        return (AppConfig::default(), ConfigLoad::Missing);
    }
    match fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(config) => (config, ConfigLoad::Loaded),
            Err(e) => (AppConfig::default(), ConfigLoad::Invalid(e.to_string())),
        },
        Err(e) => (AppConfig::default(), ConfigLoad::Unreadable(e.to_string())),
    }
}

/// Initializes the global configuration. Call once at startup.
///
/// Returns the stored instance; a second call keeps the first config.
pub fn init_config(config: AppConfig) -> &'static AppConfig {
    CONFIG.get_or_init(|| config)
}
