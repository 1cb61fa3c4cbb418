//! Topaz Photo AI batch workflow.
//!
//! Photo AI works on the whole batch at once: every image in the directory is
//! opened together, Autopilot is applied to all of them, each item is then
//! visited until its completion check mark is confirmed, and everything is
//! exported in one go.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::BatchResults;
use super::history::RunHistory;
use super::input::InputDriver;
use crate::capture::{RegionSpec, RelativeRect, WindowLocator};
use crate::config::{ButtonPosition, PhotoAiConfig};
use crate::detection::{Detector, Verdict};

/// Photo AI workflow states.
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoAiState {
    Idle,
    /// File dialog: navigate to the directory and open every file
    Opening,
    /// Select all, Apply Autopilot, confirm
    ApplyingAutopilot,
    /// Waiting on item `index` (0-based)
    ReviewingItem(usize),
    Exporting,
    Complete,
    Error(String),
}

impl std::fmt::Display for PhotoAiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhotoAiState::Idle => write!(f, "Idle"),
            PhotoAiState::Opening => write!(f, "Opening images"),
            PhotoAiState::ApplyingAutopilot => write!(f, "Applying Autopilot"),
            PhotoAiState::ReviewingItem(i) => write!(f, "Reviewing item {}", i + 1),
            PhotoAiState::Exporting => write!(f, "Exporting"),
            PhotoAiState::Complete => write!(f, "Complete"),
            PhotoAiState::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// How a button was pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPress {
    Template,
    Fallback,
    /// Nothing to click; the user had `manual_click_wait_ms` to do it
    Manual,
}

pub struct PhotoAiBatch<'a> {
    /// Current state
    pub state: PhotoAiState,
    detector: &'a Detector<'a>,
    input: &'a dyn InputDriver,
    config: &'a PhotoAiConfig,
    dir: PathBuf,
    images: Vec<PathBuf>,
    /// One verdict per reviewed item, in order
    pub item_verdicts: Vec<Verdict>,
    item_started: Instant,
    item_durations: Vec<Duration>,
}

impl<'a> PhotoAiBatch<'a> {
    pub fn new(
        detector: &'a Detector<'a>,
        input: &'a dyn InputDriver,
        config: &'a PhotoAiConfig,
        dir: &Path,
        images: Vec<PathBuf>,
    ) -> Self {
        Self {
            state: PhotoAiState::Idle,
            detector,
            input,
            config,
            dir: dir.to_path_buf(),
            images,
            item_verdicts: Vec::new(),
            item_started: Instant::now(),
            item_durations: Vec::new(),
        }
    }

    fn windows(&self) -> &'a dyn WindowLocator {
        self.detector.windows()
    }

    fn pause(&self, ms: u64) {
        self.detector.clock().sleep(Duration::from_millis(ms));
    }

    fn fail(&mut self, msg: String) -> Result<bool> {
        tracing::error!("{}: {}", self.state, msg);
        self.state = PhotoAiState::Error(msg);
        Ok(false)
    }

    fn key(&self, combo: &str, after_ms: u64) -> std::result::Result<(), String> {
        self.input
            .press_keys(combo)
            .map_err(|e| format!("{} failed: {}", combo, e))?;
        self.pause(after_ms);
        Ok(())
    }

    fn activate(&self) -> std::result::Result<(), String> {
        self.windows()
            .activate_by_title(&self.config.window_title)
            .map(|_| self.pause(500))
            .map_err(|e| format!("Failed to activate window: {}", e))
    }

    /// Template first, then the configured position, then a manual-click grace period.
    fn press_button(
        &self,
        template: &str,
        fallback: Option<ButtonPosition>,
    ) -> std::result::Result<ButtonPress, String> {
        let click = |x: i32, y: i32| {
            self.input
                .click(x, y)
                .map_err(|e| format!("click on '{}' failed: {}", template, e))
        };

        if let Some((x, y)) = self.detector.find_on_screen(template, None) {
            click(x, y)?;
            self.pause(2_000);
            return Ok(ButtonPress::Template);
        }
        if let Some(pos) = fallback {
            tracing::info!("Using fallback coordinates for '{}': ({}, {})", template, pos.x, pos.y);
            click(pos.x, pos.y)?;
            self.pause(2_000);
            return Ok(ButtonPress::Fallback);
        }
        tracing::warn!(
            "Button '{}' not found. Click it manually within {:.0}s, or add {}.png to the template directory",
            template,
            self.config.manual_click_wait_ms as f32 / 1000.0,
            template
        );
        self.pause(self.config.manual_click_wait_ms);
        Ok(ButtonPress::Manual)
    }

    fn open_directory(&self) -> std::result::Result<(), String> {
        let dir = std::path::absolute(&self.dir).map_err(|e| e.to_string())?;
        tracing::info!("Opening {} images from {}", self.images.len(), dir.display());

        self.activate()?;
        self.key("ctrl+o", 3_500)?;
        self.key("ctrl+a", 300)?;
        self.input
            .paste_text(&dir.to_string_lossy())
            .map_err(|e| format!("paste failed: {}", e))?;
        self.pause(800);
        self.key("enter", 2_500)?;

        // File name field is left holding the directory; clear it and
        // select every file in the list instead
        self.key("ctrl+a", 200)?;
        self.key("delete", 300)?;
        self.key("shift+tab", 500)?;
        self.key("ctrl+a", 1_000)?;
        self.key("enter", 0)?;

        self.pause(3_000 + 500 * self.images.len() as u64);
        self.activate()
    }

    fn apply_autopilot(&self) -> std::result::Result<(), String> {
        self.pause(1_000);
        self.key("ctrl+a", 1_500)?;
        let press = self.press_button(&self.config.autopilot_button, self.config.autopilot_fallback)?;
        tracing::debug!("Apply Autopilot pressed via {:?}", press);

        self.pause(1_000);
        if let Some((x, y)) = self.detector.find_on_screen(&self.config.confirm_button, None) {
            self.input
                .click(x, y)
                .map_err(|e| format!("click on '{}' failed: {}", self.config.confirm_button, e))?;
            self.pause(1_000);
        } else {
            tracing::info!("Confirming Autopilot with Enter");
            self.key("enter", 0)?;
        }
        self.pause(2_000);
        tracing::info!("Autopilot applied to all images");
        self.activate()
    }

    fn review_item(&mut self, index: usize) -> Result<bool> {
        tracing::info!("Image {}/{}", index + 1, self.images.len());
        self.item_started = Instant::now();

        // The first item is already selected after opening
        if index > 0 {
            if let Err(msg) = self.key("right", 1_000).and_then(|()| self.key("ctrl+0", 500)) {
                return self.fail(msg);
            }
        }

        let region = RegionSpec::window_relative(&self.config.window_title, RelativeRect::default());
        let verdict = self.detector.wait_for_icon_confirmed(
            &region,
            &self.config.complete_icon,
            &self.config.item_timing,
            Duration::from_millis(self.config.settle_ms),
        );
        if !verdict.should_proceed() {
            let msg = format!("item {} {}", index + 1, verdict);
            self.item_verdicts.push(verdict);
            return self.fail(msg);
        }
        if matches!(verdict, Verdict::Abandoned { .. }) {
            let analyzing = self.still_analyzing(&region);
            tracing::warn!(
                "Image {} not confirmed{}, moving on",
                index + 1,
                if analyzing { " (still analyzing)" } else { "" }
            );
        }
        self.item_verdicts.push(verdict);
        self.item_durations.push(self.item_started.elapsed());

        self.state = if index + 1 < self.images.len() {
            PhotoAiState::ReviewingItem(index + 1)
        } else {
            PhotoAiState::Exporting
        };
        Ok(true)
    }

    /// Any analysis indicator still on screen.
    fn still_analyzing(&self, region: &RegionSpec) -> bool {
        let Some(frame) = self.detector.grab(region, "analyzing") else {
            return false;
        };
        self.config.processing_templates.iter().any(|name| {
            let threshold = self
                .detector
                .config()
                .threshold_for(name, self.detector.config().icon_threshold);
            self.detector.templates().match_named(&frame, name, threshold).found
        })
    }

    fn export(&self) -> std::result::Result<(), String> {
        tracing::info!("Exporting {} images", self.images.len());
        self.activate()?;
        let press = self.press_button(&self.config.export_button, self.config.export_fallback)?;
        tracing::debug!("Export pressed via {:?}", press);
        self.key("enter", 0)?;

        let wait = self.config.export_wait_per_image_ms * self.images.len() as u64;
        tracing::info!(
            "Waiting {:.0}s for {} images to export",
            wait as f32 / 1000.0,
            self.images.len()
        );
        self.pause(wait);
        Ok(())
    }

    /// Advances the batch by one step.
    ///
    /// Returns `Ok(true)` while there is more to do.
    pub fn step(&mut self) -> Result<bool> {
        match &self.state {
            PhotoAiState::Idle => {
                if self.images.is_empty() {
                    return self.fail("No images to process".to_string());
                }
                self.state = PhotoAiState::Opening;
                Ok(true)
            }

            PhotoAiState::Opening => {
                if let Err(msg) = self.open_directory() {
                    return self.fail(msg);
                }
                self.state = PhotoAiState::ApplyingAutopilot;
                Ok(true)
            }

            PhotoAiState::ApplyingAutopilot => {
                if let Err(msg) = self.apply_autopilot() {
                    return self.fail(msg);
                }
                self.state = PhotoAiState::ReviewingItem(0);
                Ok(true)
            }

            PhotoAiState::ReviewingItem(index) => {
                let index = *index;
                self.review_item(index)
            }

            PhotoAiState::Exporting => {
                if let Err(msg) = self.export() {
                    return self.fail(msg);
                }
                self.state = PhotoAiState::Complete;
                Ok(true)
            }

            PhotoAiState::Complete | PhotoAiState::Error(_) => Ok(false),
        }
    }

    pub fn run(&mut self) -> Result<bool> {
        while self.step()? {
            tracing::debug!("Photo AI state: {}", self.state);
        }
        Ok(self.state == PhotoAiState::Complete)
    }

    /// Writes one history entry per image.
    ///
    /// An item counts as successful when the batch exported and its check
    /// mark was confirmed.
    pub fn record(&self, history: &mut RunHistory) -> BatchResults {
        let exported = self.state == PhotoAiState::Complete;
        let mut results = BatchResults {
            total: self.images.len(),
            ..Default::default()
        };
        history.set_total_images(self.images.len());

        for (idx, image) in self.images.iter().enumerate() {
            let verdict = self.item_verdicts.get(idx);
            let confirmed = verdict.is_some_and(Verdict::is_confirmed);
            let success = exported && confirmed;
            let error = match (verdict, &self.state) {
                _ if success => None,
                (_, PhotoAiState::Error(msg)) => Some(msg.clone()),
                (Some(v), _) => Some(v.to_string()),
                (None, _) => Some("not reviewed".to_string()),
            };
            if success {
                results.success += 1;
            } else {
                results.failed += 1;
            }
            let entry = history.add_result(image, success, self.item_durations.get(idx).copied(), error);
            if let Some(v) = verdict {
                entry.detections.push(format!("item: {}", v));
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::input::fake::RecordingInput;
    use crate::capture::fake::{FakeWindows, ScriptedCapturer};
    use crate::capture::{Region, WindowHandle, WindowInfo};
    use crate::config::{DetectionConfig, WaitTiming};
    use crate::detection::DetectionMethod;
    use crate::detection::clock::FakeClock;
    use crate::ocr::TextRecognizer;
    use crate::template::{TemplateFinder, TemplateMatcher, TemplateStore};
    use image::{GrayImage, Luma, Rgba, RgbaImage};
    use std::sync::Arc;

    fn icon() -> GrayImage {
        GrayImage::from_fn(12, 12, |x, y| Luma([((x * 19 + y * 37) % 220) as u8 + 20]))
    }

    fn frame(with_icon: bool) -> Option<RgbaImage> {
        let mut frame = RgbaImage::from_pixel(60, 40, Rgba([0, 0, 0, 255]));
        if with_icon {
            for (x, y, p) in icon().enumerate_pixels() {
                frame.put_pixel(x + 20, y + 10, Rgba([p[0], p[0], p[0], 255]));
            }
        }
        Some(frame)
    }

    fn recognizer(dir: &Path) -> TextRecognizer {
        icon().save(dir.join("complete_check.png")).unwrap();
        let finder = Arc::new(TemplateFinder::new(
            TemplateStore::new(dir),
            TemplateMatcher::new(vec![1.0]),
        ));
        TextRecognizer::new(Vec::new(), finder, 0.7)
    }

    fn photoai_window() -> FakeWindows {
        FakeWindows::new(vec![WindowInfo {
            handle: WindowHandle(7),
            title: "Topaz Photo AI".to_string(),
            rect: Region::new(0, 0, 1920, 1080),
        }])
    }

    fn config() -> PhotoAiConfig {
        PhotoAiConfig {
            autopilot_fallback: Some(ButtonPosition { x: 500, y: 400 }),
            item_timing: WaitTiming::new(0, 1_000, 8_000),
            settle_ms: 3_000,
            export_wait_per_image_ms: 10_000,
            ..PhotoAiConfig::default()
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(PhotoAiState::ReviewingItem(2).to_string(), "Reviewing item 3");
        assert_eq!(PhotoAiState::ApplyingAutopilot.to_string(), "Applying Autopilot");
    }

    #[test]
    fn test_batch_reviews_every_item_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = recognizer(dir.path());
        // Item 1: check mark on the second poll, kept through the settle.
        // Item 2: flickers once, then never again.
        let capturer = ScriptedCapturer::new(vec![
            frame(false),
            frame(true),
            frame(true),
            frame(true),
            frame(false),
            frame(false),
        ]);
        let windows = photoai_window();
        let clock = FakeClock::new();
        let detection = DetectionConfig {
            time_fallback: false,
            ..DetectionConfig::default()
        };
        let detector = Detector::new(&capturer, &windows, &ocr, &clock, detection);
        let input = RecordingInput::default();
        let config = config();
        let images = vec![dir.path().join("a.jpg"), dir.path().join("b.jpg")];

        let mut batch = PhotoAiBatch::new(&detector, &input, &config, dir.path(), images.clone());
        assert!(batch.run().unwrap());

        assert_eq!(
            input.actions(),
            vec![
                "keys:ctrl+o".to_string(),
                "keys:ctrl+a".to_string(),
                format!("paste:{}", dir.path().display()),
                "keys:enter".to_string(),
                "keys:ctrl+a".to_string(),
                "keys:delete".to_string(),
                "keys:shift+tab".to_string(),
                "keys:ctrl+a".to_string(),
                "keys:enter".to_string(),
                "keys:ctrl+a".to_string(),
                "click:500,400".to_string(),
                "keys:enter".to_string(),
                "keys:right".to_string(),
                "keys:ctrl+0".to_string(),
                // No export template or fallback: manual grace period, then Enter
                "keys:enter".to_string(),
            ]
        );

        assert_eq!(
            batch.item_verdicts[0],
            Verdict::Completed {
                method: DetectionMethod::TemplateMatch,
                elapsed: Duration::from_secs(4),
            }
        );
        assert!(matches!(batch.item_verdicts[1], Verdict::Abandoned { .. }));
        assert!(clock.sleeps.borrow().contains(&Duration::from_secs(20)));

        let mut history = RunHistory::start("photoai", Some(dir.path()));
        let results = batch.record(&mut history);
        assert_eq!(
            results,
            BatchResults {
                total: 2,
                success: 1,
                failed: 1
            }
        );
        assert_eq!(history.total_images, 2);
        assert!(history.processed_images[0].success);
        assert_eq!(history.processed_images[1].detections.len(), 1);
    }

    #[test]
    fn test_missing_window_fails_before_input() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = recognizer(dir.path());
        let capturer = ScriptedCapturer::blank(1);
        let windows = FakeWindows::none();
        let clock = FakeClock::new();
        let detector = Detector::new(&capturer, &windows, &ocr, &clock, DetectionConfig::default());
        let input = RecordingInput::default();
        let config = config();

        let mut batch = PhotoAiBatch::new(
            &detector,
            &input,
            &config,
            dir.path(),
            vec![dir.path().join("a.jpg")],
        );
        assert!(!batch.run().unwrap());
        assert!(input.actions().is_empty());

        let mut history = RunHistory::start("photoai", None);
        let results = batch.record(&mut history);
        assert_eq!(results.failed, 1);
        assert!(history.processed_images[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Failed to activate window"));
    }

    #[test]
    fn test_empty_batch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ocr = recognizer(dir.path());
        let capturer = ScriptedCapturer::blank(1);
        let windows = photoai_window();
        let clock = FakeClock::new();
        let detector = Detector::new(&capturer, &windows, &ocr, &clock, DetectionConfig::default());
        let input = RecordingInput::default();
        let config = config();

        let mut batch = PhotoAiBatch::new(&detector, &input, &config, dir.path(), Vec::new());
        assert!(!batch.run().unwrap());
        assert_eq!(batch.state, PhotoAiState::Error("No images to process".to_string()));
    }
}
