//! Topaz Gigapixel per-image workflow.
//!
//! The workflow sequences through: Activate → Open → Verify → Zoom → Preview
//! wait → Save → Save wait → (Verify output) → Close export dialog. Waits are
//! fail-open; only a missing window, failed input or an unverifiable wait
//! stops an image. With an output directory configured the saved file must
//! also show up on disk.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::BatchResults;
use super::files::{is_file_ready, unique_output_path, wait_for_file};
use super::history::RunHistory;
use super::input::InputDriver;
use crate::capture::{RegionSpec, WindowLocator};
use crate::config::{GigapixelConfig, WaitTiming};
use crate::detection::{Detector, Verdict};

/// Gigapixel workflow states.
#[derive(Debug, Clone, PartialEq)]
pub enum GigapixelState {
    /// Not started
    Idle,
    /// Bringing the main window to the front
    Activating,
    /// Ctrl+O, path, Enter
    Opening,
    /// Waiting for the file name in the title bar
    VerifyingLoad,
    /// Ctrl+0
    ZoomingToFit,
    /// Waiting for the preview to finish enhancing
    WaitingForPreview,
    /// Ctrl+S, Enter
    Saving,
    /// Waiting for the export queue to finish
    WaitingForSave,
    /// Waiting for the saved file to exist and stop growing
    VerifyingOutput,
    /// Esc out of the export dialog
    ClosingExport,
    /// Image done
    Complete,
    /// Error occurred
    Error(String),
}

impl std::fmt::Display for GigapixelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GigapixelState::Idle => write!(f, "Idle"),
            GigapixelState::Activating => write!(f, "Activating window"),
            GigapixelState::Opening => write!(f, "Opening image"),
            GigapixelState::VerifyingLoad => write!(f, "Verifying load"),
            GigapixelState::ZoomingToFit => write!(f, "Zooming to fit"),
            GigapixelState::WaitingForPreview => write!(f, "Waiting for preview"),
            GigapixelState::Saving => write!(f, "Saving"),
            GigapixelState::WaitingForSave => write!(f, "Waiting for save"),
            GigapixelState::VerifyingOutput => write!(f, "Verifying output"),
            GigapixelState::ClosingExport => write!(f, "Closing export dialog"),
            GigapixelState::Complete => write!(f, "Complete"),
            GigapixelState::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

/// The saved file's size must hold this long before it counts as written.
const OUTPUT_STABLE_FOR: Duration = Duration::from_secs(2);

/// `<dir>/<stem>_upscaled.<ext>`, numbered if taken.
fn output_path(dir: &Path, image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = image
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    unique_output_path(&dir.join(format!("{}_upscaled{}", stem, ext)))
}

/// One image going through Gigapixel.
pub struct GigapixelJob<'a> {
    /// Current state
    pub state: GigapixelState,
    detector: &'a Detector<'a>,
    input: &'a dyn InputDriver,
    config: &'a GigapixelConfig,
    title_timing: WaitTiming,
    image: PathBuf,
    output: Option<PathBuf>,
    /// How each wait resolved, labeled by step
    pub verdicts: Vec<(&'static str, Verdict)>,
}

impl<'a> GigapixelJob<'a> {
    pub fn new(
        detector: &'a Detector<'a>,
        input: &'a dyn InputDriver,
        config: &'a GigapixelConfig,
        title_timing: WaitTiming,
        image: &Path,
    ) -> Self {
        Self {
            state: GigapixelState::Idle,
            detector,
            input,
            config,
            title_timing,
            image: image.to_path_buf(),
            output: config.output_dir.as_deref().map(|dir| output_path(dir, image)),
            verdicts: Vec::new(),
        }
    }

    /// Where the image will be saved, if an output directory is configured.
    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    fn windows(&self) -> &'a dyn WindowLocator {
        self.detector.windows()
    }

    fn pause(&self, ms: u64) {
        self.detector.clock().sleep(Duration::from_millis(ms));
    }

    fn fail(&mut self, msg: String) -> Result<bool> {
        tracing::error!("{}: {}", self.state, msg);
        self.state = GigapixelState::Error(msg);
        Ok(false)
    }

    /// Keeps the verdict; an unverifiable wait stops the image.
    fn record(&mut self, step: &'static str, verdict: Verdict, next: GigapixelState) -> Result<bool> {
        let proceed = verdict.should_proceed();
        let reason = verdict.to_string();
        self.verdicts.push((step, verdict));
        if !proceed {
            return self.fail(format!("{} {}", step, reason));
        }
        self.state = next;
        Ok(true)
    }

    fn keys(&self, combos: &[&str], gap_ms: u64) -> std::result::Result<(), String> {
        for combo in combos {
            self.input
                .press_keys(combo)
                .map_err(|e| format!("{} failed: {}", combo, e))?;
            self.pause(gap_ms);
        }
        Ok(())
    }

    /// Advances the workflow by one step.
    ///
    /// Returns `Ok(true)` if the job should continue, `Ok(false)` once complete or failed.
    pub fn step(&mut self) -> Result<bool> {
        match &self.state {
            GigapixelState::Idle => {
                tracing::info!("Processing image: {}", self.image.display());
                self.state = GigapixelState::Activating;
                Ok(true)
            }

            GigapixelState::Activating => {
                if let Err(e) = self.windows().activate_by_title(&self.config.window_title) {
                    return self.fail(format!("Failed to activate window: {}", e));
                }
                self.pause(500);
                self.state = GigapixelState::Opening;
                Ok(true)
            }

            GigapixelState::Opening => {
                let path = std::path::absolute(&self.image)?;
                tracing::info!("Opening file: {}", path.display());
                if let Err(msg) = self.keys(&["ctrl+o"], 1_000) {
                    return self.fail(msg);
                }
                // The open dialog takes over the foreground title
                let dialog = self
                    .detector
                    .wait_for_title_not_contains(&self.config.window_title, &self.title_timing);
                if !dialog.is_confirmed() {
                    tracing::warn!("Open dialog not detected, typing the path anyway");
                }
                self.verdicts.push(("dialog", dialog));

                let opened = self
                    .keys(&["ctrl+a", "delete"], 300)
                    .and_then(|()| {
                        self.input
                            .paste_text(&path.to_string_lossy())
                            .map_err(|e| format!("paste failed: {}", e))
                    })
                    .and_then(|()| {
                        self.pause(1_000);
                        self.keys(&["enter"], 0)
                    });
                if let Err(msg) = opened {
                    return self.fail(msg);
                }
                self.state = GigapixelState::VerifyingLoad;
                Ok(true)
            }

            GigapixelState::VerifyingLoad => {
                let name = self
                    .image
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let verdict = self.detector.verify_image_loaded(&name, &self.title_timing);
                if !verdict.is_confirmed() {
                    tracing::warn!("Image load not confirmed, continuing anyway");
                    self.pause(1_000);
                }
                self.record("load", verdict, GigapixelState::ZoomingToFit)
            }

            GigapixelState::ZoomingToFit => {
                self.pause(1_500);
                if let Err(e) = self.windows().activate_by_title(&self.config.window_title) {
                    return self.fail(format!("Failed to activate window: {}", e));
                }
                if let Err(msg) = self.keys(&["ctrl+0"], 1_000) {
                    return self.fail(msg);
                }
                self.state = GigapixelState::WaitingForPreview;
                Ok(true)
            }

            GigapixelState::WaitingForPreview => {
                tracing::info!(
                    "Waiting {:.1}s before watching the preview",
                    self.config.processing_wait_ms as f32 / 1000.0
                );
                self.pause(self.config.processing_wait_ms);
                let region =
                    RegionSpec::window_relative(&self.config.window_title, self.config.preview_region);
                let verdict = self.detector.wait_for_text_disappear(
                    &region,
                    &self.config.processing_text,
                    &self.config.preview_timing,
                );
                self.record("preview", verdict, GigapixelState::Saving)
            }

            GigapixelState::Saving => {
                if let Err(e) = self.windows().activate_by_title(&self.config.window_title) {
                    return self.fail(format!("Failed to activate window: {}", e));
                }
                self.pause(500);
                let saved = match &self.output {
                    Some(output) => {
                        let output = std::path::absolute(output)?;
                        tracing::info!("Saving to {}", output.display());
                        self.keys(&["ctrl+s"], 2_500)
                            .and_then(|()| self.keys(&["ctrl+a"], 300))
                            .and_then(|()| {
                                self.input
                                    .paste_text(&output.to_string_lossy())
                                    .map_err(|e| format!("paste failed: {}", e))
                            })
                            .and_then(|()| {
                                self.pause(500);
                                self.keys(&["enter"], 0)
                            })
                    }
                    None => self
                        .keys(&["ctrl+s"], 2_500)
                        .and_then(|()| self.keys(&["enter"], 0)),
                };
                if let Err(msg) = saved {
                    return self.fail(msg);
                }
                self.state = GigapixelState::WaitingForSave;
                Ok(true)
            }

            GigapixelState::WaitingForSave => {
                let verdict = self.detector.wait_for_phase_transition(
                    &RegionSpec::Absolute(self.config.queue_region),
                    &self.config.save_processing_text,
                    &self.config.save_done_text,
                    &self.config.save_timing,
                );
                let next = if self.output.is_some() {
                    GigapixelState::VerifyingOutput
                } else {
                    GigapixelState::ClosingExport
                };
                self.record("save", verdict, next)
            }

            GigapixelState::VerifyingOutput => {
                let Some(output) = self.output.clone() else {
                    self.state = GigapixelState::ClosingExport;
                    return Ok(true);
                };
                let clock = self.detector.clock();
                let timeout = Duration::from_millis(self.config.output_wait_ms);
                if !wait_for_file(&output, timeout, clock) {
                    return self.fail(format!("output not written: {}", output.display()));
                }
                if !is_file_ready(&output, OUTPUT_STABLE_FOR, clock) {
                    return self.fail(format!("output still being written: {}", output.display()));
                }
                tracing::info!("Image saved: {}", output.display());
                self.state = GigapixelState::ClosingExport;
                Ok(true)
            }

            GigapixelState::ClosingExport => {
                self.pause(1_000);
                if let Err(msg) = self.keys(&["esc", "esc"], 1_000) {
                    return self.fail(msg);
                }
                let verdict = self
                    .detector
                    .wait_for_dialog_closed(&self.config.window_title, &self.title_timing);
                if !verdict.is_confirmed() {
                    tracing::warn!("Export dialog may still be open, pressing Esc again");
                    if let Err(msg) = self.keys(&["esc"], 1_000) {
                        return self.fail(msg);
                    }
                }
                self.record("close", verdict, GigapixelState::Complete)
            }

            GigapixelState::Complete | GigapixelState::Error(_) => Ok(false),
        }
    }

    /// Steps until the job completes or fails.
    pub fn run(&mut self) -> Result<bool> {
        while self.step()? {
            tracing::debug!("Gigapixel state: {}", self.state);
        }
        Ok(self.state == GigapixelState::Complete)
    }

    pub fn detection_notes(&self) -> Vec<String> {
        self.verdicts
            .iter()
            .map(|(step, verdict)| format!("{}: {}", step, verdict))
            .collect()
    }
}

/// Runs every image in order, recording each outcome.
pub fn run_batch(
    detector: &Detector<'_>,
    input: &dyn InputDriver,
    config: &GigapixelConfig,
    title_timing: WaitTiming,
    images: &[PathBuf],
    history: &mut RunHistory,
) -> BatchResults {
    let mut results = BatchResults {
        total: images.len(),
        ..Default::default()
    };
    history.set_total_images(images.len());

    for (idx, image) in images.iter().enumerate() {
        tracing::info!("[{}/{}] {}", idx + 1, images.len(), image.display());
        let started = Instant::now();
        let mut job = GigapixelJob::new(detector, input, config, title_timing, image);

        let (success, error) = match job.run() {
            Ok(true) => (true, None),
            Ok(false) => (false, Some(job.state.to_string())),
            Err(e) => (false, Some(format!("{:#}", e))),
        };
        let duration = started.elapsed();

        if success {
            results.success += 1;
            tracing::info!("Image #{} done in {:.1}s", idx + 1, duration.as_secs_f32());
        } else {
            results.failed += 1;
            tracing::error!(
                "Image #{} failed after {:.1}s: {}",
                idx + 1,
                duration.as_secs_f32(),
                error.as_deref().unwrap_or("unknown error")
            );
        }
        history
            .add_result(image, success, Some(duration), error)
            .detections = job.detection_notes();
    }

    tracing::info!(
        "Batch finished: {}/{} succeeded, {} failed",
        results.success,
        results.total,
        results.failed
    );
    results
}
