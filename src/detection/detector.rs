//! Polling detector: drives the completion state machines from live captures.
//!
//! Every wait shares one skeleton. It sleeps `initial_wait`, then polls while
//! the elapsed time since call entry is below `timeout`, sleeping
//! `check_interval` between polls. A failed capture or a missing window is
//! treated as "not detected" for that poll.

use image::RgbaImage;
use std::cell::Cell;
use std::time::{Duration, Instant};

use super::clock::Clock;
use super::machines::{
    Completion, ConfirmState, ConfirmTracker, DisappearanceTracker, PhaseStep, PhaseTracker,
};
use super::verdict::{DetectionMethod, DetectionState, Phase, Verdict};
use crate::capture::{Region, RegionCapturer, RegionSpec, WindowLocator};
use crate::config::{DetectionConfig, WaitTiming};
use crate::ocr::TextRecognizer;
use crate::template::TemplateFinder;

pub struct Detector<'a> {
    pub(super) capturer: &'a dyn RegionCapturer,
    pub(super) windows: &'a dyn WindowLocator,
    pub(super) recognizer: &'a TextRecognizer,
    pub(super) clock: &'a dyn Clock,
    pub(super) config: DetectionConfig,
    debug_seq: Cell<u32>,
}

impl<'a> Detector<'a> {
    pub fn new(
        capturer: &'a dyn RegionCapturer,
        windows: &'a dyn WindowLocator,
        recognizer: &'a TextRecognizer,
        clock: &'a dyn Clock,
        config: DetectionConfig,
    ) -> Self {
        Self {
            capturer,
            windows,
            recognizer,
            clock,
            config,
            debug_seq: Cell::new(0),
        }
    }

    pub fn templates(&self) -> &TemplateFinder {
        self.recognizer.templates()
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn windows(&self) -> &'a dyn WindowLocator {
        self.windows
    }

    pub fn clock(&self) -> &'a dyn Clock {
        self.clock
    }

    pub(super) fn elapsed_since(&self, start: Instant) -> Duration {
        self.clock.now().saturating_duration_since(start)
    }

    /// Absolute region for this poll. `None` if the window is gone.
    pub fn resolve_region(&self, spec: &RegionSpec) -> Option<Region> {
        match spec {
            RegionSpec::Absolute(region) => Some(*region),
            RegionSpec::WindowRelative {
                title,
                fallback_title,
                rect,
            } => {
                let handle = self.windows.find_window(title).or_else(|| {
                    let fallback = fallback_title.as_deref()?;
                    let handle = self.windows.find_window(fallback)?;
                    tracing::debug!("'{}' not found, using '{}'", title, fallback);
                    Some(handle)
                })?;
                let window = self.windows.window_rect(handle)?;
                Some(rect.resolve(&window))
            }
        }
    }

    /// Captures the region for one poll, saving it when debug dumps are on.
    pub fn grab(&self, spec: &RegionSpec, label: &str) -> Option<RgbaImage> {
        let Some(region) = self.resolve_region(spec) else {
            tracing::debug!("No window for {:?}, counting as not detected", spec);
            return None;
        };
        match self.capturer.capture(&region) {
            Ok(frame) => {
                self.dump_debug(label, &frame);
                Some(frame)
            }
            Err(e) => {
                tracing::debug!("Capture of {} failed: {}", region, e);
                None
            }
        }
    }

    fn dump_debug(&self, label: &str, frame: &RgbaImage) {
        if !self.config.debug {
            return;
        }
        let seq = self.debug_seq.get() + 1;
        self.debug_seq.set(seq);

        let dir = self.config.resolved_debug_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("Failed to create debug dir {}: {}", dir.display(), e);
            return;
        }
        let path = dir.join(format!("{}_{:03}.png", label, seq));
        match frame.save(&path) {
            Ok(()) => tracing::debug!("Debug capture saved: {}", path.display()),
            Err(e) => tracing::warn!("Failed to save debug capture {}: {}", path.display(), e),
        }
    }

    /// The shared polling skeleton. `poll` gets the 1-based poll number and
    /// returns a verdict to stop early.
    pub(super) fn poll_until<F>(&self, timing: &WaitTiming, start: Instant, mut poll: F) -> Option<Verdict>
    where
        F: FnMut(u32) -> Option<Verdict>,
    {
        self.clock.sleep(timing.initial_wait());
        let mut polls = 0;
        while self.elapsed_since(start) < timing.timeout() {
            polls += 1;
            if let Some(verdict) = poll(polls) {
                return Some(verdict);
            }
            self.clock.sleep(timing.check_interval());
        }
        None
    }

    /// No backend can see the target: sleep the fallback delay, or refuse.
    fn unverifiable(&self, what: &str, start: Instant) -> Verdict {
        let verdict = if self.config.time_fallback {
            let delay = Duration::from_millis(self.config.fallback_delay_ms);
            tracing::warn!(
                "No detection backend for {}, waiting {:.1}s instead",
                what,
                delay.as_secs_f32()
            );
            self.clock.sleep(delay);
            Verdict::Completed {
                method: DetectionMethod::FixedDelay,
                elapsed: self.elapsed_since(start),
            }
        } else {
            Verdict::CannotVerify {
                elapsed: self.elapsed_since(start),
                reason: format!("no OCR engine or template can detect {}", what),
            }
        };
        report(what, &verdict);
        verdict
    }

    /// Machine A: succeeds once `text` is absent on two consecutive polls.
    pub fn wait_for_text_disappear(
        &self,
        region: &RegionSpec,
        text: &str,
        timing: &WaitTiming,
    ) -> Verdict {
        let start = self.clock.now();
        let what = format!("'{}' to disappear", text);
        tracing::info!("Waiting for {}...", what);

        let Some(watcher) = self.recognizer.watching_method(text) else {
            return self.unverifiable(&what, start);
        };

        let mut tracker = DisappearanceTracker::new();
        let mut state = DetectionState::default();
        let mut last_method = None;

        let outcome = self.poll_until(timing, start, |polls| {
            state.polls = polls;
            let present = match self.grab(region, "disappear") {
                Some(frame) => {
                    let found = self.recognizer.find_text(&frame, text);
                    if found.found {
                        last_method = found.method;
                        state.last_confidence = found.confidence.or(state.last_confidence);
                    }
                    found.found
                }
                None => false,
            };

            let gone = tracker.observe(present);
            state.negative_streak = tracker.streak();
            state.phase = tracker.phase();
            state.in_progress_seen = tracker.seen();
            if present {
                tracing::info!(
                    "'{}' still detected ({:.1}s)",
                    text,
                    self.elapsed_since(start).as_secs_f32()
                );
            } else {
                tracing::info!("'{}' not detected ({}/2)", text, tracker.streak());
            }

            gone.then(|| Verdict::Completed {
                method: last_method.unwrap_or(watcher),
                elapsed: self.elapsed_since(start),
            })
        });

        self.finish(&what, outcome, state, start, false)
    }

    /// Machine B: waits for `in_progress` to give way to `done`.
    pub fn wait_for_phase_transition(
        &self,
        region: &RegionSpec,
        in_progress: &str,
        done: &str,
        timing: &WaitTiming,
    ) -> Verdict {
        let start = self.clock.now();
        let what = format!("'{}' → '{}'", in_progress, done);
        tracing::info!("Waiting for {}...", what);

        if !self.recognizer.has_backend_for(in_progress) && !self.recognizer.has_backend_for(done)
        {
            return self.unverifiable(&what, start);
        }

        let mut tracker = PhaseTracker::new();
        let mut state = DetectionState::default();

        // (in_progress found, backend that found done)
        let look = |label: &str| -> (bool, Option<DetectionMethod>) {
            match self.grab(region, label) {
                Some(frame) => {
                    let results = self.recognizer.find_any_text(&frame, &[in_progress, done]);
                    (results[0].found, results[1].method.filter(|_| results[1].found))
                }
                None => (false, None),
            }
        };

        let outcome = self.poll_until(timing, start, |polls| {
            state.polls = polls;
            let (busy, mut done_by) = look("phase");
            if busy && !tracker.in_progress_seen() {
                tracing::info!("'{}' detected", in_progress);
            }

            let mut step = tracker.observe(busy, done_by.is_some());
            if step == PhaseStep::Recheck {
                tracing::info!("'{}' disappeared, re-checking...", in_progress);
                self.clock.sleep(timing.check_interval());
                let (busy, method) = look("phase_recheck");
                step = tracker.resolve_recheck(busy, method.is_some());
                done_by = method;
            }

            state.phase = tracker.phase();
            state.in_progress_seen = tracker.in_progress_seen();
            state.done_seen = tracker.done_seen();

            match (step, done_by) {
                (PhaseStep::Done(Completion::Explicit), Some(method)) => Some(Verdict::Completed {
                    method,
                    elapsed: self.elapsed_since(start),
                }),
                (PhaseStep::Done(Completion::Implicit), _) => Some(Verdict::Completed {
                    method: DetectionMethod::ImplicitDisappearance,
                    elapsed: self.elapsed_since(start),
                }),
                _ => {
                    if tracker.in_progress_seen() {
                        tracing::info!(
                            "Still processing... ({:.1}s)",
                            self.elapsed_since(start).as_secs_f32()
                        );
                    } else {
                        tracing::debug!("Waiting for '{}'...", in_progress);
                    }
                    None
                }
            }
        });

        self.finish(&what, outcome, state, start, false)
    }

    /// Machine C: the icon must be found twice, `settle` apart. On timeout
    /// the item is abandoned.
    pub fn wait_for_icon_confirmed(
        &self,
        region: &RegionSpec,
        template: &str,
        timing: &WaitTiming,
        settle: Duration,
    ) -> Verdict {
        let start = self.clock.now();
        let what = format!("icon '{}' (confirmed)", template);
        tracing::info!("Waiting for {}...", what);

        if !self.templates().has(template) {
            return self.unverifiable(&what, start);
        }
        let threshold = self
            .config
            .threshold_for(template, self.config.icon_threshold);

        let mut tracker = ConfirmTracker::new();
        let mut state = DetectionState::default();

        let outcome = self.poll_until(timing, start, |polls| {
            state.polls = polls;
            let present = self.icon_present(region, template, threshold, &mut state);

            if tracker.observe(present) == ConfirmState::Tentative {
                tracing::info!(
                    "'{}' seen, confirming in {:.1}s",
                    template,
                    settle.as_secs_f32()
                );
                self.clock.sleep(settle);
                let still_there = self.icon_present(region, template, threshold, &mut state);
                if tracker.observe(still_there) == ConfirmState::Unconfirmed {
                    tracing::info!(
                        "'{}' vanished on re-check ({} so far), continuing",
                        template,
                        tracker.reverts()
                    );
                }
            }
            state.phase = tracker.phase();
            state.reverts = tracker.reverts();
            state.done_seen |= present;

            (tracker.state() == ConfirmState::Confirmed).then(|| Verdict::Completed {
                method: DetectionMethod::TemplateMatch,
                elapsed: self.elapsed_since(start),
            })
        });

        self.finish(&what, outcome, state, start, true)
    }

    /// Single sighting of an icon, with optimistic timeout.
    pub fn wait_for_icon_appear(
        &self,
        region: &RegionSpec,
        template: &str,
        timing: &WaitTiming,
    ) -> Verdict {
        let start = self.clock.now();
        let what = format!("icon '{}'", template);
        tracing::info!("Waiting for {}...", what);

        if !self.templates().has(template) {
            return self.unverifiable(&what, start);
        }
        let threshold = self
            .config
            .threshold_for(template, self.config.icon_threshold);
        let mut state = DetectionState::default();

        let outcome = self.poll_until(timing, start, |polls| {
            state.polls = polls;
            if self.icon_present(region, template, threshold, &mut state) {
                state.phase = Phase::Complete;
                return Some(Verdict::Completed {
                    method: DetectionMethod::TemplateMatch,
                    elapsed: self.elapsed_since(start),
                });
            }
            if polls % 3 == 0 {
                tracing::info!(
                    "Still waiting for '{}' ({:.1}s, best confidence {:.3})",
                    template,
                    self.elapsed_since(start).as_secs_f32(),
                    state.last_confidence.unwrap_or(0.0)
                );
            }
            None
        });

        self.finish(&what, outcome, state, start, false)
    }

    fn icon_present(
        &self,
        region: &RegionSpec,
        template: &str,
        threshold: f32,
        state: &mut DetectionState,
    ) -> bool {
        let Some(frame) = self.grab(region, "icon") else {
            return false;
        };
        let result = self.templates().match_named(&frame, template, threshold);
        state.last_confidence = Some(result.confidence);
        if !result.found {
            state.negative_streak += 1;
            tracing::debug!("'{}' not found (confidence {:.3})", template, result.confidence);
        } else {
            state.negative_streak = 0;
        }
        result.found
    }

    /// Absolute screen center of `template`, searched across the whole screen.
    pub fn find_on_screen(&self, template: &str, threshold: Option<f32>) -> Option<(i32, i32)> {
        if !self.templates().has(template) {
            tracing::debug!("No template '{}' to search for", template);
            return None;
        }
        let threshold = threshold.unwrap_or_else(|| {
            self.config
                .threshold_for(template, self.config.default_threshold)
        });
        let screen = self.capturer.screen_bounds()?;
        let frame = match self.capturer.capture(&screen) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Screen capture failed: {}", e);
                return None;
            }
        };
        match self.templates().locate(&frame, template, threshold) {
            Some((cx, cy)) => {
                let point = (screen.x + cx as i32, screen.y + cy as i32);
                tracing::info!("Found '{}' at {:?}", template, point);
                Some(point)
            }
            None => {
                tracing::debug!("'{}' not found on screen", template);
                None
            }
        }
    }

    /// Turns a polling outcome into the final verdict and logs it.
    pub(super) fn finish(
        &self,
        what: &str,
        outcome: Option<Verdict>,
        mut state: DetectionState,
        start: Instant,
        abandon_on_timeout: bool,
    ) -> Verdict {
        let elapsed = self.elapsed_since(start);
        let verdict = outcome.unwrap_or_else(|| {
            state.elapsed = elapsed;
            if abandon_on_timeout {
                Verdict::Abandoned { elapsed, state }
            } else {
                Verdict::OptimisticTimeout { elapsed, state }
            }
        });
        report(what, &verdict);
        verdict
    }
}

/// Logs how a wait ended.
fn report(what: &str, verdict: &Verdict) {
    let elapsed_ms = verdict.elapsed().as_millis() as u64;
    match verdict {
        Verdict::Completed {
            method: method @ DetectionMethod::ImplicitDisappearance,
            ..
        } => tracing::warn!(elapsed_ms, method = %method, "{}: done without explicit signal", what),
        Verdict::Completed { method, .. } => {
            tracing::info!(elapsed_ms, method = %method, "{}: complete", what)
        }
        Verdict::OptimisticTimeout { state, .. } => tracing::warn!(
            elapsed_ms,
            phase = %state.phase,
            negative_streak = state.negative_streak,
            polls = state.polls,
            last_confidence = ?state.last_confidence,
            in_progress_seen = state.in_progress_seen,
            done_seen = state.done_seen,
            "{}: timed out, proceeding anyway",
            what
        ),
        Verdict::Abandoned { state, .. } => tracing::warn!(
            elapsed_ms,
            phase = %state.phase,
            polls = state.polls,
            last_confidence = ?state.last_confidence,
            "{}: never confirmed, marking incomplete",
            what
        ),
        Verdict::CannotVerify { reason, .. } => {
            tracing::error!(elapsed_ms, "{}: {}", what, reason)
        }
    }
}
