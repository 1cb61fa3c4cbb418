//! Waits on the foreground window title.
//!
//! Topaz apps put the open file name in the title bar and change it while a
//! modal dialog is up, which makes the title a cheap state signal.

use std::path::Path;

use super::detector::Detector;
use super::verdict::{DetectionMethod, DetectionState, Phase, Verdict};
use crate::capture::title_matches;
use crate::config::WaitTiming;

impl Detector<'_> {
    /// Polls the active title until `accept` returns true.
    fn wait_for_title(
        &self,
        what: &str,
        timing: &WaitTiming,
        accept: impl Fn(&str) -> bool,
    ) -> Verdict {
        let start = self.clock.now();
        tracing::debug!("Waiting for {}", what);
        let mut state = DetectionState::default();
        let mut last_title = String::new();

        let outcome = self.poll_until(timing, start, |polls| {
            state.polls = polls;
            last_title = self.windows.active_window_title().unwrap_or_default();
            if accept(&last_title) {
                state.phase = Phase::Complete;
                tracing::debug!("Title now '{}'", last_title);
                return Some(Verdict::Completed {
                    method: DetectionMethod::WindowTitle,
                    elapsed: self.elapsed_since(start),
                });
            }
            state.negative_streak += 1;
            None
        });

        if outcome.is_none() {
            tracing::warn!("Current window title: '{}'", last_title);
        }
        self.finish(what, outcome, state, start, false)
    }

    pub fn wait_for_title_contains(&self, text: &str, timing: &WaitTiming) -> Verdict {
        self.wait_for_title(&format!("title containing '{}'", text), timing, |title| {
            title_matches(title, text)
        })
    }

    pub fn wait_for_title_not_contains(&self, text: &str, timing: &WaitTiming) -> Verdict {
        self.wait_for_title(&format!("title without '{}'", text), timing, |title| {
            !title_matches(title, text)
        })
    }

    /// The title shows the loaded file, with or without its extension.
    pub fn verify_image_loaded(&self, filename: &str, timing: &WaitTiming) -> Verdict {
        let stem = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename)
            .to_string();
        self.wait_for_title(&format!("'{}' to load", filename), timing, |title| {
            title_matches(title, filename) || title_matches(title, &stem)
        })
    }

    /// Back on the main window once its title is in the foreground again.
    pub fn wait_for_dialog_closed(&self, main_title: &str, timing: &WaitTiming) -> Verdict {
        tracing::debug!("Waiting for the dialog over '{}' to close", main_title);
        self.wait_for_title_contains(main_title, timing)
    }
}

#[cfg(test)]
mod tests {
    use crate::capture::fake::{FakeWindows, ScriptedCapturer};
    use crate::config::{DetectionConfig, WaitTiming};
    use crate::detection::clock::FakeClock;
    use crate::detection::{DetectionMethod, Detector, Verdict};
    use crate::ocr::TextRecognizer;
    use crate::template::{TemplateFinder, TemplateMatcher, TemplateStore};
    use std::sync::Arc;
    use std::time::Duration;

    const TIMING: WaitTiming = WaitTiming::new(0, 500, 5_000);

    fn run(titles: &[&str], f: impl FnOnce(&Detector) -> Verdict) -> (Verdict, Duration) {
        let dir = tempfile::tempdir().unwrap();
        let finder = Arc::new(TemplateFinder::new(
            TemplateStore::new(dir.path()),
            TemplateMatcher::default(),
        ));
        let recognizer = TextRecognizer::new(Vec::new(), finder, 0.7);
        let capturer = ScriptedCapturer::blank(1);
        let windows = FakeWindows::none().with_titles(titles);
        let clock = FakeClock::new();
        let detector = Detector::new(
            &capturer,
            &windows,
            &recognizer,
            &clock,
            DetectionConfig::default(),
        );
        let verdict = f(&detector);
        (verdict, clock.elapsed())
    }

    #[test]
    fn test_image_loaded_matches_stem() {
        let (verdict, elapsed) = run(
            &["Open", "Open", "photo_001 - Topaz Gigapixel AI"],
            |d| d.verify_image_loaded("photo_001.JPG", &TIMING),
        );
        assert_eq!(verdict.method(), Some(DetectionMethod::WindowTitle));
        assert_eq!(elapsed, Duration::from_millis(1_000));
    }

    #[test]
    fn test_title_not_contains() {
        let (verdict, _) = run(&["Export Settings", "Topaz Gigapixel AI"], |d| {
            d.wait_for_title_not_contains("export", &TIMING)
        });
        assert!(verdict.is_confirmed());
    }

    #[test]
    fn test_dialog_closed_times_out_optimistically() {
        let (verdict, elapsed) = run(&["Save As"], |d| {
            d.wait_for_dialog_closed("Topaz Gigapixel", &TIMING)
        });
        match verdict {
            Verdict::OptimisticTimeout { state, .. } => assert_eq!(state.polls, 10),
            other => panic!("unexpected verdict {:?}", other),
        }
        assert_eq!(elapsed, Duration::from_secs(5));
    }

    #[test]
    fn test_title_contains_is_case_insensitive() {
        let (verdict, _) = run(&["topaz photo ai"], |d| {
            d.wait_for_title_contains("Photo AI", &TIMING)
        });
        assert!(verdict.is_confirmed());
    }
}
