//! Text recognition for status words in the Topaz UI.
//!
//! Backends are tried in order and the first one that sees the target wins:
//! 1. Tesseract on the preprocessed capture
//! 2. the OCR server on the raw capture
//! 3. a template named after the lowercased target word
//!
//! A backend that fails to initialize is logged once and skipped from then on.

pub mod engine;
pub mod preprocess;
pub mod remote;
pub mod setup;

pub use engine::{OcrEngine, TesseractEngine};
pub use preprocess::preprocess_for_ocr;
pub use remote::RemoteOcrEngine;

use image::{DynamicImage, RgbaImage};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::detection::DetectionMethod;
use crate::template::TemplateFinder;

/// Result of one `find_text` call.
#[derive(Clone, Debug, PartialEq)]
pub struct TextMatch {
    pub found: bool,
    /// What the deciding backend read, or the last OCR output when nothing matched
    pub text: String,
    /// Backend that found the target
    pub method: Option<DetectionMethod>,
    /// Template confidence when the glyph tier decided
    pub confidence: Option<f32>,
}

impl TextMatch {
    fn missed(text: String) -> Self {
        Self {
            found: false,
            text,
            method: None,
            confidence: None,
        }
    }

    pub fn into_pair(self) -> (bool, String) {
        (self.found, self.text)
    }
}

/// Case-insensitive substring test.
pub fn contains_text(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Ordered OCR backends plus the glyph-template fallback.
pub struct TextRecognizer {
    engines: Vec<Box<dyn OcrEngine>>,
    templates: Arc<TemplateFinder>,
    template_threshold: f32,
}

impl TextRecognizer {
    pub fn new(
        engines: Vec<Box<dyn OcrEngine>>,
        templates: Arc<TemplateFinder>,
        template_threshold: f32,
    ) -> Self {
        Self {
            engines,
            templates,
            template_threshold,
        }
    }

    /// Tesseract, then the OCR server if one is configured.
    pub fn from_config(config: &AppConfig, templates: Arc<TemplateFinder>) -> Self {
        let mut engines: Vec<Box<dyn OcrEngine>> =
            vec![Box::new(TesseractEngine::new(config.ocr.clone()))];
        if let Some(url) = &config.ocr.remote_url {
            engines.push(Box::new(RemoteOcrEngine::new(
                url,
                Duration::from_millis(config.ocr.remote_timeout_ms),
            )));
        }
        Self::new(
            engines,
            templates,
            config.detection.text_template_threshold,
        )
    }

    pub fn templates(&self) -> &TemplateFinder {
        &self.templates
    }

    /// Name and availability of every OCR engine, in priority order.
    pub fn engine_status(&self) -> Vec<(&'static str, bool)> {
        self.engines
            .iter()
            .map(|e| (e.name(), e.is_available()))
            .collect()
    }

    /// True if some backend could recognize `target` at all.
    pub fn has_backend_for(&self, target: &str) -> bool {
        self.watching_method(target).is_some()
    }

    /// The highest-priority backend that can look for `target`.
    pub fn watching_method(&self, target: &str) -> Option<DetectionMethod> {
        self.engines
            .iter()
            .find(|e| e.is_available())
            .map(|e| e.method())
            .or_else(|| {
                self.templates
                    .has(&target.to_lowercase())
                    .then_some(DetectionMethod::TemplateMatch)
            })
    }

    pub fn find_text(&self, image: &RgbaImage, target: &str) -> TextMatch {
        self.find_any_text(image, &[target])
            .pop()
            .unwrap_or_else(|| TextMatch::missed(String::new()))
    }

    /// Looks for several targets in one capture. Each engine runs at most
    /// once, however many targets are asked for.
    pub fn find_any_text(&self, image: &RgbaImage, targets: &[&str]) -> Vec<TextMatch> {
        let mut results: Vec<Option<TextMatch>> = vec![None; targets.len()];
        let mut last_text = String::new();
        let mut preprocessed: Option<DynamicImage> = None;
        let mut raw: Option<DynamicImage> = None;

        for engine in &self.engines {
            if results.iter().all(Option::is_some) {
                break;
            }
            if !engine.is_available() {
                continue;
            }

            let input: &DynamicImage = if engine.wants_preprocessed() {
                preprocessed
                    .get_or_insert_with(|| DynamicImage::ImageLuma8(preprocess_for_ocr(image)))
            } else {
                raw.get_or_insert_with(|| DynamicImage::ImageRgba8(image.clone()))
            };

            let text = match engine.recognize(input) {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!("{} failed on this capture: {}", engine.name(), e);
                    continue;
                }
            };
            tracing::debug!(engine = engine.name(), text = %text, "OCR output");

            for (slot, target) in results.iter_mut().zip(targets) {
                if slot.is_none() && contains_text(&text, target) {
                    *slot = Some(TextMatch {
                        found: true,
                        text: text.clone(),
                        method: Some(engine.method()),
                        confidence: None,
                    });
                }
            }
            if !text.is_empty() {
                last_text = text;
            }
        }

        // Glyph templates for whatever OCR missed
        let mut gray = None;
        for (slot, target) in results.iter_mut().zip(targets) {
            if slot.is_some() {
                continue;
            }
            let name = target.to_lowercase();
            if !self.templates.has(&name) {
                continue;
            }
            let gray = gray.get_or_insert_with(|| image::imageops::grayscale(image));
            let result = self
                .templates
                .match_named_gray(gray, &name, self.template_threshold);
            if result.found {
                *slot = Some(TextMatch {
                    found: true,
                    text: target.to_string(),
                    method: Some(DetectionMethod::TemplateMatch),
                    confidence: Some(result.confidence),
                });
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| TextMatch::missed(last_text.clone())))
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{PixelCodeOcr, ScriptedOcr};
    use super::*;
    use crate::template::{TemplateMatcher, TemplateStore};
    use image::{GrayImage, Luma, Rgba};

    fn finder(dir: &std::path::Path) -> Arc<TemplateFinder> {
        Arc::new(TemplateFinder::new(
            TemplateStore::new(dir),
            TemplateMatcher::new(vec![1.0]),
        ))
    }

    fn frame() -> RgbaImage {
        RgbaImage::from_pixel(100, 50, Rgba([0, 0, 0, 255]))
    }

    #[test]
    fn test_case_insensitive_substring() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = TextRecognizer::new(
            vec![Box::new(ScriptedOcr::new(&["Done."]))],
            finder(dir.path()),
            0.7,
        );
        let result = recognizer.find_text(&frame(), "done");
        assert_eq!(result.clone().into_pair(), (true, "Done.".to_string()));
        assert_eq!(result.method, Some(DetectionMethod::PrimaryOcr));
    }

    #[test]
    fn test_processing_then_done_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = TextRecognizer::new(
            vec![Box::new(PixelCodeOcr {
                texts: vec!["", "Processing…", "Done"],
            })],
            finder(dir.path()),
            0.7,
        );

        let processing = RgbaImage::from_pixel(100, 50, Rgba([1, 0, 0, 255]));
        let (found, text) = recognizer.find_text(&processing, "Processing").into_pair();
        assert!(found);
        assert!(text.contains("Processing"));

        let done = RgbaImage::from_pixel(100, 50, Rgba([2, 0, 0, 255]));
        assert!(!recognizer.find_text(&done, "Processing").found);
        assert!(recognizer.find_text(&done, "Done").found);
    }

    #[test]
    fn test_unavailable_primary_falls_through_to_secondary() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = TextRecognizer::new(
            vec![
                Box::new(ScriptedOcr::unavailable()),
                Box::new(ScriptedOcr::new(&["Processing 1 of 1"]).secondary()),
            ],
            finder(dir.path()),
            0.7,
        );
        let result = recognizer.find_text(&frame(), "processing");
        assert!(result.found);
        assert_eq!(result.method, Some(DetectionMethod::SecondaryOcr));
    }

    #[test]
    fn test_failing_primary_falls_through_to_secondary() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = TextRecognizer::new(
            vec![
                Box::new(ScriptedOcr::failing()),
                Box::new(ScriptedOcr::new(&["Done"]).secondary()),
            ],
            finder(dir.path()),
            0.7,
        );
        assert_eq!(
            recognizer.find_text(&frame(), "Done").method,
            Some(DetectionMethod::SecondaryOcr)
        );
    }

    #[test]
    fn test_primary_hit_skips_secondary() {
        let dir = tempfile::tempdir().unwrap();
        let secondary = ScriptedOcr::new(&["Done"]).secondary();
        let recognizer = TextRecognizer::new(
            vec![Box::new(ScriptedOcr::new(&["Done"])), Box::new(secondary)],
            finder(dir.path()),
            0.7,
        );
        let result = recognizer.find_text(&frame(), "Done");
        assert_eq!(result.method, Some(DetectionMethod::PrimaryOcr));
    }

    #[test]
    fn test_glyph_template_when_ocr_misses() {
        let dir = tempfile::tempdir().unwrap();
        let glyph = GrayImage::from_fn(20, 10, |x, y| Luma([((x * 23 + y * 41) % 256) as u8]));
        glyph.save(dir.path().join("done.png")).unwrap();

        let mut capture = frame();
        for (x, y, p) in glyph.enumerate_pixels() {
            capture.put_pixel(x + 40, y + 20, Rgba([p[0], p[0], p[0], 255]));
        }

        let recognizer = TextRecognizer::new(
            vec![Box::new(ScriptedOcr::new(&["D0ne"]))],
            finder(dir.path()),
            0.7,
        );
        let result = recognizer.find_text(&capture, "Done");
        assert!(result.found);
        assert_eq!(result.method, Some(DetectionMethod::TemplateMatch));
        assert!(result.confidence.unwrap() >= 0.7);
    }

    #[test]
    fn test_total_miss_reports_recognized_text() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = TextRecognizer::new(
            vec![Box::new(ScriptedOcr::new(&["Preview Updated"]))],
            finder(dir.path()),
            0.7,
        );
        let (found, text) = recognizer.find_text(&frame(), "Enhancing").into_pair();
        assert!(!found);
        assert_eq!(text, "Preview Updated");
    }

    #[test]
    fn test_find_any_text_runs_each_engine_once() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = TextRecognizer::new(
            vec![Box::new(ScriptedOcr::new(&["Processing", "Done"]))],
            finder(dir.path()),
            0.7,
        );
        let results = recognizer.find_any_text(&frame(), &["Processing", "Done"]);
        assert!(results[0].found);
        // Only the first scripted output was consumed
        assert!(!results[1].found);
    }

    #[test]
    fn test_backend_availability() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::new(8, 8).save(dir.path().join("done.png")).unwrap();
        let recognizer = TextRecognizer::new(
            vec![Box::new(ScriptedOcr::unavailable())],
            finder(dir.path()),
            0.7,
        );
        assert!(recognizer.has_backend_for("Done"));
        assert!(!recognizer.has_backend_for("Processing"));
    }
}
