use image::DynamicImage;
use std::process::Command;
use std::sync::OnceLock;
use tempfile::NamedTempFile;

use super::setup::{self, TesseractPaths};
use crate::config::OcrConfig;
use crate::detection::DetectionMethod;
use crate::error::OcrError;

/// One OCR backend in the recognizer's chain.
pub trait OcrEngine {
    fn name(&self) -> &'static str;

    /// Reported as the deciding method when this engine finds the target.
    fn method(&self) -> DetectionMethod;

    /// True if the engine should get the binarized image rather than the raw capture.
    fn wants_preprocessed(&self) -> bool;

    /// Initializes on first call. Once initialization has failed this stays
    /// false for the rest of the process.
    fn is_available(&self) -> bool;

    /// Recognized text, words separated by single spaces.
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError>;
}

/// Represents a line of OCR text with confidence score
#[derive(Debug, Clone)]
pub struct OcrLine {
    pub text: String,
    pub words: Vec<OcrWord>,
    pub confidence: f32,
}

/// Represents a single word from OCR with confidence score
#[derive(Debug, Clone)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
}

/// Joins line texts into the single string the matcher searches.
pub fn concat_lines(lines: &[OcrLine]) -> String {
    lines
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Primary engine: the tesseract CLI with TSV output.
pub struct TesseractEngine {
    config: OcrConfig,
    paths: OnceLock<Option<TesseractPaths>>,
}

impl TesseractEngine {
    pub fn new(config: OcrConfig) -> Self {
        Self {
            config,
            paths: OnceLock::new(),
        }
    }

    fn paths(&self) -> Option<&TesseractPaths> {
        self.paths
            .get_or_init(|| {
                match setup::locate(
                    self.config.tesseract_path.as_deref(),
                    self.config.tessdata_dir.as_deref(),
                    &self.config.language,
                ) {
                    Ok(paths) => {
                        tracing::info!(
                            executable = %paths.executable.display(),
                            tessdata = ?paths.tessdata,
                            "Tesseract ready"
                        );
                        Some(paths)
                    }
                    Err(e) => {
                        tracing::warn!("{}; primary OCR disabled", e);
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Runs tesseract and returns lines built from confident words.
    pub fn recognize_lines(&self, image: &DynamicImage) -> Result<Vec<OcrLine>, OcrError> {
        let paths = self.paths().ok_or_else(|| OcrError::Unavailable {
            engine: "tesseract",
            reason: "not installed".to_string(),
        })?;

        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")?;
        image.save(temp_input.path())?;

        let mut command = Command::new(&paths.executable);
        command.arg(temp_input.path()).arg("stdout");
        if let Some(tessdata) = &paths.tessdata {
            command.arg("--tessdata-dir").arg(tessdata);
        }
        let output = command
            .arg("-l")
            .arg(&self.config.language)
            .arg("--psm")
            .arg(self.config.psm.to_string())
            .arg("tsv") // Output TSV format
            .output()?;

        if !output.status.success() {
            return Err(OcrError::Engine {
                engine: "tesseract",
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        Ok(parse_tsv_output(&tsv, self.config.min_word_confidence))
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn method(&self) -> DetectionMethod {
        DetectionMethod::PrimaryOcr
    }

    fn wants_preprocessed(&self) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        self.paths().is_some()
    }

    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        Ok(concat_lines(&self.recognize_lines(image)?))
    }
}

/// Moves the collected words into a new line.
fn flush_line(words: &mut Vec<OcrWord>, lines: &mut Vec<OcrLine>) {
    if words.is_empty() {
        return;
    }
    let confidence = words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32;
    let text = words
        .iter()
        .map(|w| w.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    lines.push(OcrLine {
        text,
        words: std::mem::take(words),
        confidence,
    });
}

/// Parses Tesseract TSV output into lines, keeping only words whose
/// confidence is above `min_confidence`.
pub fn parse_tsv_output(tsv: &str, min_confidence: f32) -> Vec<OcrLine> {
    let mut lines: Vec<OcrLine> = Vec::new();
    let mut current_key: Option<(i32, i32, i32)> = None;
    let mut current_words: Vec<OcrWord> = Vec::new();

    for line in tsv.lines().skip(1) {
        // TSV fields: level, page_num, block_num, par_num, line_num, word_num,
        //             left, top, width, height, conf, text
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // Level 5 = word
        let level: i32 = fields[0].parse().unwrap_or(-1);
        if level != 5 {
            continue;
        }

        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }

        let key = (
            fields[2].parse().unwrap_or(-1),
            fields[3].parse().unwrap_or(-1),
            fields[4].parse().unwrap_or(-1),
        );
        if current_key.is_some_and(|k| k != key) {
            flush_line(&mut current_words, &mut lines);
        }
        current_key = Some(key);

        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        if conf > min_confidence {
            current_words.push(OcrWord {
                text: text.to_string(),
                confidence: conf,
            });
        }
    }

    flush_line(&mut current_words, &mut lines);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn word(block: i32, line: i32, n: i32, conf: f32, text: &str) -> String {
        format!("5\t1\t{}\t1\t{}\t{}\t0\t0\t10\t10\t{}\t{}", block, line, n, conf, text)
    }

    #[test]
    fn test_parse_groups_words_into_lines() {
        let tsv = [
            HEADER.to_string(),
            "1\t1\t0\t0\t0\t0\t0\t0\t100\t50\t-1\t".to_string(),
            word(1, 1, 1, 91.5, "Preview"),
            word(1, 1, 2, 88.0, "Updated"),
            word(1, 2, 1, 95.0, "Done."),
        ]
        .join("\n");

        let lines = parse_tsv_output(&tsv, 30.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Preview Updated");
        assert!((lines[0].confidence - 89.75).abs() < 0.01);
        assert_eq!(lines[1].text, "Done.");
        assert_eq!(concat_lines(&lines), "Preview Updated Done.");
    }

    #[test]
    fn test_parse_drops_low_confidence_words() {
        let tsv = [
            HEADER.to_string(),
            word(1, 1, 1, 12.0, "~~"),
            word(1, 1, 2, 30.0, "Edge"),
            word(1, 1, 3, 77.0, "Processing"),
        ]
        .join("\n");

        let lines = parse_tsv_output(&tsv, 30.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Processing");
    }

    #[test]
    fn test_parse_same_line_number_in_other_block_is_new_line() {
        let tsv = [
            HEADER.to_string(),
            word(1, 1, 1, 90.0, "Queue"),
            word(2, 1, 1, 90.0, "Processing"),
        ]
        .join("\n");

        let lines = parse_tsv_output(&tsv, 30.0);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_parse_garbage_is_empty() {
        assert!(parse_tsv_output("", 30.0).is_empty());
        assert!(parse_tsv_output("not\ttsv\nat all", 30.0).is_empty());
    }
}
