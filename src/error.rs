//! Error taxonomy for the detection core and its OS collaborators.
//!
//! None of these escape a wait call: the detector folds them into
//! "not detected this poll" or into a skipped backend. They exist so the
//! recovery sites can log what actually went wrong.

use std::path::PathBuf;

use thiserror::Error;

/// Screen sampling failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("screen capture is not available on this platform")]
    Unavailable,
    #[error("region {width}x{height} at ({x}, {y}) does not intersect the screen")]
    OutOfBounds {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    #[error("capture backend failed: {0}")]
    Backend(String),
}

/// Template lookup failures.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template '{0}' not found")]
    Missing(String),
    #[error("failed to decode template {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Text recognition failures.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("{engine} is unavailable: {reason}")]
    Unavailable { engine: &'static str, reason: String },
    #[error("{engine} failed: {reason}")]
    Engine { engine: &'static str, reason: String },
    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode image for OCR: {0}")]
    Image(#[from] image::ImageError),
}

/// Window lookup and activation failures.
#[derive(Debug, Error)]
pub enum WindowError {
    #[error("no visible window title contains '{0}'")]
    NotFound(String),
    #[error("window operations are not supported on this platform")]
    Unsupported,
    #[error("window call failed: {0}")]
    Backend(String),
}

/// Input injection failures.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("unknown key '{0}'")]
    UnknownKey(String),
    #[error("input injection is not supported on this platform")]
    Unsupported,
    #[error("input call failed: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_bounds_message_names_region() {
        let err = CaptureError::OutOfBounds {
            x: -50,
            y: 10,
            width: 20,
            height: 30,
        };
        assert_eq!(
            err.to_string(),
            "region 20x30 at (-50, 10) does not intersect the screen"
        );
    }

    #[test]
    fn test_ocr_unavailable_message() {
        let err = OcrError::Unavailable {
            engine: "tesseract",
            reason: "not installed".to_string(),
        };
        assert_eq!(err.to_string(), "tesseract is unavailable: not installed");
    }
}
