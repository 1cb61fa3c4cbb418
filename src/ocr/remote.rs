//! Secondary OCR engine: a local HTTP OCR server (EasyOCR behind FastAPI).
//!
//! The server holds the heavyweight model. This side only keeps one
//! blocking client, created and health-checked on first use.

use base64::{Engine as _, engine::general_purpose};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

use super::engine::OcrEngine;
use crate::detection::DetectionMethod;
use crate::error::OcrError;

#[derive(Serialize)]
struct ImageRequest {
    image_base64: String,
}

/// Single recognized text box
#[derive(Deserialize, Clone, Debug)]
pub struct TextBox {
    pub text: String,
    #[serde(default)]
    pub score: f64,
}

/// OCR response from the server
#[derive(Deserialize, Debug)]
pub struct OcrResponse {
    #[serde(default)]
    pub boxes: Vec<TextBox>,
    /// Concatenated text, used when the server sends no boxes
    #[serde(default)]
    pub raw_text: String,
}

impl OcrResponse {
    pub fn text(&self) -> String {
        if self.boxes.is_empty() {
            return self.raw_text.trim().to_string();
        }
        self.boxes
            .iter()
            .map(|b| b.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// HTTP OCR client for the local OCR server.
pub struct RemoteOcrEngine {
    base_url: String,
    timeout: Duration,
    client: OnceLock<Option<reqwest::blocking::Client>>,
}

impl RemoteOcrEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client: OnceLock::new(),
        }
    }

    /// Builds the client and checks `/health`. Runs once per process.
    fn client(&self) -> Option<&reqwest::blocking::Client> {
        self.client
            .get_or_init(|| match self.connect() {
                Ok(client) => {
                    tracing::info!(url = %self.base_url, "OCR server ready");
                    Some(client)
                }
                Err(e) => {
                    tracing::warn!("{}; secondary OCR disabled", e);
                    None
                }
            })
            .as_ref()
    }

    fn connect(&self) -> Result<reqwest::blocking::Client, OcrError> {
        let unavailable = |reason: String| OcrError::Unavailable {
            engine: "ocr-server",
            reason,
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| unavailable(format!("failed to create HTTP client: {}", e)))?;

        let url = format!("{}/health", self.base_url);
        let response = client
            .get(&url)
            .send()
            .map_err(|e| unavailable(format!("health check failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(unavailable(format!(
                "health check returned {}",
                response.status()
            )));
        }
        Ok(client)
    }

    fn encode_image(image: &DynamicImage) -> Result<String, OcrError> {
        let mut buffer = Vec::new();
        image.write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)?;
        Ok(general_purpose::STANDARD.encode(&buffer))
    }
}

impl OcrEngine for RemoteOcrEngine {
    fn name(&self) -> &'static str {
        "ocr-server"
    }

    fn method(&self) -> DetectionMethod {
        DetectionMethod::SecondaryOcr
    }

    fn wants_preprocessed(&self) -> bool {
        false
    }

    fn is_available(&self) -> bool {
        self.client().is_some()
    }

    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let client = self.client().ok_or_else(|| OcrError::Unavailable {
            engine: "ocr-server",
            reason: "not connected".to_string(),
        })?;
        let engine_error = |reason: String| OcrError::Engine {
            engine: "ocr-server",
            reason,
        };

        let request = ImageRequest {
            image_base64: Self::encode_image(image)?,
        };
        let url = format!("{}/ocr", self.base_url);
        let response = client
            .post(&url)
            .json(&request)
            .send()
            .map_err(|e| engine_error(format!("request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(engine_error(format!("server returned {}", response.status())));
        }
        let parsed: OcrResponse = response
            .json()
            .map_err(|e| engine_error(format!("invalid response: {}", e)))?;
        Ok(parsed.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_joins_boxes() {
        let json = r#"{
            "boxes": [
                {"box": [[0,0],[10,0],[10,5],[0,5]], "text": "Processing", "score": 0.93},
                {"box": [[12,0],[20,0],[20,5],[12,5]], "text": " 1/3 ", "score": 0.71}
            ],
            "raw_text": "ignored"
        }"#;
        let response: OcrResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.text(), "Processing 1/3");
    }

    #[test]
    fn test_response_falls_back_to_raw_text() {
        let response: OcrResponse = serde_json::from_str(r#"{"raw_text": " Done "}"#).unwrap();
        assert_eq!(response.text(), "Done");
    }

    #[test]
    fn test_unreachable_server_is_unavailable_and_stays_so() {
        // Port 9 (discard) on localhost is essentially never an HTTP server
        let engine = RemoteOcrEngine::new("http://127.0.0.1:9/", Duration::from_millis(300));
        assert!(!engine.is_available());
        assert!(!engine.is_available());
        let img = DynamicImage::new_rgba8(4, 4);
        assert!(matches!(
            engine.recognize(&img),
            Err(OcrError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let engine = RemoteOcrEngine::new("http://localhost:8866/", Duration::from_secs(1));
        assert_eq!(engine.base_url, "http://localhost:8866");
    }
}
