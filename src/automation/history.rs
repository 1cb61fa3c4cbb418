//! Per-run JSON history under `logs/run_history`.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of one image.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageResult {
    pub image_path: String,
    pub image_name: String,
    pub success: bool,
    #[serde(default)]
    pub skipped: bool,
    pub duration_seconds: Option<f64>,
    pub error: Option<String>,
    /// How each wait for this image was resolved
    #[serde(default)]
    pub detections: Vec<String>,
    pub timestamp: DateTime<Local>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_seconds: f64,
    pub average_seconds: Option<f64>,
}

/// One automation run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunHistory {
    /// `%Y%m%d_%H%M%S` of the start time
    pub run_id: String,
    pub mode: String,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub duration_seconds: Option<f64>,
    pub input_directory: Option<String>,
    pub total_images: usize,
    pub processed_images: Vec<ImageResult>,
    pub summary: RunSummary,
}

impl RunHistory {
    pub fn start(mode: &str, input_dir: Option<&Path>) -> Self {
        let now = Local::now();
        Self {
            run_id: now.format("%Y%m%d_%H%M%S").to_string(),
            mode: mode.to_string(),
            start_time: now,
            end_time: None,
            duration_seconds: None,
            input_directory: input_dir.map(|d| d.display().to_string()),
            total_images: 0,
            processed_images: Vec::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn set_total_images(&mut self, total: usize) {
        self.total_images = total;
    }

    /// Records one image; the returned entry can take detection notes.
    pub fn add_result(
        &mut self,
        path: &Path,
        success: bool,
        duration: Option<Duration>,
        error: Option<String>,
    ) -> &mut ImageResult {
        self.processed_images.push(ImageResult {
            image_path: path.display().to_string(),
            image_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            success,
            skipped: false,
            duration_seconds: duration.map(|d| d.as_secs_f64()),
            error,
            detections: Vec::new(),
            timestamp: Local::now(),
        });
        let index = self.processed_images.len() - 1;
        &mut self.processed_images[index]
    }

    pub fn add_skipped(&mut self, path: &Path, reason: &str) {
        self.add_result(path, false, None, Some(reason.to_string()))
            .skipped = true;
    }

    fn summarize(&mut self) {
        let results = &self.processed_images;
        let skipped = results.iter().filter(|r| r.skipped).count();
        let success = results.iter().filter(|r| r.success).count();
        let timed: Vec<f64> = results.iter().filter_map(|r| r.duration_seconds).collect();
        let total_seconds: f64 = timed.iter().sum();

        self.summary = RunSummary {
            total: results.len(),
            success,
            failed: results.len() - success - skipped,
            skipped,
            total_seconds,
            average_seconds: (!timed.is_empty()).then(|| total_seconds / timed.len() as f64),
        };
    }

    /// Stamps the end time, fills the summary and writes `run_<id>.json`.
    pub fn finalize(&mut self, dir: &Path) -> Result<PathBuf> {
        let end = Local::now();
        self.end_time = Some(end);
        self.duration_seconds = Some(
            (end - self.start_time)
                .to_std()
                .unwrap_or_default()
                .as_secs_f64(),
        );
        self.summarize();

        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(format!("run_{}.json", self.run_id));
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run history")?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!("Run history saved: {}", path.display());
        Ok(path)
    }
}

/// Newest histories first, at most `limit`. Unreadable files are skipped.
pub fn recent(dir: &Path, limit: usize) -> Vec<RunHistory> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("run_") && n.ends_with(".json"))
        })
        .collect();
    // Run ids are timestamps, so names sort chronologically
    files.sort();
    files.reverse();

    files
        .into_iter()
        .filter_map(|path| {
            let parsed = fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str::<RunHistory>(&s).map_err(anyhow::Error::from));
            match parsed {
                Ok(history) => Some(history),
                Err(e) => {
                    tracing::warn!("Failed to load {}: {}", path.display(), e);
                    None
                }
            }
        })
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut history = RunHistory::start("upscale", Some(Path::new("C:/photos")));
        history.set_total_images(3);
        history
            .add_result(Path::new("C:/photos/a.jpg"), true, Some(Duration::from_secs(40)), None)
            .detections
            .push("save: completed via primary OCR after 12.0s".to_string());
        history.add_result(
            Path::new("C:/photos/b.jpg"),
            false,
            Some(Duration::from_secs(20)),
            Some("window closed".to_string()),
        );
        history.add_skipped(Path::new("C:/photos/c.jpg"), "unreadable");

        let path = history.finalize(dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), format!("run_{}.json", history.run_id));

        let saved: RunHistory = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.summary.total, 3);
        assert_eq!(saved.summary.success, 1);
        assert_eq!(saved.summary.failed, 1);
        assert_eq!(saved.summary.skipped, 1);
        assert_eq!(saved.summary.average_seconds, Some(30.0));
        assert_eq!(saved.processed_images[0].image_name, "a.jpg");
        assert_eq!(saved.processed_images[0].detections.len(), 1);
        assert!(saved.end_time.is_some());
    }

    #[test]
    fn test_recent_is_newest_first_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        for id in ["20240101_090000", "20240301_090000", "20240201_090000"] {
            let mut history = RunHistory::start("photoai", None);
            history.run_id = id.to_string();
            history.finalize(dir.path()).unwrap();
        }
        fs::write(dir.path().join("run_garbage.json"), "{").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let ids: Vec<String> = recent(dir.path(), 2).into_iter().map(|h| h.run_id).collect();
        assert_eq!(ids, vec!["20240301_090000", "20240201_090000"]);
        assert_eq!(recent(dir.path(), 10).len(), 3);
    }

    #[test]
    fn test_recent_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(recent(&dir.path().join("none"), 5).is_empty());
    }
}
