//! Input discovery and output file bookkeeping.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::detection::Clock;

/// Extensions picked up from an input directory.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tiff", "tif", "bmp", "webp"];

const FILE_POLL_INTERVAL: Duration = Duration::from_millis(500);

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// True if the file stem ends with one of `suffixes` (a previous output).
pub fn is_processed(path: &Path, suffixes: &[String]) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    let stem = stem.to_lowercase();
    suffixes.iter().any(|s| stem.ends_with(&s.to_lowercase()))
}

/// Images found in an input directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Inputs to process, sorted
    pub images: Vec<PathBuf>,
    /// Earlier outputs left out of `images`, sorted
    pub skipped: Vec<PathBuf>,
}

/// Image files directly inside `dir`, skipping earlier outputs.
pub fn discover_images(dir: &Path, exclude_suffixes: &[String]) -> Result<Discovery> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read input directory {}", dir.display()))?;

    let mut images = BTreeSet::new();
    let mut skipped = BTreeSet::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !is_image(&path) {
            continue;
        }
        if is_processed(&path, exclude_suffixes) {
            skipped.insert(path);
        } else {
            images.insert(path);
        }
    }

    tracing::info!(
        "Found {} images in {} ({} already processed)",
        images.len(),
        dir.display(),
        skipped.len()
    );
    Ok(Discovery {
        images: images.into_iter().collect(),
        skipped: skipped.into_iter().collect(),
    })
}

/// `path` if free, otherwise `stem_N.ext` with the first free N.
pub fn unique_output_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().unwrap_or(Path::new(""));

    (1u32..)
        .map(|n| parent.join(format!("{}_{}{}", stem, n, ext)))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Waits for `path` to exist.
pub fn wait_for_file(path: &Path, timeout: Duration, clock: &dyn Clock) -> bool {
    tracing::info!("Waiting for file: {}", path.display());
    let start = clock.now();
    loop {
        if path.exists() {
            tracing::info!(
                "File found after {:.1}s",
                clock.now().saturating_duration_since(start).as_secs_f32()
            );
            return true;
        }
        if clock.now().saturating_duration_since(start) >= timeout {
            tracing::warn!(
                "File not found after {:.0}s: {}",
                timeout.as_secs_f32(),
                path.display()
            );
            return false;
        }
        clock.sleep(FILE_POLL_INTERVAL);
    }
}

/// True once the file is non-empty and its size holds across `stable_for`.
pub fn is_file_ready(path: &Path, stable_for: Duration, clock: &dyn Clock) -> bool {
    let size = |p: &Path| std::fs::metadata(p).map(|m| m.len()).ok();
    let Some(before) = size(path) else {
        return false;
    };
    clock.sleep(stable_for);
    let ready = size(path) == Some(before) && before > 0;
    if ready {
        tracing::debug!("File is ready: {} ({} bytes)", path.display(), before);
    }
    ready
}
