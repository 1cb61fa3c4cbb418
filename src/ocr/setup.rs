use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::OcrError;

/// Where the tesseract CLI and its language data live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TesseractPaths {
    pub executable: PathBuf,
    /// `None` means "let tesseract use its compiled-in default"
    pub tessdata: Option<PathBuf>,
}

/// Finds the executable and, if possible, a tessdata dir containing `language`.
pub fn locate(
    exe_override: Option<&Path>,
    tessdata_override: Option<&Path>,
    language: &str,
) -> Result<TesseractPaths, OcrError> {
    let executable = find_tesseract_executable(exe_override)?;
    let tessdata = find_tessdata_dir(tessdata_override, language);
    Ok(TesseractPaths {
        executable,
        tessdata,
    })
}

/// Fixed install locations, most specific first.
fn install_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![
        crate::paths::get_tesseract_dir().join("tesseract.exe"),
        crate::paths::get_tesseract_dir().join("tesseract"),
        PathBuf::from(r"C:\Program Files\Tesseract-OCR\tesseract.exe"),
        PathBuf::from(r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe"),
    ];
    // Per-user installer target
    if let Some(local) = dirs::data_local_dir() {
        candidates.push(
            local
                .join("Programs")
                .join("Tesseract-OCR")
                .join("tesseract.exe"),
        );
    }
    candidates
}

/// Finds the Tesseract executable: explicit override, our local dir, the
/// common install paths, then PATH.
pub fn find_tesseract_executable(exe_override: Option<&Path>) -> Result<PathBuf, OcrError> {
    if let Some(path) = exe_override {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(
            "Configured tesseract path {} does not exist, searching instead",
            path.display()
        );
    }

    if let Some(found) = install_candidates().into_iter().find(|p| p.is_file()) {
        return Ok(found);
    }

    // Check PATH
    if let Ok(output) = Command::new("tesseract").arg("--version").output() {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    Err(OcrError::Unavailable {
        engine: "tesseract",
        reason: "executable not found (install Tesseract-OCR or set ocr.tesseract_path)"
            .to_string(),
    })
}

fn has_language(dir: &Path, language: &str) -> bool {
    dir.join(format!("{}.traineddata", language)).is_file()
}

/// Finds a tessdata directory holding `<language>.traineddata`.
pub fn find_tessdata_dir(tessdata_override: Option<&Path>, language: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = tessdata_override {
        candidates.push(dir.to_path_buf());
    }
    candidates.push(crate::paths::get_tesseract_dir().join("tessdata"));
    candidates.push(PathBuf::from(r"C:\Program Files\Tesseract-OCR\tessdata"));
    candidates.push(PathBuf::from(r"C:\Program Files (x86)\Tesseract-OCR\tessdata"));

    // Check TESSDATA_PREFIX environment variable
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        candidates.push(PathBuf::from(&prefix));
        candidates.push(PathBuf::from(&prefix).join("tessdata"));
    }

    candidates.into_iter().find(|dir| has_language(dir, language))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("tesseract.exe");
        std::fs::write(&exe, b"").unwrap();
        assert_eq!(find_tesseract_executable(Some(&exe)).unwrap(), exe);
    }

    #[test]
    fn test_tessdata_override_needs_language_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_ne!(
            find_tessdata_dir(Some(dir.path()), "xyz"),
            Some(dir.path().to_path_buf())
        );

        std::fs::write(dir.path().join("xyz.traineddata"), b"").unwrap();
        assert_eq!(
            find_tessdata_dir(Some(dir.path()), "xyz"),
            Some(dir.path().to_path_buf())
        );
    }

    #[test]
    fn test_candidates_include_per_user_install() {
        if dirs::data_local_dir().is_none() {
            return;
        }
        assert!(install_candidates()
            .iter()
            .any(|p| p.ends_with("Programs/Tesseract-OCR/tesseract.exe")));
    }
}
