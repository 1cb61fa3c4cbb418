//! Named template images, loaded lazily and kept for the process lifetime.

use image::GrayImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::TemplateError;

/// File extensions tried, in order, for a template name.
const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// A stored reference image of a UI element.
#[derive(Debug)]
pub struct Template {
    pub name: String,
    pub image: GrayImage,
}

impl Template {
    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Loads `<dir>/<name>.{png,jpg,jpeg}` on first use.
///
/// Misses are cached too, so a missing template is warned about once and
/// never looked up on disk again.
pub struct TemplateStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Option<Arc<Template>>>>,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the template, or `None` if it has no usable image on disk.
    pub fn get(&self, name: &str) -> Option<Arc<Template>> {
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entry) = cache.get(name) {
            return entry.clone();
        }

        let entry = match self.load(name) {
            Ok(template) => {
                let (w, h) = template.size();
                tracing::debug!(name, w, h, "template loaded");
                Some(Arc::new(template))
            }
            Err(e) => {
                tracing::warn!("{} (looked in {})", e, self.dir.display());
                None
            }
        };
        cache.insert(name.to_string(), entry.clone());
        entry
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn load(&self, name: &str) -> Result<Template, TemplateError> {
        let path = self
            .find_file(name)
            .ok_or_else(|| TemplateError::Missing(name.to_string()))?;
        let image = image::open(&path)
            .map_err(|source| TemplateError::Decode {
                path: path.clone(),
                source,
            })?
            .to_luma8();
        Ok(Template {
            name: name.to_string(),
            image,
        })
    }

    fn find_file(&self, name: &str) -> Option<PathBuf> {
        EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", name, ext)))
            .find(|p| p.is_file())
    }

    /// Writes a new template image and forgets any cached entry for `name`.
    pub fn save(&self, name: &str, image: &image::RgbaImage) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.png", name));
        image.save(&path)?;
        match self.cache.lock() {
            Ok(mut cache) => cache.remove(name),
            Err(poisoned) => poisoned.into_inner().remove(name),
        };
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba, RgbaImage};

    #[test]
    fn test_loads_png_as_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(12, 8, Rgba([255, 0, 0, 255]))
            .save(dir.path().join("done.png"))
            .unwrap();

        let store = TemplateStore::new(dir.path());
        let template = store.get("done").unwrap();
        assert_eq!(template.name, "done");
        assert_eq!(template.size(), (12, 8));
        // Pure red in luma
        assert_eq!(template.image.get_pixel(0, 0), &Luma([54]));
    }

    #[test]
    fn test_saved_template_replaces_cached_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path().join("templates"));
        assert!(!store.contains("export_button"));

        let path = store
            .save("export_button", &RgbaImage::from_pixel(10, 6, Rgba([9, 9, 9, 255])))
            .unwrap();
        assert_eq!(path, store.dir().join("export_button.png"));
        assert_eq!(store.get("export_button").unwrap().size(), (10, 6));
    }

    #[test]
    fn test_falls_back_to_jpg() {
        let dir = tempfile::tempdir().unwrap();
        image::GrayImage::from_pixel(10, 10, Luma([128]))
            .save(dir.path().join("export_button.jpg"))
            .unwrap();

        let store = TemplateStore::new(dir.path());
        assert!(store.contains("export_button"));
    }

    #[test]
    fn test_missing_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        assert!(store.get("complete_check").is_none());

        // Appearing later doesn't change the cached answer
        RgbaImage::new(10, 10)
            .save(dir.path().join("complete_check.png"))
            .unwrap();
        assert!(store.get("complete_check").is_none());
    }

    #[test]
    fn test_repeat_get_returns_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::new(6, 6).save(dir.path().join("icon.png")).unwrap();
        let store = TemplateStore::new(dir.path());
        let a = store.get("icon").unwrap();
        let b = store.get("icon").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_undecodable_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
        let store = TemplateStore::new(dir.path());
        assert!(store.get("broken").is_none());
    }
}
