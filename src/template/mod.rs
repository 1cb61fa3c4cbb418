//! Template matching against stored UI glyphs, icons and buttons.

pub mod matcher;
pub mod store;

pub use matcher::{MatchResult, TemplateMatcher};
pub use store::TemplateStore;

use image::{GrayImage, RgbaImage};

/// Store plus matcher: matches templates by name.
pub struct TemplateFinder {
    store: TemplateStore,
    matcher: TemplateMatcher,
}

impl TemplateFinder {
    pub fn new(store: TemplateStore, matcher: TemplateMatcher) -> Self {
        Self { store, matcher }
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    pub fn has(&self, name: &str) -> bool {
        self.store.contains(name)
    }

    /// Matches the named template. A missing template is simply not found.
    pub fn match_named(&self, image: &RgbaImage, name: &str, threshold: f32) -> MatchResult {
        self.match_named_gray(&image::imageops::grayscale(image), name, threshold)
    }

    /// Center of the named template in `image`, if it is found.
    pub fn locate(&self, image: &RgbaImage, name: &str, threshold: f32) -> Option<(u32, u32)> {
        let result = self.match_named(image, name, threshold);
        if result.found { result.center() } else { None }
    }

    pub fn match_named_gray(&self, image: &GrayImage, name: &str, threshold: f32) -> MatchResult {
        let Some(template) = self.store.get(name) else {
            return MatchResult::not_found();
        };
        let result = self.matcher.match_template(image, &template.image, threshold);
        tracing::debug!(
            template = name,
            found = result.found,
            confidence = result.confidence,
            scale = ?result.scale,
            "template match"
        );
        result
    }
}
