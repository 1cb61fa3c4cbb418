//! Multi-scale, multi-metric template matching.
//!
//! Every position is scored with three normalized metrics:
//!
//! | metric                   | confidence                                  | computed by |
//! |--------------------------|---------------------------------------------|-------------|
//! | cross-correlation        | `ΣIT / sqrt(ΣI² · ΣT²)`                     | imageproc   |
//! | correlation coefficient  | zero-mean version of the above, clamped ≥ 0 | local scan  |
//! | squared difference       | `1 - Σ(I-T)² / sqrt(ΣI² · ΣT²)`             | imageproc   |
//!
//! imageproc has no zero-mean metric, so the correlation coefficient is
//! scored here with window sums taken from integral images.
//!
//! Large searches (more than [`DIRECT_WORK_LIMIT`] multiply-adds at one
//! scale) run on a half-resolution copy first. Each metric's coarse best hit
//! is then rescored at full resolution within [`REFINE_RADIUS`] pixels.

use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::template_matching::{find_extremes, match_template_parallel, MatchTemplateMethod};
use rayon::prelude::*;
use std::ops::RangeInclusive;

/// Templates scaled below this many pixels on either side carry too little
/// structure to match reliably.
pub const MIN_TEMPLATE_SIDE: u32 = 5;

/// Searches costing more than this many multiply-adds run on a
/// half-resolution pass first and are refined around its best hits.
pub const DIRECT_WORK_LIMIT: u64 = 150_000_000;

/// Neighborhood (in full-resolution pixels) searched around a coarse hit.
pub const REFINE_RADIUS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    CrossCorrelation,
    CorrelationCoefficient,
    SquaredDifference,
}

const METRICS: [Metric; 3] = [
    Metric::CrossCorrelation,
    Metric::CorrelationCoefficient,
    Metric::SquaredDifference,
];

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::CrossCorrelation => write!(f, "ccorr_normed"),
            Metric::CorrelationCoefficient => write!(f, "ccoeff_normed"),
            Metric::SquaredDifference => write!(f, "sqdiff_normed"),
        }
    }
}

/// Outcome of one `match_template` call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchResult {
    /// True if any (scale, metric) attempt reached the threshold
    pub found: bool,
    /// Best confidence over every attempt, in [0, 1]
    pub confidence: f32,
    /// Top-left corner of the best attempt, in image pixels
    pub location: Option<(u32, u32)>,
    pub scale: Option<f32>,
    /// Size of the scaled template at the best attempt
    pub size: Option<(u32, u32)>,
    pub metric: Option<Metric>,
}

impl MatchResult {
    pub const fn not_found() -> Self {
        Self {
            found: false,
            confidence: 0.0,
            location: None,
            scale: None,
            size: None,
            metric: None,
        }
    }

    /// Center of the best attempt, in image pixels.
    pub fn center(&self) -> Option<(u32, u32)> {
        let (x, y) = self.location?;
        let (w, h) = self.size?;
        Some((x + w / 2, y + h / 2))
    }
}

/// Scales a template by `scale` with bilinear filtering.
pub fn scale_template(template: &GrayImage, scale: f32) -> GrayImage {
    let w = ((template.width() as f32) * scale).round().max(1.0) as u32;
    let h = ((template.height() as f32) * scale).round().max(1.0) as u32;
    if (w, h) == template.dimensions() {
        return template.clone();
    }
    imageops::resize(template, w, h, FilterType::Triangle)
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    score: f32,
    x: u32,
    y: u32,
}

impl Candidate {
    const NONE: Candidate = Candidate {
        score: f32::NEG_INFINITY,
        x: 0,
        y: 0,
    };

    /// Higher score wins; ties go to the earlier position in scan order.
    fn better(self, other: Candidate) -> Candidate {
        if other.score > self.score
            || (other.score == self.score && (other.y, other.x) < (self.y, self.x))
        {
            other
        } else {
            self
        }
    }
}

type Best = [Candidate; 3];

fn merge(a: Best, b: Best) -> Best {
    [a[0].better(b[0]), a[1].better(b[1]), a[2].better(b[2])]
}

/// Summed-area tables of intensity and squared intensity.
struct Integral {
    stride: usize,
    sum: Vec<u64>,
    sq: Vec<u64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq = vec![0u64; stride * (h + 1)];
        let raw = img.as_raw();

        for y in 0..h {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let v = raw[y * w + x] as u64;
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    /// (Σ, Σ²) over the w×h window at (x, y).
    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let s = self.stride;
        let area = |t: &[u64]| t[y1 * s + x1] + t[y0 * s + x0] - t[y0 * s + x1] - t[y1 * s + x0];
        (area(&self.sum) as f64, area(&self.sq) as f64)
    }
}

struct TemplateStats {
    sum: f64,
    sq: f64,
    n: f64,
}

impl TemplateStats {
    fn new(template: &GrayImage) -> Self {
        let (sum, sq) = template.as_raw().iter().fold((0u64, 0u64), |(s, q), &v| {
            let v = v as u64;
            (s + v, q + v * v)
        });
        Self {
            sum: sum as f64,
            sq: sq as f64,
            n: (template.width() * template.height()) as f64,
        }
    }

    /// Correlation coefficient at one window, given Σ I·T.
    fn ccoeff(&self, win_sum: f64, win_sq: f64, cross: f64) -> f32 {
        let var_i = win_sq - win_sum * win_sum / self.n;
        let var_t = self.sq - self.sum * self.sum / self.n;
        let ccoeff = if var_i > 1e-6 && var_t > 1e-6 {
            (cross - win_sum * self.sum / self.n) / (var_i * var_t).sqrt()
        } else {
            0.0
        };
        ccoeff.clamp(0.0, 1.0) as f32
    }
}

/// Correlation coefficient at every position in `xs × ys`, rows in parallel.
fn scan_ccoeff(
    image: &GrayImage,
    integral: &Integral,
    template: &GrayImage,
    xs: RangeInclusive<u32>,
    ys: RangeInclusive<u32>,
) -> Candidate {
    let stats = TemplateStats::new(template);
    let (tw, th) = template.dimensions();
    let iw = image.width() as usize;
    let img_raw = image.as_raw();
    let t_raw = template.as_raw();

    ys.into_par_iter()
        .map(|y| {
            let mut best = Candidate::NONE;
            for x in xs.clone() {
                let mut cross = 0u64;
                for ty in 0..th as usize {
                    let start = (y as usize + ty) * iw + x as usize;
                    let irow = &img_raw[start..start + tw as usize];
                    let trow = &t_raw[ty * tw as usize..(ty + 1) * tw as usize];
                    cross += irow
                        .iter()
                        .zip(trow)
                        .map(|(&a, &b)| a as u32 * b as u32)
                        .sum::<u32>() as u64;
                }
                let (win_sum, win_sq) = integral.window(x, y, tw, th);
                best = best.better(Candidate {
                    score: stats.ccoeff(win_sum, win_sq, cross as f64),
                    x,
                    y,
                });
            }
            best
        })
        .reduce(|| Candidate::NONE, Candidate::better)
}

/// Best position for one normalized imageproc metric over `xs × ys`.
///
/// `imageproc` scores the whole image it is given, so a partial range is
/// cropped out first and the hit shifted back into image coordinates.
fn scan_imageproc(
    image: &GrayImage,
    template: &GrayImage,
    xs: &RangeInclusive<u32>,
    ys: &RangeInclusive<u32>,
    method: MatchTemplateMethod,
) -> Candidate {
    let (x0, y0) = (*xs.start(), *ys.start());
    let (tw, th) = template.dimensions();
    let (w, h) = (xs.end() - x0 + tw, ys.end() - y0 + th);

    let cropped;
    let window = if (x0, y0, w, h) == (0, 0, image.width(), image.height()) {
        image
    } else {
        cropped = imageops::crop_imm(image, x0, y0, w, h).to_image();
        &cropped
    };

    let extremes = find_extremes(&match_template_parallel(window, template, method));
    let (score, (x, y)) = if method == MatchTemplateMethod::SumOfSquaredErrorsNormalized {
        (1.0 - extremes.min_value, extremes.min_value_location)
    } else {
        (extremes.max_value, extremes.max_value_location)
    };

    Candidate {
        score: if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) },
        x: x0 + x,
        y: y0 + y,
    }
}

/// All three metrics over `xs × ys`, in `METRICS` order.
fn scan(
    image: &GrayImage,
    integral: &Integral,
    template: &GrayImage,
    xs: RangeInclusive<u32>,
    ys: RangeInclusive<u32>,
) -> Best {
    [
        scan_imageproc(image, template, &xs, &ys, MatchTemplateMethod::CrossCorrelationNormalized),
        scan_ccoeff(image, integral, template, xs.clone(), ys.clone()),
        scan_imageproc(image, template, &xs, &ys, MatchTemplateMethod::SumOfSquaredErrorsNormalized),
    ]
}

/// Runs all metrics across a fixed list of template scales.
#[derive(Clone, Debug)]
pub struct TemplateMatcher {
    scales: Vec<f32>,
    min_side: u32,
    direct_work_limit: u64,
}

impl Default for TemplateMatcher {
    fn default() -> Self {
        Self::new(vec![0.3, 0.5, 0.75, 1.0, 1.25, 1.5, 2.0, 2.5, 3.0])
    }
}

impl TemplateMatcher {
    pub fn new(scales: Vec<f32>) -> Self {
        Self {
            scales,
            min_side: MIN_TEMPLATE_SIDE,
            direct_work_limit: DIRECT_WORK_LIMIT,
        }
    }

    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    /// Matches `template` against `image` at every configured scale.
    ///
    /// `found` is true if any single attempt reached `threshold`; the rest of
    /// the result describes the best attempt overall. Empty inputs and
    /// scales where the template doesn't fit are reported as not found.
    pub fn match_template(
        &self,
        image: &GrayImage,
        template: &GrayImage,
        threshold: f32,
    ) -> MatchResult {
        let mut result = MatchResult::not_found();
        if image.width() == 0 || image.height() == 0 || template.width() == 0 || template.height() == 0 {
            return result;
        }

        let integral = Integral::new(image);
        let mut best_confidence = f32::NEG_INFINITY;

        for &scale in &self.scales {
            if !(scale.is_finite() && scale > 0.0) {
                continue;
            }
            let scaled = scale_template(template, scale);
            let (tw, th) = scaled.dimensions();
            if tw < self.min_side || th < self.min_side {
                tracing::trace!(scale, tw, th, "template too small at this scale");
                continue;
            }
            if tw > image.width() || th > image.height() {
                tracing::trace!(scale, tw, th, "template larger than image at this scale");
                continue;
            }

            let best = self.best_at_scale(image, &integral, &scaled);
            for (metric, candidate) in METRICS.iter().zip(best) {
                if candidate.score >= threshold {
                    result.found = true;
                }
                if candidate.score > best_confidence {
                    best_confidence = candidate.score;
                    result.confidence = candidate.score;
                    result.location = Some((candidate.x, candidate.y));
                    result.scale = Some(scale);
                    result.size = Some((tw, th));
                    result.metric = Some(*metric);
                }
            }
        }

        result
    }

    fn best_at_scale(&self, image: &GrayImage, integral: &Integral, template: &GrayImage) -> Best {
        let (iw, ih) = image.dimensions();
        let (tw, th) = template.dimensions();
        let max_x = iw - tw;
        let max_y = ih - th;

        let work = (max_x as u64 + 1) * (max_y as u64 + 1) * (tw as u64 * th as u64);
        if work <= self.direct_work_limit || tw.min(th) < 2 * self.min_side {
            return scan(image, integral, template, 0..=max_x, 0..=max_y);
        }

        // Coarse pass at half resolution, then refine each metric's best hit
        let coarse_image = imageops::resize(image, iw / 2, ih / 2, FilterType::Triangle);
        let coarse_template = imageops::resize(template, tw / 2, th / 2, FilterType::Triangle);
        let coarse = self.best_at_scale(
            &coarse_image,
            &Integral::new(&coarse_image),
            &coarse_template,
        );

        let mut best = [Candidate::NONE; 3];
        for hit in coarse {
            if hit.score == f32::NEG_INFINITY {
                continue;
            }
            let cx = (hit.x * 2).min(max_x);
            let cy = (hit.y * 2).min(max_y);
            let xs = cx.saturating_sub(REFINE_RADIUS)..=(cx + REFINE_RADIUS).min(max_x);
            let ys = cy.saturating_sub(REFINE_RADIUS)..=(cy + REFINE_RADIUS).min(max_y);
            best = merge(best, scan(image, integral, template, xs, ys));
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Deterministic texture with enough structure for correlation.
    fn pattern(w: u32, h: u32, seed: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let v = (x * 37 + y * 91 + seed * 13) ^ (x * y + seed);
            Luma([(v % 251) as u8])
        })
    }

    fn paste(haystack: &mut GrayImage, needle: &GrayImage, x: u32, y: u32) {
        imageops::replace(haystack, needle, x as i64, y as i64);
    }

    #[test]
    fn test_exact_match_at_unit_scale() {
        let template = pattern(20, 12, 1);
        let mut image = GrayImage::from_pixel(120, 80, Luma([30]));
        paste(&mut image, &template, 37, 22);

        let matcher = TemplateMatcher::new(vec![1.0]);
        let result = matcher.match_template(&image, &template, 0.8);

        assert!(result.found);
        assert!(result.confidence > 0.99);
        assert_eq!(result.location, Some((37, 22)));
        assert_eq!(result.scale, Some(1.0));
        assert_eq!(result.center(), Some((47, 28)));
    }

    #[test]
    fn test_finds_template_resized_by_any_grid_scale() {
        let template = pattern(16, 16, 7);
        let matcher = TemplateMatcher::default();

        for &scale in &[0.5f32, 1.5, 2.0, 3.0] {
            let scaled = scale_template(&template, scale);
            let mut image = GrayImage::from_fn(140, 120, |x, y| Luma([((x + 2 * y) % 7 * 9) as u8]));
            paste(&mut image, &scaled, 11, 9);

            let result = matcher.match_template(&image, &template, 0.8);
            assert!(result.found, "scale {} not found", scale);
            assert!(result.confidence >= 0.8, "scale {} confidence {}", scale, result.confidence);
            assert_eq!(result.location, Some((11, 9)), "scale {}", scale);
        }
    }

    #[test]
    fn test_found_is_monotonic_in_threshold() {
        let template = pattern(18, 10, 3);
        let mut image = pattern(90, 60, 99);
        paste(&mut image, &scale_template(&template, 1.25), 40, 30);
        let matcher = TemplateMatcher::default();

        let strict = matcher.match_template(&image, &template, 0.95);
        let confidence = strict.confidence;
        for t in [0.1f32, 0.3, 0.5, 0.7, 0.9] {
            if confidence >= t {
                assert!(matcher.match_template(&image, &template, t).found, "threshold {}", t);
            }
        }
    }

    #[test]
    fn test_unrelated_content_is_not_found_at_high_threshold() {
        let template = pattern(24, 24, 5);
        // Vertical stripes have nothing in common with the texture
        let image = GrayImage::from_fn(100, 100, |x, _| Luma([if x % 2 == 0 { 0 } else { 255 }]));
        let matcher = TemplateMatcher::new(vec![1.0]);
        let result = matcher.match_template(&image, &template, 0.99);
        assert!(!result.found);
        assert!(result.confidence < 0.99);
    }

    #[test]
    fn test_template_larger_than_image_is_skipped() {
        let template = pattern(50, 50, 2);
        let image = pattern(30, 30, 2);
        let matcher = TemplateMatcher::new(vec![1.0, 2.0]);
        assert_eq!(
            matcher.match_template(&image, &template, 0.5),
            MatchResult::not_found()
        );
    }

    #[test]
    fn test_tiny_scaled_templates_are_skipped() {
        // 10px at 0.3 is 3px, below the minimum side
        let template = pattern(10, 10, 4);
        let image = pattern(40, 40, 4);
        let matcher = TemplateMatcher::new(vec![0.3]);
        assert!(matcher.match_template(&image, &template, 0.0).location.is_none());
    }

    #[test]
    fn test_empty_inputs_are_not_found() {
        let matcher = TemplateMatcher::default();
        let empty = GrayImage::new(0, 0);
        let some = pattern(20, 20, 1);
        assert!(!matcher.match_template(&empty, &some, 0.1).found);
        assert!(!matcher.match_template(&some, &empty, 0.1).found);
    }

    #[test]
    fn test_flat_windows_score_zero_on_correlation_coefficient() {
        let stats = TemplateStats::new(&pattern(8, 8, 1));
        // All-black window: no variance
        assert_eq!(stats.ccoeff(0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_each_metric_peaks_at_the_pasted_template() {
        let template = pattern(14, 9, 2);
        let mut image = pattern(70, 50, 40);
        paste(&mut image, &template, 23, 17);

        let best = scan(
            &image,
            &Integral::new(&image),
            &template,
            0..=image.width() - 14,
            0..=image.height() - 9,
        );
        for (metric, hit) in METRICS.iter().zip(best) {
            assert_eq!((hit.x, hit.y), (23, 17), "{}", metric);
            assert!(hit.score > 0.99, "{} scored {}", metric, hit.score);
        }
    }

    #[test]
    fn test_partial_range_reports_image_coordinates() {
        let template = pattern(10, 10, 8);
        let mut image = GrayImage::from_pixel(60, 60, Luma([90]));
        paste(&mut image, &template, 41, 33);

        let best = scan(&image, &Integral::new(&image), &template, 38..=44, 30..=36);
        for hit in best {
            assert_eq!((hit.x, hit.y), (41, 33));
        }
    }

    #[test]
    fn test_coarse_to_fine_agrees_with_full_scan() {
        let template = GrayImage::from_fn(40, 40, |x, y| {
            let fx = (x as f32 / 6.0).sin();
            let fy = (y as f32 / 4.0).cos();
            Luma([(128.0 + 100.0 * fx * fy) as u8])
        });
        let mut image = GrayImage::from_fn(320, 200, |x, y| Luma([((x * 3 + y * 5) % 17 * 4) as u8]));
        paste(&mut image, &template, 203, 111);

        let full = TemplateMatcher {
            direct_work_limit: u64::MAX,
            ..TemplateMatcher::new(vec![1.0])
        };
        // 72M multiply-adds at full size, 4.6M at half size: one coarse pass
        let fast = TemplateMatcher {
            direct_work_limit: 10_000_000,
            ..TemplateMatcher::new(vec![1.0])
        };

        let a = full.match_template(&image, &template, 0.8);
        let b = fast.match_template(&image, &template, 0.8);
        assert!(a.found && b.found);
        assert_eq!(a.location, Some((203, 111)));
        assert_eq!(b.location, a.location);
        assert!((a.confidence - b.confidence).abs() < 1e-6);
    }

    #[test]
    fn test_coarse_to_fine_search_on_large_image() {
        // Smooth blob so the half-resolution pass still sees it
        let template = GrayImage::from_fn(60, 40, |x, y| {
            let fx = (x as f32 / 7.0).sin();
            let fy = (y as f32 / 5.0).cos();
            Luma([(128.0 + 100.0 * fx * fy) as u8])
        });
        let mut image = GrayImage::from_fn(1200, 700, |x, y| Luma([((x * 3 + y * 5) % 17 * 4) as u8]));
        paste(&mut image, &template, 803, 411);

        let matcher = TemplateMatcher::new(vec![1.0]);
        let result = matcher.match_template(&image, &template, 0.8);
        assert!(result.found);
        assert_eq!(result.location, Some((803, 411)));
    }
}
