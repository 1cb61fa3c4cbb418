//! Image cleanup before OCR.
//!
//! Status text in the Topaz UI is light-on-dark with soft edges. The pipeline
//! is: grayscale → CLAHE → Otsu threshold → 3×3 median. imageproc has no
//! CLAHE, so that step is implemented here.

use image::{GrayImage, RgbaImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::median_filter;
use rayon::prelude::*;

/// CLAHE clip limit, relative to a uniform histogram.
pub const CLAHE_CLIP_LIMIT: f32 = 2.0;

/// CLAHE tile grid (columns, rows).
pub const CLAHE_GRID: (u32, u32) = (8, 8);

/// Full preprocessing pipeline.
pub fn preprocess_for_ocr(img: &RgbaImage) -> GrayImage {
    let gray = image::imageops::grayscale(img);
    let equalized = clahe(&gray, CLAHE_CLIP_LIMIT, CLAHE_GRID);
    let binary = binarize_otsu(&equalized);
    median_filter(&binary, 1, 1)
}

/// Global threshold at the Otsu level: above becomes white, the rest black.
pub fn binarize_otsu(img: &GrayImage) -> GrayImage {
    threshold(img, otsu_level(img), ThresholdType::Binary)
}

/// Contrast-limited adaptive histogram equalization.
///
/// Each tile gets its own clipped, equalized lookup table; pixels blend the
/// four nearest tile tables bilinearly so tile seams don't show.
pub fn clahe(img: &GrayImage, clip_limit: f32, grid: (u32, u32)) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }

    let tiles_x = grid.0.clamp(1, w);
    let tiles_y = grid.1.clamp(1, h);
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);

    let mut luts: Vec<[u8; 256]> = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            luts.push(tile_lut(img, x0, y0, x1, y1, clip_limit));
        }
    }

    let lut_at = |tx: u32, ty: u32| &luts[(ty * tiles_x + tx) as usize];
    let raw = img.as_raw();
    let mut out = vec![0u8; raw.len()];

    out.par_chunks_mut(w as usize)
        .enumerate()
        .for_each(|(y, row)| {
            let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
            let ty0 = fy.floor().max(0.0) as u32;
            let ty1 = (ty0 + 1).min(tiles_y - 1);
            let wy = (fy - ty0 as f32).clamp(0.0, 1.0);

            for (x, out_px) in row.iter_mut().enumerate() {
                let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
                let tx0 = fx.floor().max(0.0) as u32;
                let tx1 = (tx0 + 1).min(tiles_x - 1);
                let wx = (fx - tx0 as f32).clamp(0.0, 1.0);

                let v = raw[y * w as usize + x] as usize;
                let top = lut_at(tx0, ty0)[v] as f32 * (1.0 - wx) + lut_at(tx1, ty0)[v] as f32 * wx;
                let bottom =
                    lut_at(tx0, ty1)[v] as f32 * (1.0 - wx) + lut_at(tx1, ty1)[v] as f32 * wx;
                *out_px = (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8;
            }
        });

    GrayImage::from_raw(w, h, out).unwrap_or_else(|| img.clone())
}

/// Clipped, equalized lookup table for one tile.
fn tile_lut(img: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[img.get_pixel(x, y)[0] as usize] += 1;
        }
    }
    let area = ((x1 - x0) * (y1 - y0)).max(1);

    // Clip and spread the excess evenly, remainder to the lowest bins
    let clip = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += share + u32::from(i < remainder);
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    let scale = 255.0 / area as f32;
    for (i, &count) in hist.iter().enumerate() {
        cdf += count;
        lut[i] = (cdf as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgba};

    #[test]
    fn test_binarize_splits_two_levels() {
        let img = GrayImage::from_fn(10, 4, |x, _| Luma([if x < 5 { 40 } else { 200 }]));
        let binary = binarize_otsu(&img);
        assert_eq!(binary.get_pixel(0, 0)[0], 0);
        assert_eq!(binary.get_pixel(9, 3)[0], 255);
        assert!(binary.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_binarize_matches_otsu_level() {
        let img = GrayImage::from_fn(32, 8, |x, y| Luma([(x * 7 + y * 3) as u8]));
        let level = otsu_level(&img);
        let binary = binarize_otsu(&img);
        for (x, y, p) in img.enumerate_pixels() {
            let expected = if p[0] > level { 255 } else { 0 };
            assert_eq!(binary.get_pixel(x, y)[0], expected, "({}, {})", x, y);
        }
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        // Values squeezed into 100..=115
        let img = GrayImage::from_fn(64, 64, |x, y| Luma([100 + ((x + y) % 16) as u8]));
        let out = clahe(&img, CLAHE_CLIP_LIMIT, CLAHE_GRID);

        let range = |im: &GrayImage| {
            let min = im.pixels().map(|p| p[0]).min().unwrap();
            let max = im.pixels().map(|p| p[0]).max().unwrap();
            max - min
        };
        assert!(range(&out) > range(&img));
    }

    #[test]
    fn test_clahe_handles_images_smaller_than_grid() {
        let img = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 50 + y * 20) as u8]));
        let out = clahe(&img, CLAHE_CLIP_LIMIT, CLAHE_GRID);
        assert_eq!(out.dimensions(), (3, 2));
    }

    #[test]
    fn test_clahe_keeps_order_within_a_tile() {
        let img = GrayImage::from_fn(16, 16, |x, _| Luma([(x * 10) as u8]));
        let out = clahe(&img, CLAHE_CLIP_LIMIT, (1, 1));
        for x in 1..16 {
            assert!(out.get_pixel(x, 0)[0] >= out.get_pixel(x - 1, 0)[0]);
        }
    }

    #[test]
    fn test_pipeline_output_is_binary_and_same_size() {
        let img = RgbaImage::from_fn(100, 50, |x, _| {
            if (40..60).contains(&x) {
                Rgba([230, 230, 230, 255])
            } else {
                Rgba([30, 30, 40, 255])
            }
        });
        let out = preprocess_for_ocr(&img);
        assert_eq!(out.dimensions(), (100, 50));
        assert!(out.pixels().all(|p| p[0] == 0 || p[0] == 255));
        assert_eq!(out.get_pixel(50, 25)[0], 255);
        assert_eq!(out.get_pixel(5, 25)[0], 0);
    }
}
