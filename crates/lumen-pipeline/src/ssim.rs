//! Approximate structural similarity between two rasters.
//!
//! Both inputs are first resampled to a common reduced size so that
//! comparing a multi-megapixel encode against its baseline stays cheap.
//! The score is the mean SSIM over non-overlapping 8×8 luminance windows.

use crate::raster::luma_values;
use crate::resample::{ResampleFilter, resize_exact};
use crate::types::RgbaImage;

/// Width both rasters are reduced to (or the first raster's width, if smaller).
pub const COMPARE_WIDTH: u32 = 512;

/// Window edge length.
pub const WINDOW: u32 = 8;

/// Windows truncated at the edge with fewer samples than this are skipped.
pub const MIN_WINDOW_SAMPLES: u32 = 4;

/// `(0.01 * 255)²`
pub const C1: f64 = 6.5025;

/// `(0.03 * 255)²`
pub const C2: f64 = 58.5225;

/// Structural similarity of `b` against `a`, approximately in `[0, 1]`.
///
/// Both rasters are resized (Triangle filter) to `min(512, a.width)`
/// wide, with the height following `a`'s aspect ratio. Returns 0 when no
/// window qualifies, including for empty inputs.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn ssim_approx(a: &RgbaImage, b: &RgbaImage) -> f64 {
    if a.width() == 0 || a.height() == 0 || b.width() == 0 || b.height() == 0 {
        return 0.0;
    }
    let width = a.width().min(COMPARE_WIDTH);
    let height = ((f64::from(a.height()) * f64::from(width) / f64::from(a.width())).round() as u32).max(1);

    let la = luma_values(&resize_exact(a, width, height, ResampleFilter::Triangle));
    let lb = luma_values(&resize_exact(b, width, height, ResampleFilter::Triangle));
    let stride = width as usize;

    let mut total = 0.0;
    let mut windows = 0u32;
    for wy in (0..height).step_by(WINDOW as usize) {
        for wx in (0..width).step_by(WINDOW as usize) {
            let ww = WINDOW.min(width - wx);
            let wh = WINDOW.min(height - wy);
            let n = ww * wh;
            if n < MIN_WINDOW_SAMPLES {
                continue;
            }
            let samples = (wy..wy + wh).flat_map(|y| {
                (wx..wx + ww).map(move |x| y as usize * stride + x as usize)
            });
            total += window_ssim(samples.map(|i| (la[i], lb[i])), f64::from(n));
            windows += 1;
        }
    }

    if windows == 0 {
        0.0
    } else {
        total / f64::from(windows)
    }
}

/// SSIM of one window from paired luminance samples.
fn window_ssim(samples: impl Iterator<Item = (f64, f64)> + Clone, n: f64) -> f64 {
    let (sum_a, sum_b) = samples
        .clone()
        .fold((0.0, 0.0), |(sa, sb), (a, b)| (sa + a, sb + b));
    let (mean_a, mean_b) = (sum_a / n, sum_b / n);

    let (var_a, var_b, cov) = samples.fold((0.0, 0.0, 0.0), |(va, vb, c), (a, b)| {
        let (da, db) = (a - mean_a, b - mean_b);
        (da.mul_add(da, va), db.mul_add(db, vb), da.mul_add(db, c))
    });
    let (var_a, var_b, cov) = (var_a / n, var_b / n, cov / n);

    let numerator = (2.0 * mean_a).mul_add(mean_b, C1) * 2.0f64.mul_add(cov, C2);
    let denominator = mean_a.mul_add(mean_a, mean_b.mul_add(mean_b, C1)) * (var_a + var_b + C2);
    numerator / denominator
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[allow(clippy::cast_possible_truncation)]
    fn textured(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            let v = ((x * 7 + y * 13) % 256) as u8;
            Rgba([v, v.wrapping_mul(3), 255 - v, 255])
        })
    }

    #[test]
    fn identical_images_score_one() {
        let img = textured(64, 48);
        let s = ssim_approx(&img, &img);
        assert!((s - 1.0).abs() < 1e-9, "expected ~1, got {s}");
    }

    #[test]
    fn large_images_are_reduced_and_still_score_one() {
        let img = textured(900, 300);
        let s = ssim_approx(&img, &img);
        assert!((s - 1.0).abs() < 1e-9, "expected ~1, got {s}");
    }

    #[test]
    fn distortion_lowers_the_score() {
        let img = textured(64, 64);
        let inverted = RgbaImage::from_fn(64, 64, |x, y| {
            let p = img.get_pixel(x, y).0;
            Rgba([255 - p[0], 255 - p[1], 255 - p[2], 255])
        });
        let s = ssim_approx(&img, &inverted);
        assert!(s < 0.5, "expected low similarity, got {s}");
    }

    #[test]
    fn too_small_for_any_window_scores_zero() {
        // 3×1 gives a single truncated window of 3 samples.
        let img = textured(3, 1);
        assert!(ssim_approx(&img, &img).abs() < f64::EPSILON);
        assert!(ssim_approx(&RgbaImage::new(0, 0), &img).abs() < f64::EPSILON);
    }

    #[test]
    fn mismatched_sizes_are_compared_at_a_common_size() {
        let a = RgbaImage::from_pixel(40, 40, Rgba([90, 90, 90, 255]));
        let b = RgbaImage::from_pixel(80, 80, Rgba([90, 90, 90, 255]));
        let s = ssim_approx(&a, &b);
        assert!((s - 1.0).abs() < 1e-9, "expected ~1, got {s}");
    }
}
