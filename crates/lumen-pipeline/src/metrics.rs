//! Luminance statistics used to judge sharpness, detail, and exposure.
//!
//! All metrics read the Rec.709 luminance of an optional region
//! (defaulting to the whole raster). Regions are given as floating-point
//! [`Rect`]s and clamped into the raster before sampling.

use image::GrayImage;

use crate::raster::{luma_plane, pixel_luminance};
use crate::types::{Dimensions, PixelRect, Rect, RgbaImage};

pub use crate::raster::luminance;

/// Default luminance at or above which a pixel counts as clipped.
pub const DEFAULT_CLIP_THRESHOLD: u8 = 250;

/// A 256-bucket luminance histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    /// Pixel count for each rounded luminance value.
    pub counts: [u64; 256],
}

impl Histogram {
    /// Total number of sampled pixels.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Shannon entropy of the distribution in bits, in `[0, 8]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn entropy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let total = total as f64;
        self.counts
            .iter()
            .filter(|&&n| n > 0)
            .map(|&n| {
                let p = n as f64 / total;
                -p * p.log2()
            })
            .sum()
    }
}

/// Luminance plane of a region (whole raster when `None`).
#[must_use]
pub fn luminance_image(image: &RgbaImage, region: Option<Rect>) -> GrayImage {
    luma_plane(image, PixelRect::resolve(region, Dimensions::of(image)))
}

/// Histogram of rounded luminance over a region.
///
/// The bucket sum always equals the region's pixel count.
#[must_use]
pub fn compute_histogram(image: &RgbaImage, region: Option<Rect>) -> Histogram {
    let mut counts = [0u64; 256];
    for pixel in luminance_image(image, region).pixels() {
        counts[usize::from(pixel.0[0])] += 1;
    }
    Histogram { counts }
}

/// Fraction of pixels whose luminance is at or above `threshold`.
///
/// Returns 0 for an empty raster.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn highlight_clip_fraction(image: &RgbaImage, threshold: u8) -> f64 {
    let total = Dimensions::of(image).pixel_count();
    if total == 0 {
        return 0.0;
    }
    let limit = f64::from(threshold);
    let clipped = image
        .pixels()
        .filter(|p| pixel_luminance(**p).round() >= limit)
        .count();
    clipped as f64 / total as f64
}

/// Tenengrad sharpness: the mean of `gx² + gy²` from 3×3 Sobel kernels.
///
/// Only interior pixels of the region (those with a full neighborhood)
/// contribute. Regions smaller than 3×3 score 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn tenengrad_score(image: &RgbaImage, region: Option<Rect>) -> f64 {
    let luma = luminance_image(image, region);
    let (w, h) = luma.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let gx = imageproc::gradients::horizontal_sobel(&luma);
    let gy = imageproc::gradients::vertical_sobel(&luma);

    let mut sum = 0.0;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let dx = f64::from(gx.get_pixel(x, y).0[0]);
            let dy = f64::from(gy.get_pixel(x, y).0[0]);
            sum += dx.mul_add(dx, dy * dy);
        }
    }
    let interior = u64::from(w - 2) * u64::from(h - 2);
    sum / interior as f64
}

/// Shannon entropy of the region's luminance histogram, in bits.
#[must_use]
pub fn entropy_score(image: &RgbaImage, region: Option<Rect>) -> f64 {
    compute_histogram(image, region).entropy()
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    fn solid(w: u32, h: u32, v: u8) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([v, v, v, 255]))
    }

    /// Every luminance value 0..=255 appears equally often.
    #[allow(clippy::cast_possible_truncation)]
    fn full_range() -> RgbaImage {
        RgbaImage::from_fn(256, 16, |x, _| {
            let v = x as u8;
            Rgba([v, v, v, 255])
        })
    }

    fn checkerboard(w: u32, h: u32, cell: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        })
    }

    #[test]
    fn histogram_sum_equals_pixel_count() {
        let img = full_range();
        assert_eq!(compute_histogram(&img, None).total(), 256 * 16);

        for (w, h) in [(1.0, 1.0), (3.0, 7.0), (100.0, 2.0)] {
            let region = Rect::new(10.0, 3.0, w, h);
            let expected = region.to_pixel_rect(Dimensions::of(&img)).pixel_count();
            assert_eq!(compute_histogram(&img, Some(region)).total(), expected);
        }
    }

    #[test]
    fn histogram_buckets_by_luminance() {
        let hist = compute_histogram(&solid(4, 4, 77), None);
        assert_eq!(hist.counts[77], 16);
        assert_eq!(hist.total(), 16);
    }

    #[test]
    fn clip_fraction_white_and_black() {
        assert!((highlight_clip_fraction(&solid(8, 8, 255), DEFAULT_CLIP_THRESHOLD) - 1.0).abs() < f64::EPSILON);
        assert!(highlight_clip_fraction(&solid(8, 8, 0), DEFAULT_CLIP_THRESHOLD).abs() < f64::EPSILON);
    }

    #[test]
    fn clip_fraction_counts_half() {
        let img = RgbaImage::from_fn(10, 4, |x, _| {
            if x < 5 { Rgba([255, 255, 255, 255]) } else { Rgba([10, 10, 10, 255]) }
        });
        assert!((highlight_clip_fraction(&img, 250) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn entropy_of_flat_image_is_zero() {
        assert!(entropy_score(&solid(16, 16, 42), None).abs() < f64::EPSILON);
    }

    #[test]
    fn entropy_of_uniform_luminance_is_eight_bits() {
        let e = entropy_score(&full_range(), None);
        assert!((e - 8.0).abs() < 1e-9, "expected 8 bits, got {e}");
    }

    #[test]
    fn tenengrad_is_zero_for_flat_and_tiny_regions() {
        assert!(tenengrad_score(&solid(20, 20, 128), None).abs() < f64::EPSILON);
        let img = checkerboard(20, 20, 1);
        assert!(tenengrad_score(&img, Some(Rect::new(0.0, 0.0, 2.0, 2.0))).abs() < f64::EPSILON);
    }

    #[test]
    fn tenengrad_ranks_detail_above_smoothness() {
        let fine = tenengrad_score(&checkerboard(32, 32, 2), None);
        let coarse = tenengrad_score(&checkerboard(32, 32, 16), None);
        assert!(fine > coarse, "fine {fine} should beat coarse {coarse}");
        assert!(coarse > 0.0);
    }

    #[test]
    fn tenengrad_ignores_border_rows() {
        // A bright border around a flat interior: border pixels have no
        // full neighborhood, so the interior of the interior stays flat.
        let mut img = solid(10, 10, 50);
        for i in 0..10 {
            img.put_pixel(i, 0, Rgba([255, 255, 255, 255]));
        }
        let inner = Rect::new(2.0, 2.0, 6.0, 6.0);
        assert!(tenengrad_score(&img, Some(inner)).abs() < f64::EPSILON);
    }
}
