//! Composition scoring for candidate crop rectangles.
//!
//! The score mixes three signals, each normalized to `[0, 1]`:
//!
//! | Signal    | Source                                   | Weight |
//! |-----------|------------------------------------------|--------|
//! | sharpness | Tenengrad inside the rect                | 0.6    |
//! | detail    | luminance entropy inside the rect / 7.5  | 0.2    |
//! | eye line  | where the crop puts its own eye line     | 0.2    |
//!
//! The calibration constants are empirical and open to tuning.

use crate::metrics::{entropy_score, tenengrad_score};
use crate::types::{Dimensions, Rect, RgbaImage};

/// Fraction of the frame height where eyes ideally sit.
pub const DEFAULT_EYE_LINE: f64 = 0.28;

/// Tenengrad at or below which a region counts as fully soft.
pub const SHARPNESS_FLOOR: f64 = 2e3;

/// Tenengrad at or above which a region counts as fully sharp.
pub const SHARPNESS_CEILING: f64 = 2e5;

/// Entropy (bits) that counts as full detail.
pub const ENTROPY_FULL: f64 = 7.5;

const SHARPNESS_WEIGHT: f64 = 0.6;
const ENTROPY_WEIGHT: f64 = 0.2;
const ALIGNMENT_WEIGHT: f64 = 0.2;

/// Normalized sharpness of a Tenengrad value.
#[must_use]
pub fn normalized_sharpness(tenengrad: f64) -> f64 {
    ((tenengrad - SHARPNESS_FLOOR) / (SHARPNESS_CEILING - SHARPNESS_FLOOR)).clamp(0.0, 1.0)
}

/// Eye-line alignment of `rect` in a frame `frame_height` pixels tall.
///
/// The ideal eye line sits at `frame_height * eye_line`; the crop puts
/// its own at `rect.y + rect.h * eye_line`. Alignment falls off linearly
/// and reaches 0 once the two are a third of the frame apart.
#[must_use]
pub fn eye_line_alignment(rect: Rect, frame_height: f64, eye_line: f64) -> f64 {
    if frame_height <= 0.0 {
        return 0.0;
    }
    let ideal = frame_height * eye_line;
    let actual = rect.h.mul_add(eye_line, rect.y);
    1.0 - (3.0 * (actual - ideal).abs() / frame_height).min(1.0)
}

/// Composition score of `rect` in `[0, 1]`.
///
/// `rect` is clamped into the raster before any metric is sampled.
#[must_use]
pub fn composition_score(image: &RgbaImage, rect: Rect, eye_line: f64) -> f64 {
    let dimensions = Dimensions::of(image);
    let rect = rect.clamp_to(dimensions);

    let sharp = normalized_sharpness(tenengrad_score(image, Some(rect)));
    let detail = (entropy_score(image, Some(rect)) / ENTROPY_FULL).min(1.0);
    let align = eye_line_alignment(rect, f64::from(dimensions.height), eye_line);

    SHARPNESS_WEIGHT.mul_add(sharp, ENTROPY_WEIGHT.mul_add(detail, ALIGNMENT_WEIGHT * align))
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

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
    fn sharpness_normalization_is_clamped() {
        assert!(normalized_sharpness(0.0).abs() < f64::EPSILON);
        assert!((normalized_sharpness(1e9) - 1.0).abs() < f64::EPSILON);
        assert!((normalized_sharpness(101_000.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn alignment_is_perfect_for_full_frame() {
        let rect = Rect::new(0.0, 0.0, 100.0, 200.0);
        assert!((eye_line_alignment(rect, 200.0, DEFAULT_EYE_LINE) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn alignment_falls_off_with_distance() {
        // Crop's eye line at 100 + 0.28*50 = 114, ideal 56: |Δ| = 58,
        // 3 * 58 / 200 = 0.87.
        let rect = Rect::new(0.0, 100.0, 50.0, 50.0);
        let align = eye_line_alignment(rect, 200.0, DEFAULT_EYE_LINE);
        assert!((align - 0.13).abs() < 1e-12, "got {align}");

        let far = Rect::new(0.0, 190.0, 10.0, 10.0);
        assert!(eye_line_alignment(far, 200.0, DEFAULT_EYE_LINE).abs() < f64::EPSILON);
    }

    #[test]
    fn flat_region_scores_only_alignment() {
        let img = RgbaImage::from_pixel(100, 100, Rgba([128, 128, 128, 255]));
        let score = composition_score(&img, Rect::full(Dimensions::of(&img)), DEFAULT_EYE_LINE);
        assert!((score - 0.2).abs() < 1e-12, "got {score}");
    }

    #[test]
    fn detailed_region_beats_flat_region() {
        let mut img = RgbaImage::from_pixel(100, 100, Rgba([128, 128, 128, 255]));
        let board = checkerboard(50, 100, 2);
        image::imageops::replace(&mut img, &board, 50, 0);

        let left = composition_score(&img, Rect::new(0.0, 0.0, 50.0, 100.0), DEFAULT_EYE_LINE);
        let right = composition_score(&img, Rect::new(50.0, 0.0, 50.0, 100.0), DEFAULT_EYE_LINE);
        assert!(right > left, "right {right} should beat left {left}");
        assert!((0.0..=1.0).contains(&right));
    }

    #[test]
    fn out_of_frame_rect_is_clamped_before_scoring() {
        let img = checkerboard(40, 40, 4);
        let inside = composition_score(&img, Rect::new(20.0, 0.0, 20.0, 40.0), DEFAULT_EYE_LINE);
        let overflow = composition_score(&img, Rect::new(35.0, 0.0, 20.0, 40.0), DEFAULT_EYE_LINE);
        assert!((inside - overflow).abs() < 1e-12);
    }
}
