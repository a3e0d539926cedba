//! Composition-aware auto-crop.
//!
//! [`propose_trio_crops`] builds three candidates at a fixed aspect
//! ratio, [`best_of_3`] picks the one with the highest
//! [`composition_score`], and [`extract`] copies the winner out.

use crate::composition::composition_score;
use crate::types::{CropChoice, CropOptions, Dimensions, Rect, RgbaImage, Trio};

/// Scale of the tight candidate relative to the base box.
pub const TIGHT_SCALE: f64 = 0.82;

/// Scale of the medium candidate relative to the base box.
pub const MEDIUM_SCALE: f64 = 1.0;

/// Scale of the loose candidate relative to the base box.
pub const LOOSE_SCALE: f64 = 1.15;

/// Vertical center of the base box, as a fraction of the frame height,
/// when no subject is given.
pub const CENTER_BIAS: f64 = 0.38;

/// Three candidate crops at `aspect_ratio` (width / height).
///
/// The base box is the largest box of that ratio that fits the frame
/// width, centered on the subject's center or on
/// `(W / 2, 0.38 * H)`. Each candidate is the base box scaled by
/// 0.82 / 1.00 / 1.15 and then clamped into the frame.
#[must_use]
pub fn propose_trio_crops(dimensions: Dimensions, aspect_ratio: f64, subject: Option<Rect>) -> Trio {
    let frame_w = f64::from(dimensions.width);
    let frame_h = f64::from(dimensions.height);
    let box_w = frame_w.min(frame_h * aspect_ratio);
    let box_h = box_w / aspect_ratio;
    let (cx, cy) = subject.map_or((frame_w / 2.0, frame_h * CENTER_BIAS), Rect::center);

    let candidate = |scale: f64| Rect::centered(cx, cy, box_w * scale, box_h * scale).clamp_to(dimensions);
    Trio {
        tight: candidate(TIGHT_SCALE),
        medium: candidate(MEDIUM_SCALE),
        loose: candidate(LOOSE_SCALE),
    }
}

/// Score all three candidates and keep the best.
///
/// Comparison is strict, so ties go to the earlier candidate in
/// tight, medium, loose order.
#[must_use]
pub fn best_of_3(image: &RgbaImage, trio: &Trio, eye_line: f64) -> CropChoice {
    let [(key, rect), rest @ ..] = trio.candidates();
    let mut best = CropChoice {
        key,
        rect,
        score: composition_score(image, rect, eye_line),
    };
    for (key, rect) in rest {
        let score = composition_score(image, rect, eye_line);
        log::trace!("crop candidate {key}: {score:.4}");
        if score > best.score {
            best = CropChoice { key, rect, score };
        }
    }
    best
}

/// Propose a trio for `options` and pick the best candidate.
#[must_use]
pub fn auto_crop(image: &RgbaImage, options: &CropOptions) -> CropChoice {
    let trio = propose_trio_crops(Dimensions::of(image), options.aspect_ratio, options.subject);
    best_of_3(image, &trio, options.eye_line)
}

/// Copy the pixels under `rect` into a new raster.
///
/// The rect is clamped and rounded first, so the result is at least 1×1
/// for any non-empty source.
#[must_use]
pub fn extract(image: &RgbaImage, rect: Rect) -> RgbaImage {
    let region = rect.to_pixel_rect(Dimensions::of(image));
    image::imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image()
}

/// Largest centered rect of `aspect_ratio` inside a frame.
#[must_use]
pub fn center_crop_to_aspect(dimensions: Dimensions, aspect_ratio: f64) -> Rect {
    let frame_w = f64::from(dimensions.width);
    let frame_h = f64::from(dimensions.height);
    let (w, h) = if frame_w / frame_h > aspect_ratio {
        (frame_h * aspect_ratio, frame_h)
    } else {
        (frame_w, frame_w / aspect_ratio)
    };
    Rect::new((frame_w - w) / 2.0, (frame_h - h) / 2.0, w, h)
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::types::CropKey;

    #[allow(clippy::cast_possible_truncation)]
    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x * 255 / w) as u8, (y * 255 / h) as u8, 128, 255]))
    }

    fn inside(r: Rect, d: Dimensions) -> bool {
        r.x >= 0.0
            && r.y >= 0.0
            && r.right() <= f64::from(d.width) + 1e-9
            && r.bottom() <= f64::from(d.height) + 1e-9
    }

    #[test]
    fn trio_on_200x150_is_ordered_and_inside() {
        let d = Dimensions::new(200, 150);
        let trio = propose_trio_crops(d, 4.0 / 5.0, None);
        assert!(trio.tight.w < trio.medium.w, "{trio:?}");
        assert!(trio.medium.w < trio.loose.w, "{trio:?}");
        for (key, rect) in trio.candidates() {
            assert!(inside(rect, d), "{key} escapes the frame: {rect:?}");
        }
        // Base box: min(200, 150 * 0.8) = 120 wide, 150 tall.
        assert!((trio.medium.w - 120.0).abs() < 1e-9);
        assert!((trio.medium.h - 150.0).abs() < 1e-9);
    }

    #[test]
    fn trio_centers_on_subject() {
        let d = Dimensions::new(400, 400);
        let subject = Rect::new(250.0, 250.0, 40.0, 40.0);
        let trio = propose_trio_crops(d, 1.0, Some(subject));
        // 0.82 * 400 = 328 wide; centered on 270 would overflow, so it
        // shifts left to end at the frame edge.
        assert!((trio.tight.right() - 400.0).abs() < 1e-9);
        assert!(inside(trio.loose, d));
    }

    #[test]
    fn non_finite_subject_still_yields_candidates_inside_frame() {
        let d = Dimensions::new(20, 20);
        let trio = propose_trio_crops(d, 1.0, Some(Rect::new(f64::NAN, 0.0, 1.0, 1.0)));
        for (key, rect) in trio.candidates() {
            assert!(rect.x.is_finite() && rect.y.is_finite(), "{key}: {rect:?}");
            assert!(inside(rect, d), "{key}: {rect:?}");
        }
        let choice = best_of_3(&gradient(20, 20), &trio, 0.28);
        assert!(choice.rect.x.is_finite() && choice.score.is_finite());
        assert!(inside(choice.rect, d));
    }

    #[test]
    fn trio_widths_ordered_for_wide_and_tall_frames() {
        for (w, h, ratio) in [(1920, 1080, 16.0 / 9.0), (600, 1200, 4.0 / 5.0), (300, 300, 1.5)] {
            let d = Dimensions::new(w, h);
            let trio = propose_trio_crops(d, ratio, None);
            assert!(trio.tight.w <= trio.medium.w && trio.medium.w <= trio.loose.w);
            for (_, rect) in trio.candidates() {
                assert!(inside(rect, d));
            }
        }
    }

    #[test]
    fn ties_resolve_to_tight() {
        let img = RgbaImage::from_pixel(100, 100, Rgba([50, 50, 50, 255]));
        let same = Rect::new(10.0, 10.0, 50.0, 50.0);
        let trio = Trio {
            tight: same,
            medium: same,
            loose: same,
        };
        let choice = best_of_3(&img, &trio, 0.28);
        assert_eq!(choice.key, CropKey::Tight);
    }

    #[test]
    fn best_of_3_prefers_the_detailed_candidate() {
        let mut img = RgbaImage::from_pixel(300, 100, Rgba([90, 90, 90, 255]));
        let board = RgbaImage::from_fn(100, 100, |x, y| {
            if (x / 2 + y / 2) % 2 == 0 { Rgba([0, 0, 0, 255]) } else { Rgba([255, 255, 255, 255]) }
        });
        image::imageops::replace(&mut img, &board, 200, 0);
        let trio = Trio {
            tight: Rect::new(0.0, 0.0, 100.0, 100.0),
            medium: Rect::new(100.0, 0.0, 100.0, 100.0),
            loose: Rect::new(200.0, 0.0, 100.0, 100.0),
        };
        let choice = best_of_3(&img, &trio, 0.28);
        assert_eq!(choice.key, CropKey::Loose);
        assert!(choice.score > 0.6);
    }

    #[test]
    fn auto_crop_returns_candidate_inside_frame() {
        let img = gradient(200, 150);
        let choice = auto_crop(&img, &CropOptions::default());
        assert!(inside(choice.rect, Dimensions::of(&img)));
        assert!((0.0..=1.0).contains(&choice.score));
    }

    #[test]
    fn extract_copies_clamped_region() {
        let img = gradient(50, 40);
        let out = extract(&img, Rect::new(40.0, 30.0, 20.0, 20.0));
        assert_eq!(out.dimensions(), (20, 20));
        assert_eq!(out.get_pixel(0, 0), img.get_pixel(30, 20));
    }

    #[test]
    fn center_crop_to_aspect_fits_frame() {
        let r = center_crop_to_aspect(Dimensions::new(400, 300), 1.0);
        assert_eq!(r, Rect::new(50.0, 0.0, 300.0, 300.0));
        let r = center_crop_to_aspect(Dimensions::new(400, 300), 2.0);
        assert_eq!(r, Rect::new(0.0, 50.0, 400.0, 200.0));
    }
}
