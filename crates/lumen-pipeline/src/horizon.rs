//! Horizon tilt estimation and canvas rotation.
//!
//! [`estimate_horizon_angle`] votes near-horizontal edge orientations into
//! a magnitude-weighted histogram and returns the rotation that levels
//! the strongest one. [`rotate_canvas`] rotates about the center onto a
//! canvas that grows to the rotated bounding box, so nothing is clipped.
//!
//! Angles are in degrees; positive values rotate clockwise on screen.

use image::Rgba;

use crate::raster::luma_plane;
use crate::resample::{ResampleFilter, resize_exact};
use crate::types::{Dimensions, PixelRect, RgbaImage};

/// Gradient magnitudes below this are treated as noise.
pub const MIN_GRADIENT: f64 = 5.0;

/// Only edges within this many degrees of horizontal vote.
pub const MAX_TILT_DEGREES: f64 = 10.0;

/// Histogram bin width in degrees.
pub const BIN_DEGREES: f64 = 0.25;

/// Estimated angles smaller than this snap to exactly 0.
pub const SNAP_DEGREES: f64 = 0.2;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Rotation (degrees) that levels the dominant near-horizontal edge.
///
/// Returns 0 when no interior pixel has a strong enough near-horizontal
/// edge, or when the estimate is within [`SNAP_DEGREES`] of level.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn estimate_horizon_angle(image: &RgbaImage) -> f64 {
    let luma = luma_plane(image, PixelRect::full(Dimensions::of(image)));
    let (w, h) = luma.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }
    let gx = imageproc::gradients::horizontal_sobel(&luma);
    let gy = imageproc::gradients::vertical_sobel(&luma);

    let bins = (2.0 * MAX_TILT_DEGREES / BIN_DEGREES).round() as usize + 1;
    let mut weights = vec![0.0f64; bins];

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let dx = f64::from(gx.get_pixel(x, y).0[0]);
            let dy = f64::from(gy.get_pixel(x, y).0[0]);
            let magnitude = dx.hypot(dy);
            if magnitude < MIN_GRADIENT {
                continue;
            }
            // The edge runs perpendicular to the gradient.
            let line = fold_half_turn(dy.atan2(dx).to_degrees() + 90.0);
            if line.abs() > MAX_TILT_DEGREES {
                continue;
            }
            let bin = ((line + MAX_TILT_DEGREES) / BIN_DEGREES).round() as usize;
            weights[bin.min(bins - 1)] += magnitude;
        }
    }

    let Some((best, &weight)) = weights
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
    else {
        return 0.0;
    };
    if weight == 0.0 {
        return 0.0;
    }

    let tilt = (best as f64).mul_add(BIN_DEGREES, -MAX_TILT_DEGREES);
    let correction = -tilt;
    log::debug!("horizon tilt {tilt:.2}°, correction {correction:.2}°");
    if correction.abs() < SNAP_DEGREES {
        0.0
    } else {
        correction
    }
}

/// Fold an angle into `(-90, 90]`.
fn fold_half_turn(degrees: f64) -> f64 {
    let folded = (degrees + 90.0).rem_euclid(180.0) - 90.0;
    if folded <= -90.0 { folded + 180.0 } else { folded }
}

/// Size of the bounding box of a `dimensions` raster rotated by `degrees`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn rotated_dimensions(dimensions: Dimensions, degrees: f64) -> Dimensions {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (sin, cos) = (sin.abs(), cos.abs());
    let w = f64::from(dimensions.width);
    let h = f64::from(dimensions.height);
    Dimensions::new(
        w.mul_add(cos, h * sin).round() as u32,
        w.mul_add(sin, h * cos).round() as u32,
    )
}

/// Rotate about the center onto a canvas sized to the rotated bounding
/// box, sampling bilinearly and filling uncovered pixels with transparent
/// black.
///
/// Quarter turns are exact pixel permutations.
#[must_use = "returns the rotated image"]
#[allow(clippy::float_cmp)]
pub fn rotate_canvas(image: &RgbaImage, degrees: f64) -> RgbaImage {
    let quarter = degrees.rem_euclid(360.0);
    if quarter == 0.0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    if quarter == 90.0 {
        return image::imageops::rotate90(image);
    }
    if quarter == 180.0 {
        return image::imageops::rotate180(image);
    }
    if quarter == 270.0 {
        return image::imageops::rotate270(image);
    }

    let target = rotated_dimensions(Dimensions::of(image), degrees);
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (src_cx, src_cy) = (f64::from(image.width()) / 2.0, f64::from(image.height()) / 2.0);
    let (dst_cx, dst_cy) = (f64::from(target.width) / 2.0, f64::from(target.height) / 2.0);

    RgbaImage::from_fn(target.width.max(1), target.height.max(1), |x, y| {
        let dx = f64::from(x) + 0.5 - dst_cx;
        let dy = f64::from(y) + 0.5 - dst_cy;
        // Inverse of the forward rotation maps the destination back.
        let sx = dx.mul_add(cos, dy * sin) + src_cx;
        let sy = dy.mul_add(cos, -dx * sin) + src_cy;
        sample_bilinear(image, sx - 0.5, sy - 0.5)
    })
}

/// Bilinear sample at continuous pixel coordinates; out-of-bounds
/// neighbors contribute transparent black.
#[allow(clippy::cast_possible_truncation)]
fn sample_bilinear(image: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (x0, y0) = (x.floor(), y.floor());
    let (fx, fy) = (x - x0, y - y0);
    let (ix, iy) = (x0 as i64, y0 as i64);
    let (w, h) = (i64::from(image.width()), i64::from(image.height()));

    if ix < -1 || iy < -1 || ix >= w || iy >= h {
        return TRANSPARENT;
    }

    let fetch = |px: i64, py: i64| -> [f64; 4] {
        if px < 0 || py < 0 || px >= w || py >= h {
            return [0.0; 4];
        }
        #[allow(clippy::cast_sign_loss)]
        let p = image.get_pixel(px as u32, py as u32).0;
        p.map(f64::from)
    };

    let (p00, p10) = (fetch(ix, iy), fetch(ix + 1, iy));
    let (p01, p11) = (fetch(ix, iy + 1), fetch(ix + 1, iy + 1));
    Rgba(std::array::from_fn(|c| {
        let top = (p10[c] - p00[c]).mul_add(fx, p00[c]);
        let bottom = (p11[c] - p01[c]).mul_add(fx, p01[c]);
        crate::raster::to_channel((bottom - top).mul_add(fy, top))
    }))
}

/// Center-crop `image` to `dimensions` (or less, if it is smaller).
fn center_crop(image: &RgbaImage, dimensions: Dimensions) -> RgbaImage {
    let width = dimensions.width.min(image.width());
    let height = dimensions.height.min(image.height());
    let x = (image.width() - width) / 2;
    let y = (image.height() - height) / 2;
    image::imageops::crop_imm(image, x, y, width, height).to_image()
}

/// Rotate, then center-crop back to `dimensions`.
///
/// Undoes the bounding-box growth of [`rotate_canvas`]: rotating by θ and
/// then calling this with −θ and the original size returns a raster of
/// the original size.
#[must_use = "returns the rotated image"]
pub fn rotate_and_crop(image: &RgbaImage, degrees: f64, dimensions: Dimensions) -> RgbaImage {
    center_crop(&rotate_canvas(image, degrees), dimensions)
}

/// Largest centered box with the original aspect ratio that stays inside
/// the rotated content, so it contains no padding.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn inscribed_dimensions(dimensions: Dimensions, degrees: f64) -> Dimensions {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let (sin, cos) = (sin.abs(), cos.abs());
    let w = f64::from(dimensions.width);
    let h = f64::from(dimensions.height);
    let k = (w / w.mul_add(cos, h * sin)).min(h / w.mul_add(sin, h * cos));
    if !k.is_finite() {
        return dimensions;
    }
    Dimensions::new(
        ((w * k).floor() as u32).max(1),
        ((h * k).floor() as u32).max(1),
    )
}

/// Estimate the tilt and level it.
///
/// The rotated raster is cropped to its largest padding-free box and
/// resized back to the original dimensions. Returns the raster and the
/// applied rotation, which is 0 (and the raster untouched) when the
/// image is already level.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn level_horizon(image: RgbaImage) -> (RgbaImage, f64) {
    let angle = estimate_horizon_angle(&image);
    if angle == 0.0 {
        return (image, 0.0);
    }
    let original = Dimensions::of(&image);
    let inscribed = inscribed_dimensions(original, angle);
    // Two pixels per side keep bilinear taps off the padding.
    let safe = Dimensions::new(
        inscribed.width.saturating_sub(4).max(1),
        inscribed.height.saturating_sub(4).max(1),
    );
    let cropped = rotate_and_crop(&image, angle, safe);
    let leveled = resize_exact(
        &cropped,
        original.width,
        original.height,
        ResampleFilter::CatmullRom,
    );
    (leveled, angle)
}
