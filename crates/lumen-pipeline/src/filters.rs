//! In-place enhancement filters on RGBA rasters.
//!
//! Every filter writes through [`to_channel`], so results are always
//! clamped to `0..=255` and never NaN. Alpha is left untouched.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::blur::{gaussian_blur, gaussian_blur_rgba, merge_channels, split_channels};
use crate::raster::{luma_plane, pixel_luminance, to_channel};
use crate::types::{Dimensions, PixelRect, RgbaImage};

/// Rate at which highlights above the pivot roll off.
const HIGHLIGHT_ROLLOFF: f64 = 4.0;

/// Median filter over a `(2r+1)²` window, per color channel.
///
/// Alpha is copied unchanged. A radius of 0 is a no-op.
pub fn median_denoise(image: &mut RgbaImage, radius: u32) {
    if radius == 0 || image.width() == 0 || image.height() == 0 {
        return;
    }
    let mut planes = split_channels(image);
    for plane in planes.iter_mut().take(3) {
        *plane = imageproc::filter::median_filter(plane, radius, radius);
    }
    *image = merge_channels(&planes);
}

/// Unsharp mask.
///
/// The mask is a Gaussian blur with `sigma = blur_radius`. For each color
/// channel, where `|original - blurred| > threshold` the channel becomes
/// `original + (original - blurred) * amount`.
pub fn unsharp_mask(image: &mut RgbaImage, blur_radius: f32, amount: f64, threshold: f64) {
    if blur_radius <= 0.0 || amount == 0.0 {
        return;
    }
    let blurred = gaussian_blur_rgba(image, blur_radius);
    for (pixel, soft) in image.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            let original = f64::from(pixel.0[c]);
            let diff = original - f64::from(soft.0[c]);
            if diff.abs() > threshold {
                pixel.0[c] = to_channel(diff.mul_add(amount, original));
            }
        }
    }
}

/// Compress highlights above `pivot` (normalized luminance).
///
/// Luminance above the pivot is mapped to
/// `pivot + (1 - exp(-(l - pivot) * 4)) * (1 - pivot)`; the resulting
/// luminance ratio is blended by `strength` and applied to each channel.
pub fn tone_map_highlights(image: &mut RgbaImage, strength: f64, pivot: f64) {
    if strength <= 0.0 {
        return;
    }
    for pixel in image.pixels_mut() {
        let l = pixel_luminance(*pixel) / 255.0;
        if l <= pivot {
            continue;
        }
        let mapped = (1.0 - (-(l - pivot) * HIGHLIGHT_ROLLOFF).exp()).mul_add(1.0 - pivot, pivot);
        let ratio = mapped / l;
        let factor = (ratio - 1.0).mul_add(strength, 1.0);
        for c in 0..3 {
            pixel.0[c] = to_channel(f64::from(pixel.0[c]) * factor);
        }
    }
}

/// Local contrast boost on luminance.
///
/// `detail = luma - blurred_luma`; each color channel is scaled by
/// `(luma + detail * amount) / luma`, with black pixels left black.
pub fn clarity(image: &mut RgbaImage, blur_radius: f32, amount: f64) {
    if amount == 0.0 || image.width() == 0 || image.height() == 0 {
        return;
    }
    let plane = luma_plane(image, PixelRect::full(Dimensions::of(image)));
    let base = gaussian_blur(&plane, blur_radius);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let luma = pixel_luminance(*pixel);
        let scale = if luma == 0.0 {
            0.0
        } else {
            let detail = luma - f64::from(base.get_pixel(x, y).0[0]);
            detail.mul_add(amount, luma) / luma
        };
        for c in 0..3 {
            pixel.0[c] = to_channel(f64::from(pixel.0[c]) * scale);
        }
    }
}

/// Hermite interpolation between `edge0` and `edge1`.
fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    if edge1 <= edge0 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * 2.0f64.mul_add(-t, 3.0)
}

/// Brighten toward the corners to counter lens vignetting.
///
/// `r` is the distance from the center normalized by the half-diagonal;
/// each channel is multiplied by `1 + amount * smoothstep(softness, 1, r)`.
pub fn vignette_correct(image: &mut RgbaImage, amount: f64, softness: f64) {
    if amount == 0.0 {
        return;
    }
    let (w, h) = (f64::from(image.width()), f64::from(image.height()));
    let half_diagonal = w.hypot(h) / 2.0;
    if half_diagonal == 0.0 {
        return;
    }
    let (cx, cy) = (w / 2.0, h / 2.0);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let dx = f64::from(x) + 0.5 - cx;
        let dy = f64::from(y) + 0.5 - cy;
        let r = dx.hypot(dy) / half_diagonal;
        let gain = amount.mul_add(smoothstep(softness, 1.0, r), 1.0);
        for c in 0..3 {
            pixel.0[c] = to_channel(f64::from(pixel.0[c]) * gain);
        }
    }
}

/// Named denoise chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoisePreset {
    /// 3×3 median.
    Gentle,
    /// 3×3 median, then mild clarity to recover texture.
    Balanced,
    /// 5×5 median, then stronger clarity.
    Strong,
}

impl NoisePreset {
    /// Median radius used by the preset.
    #[must_use]
    pub const fn median_radius(self) -> u32 {
        match self {
            Self::Gentle | Self::Balanced => 1,
            Self::Strong => 2,
        }
    }

    /// Clarity `(radius, amount)` applied after the median, if any.
    #[must_use]
    pub const fn clarity(self) -> Option<(f32, f64)> {
        match self {
            Self::Gentle => None,
            Self::Balanced => Some((2.0, 0.15)),
            Self::Strong => Some((3.0, 0.25)),
        }
    }

    /// Run the preset's chain in place.
    pub fn apply(self, image: &mut RgbaImage) {
        median_denoise(image, self.median_radius());
        if let Some((radius, amount)) = self.clarity() {
            clarity(image, radius, amount);
        }
    }
}

impl fmt::Display for NoisePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gentle => f.write_str("gentle"),
            Self::Balanced => f.write_str("balanced"),
            Self::Strong => f.write_str("strong"),
        }
    }
}
