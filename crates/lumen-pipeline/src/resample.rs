//! Resampling helpers shared by the fit, upscale, and SSIM stages.
//!
//! [`fit_within`] shrinks a raster so its longest axis is at most a given
//! number of pixels and leaves smaller rasters alone. [`resize_exact`]
//! is the single place where `image::imageops::resize` is called.

use std::fmt;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, RgbaImage};

/// Interpolation used when a raster changes size.
///
/// Ordered from fastest to slowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResampleFilter {
    /// Nearest-neighbor: fastest, blocky.
    Nearest,
    /// Bilinear interpolation.
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom).
    CatmullRom,
    /// Gaussian.
    Gaussian,
    /// Lanczos with 3 lobes: sharpest.
    Lanczos3,
}

impl ResampleFilter {
    const fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for ResampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Gaussian => f.write_str("Gaussian"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Resize to exactly `width` × `height`.
///
/// Returns a clone when the size already matches.
#[must_use = "returns the resized image"]
pub fn resize_exact(image: &RgbaImage, width: u32, height: u32, filter: ResampleFilter) -> RgbaImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    image::imageops::resize(image, width, height, filter.to_image_filter())
}

/// Dimensions after fitting `dimensions` inside a `max_dimension` square
/// with the aspect ratio preserved. Neither side drops below 1.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn fitted_dimensions(dimensions: Dimensions, max_dimension: u32) -> Dimensions {
    let long_axis = dimensions.width.max(dimensions.height);
    if long_axis <= max_dimension || long_axis == 0 {
        return dimensions;
    }
    let ratio = f64::from(max_dimension) / f64::from(long_axis);
    let scale = |side: u32| ((f64::from(side) * ratio).round() as u32).max(1);
    Dimensions::new(scale(dimensions.width), scale(dimensions.height))
}

/// Downscale so the longest axis is at most `max_dimension` pixels.
///
/// Returns the (possibly unchanged) image and whether resampling was
/// actually applied. Images are never enlarged here.
#[must_use]
pub fn fit_within(
    image: RgbaImage,
    max_dimension: u32,
    filter: ResampleFilter,
) -> (RgbaImage, bool) {
    let target = fitted_dimensions(Dimensions::of(&image), max_dimension);
    if target == Dimensions::of(&image) {
        return (image, false);
    }
    let resized = resize_exact(&image, target.width, target.height, filter);
    (resized, true)
}
