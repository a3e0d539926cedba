//! Gaussian blur and per-channel plumbing for RGBA rasters.
//!
//! `imageproc`'s neighborhood filters take single-channel images, so
//! [`split_channels`] and [`merge_channels`] break an RGBA raster into
//! four planes and put it back together. [`gaussian_blur_rgba`] is built
//! on them and feeds the unsharp mask and the clarity filter.

use image::{GrayImage, Luma, Rgba};

use crate::types::RgbaImage;

/// Split an RGBA raster into its R, G, B, and A planes.
#[must_use]
pub fn split_channels(image: &RgbaImage) -> [GrayImage; 4] {
    let (w, h) = image.dimensions();
    std::array::from_fn(|c| GrayImage::from_fn(w, h, |x, y| Luma([image.get_pixel(x, y).0[c]])))
}

/// Reassemble four equally sized planes into an RGBA raster.
#[must_use]
pub fn merge_channels(planes: &[GrayImage; 4]) -> RgbaImage {
    let (w, h) = planes[0].dimensions();
    RgbaImage::from_fn(w, h, |x, y| {
        Rgba(std::array::from_fn(|c| planes[c].get_pixel(x, y).0[0]))
    })
}

/// Blur a single plane.
///
/// Non-positive `sigma` returns the plane unchanged; `imageproc` panics
/// on `sigma <= 0.0`.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    imageproc::filter::gaussian_blur_f32(image, sigma)
}

/// Blur every channel of an RGBA raster with the same separable
/// Gaussian kernel (`sigma` = blur radius).
///
/// Non-positive `sigma` returns the raster unchanged.
#[must_use = "returns the blurred RGBA image"]
pub fn gaussian_blur_rgba(image: &RgbaImage, sigma: f32) -> RgbaImage {
    if sigma <= 0.0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let planes = split_channels(image);
    let blurred: [GrayImage; 4] = std::array::from_fn(|c| gaussian_blur(&planes[c], sigma));
    merge_channels(&blurred)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A vertical black/white boundary at x=5.
    fn sharp_edge_image() -> RgbaImage {
        RgbaImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        })
    }

    #[test]
    fn split_then_merge_is_lossless() {
        #[allow(clippy::cast_possible_truncation)]
        let img = RgbaImage::from_fn(7, 5, |x, y| {
            Rgba([(x * 30) as u8, (y * 40) as u8, ((x + y) * 10) as u8, (x * 3) as u8])
        });
        assert_eq!(merge_channels(&split_channels(&img)), img);
    }

    #[test]
    fn zero_and_negative_sigma_are_no_ops() {
        let img = sharp_edge_image();
        assert_eq!(gaussian_blur_rgba(&img, 0.0), img);
        assert_eq!(gaussian_blur_rgba(&img, -1.0), img);
    }

    #[test]
    fn empty_raster_is_returned_as_is() {
        let img = RgbaImage::new(0, 0);
        assert_eq!(gaussian_blur_rgba(&img, 2.0).dimensions(), (0, 0));
    }

    #[test]
    fn dimensions_preserved() {
        let blurred = gaussian_blur_rgba(&RgbaImage::new(17, 31), 1.4);
        assert_eq!(blurred.dimensions(), (17, 31));
    }

    #[test]
    fn blur_softens_color_edge() {
        let blurred = gaussian_blur_rgba(&sharp_edge_image(), 2.0);
        let left = blurred.get_pixel(4, 5).0[0];
        let right = blurred.get_pixel(5, 5).0[0];
        assert!(left < 255, "expected red to fall near the edge, got {left}");
        assert!(right > 0, "expected red to rise near the edge, got {right}");
    }

    #[test]
    fn uniform_raster_stays_uniform() {
        let img = RgbaImage::from_pixel(10, 10, Rgba([100, 150, 200, 250]));
        let blurred = gaussian_blur_rgba(&img, 1.4);
        for pixel in blurred.pixels() {
            for (c, &expected) in [100u8, 150, 200, 250].iter().enumerate() {
                let diff = i16::from(pixel.0[c]) - i16::from(expected);
                assert!(diff.abs() <= 1, "channel {c}: expected ~{expected}, got {}", pixel.0[c]);
            }
        }
    }
}
