//! Low-level pixel access shared by the filters and metrics.

use image::{GrayImage, Luma, Rgba};

use crate::types::{PixelRect, RgbaImage};

/// Rec.709 luma weights for red, green, and blue.
pub const REC709: [f64; 3] = [0.2126, 0.7152, 0.0722];

/// Rec.709 luminance of an sRGB triple, in `[0, 255]`.
#[must_use]
pub fn luminance(r: u8, g: u8, b: u8) -> f64 {
    REC709[2].mul_add(
        f64::from(b),
        REC709[0].mul_add(f64::from(r), REC709[1] * f64::from(g)),
    )
}

/// Rec.709 luminance of an RGBA pixel; alpha is ignored.
#[must_use]
pub fn pixel_luminance(pixel: Rgba<u8>) -> f64 {
    let [r, g, b, _] = pixel.0;
    luminance(r, g, b)
}

/// Round and clamp a channel value to `0..=255`. NaN maps to 0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_channel(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

/// Pixel at (`x`, `y`) with both coordinates clamped into the raster.
///
/// The raster must not be empty.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn pixel_clamped(image: &RgbaImage, x: i64, y: i64) -> Rgba<u8> {
    let cx = x.clamp(0, i64::from(image.width()) - 1) as u32;
    let cy = y.clamp(0, i64::from(image.height()) - 1) as u32;
    *image.get_pixel(cx, cy)
}

/// Luminance plane of `region`, rounded to 8 bits.
#[must_use]
pub fn luma_plane(image: &RgbaImage, region: PixelRect) -> GrayImage {
    GrayImage::from_fn(region.width, region.height, |x, y| {
        let p = *image.get_pixel(region.x + x, region.y + y);
        Luma([to_channel(pixel_luminance(p))])
    })
}

/// Unrounded luminance of every pixel, row-major.
#[must_use]
pub fn luma_values(image: &RgbaImage) -> Vec<f64> {
    image.pixels().map(|p| pixel_luminance(*p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Dimensions;

    #[test]
    fn luminance_of_primaries() {
        assert!((luminance(255, 255, 255) - 255.0).abs() < 1e-9);
        assert!(luminance(0, 0, 0).abs() < f64::EPSILON);
        assert!((luminance(0, 255, 0) - 0.7152 * 255.0).abs() < 1e-9);
    }

    #[test]
    fn to_channel_clamps_and_handles_nan() {
        assert_eq!(to_channel(-12.0), 0);
        assert_eq!(to_channel(300.0), 255);
        assert_eq!(to_channel(127.5), 128);
        assert_eq!(to_channel(f64::NAN), 0);
    }

    #[test]
    fn clamped_access_returns_edge_pixels() {
        let img = RgbaImage::from_fn(3, 2, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            Rgba([x as u8, y as u8, 0, 255])
        });
        assert_eq!(pixel_clamped(&img, -5, -5).0, [0, 0, 0, 255]);
        assert_eq!(pixel_clamped(&img, 10, 1).0, [2, 1, 0, 255]);
        assert_eq!(pixel_clamped(&img, 1, 99).0, [1, 1, 0, 255]);
    }

    #[test]
    fn luma_plane_covers_region() {
        let img = RgbaImage::from_pixel(6, 4, Rgba([255, 255, 255, 255]));
        let region = PixelRect {
            x: 1,
            y: 1,
            width: 3,
            height: 2,
        };
        let plane = luma_plane(&img, region);
        assert_eq!(plane.dimensions(), (3, 2));
        assert!(plane.pixels().all(|p| p.0[0] == 255));

        let full = luma_plane(&img, PixelRect::full(Dimensions::of(&img)));
        assert_eq!(full.dimensions(), (6, 4));
    }
}
