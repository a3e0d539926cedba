//! Memory-bounded tiled upscale.
//!
//! The source is walked in square tiles. Each tile is copied into a small
//! buffer, resized to exactly the destination region it maps to, and
//! pasted into the output. Peak extra memory is one source tile plus one
//! scaled tile, independent of the image size.

use crate::resample::resize_exact;
use crate::types::{Dimensions, PixelRect, RgbaImage, StageError, UpscaleOptions};

/// Result of a tiled upscale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upscaled {
    /// The scaled raster.
    pub image: RgbaImage,
    /// Number of tiles processed.
    pub tiles: u32,
}

/// Destination dimensions: `round(W * scale) × round(H * scale)`, at
/// least 1×1 for a non-empty source.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn scaled_dimensions(dimensions: Dimensions, scale: f64) -> Dimensions {
    let scale_side = |side: u32| {
        if side == 0 {
            0
        } else {
            ((f64::from(side) * scale).round() as u32).max(1)
        }
    };
    Dimensions::new(scale_side(dimensions.width), scale_side(dimensions.height))
}

/// Map a source coordinate to the destination grid.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn map_coord(source: u32, scale: f64, limit: u32, source_limit: u32) -> u32 {
    if source >= source_limit {
        // The far edge always lands exactly on the destination edge.
        limit
    } else {
        (f64::from(source) * scale).round() as u32
    }
}

/// Upscale (or rescale) `image` tile by tile.
///
/// `interrupt` is polled before every tile.
///
/// # Errors
///
/// [`StageError::Cancelled`] if `interrupt` returns `true`, and
/// [`StageError::TileBounds`] if a tile's destination region falls
/// outside the output raster.
pub fn tiled_upscale(
    image: &RgbaImage,
    options: &UpscaleOptions,
    interrupt: &dyn Fn() -> bool,
) -> Result<Upscaled, StageError> {
    let source = Dimensions::of(image);
    let target = scaled_dimensions(source, options.scale);
    let tile_size = options.tile_size.max(1);
    let mut output = RgbaImage::new(target.width, target.height);
    let mut tiles = 0u32;

    for y in (0..source.height).step_by(tile_size as usize) {
        for x in (0..source.width).step_by(tile_size as usize) {
            if interrupt() {
                log::debug!("upscale interrupted after {tiles} tiles");
                return Err(StageError::Cancelled);
            }

            let tw = tile_size.min(source.width - x);
            let th = tile_size.min(source.height - y);
            let dx0 = map_coord(x, options.scale, target.width, source.width);
            let dy0 = map_coord(y, options.scale, target.height, source.height);
            let dx1 = map_coord(x + tw, options.scale, target.width, source.width);
            let dy1 = map_coord(y + th, options.scale, target.height, source.height);
            let region = PixelRect {
                x: dx0,
                y: dy0,
                width: dx1.saturating_sub(dx0),
                height: dy1.saturating_sub(dy0),
            };
            place_tile(&mut output, image, PixelRect { x, y, width: tw, height: th }, region, options)?;
            tiles += 1;
        }
    }

    log::debug!("upscaled {source} -> {target} in {tiles} tiles");
    Ok(Upscaled { image: output, tiles })
}

fn place_tile(
    output: &mut RgbaImage,
    source: &RgbaImage,
    tile: PixelRect,
    region: PixelRect,
    options: &UpscaleOptions,
) -> Result<(), StageError> {
    let bounds = Dimensions::of(output);
    if region.x + region.width > bounds.width || region.y + region.height > bounds.height {
        return Err(StageError::TileBounds { tile: region, bounds });
    }
    if region.width == 0 || region.height == 0 {
        // Downscaling can collapse a narrow tile to nothing.
        return Ok(());
    }
    let patch = image::imageops::crop_imm(source, tile.x, tile.y, tile.width, tile.height).to_image();
    let scaled = resize_exact(&patch, region.width, region.height, options.filter);
    image::imageops::replace(output, &scaled, i64::from(region.x), i64::from(region.y));
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use image::Rgba;

    use super::*;
    use crate::resample::ResampleFilter;

    fn never() -> bool {
        false
    }

    fn options(scale: f64, tile_size: u32) -> UpscaleOptions {
        UpscaleOptions {
            scale,
            tile_size,
            filter: ResampleFilter::Triangle,
        }
    }

    fn opaque(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([30, 60, 90, 255]))
    }

    #[test]
    fn dimensions_round_for_uneven_tiles() {
        let out = tiled_upscale(&opaque(37, 23), &options(2.5, 16), &never).unwrap();
        // 92.5 and 57.5 round away from zero.
        assert_eq!(out.image.dimensions(), (93, 58));
        // 3 columns × 2 rows of tiles.
        assert_eq!(out.tiles, 6);
    }

    #[test]
    fn every_destination_pixel_is_written() {
        for (w, h, scale, tile) in [(37, 23, 2.5, 16), (50, 50, 1.7, 7), (10, 30, 3.0, 512), (64, 48, 0.5, 9)] {
            let out = tiled_upscale(&opaque(w, h), &options(scale, tile), &never).unwrap();
            let expected = scaled_dimensions(Dimensions::new(w, h), scale);
            assert_eq!(Dimensions::of(&out.image), expected);
            assert!(
                out.image.pixels().all(|p| p.0 == [30, 60, 90, 255]),
                "gap in {w}x{h} at scale {scale} with tile {tile}",
            );
        }
    }

    #[test]
    fn single_tile_matches_plain_resize() {
        #[allow(clippy::cast_possible_truncation)]
        let img = RgbaImage::from_fn(20, 12, |x, y| Rgba([(x * 12) as u8, (y * 20) as u8, 0, 255]));
        let out = tiled_upscale(&img, &options(2.0, 512), &never).unwrap();
        assert_eq!(out.tiles, 1);
        assert_eq!(out.image, resize_exact(&img, 40, 24, ResampleFilter::Triangle));
    }

    #[test]
    fn interrupt_aborts_with_cancelled() {
        let result = tiled_upscale(&opaque(40, 40), &options(2.0, 8), &|| true);
        assert!(matches!(result, Err(StageError::Cancelled)));
    }

    #[test]
    fn interrupt_is_polled_between_tiles() {
        let polls = Cell::new(0u32);
        let interrupt = || {
            polls.set(polls.get() + 1);
            polls.get() > 3
        };
        let result = tiled_upscale(&opaque(40, 40), &options(2.0, 8), &interrupt);
        assert!(matches!(result, Err(StageError::Cancelled)));
        assert_eq!(polls.get(), 4);
    }

    #[test]
    fn out_of_range_region_is_rejected() {
        let mut output = RgbaImage::new(10, 10);
        let source = opaque(4, 4);
        let result = place_tile(
            &mut output,
            &source,
            PixelRect { x: 0, y: 0, width: 4, height: 4 },
            PixelRect { x: 8, y: 0, width: 4, height: 4 },
            &options(1.0, 4),
        );
        assert!(matches!(result, Err(StageError::TileBounds { .. })));
    }
}
