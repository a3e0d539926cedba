//! Input validation and decoding.
//!
//! Raw bytes in, upright RGBA raster out. The format is sniffed from the
//! magic bytes, never trusted from a file name, and EXIF orientation is
//! applied so every later stage sees the image the way it was shot.
//! Metadata does not survive: the raster carries pixels only.

use std::io::Cursor;

use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};

use crate::types::{RgbaImage, StageError};

/// Largest accepted input, in bytes.
pub const MAX_INPUT_BYTES: usize = 20 * 1024 * 1024;

/// Formats accepted on input.
pub const SUPPORTED_FORMATS: [ImageFormat; 5] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Gif,
    ImageFormat::Bmp,
];

/// Check size limits and sniff the format without decoding.
///
/// # Errors
///
/// [`StageError::EmptyInput`] for empty input,
/// [`StageError::InputTooLarge`] above [`MAX_INPUT_BYTES`], and
/// [`StageError::UnsupportedFormat`] when the magic bytes do not match
/// one of [`SUPPORTED_FORMATS`].
pub fn sniff_format(bytes: &[u8]) -> Result<ImageFormat, StageError> {
    if bytes.is_empty() {
        return Err(StageError::EmptyInput);
    }
    if bytes.len() > MAX_INPUT_BYTES {
        return Err(StageError::InputTooLarge {
            size: bytes.len(),
            max: MAX_INPUT_BYTES,
        });
    }
    let format = image::guess_format(bytes).map_err(|_| StageError::UnsupportedFormat)?;
    if SUPPORTED_FORMATS.contains(&format) {
        Ok(format)
    } else {
        Err(StageError::UnsupportedFormat)
    }
}

/// Validate, decode, and orient an image.
///
/// Returns the upright RGBA raster and the sniffed source format.
///
/// # Errors
///
/// Any error from [`sniff_format`], or [`StageError::Decode`] when the
/// data is corrupt.
pub fn decode_image(bytes: &[u8]) -> Result<(RgbaImage, ImageFormat), StageError> {
    let format = sniff_format(bytes)?;

    let mut decoder = ImageReader::with_format(Cursor::new(bytes), format).into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);

    log::debug!(
        "decoded {format:?} {}x{} ({orientation:?})",
        image.width(),
        image.height()
    );
    Ok((image.into_rgba8(), format))
}
