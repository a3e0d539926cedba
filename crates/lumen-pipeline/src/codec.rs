//! Output encoding, fixed or SSIM-driven.
//!
//! JPEG is the only lossy format, so it is the only one where the quality
//! search does anything. PNG and WebP are written losslessly.
//!
//! The adaptive search is a bounded binary search over quality: each
//! probe is encoded, decoded again, and compared against the pre-encode
//! baseline with [`ssim_approx`]. The lowest passing quality wins.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};
use serde::Serialize;

use crate::ssim::ssim_approx;
use crate::types::{EncodeFormat, RgbaImage, StageError};

/// Most probes the adaptive search will encode.
pub const MAX_SEARCH_ITERATIONS: u32 = 7;

/// Quality step used to narrow the search window and to stop it.
pub const SEARCH_STEP: f64 = 0.02;

/// Map a `(0, 1]` quality to the JPEG encoder's `1..=100` scale.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn jpeg_quality(quality: f64) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

impl EncodeFormat {
    /// Whether the encoder's output depends on quality.
    #[must_use]
    pub const fn is_lossy(self) -> bool {
        matches!(self, Self::Jpeg)
    }

    const fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::WebP => ImageFormat::WebP,
        }
    }
}

/// Encode `image` once.
///
/// JPEG output drops the alpha channel. `quality` is ignored by the
/// lossless formats.
///
/// # Errors
///
/// [`StageError::Encode`] if the encoder fails and
/// [`StageError::EmptyOutput`] if it produced no bytes.
pub fn encode(image: &RgbaImage, format: EncodeFormat, quality: f64) -> Result<Vec<u8>, StageError> {
    let mut buf = Vec::new();
    let (w, h) = image.dimensions();
    let result = match format {
        EncodeFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
            JpegEncoder::new_with_quality(&mut buf, jpeg_quality(quality)).write_image(
                rgb.as_raw(),
                w,
                h,
                ExtendedColorType::Rgb8,
            )
        }
        EncodeFormat::Png => {
            PngEncoder::new(&mut buf).write_image(image.as_raw(), w, h, ExtendedColorType::Rgba8)
        }
        EncodeFormat::WebP => WebPEncoder::new_lossless(&mut buf).write_image(
            image.as_raw(),
            w,
            h,
            ExtendedColorType::Rgba8,
        ),
    };
    result.map_err(StageError::Encode)?;

    if buf.is_empty() {
        return Err(StageError::EmptyOutput);
    }
    Ok(buf)
}

/// Decode our own output again for comparison.
fn decode_encoded(bytes: &[u8], format: EncodeFormat) -> Result<RgbaImage, StageError> {
    image::load_from_memory_with_format(bytes, format.image_format())
        .map(DynamicImage::into_rgba8)
        .map_err(StageError::Encode)
}

/// Outcome of [`adaptive_encode`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptiveOutcome {
    /// The chosen encoding.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Quality the bytes were encoded at.
    pub quality: f64,
    /// SSIM of the decoded bytes against the baseline.
    pub ssim: f64,
    /// Number of probes encoded during the search.
    pub iterations: u32,
    /// Whether `ssim` reached the target.
    pub met_target: bool,
}

/// Bounds of the adaptive search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveTarget {
    /// Output format.
    pub format: EncodeFormat,
    /// Minimum acceptable SSIM.
    pub target_ssim: f64,
    /// Lowest quality probed.
    pub min_quality: f64,
    /// Highest quality probed, and the fallback.
    pub max_quality: f64,
}

/// Find the lowest quality in `[min_quality, max_quality]` whose decoded
/// output reaches `target_ssim` against `baseline`.
///
/// At most [`MAX_SEARCH_ITERATIONS`] probes are encoded; the search stops
/// early once the window is narrower than [`SEARCH_STEP`]. When no probe
/// passes, the image is encoded at `max_quality`. Lossless formats skip
/// the search.
///
/// # Errors
///
/// Any encode error, or [`StageError::Cancelled`] if `interrupt` fires
/// between probes.
pub fn adaptive_encode(
    baseline: &RgbaImage,
    target: AdaptiveTarget,
    interrupt: &dyn Fn() -> bool,
) -> Result<AdaptiveOutcome, StageError> {
    if !target.format.is_lossy() {
        let bytes = encode(baseline, target.format, target.max_quality)?;
        return Ok(AdaptiveOutcome {
            bytes,
            quality: target.max_quality,
            ssim: 1.0,
            iterations: 0,
            met_target: true,
        });
    }

    let mut lo = target.min_quality;
    let mut hi = target.max_quality;
    let mut best: Option<AdaptiveOutcome> = None;
    let mut iterations = 0;

    while iterations < MAX_SEARCH_ITERATIONS && hi - lo >= SEARCH_STEP {
        if interrupt() {
            return Err(StageError::Cancelled);
        }
        let quality = f64::midpoint(lo, hi);
        let bytes = encode(baseline, target.format, quality)?;
        let ssim = ssim_approx(baseline, &decode_encoded(&bytes, target.format)?);
        iterations += 1;
        log::debug!(
            "adaptive probe {iterations}: q={quality:.3} ssim={ssim:.4} ({} bytes)",
            bytes.len()
        );

        if ssim >= target.target_ssim {
            best = Some(AdaptiveOutcome {
                bytes,
                quality,
                ssim,
                iterations,
                met_target: true,
            });
            hi = quality - SEARCH_STEP;
        } else {
            lo = quality + SEARCH_STEP;
        }
    }

    if let Some(mut found) = best {
        found.iterations = iterations;
        return Ok(found);
    }

    log::info!(
        "no probe reached ssim {:.3}; encoding at q={:.2}",
        target.target_ssim,
        target.max_quality
    );
    let bytes = encode(baseline, target.format, target.max_quality)?;
    let ssim = ssim_approx(baseline, &decode_encoded(&bytes, target.format)?);
    Ok(AdaptiveOutcome {
        bytes,
        quality: target.max_quality,
        ssim,
        iterations,
        met_target: ssim >= target.target_ssim,
    })
}
