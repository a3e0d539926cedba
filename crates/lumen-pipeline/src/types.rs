//! Shared types for the lumen image pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::filters::NoisePreset;
use crate::resample::ResampleFilter;

/// Re-export `RgbaImage` so downstream crates can hold rasters without
/// depending on `image` directly.
pub use image::RgbaImage;

/// Re-export `GrayImage` for luminance planes produced by the metrics.
pub use image::GrayImage;

/// The raster type every stage operates on: 8-bit RGBA, row-major,
/// `width * height * 4` bytes.
pub type RasterBuffer = RgbaImage;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of an existing raster.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        Self::new(image.width(), image.height())
    }

    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An axis-aligned rectangle in source pixel coordinates.
///
/// Kept in floating point while candidates are scored; rounded to a
/// [`PixelRect`] only when pixels are actually extracted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub w: f64,
    /// Height.
    pub h: f64,
}

impl Rect {
    /// Create a new rectangle.
    #[must_use]
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// A rectangle covering the whole frame.
    #[must_use]
    pub fn full(dimensions: Dimensions) -> Self {
        Self::new(
            0.0,
            0.0,
            f64::from(dimensions.width),
            f64::from(dimensions.height),
        )
    }

    /// A rectangle of size `w` × `h` centered on (`cx`, `cy`).
    #[must_use]
    pub fn centered(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        Self::new(w.mul_add(-0.5, cx), h.mul_add(-0.5, cy), w, h)
    }

    /// Center point as `(x, y)`.
    #[must_use]
    pub fn center(self) -> (f64, f64) {
        (self.w.mul_add(0.5, self.x), self.h.mul_add(0.5, self.y))
    }

    /// Right edge (`x + w`).
    #[must_use]
    pub fn right(self) -> f64 {
        self.x + self.w
    }

    /// Bottom edge (`y + h`).
    #[must_use]
    pub fn bottom(self) -> f64 {
        self.y + self.h
    }

    /// Normalize the rectangle so it lies fully inside a frame of the
    /// given dimensions.
    ///
    /// A side longer than the frame is reduced to the frame's length;
    /// nothing else is ever scaled. The rectangle is then shifted inward
    /// until it no longer overflows. A non-finite side becomes the
    /// frame's length and a non-finite edge becomes 0.
    #[must_use]
    pub fn clamp_to(self, dimensions: Dimensions) -> Self {
        let frame_w = f64::from(dimensions.width);
        let frame_h = f64::from(dimensions.height);
        let finite_or = |v: f64, fallback: f64| if v.is_finite() { v } else { fallback };
        let w = finite_or(self.w, frame_w).clamp(0.0, frame_w);
        let h = finite_or(self.h, frame_h).clamp(0.0, frame_h);
        let x = finite_or(self.x, 0.0).clamp(0.0, frame_w - w);
        let y = finite_or(self.y, 0.0).clamp(0.0, frame_h - h);
        Self::new(x, y, w, h)
    }

    /// Round to integer pixel coordinates inside the frame.
    ///
    /// The result is always at least 1×1 unless the frame itself is
    /// empty.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_pixel_rect(self, dimensions: Dimensions) -> PixelRect {
        let clamped = self.clamp_to(dimensions);
        let x = (clamped.x.round() as u32).min(dimensions.width.saturating_sub(1));
        let y = (clamped.y.round() as u32).min(dimensions.height.saturating_sub(1));
        let width = (clamped.w.round() as u32)
            .max(1)
            .min(dimensions.width.saturating_sub(x));
        let height = (clamped.h.round() as u32)
            .max(1)
            .min(dimensions.height.saturating_sub(y));
        PixelRect {
            x,
            y,
            width,
            height,
        }
    }
}

/// [`Rect::clamp_to`] as a free function.
#[must_use]
pub fn clamp_rect(rect: Rect, dimensions: Dimensions) -> Rect {
    rect.clamp_to(dimensions)
}

/// An integer rectangle that lies inside its parent raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelRect {
    /// The whole raster.
    #[must_use]
    pub const fn full(dimensions: Dimensions) -> Self {
        Self {
            x: 0,
            y: 0,
            width: dimensions.width,
            height: dimensions.height,
        }
    }

    /// Resolve an optional region against a raster, defaulting to the
    /// whole raster.
    #[must_use]
    pub fn resolve(region: Option<Rect>, dimensions: Dimensions) -> Self {
        region.map_or_else(
            || Self::full(dimensions),
            |r| r.to_pixel_rect(dimensions),
        )
    }

    /// Number of pixels covered.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Which of the three crop candidates a value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CropKey {
    /// Closest framing (0.82× the base box).
    Tight,
    /// Base box.
    Medium,
    /// Widest framing (1.15× the base box).
    Loose,
}

impl fmt::Display for CropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tight => f.write_str("tight"),
            Self::Medium => f.write_str("medium"),
            Self::Loose => f.write_str("loose"),
        }
    }
}

/// Three crop candidates at one aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trio {
    /// Tight candidate.
    pub tight: Rect,
    /// Medium candidate.
    pub medium: Rect,
    /// Loose candidate.
    pub loose: Rect,
}

impl Trio {
    /// Candidates in tie-break order: tight, medium, loose.
    #[must_use]
    pub const fn candidates(&self) -> [(CropKey, Rect); 3] {
        [
            (CropKey::Tight, self.tight),
            (CropKey::Medium, self.medium),
            (CropKey::Loose, self.loose),
        ]
    }
}

/// The winning crop candidate and its composition score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropChoice {
    /// Which candidate won.
    pub key: CropKey,
    /// The winning rectangle.
    pub rect: Rect,
    /// Its composition score in `[0, 1]`.
    pub score: f64,
}

// ───────────────────────────── Options ──────────────────────────────

/// Output encoding format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeFormat {
    /// Lossy JPEG; the only format where quality changes the output.
    #[default]
    Jpeg,
    /// Lossless PNG.
    Png,
    /// Lossless WebP.
    WebP,
}

impl EncodeFormat {
    /// The MIME type of the encoded output.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }
}

impl fmt::Display for EncodeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => f.write_str("jpeg"),
            Self::Png => f.write_str("png"),
            Self::WebP => f.write_str("webp"),
        }
    }
}

/// How the final raster is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExportTarget {
    /// Encode once at a fixed quality in `(0, 1]`.
    Fixed {
        /// Output format.
        format: EncodeFormat,
        /// Encoder quality in `(0, 1]`.
        #[serde(default = "default_quality")]
        quality: f64,
    },
    /// Search for the lowest quality whose decoded output still reaches
    /// `target_ssim` against the pre-encode raster.
    Adaptive {
        /// Output format.
        format: EncodeFormat,
        /// Minimum acceptable structural similarity.
        target_ssim: f64,
        /// Lower bound of the quality search.
        #[serde(default = "default_min_quality")]
        min_quality: f64,
        /// Upper bound of the quality search, also the fallback.
        #[serde(default = "default_max_quality")]
        max_quality: f64,
    },
}

const fn default_quality() -> f64 {
    ExportTarget::DEFAULT_QUALITY
}

const fn default_min_quality() -> f64 {
    ExportTarget::DEFAULT_MIN_QUALITY
}

const fn default_max_quality() -> f64 {
    ExportTarget::DEFAULT_MAX_QUALITY
}

impl ExportTarget {
    /// Default fixed quality.
    pub const DEFAULT_QUALITY: f64 = 0.8;
    /// Default lower bound for the adaptive search.
    pub const DEFAULT_MIN_QUALITY: f64 = 0.6;
    /// Default upper bound for the adaptive search.
    pub const DEFAULT_MAX_QUALITY: f64 = 0.95;

    /// Adaptive target with the default quality bounds.
    #[must_use]
    pub const fn adaptive(format: EncodeFormat, target_ssim: f64) -> Self {
        Self::Adaptive {
            format,
            target_ssim,
            min_quality: Self::DEFAULT_MIN_QUALITY,
            max_quality: Self::DEFAULT_MAX_QUALITY,
        }
    }

    /// The output format.
    #[must_use]
    pub const fn format(&self) -> EncodeFormat {
        match *self {
            Self::Fixed { format, .. } | Self::Adaptive { format, .. } => format,
        }
    }
}

impl Default for ExportTarget {
    fn default() -> Self {
        Self::Fixed {
            format: EncodeFormat::Jpeg,
            quality: Self::DEFAULT_QUALITY,
        }
    }
}

/// Auto-crop configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropOptions {
    /// Target width / height ratio.
    pub aspect_ratio: f64,
    /// Optional subject box to center the candidates on.
    pub subject: Option<Rect>,
    /// Fraction of the frame height where eyes ideally sit.
    pub eye_line: f64,
}

impl Default for CropOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: 4.0 / 5.0,
            subject: None,
            eye_line: crate::composition::DEFAULT_EYE_LINE,
        }
    }
}

/// Tiled upscale configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpscaleOptions {
    /// Scale factor applied to both axes.
    pub scale: f64,
    /// Edge length of the square source tiles.
    pub tile_size: u32,
    /// Interpolation used for each tile.
    pub filter: ResampleFilter,
}

impl UpscaleOptions {
    /// Default scale factor.
    pub const DEFAULT_SCALE: f64 = 2.0;
    /// Default source tile edge length.
    pub const DEFAULT_TILE_SIZE: u32 = 512;
}

impl Default for UpscaleOptions {
    fn default() -> Self {
        Self {
            scale: Self::DEFAULT_SCALE,
            tile_size: Self::DEFAULT_TILE_SIZE,
            filter: ResampleFilter::CatmullRom,
        }
    }
}

/// Denoise configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseOptions {
    /// Median window radius (`1` is a 3×3 window).
    pub radius: u32,
    /// Optional preset chain; when set it replaces the plain median.
    pub preset: Option<NoisePreset>,
}

impl DenoiseOptions {
    /// Default median radius.
    pub const DEFAULT_RADIUS: u32 = 1;
}

impl Default for DenoiseOptions {
    fn default() -> Self {
        Self {
            radius: Self::DEFAULT_RADIUS,
            preset: None,
        }
    }
}

/// Highlight tone-mapping parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightOptions {
    /// Blend of the compressed luminance, `0` = off, `1` = full.
    pub strength: f64,
    /// Normalized luminance above which highlights are compressed.
    pub pivot: f64,
}

impl Default for HighlightOptions {
    fn default() -> Self {
        Self {
            strength: 0.8,
            pivot: 0.75,
        }
    }
}

/// Local-contrast parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarityOptions {
    /// Blur radius separating detail from base.
    pub radius: f32,
    /// How much of the detail layer is added back.
    pub amount: f64,
}

impl Default for ClarityOptions {
    fn default() -> Self {
        Self {
            radius: 8.0,
            amount: 0.3,
        }
    }
}

/// Vignette correction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VignetteOptions {
    /// Corner gain (`0.3` brightens corners by 30%).
    pub amount: f64,
    /// Normalized radius where correction starts.
    pub softness: f64,
}

impl Default for VignetteOptions {
    fn default() -> Self {
        Self {
            amount: 0.3,
            softness: 0.5,
        }
    }
}

/// Optional tonal corrections applied between denoise and sharpen.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceOptions {
    /// Highlight recovery.
    pub highlights: Option<HighlightOptions>,
    /// Local contrast.
    pub clarity: Option<ClarityOptions>,
    /// Vignette correction.
    pub vignette: Option<VignetteOptions>,
}

/// Unsharp-mask configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharpenOptions {
    /// Gaussian blur radius (sigma) of the mask.
    pub radius: f32,
    /// Fraction of the difference added back.
    pub amount: f64,
    /// Differences at or below this are left alone.
    pub threshold: f64,
}

impl SharpenOptions {
    /// Default blur radius.
    pub const DEFAULT_RADIUS: f32 = 2.0;
    /// Default amount.
    pub const DEFAULT_AMOUNT: f64 = 0.6;
    /// Default threshold.
    pub const DEFAULT_THRESHOLD: f64 = 3.0;
}

impl Default for SharpenOptions {
    fn default() -> Self {
        Self {
            radius: Self::DEFAULT_RADIUS,
            amount: Self::DEFAULT_AMOUNT,
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }
}

/// Configuration for one pipeline run.
///
/// Every optional stage is `None` (or `false`) by default, so the default
/// options decode, then re-encode as JPEG at quality 0.8. There is no
/// global state: each run is parameterized by exactly one of these.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Level the horizon (rotate and crop back to the original size).
    pub level: bool,
    /// Downscale so the longest side is at most this many pixels.
    pub max_dimension: Option<u32>,
    /// Composition-aware auto-crop.
    pub crop: Option<CropOptions>,
    /// Tiled upscale.
    pub upscale: Option<UpscaleOptions>,
    /// Median denoise (plus optional preset).
    pub denoise: Option<DenoiseOptions>,
    /// Tonal corrections.
    pub enhance: Option<EnhanceOptions>,
    /// Unsharp mask.
    pub sharpen: Option<SharpenOptions>,
    /// Output encoding.
    pub export: ExportTarget,
}

impl PipelineOptions {
    /// Largest accepted upscale factor.
    pub const MAX_SCALE: f64 = 8.0;

    /// Check every parameter for range and finiteness.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::InvalidOptions`] naming the first offending
    /// parameter.
    pub fn validate(&self) -> Result<(), StageError> {
        fn check(ok: bool, what: &str) -> Result<(), StageError> {
            if ok {
                Ok(())
            } else {
                Err(StageError::InvalidOptions(what.to_string()))
            }
        }

        if let Some(max) = self.max_dimension {
            check(max > 0, "max_dimension must be positive")?;
        }
        if let Some(crop) = &self.crop {
            check(
                crop.aspect_ratio.is_finite() && crop.aspect_ratio > 0.0,
                "crop.aspect_ratio must be positive",
            )?;
            check(
                (0.0..=1.0).contains(&crop.eye_line),
                "crop.eye_line must be within [0, 1]",
            )?;
            if let Some(subject) = crop.subject {
                check(
                    [subject.x, subject.y, subject.w, subject.h]
                        .iter()
                        .all(|v| v.is_finite())
                        && subject.w >= 0.0
                        && subject.h >= 0.0,
                    "crop.subject must be finite with non-negative size",
                )?;
            }
        }
        if let Some(up) = &self.upscale {
            check(
                up.scale.is_finite() && up.scale > 0.0 && up.scale <= Self::MAX_SCALE,
                "upscale.scale must be within (0, 8]",
            )?;
            check(up.tile_size > 0, "upscale.tile_size must be positive")?;
        }
        if let Some(enhance) = &self.enhance {
            if let Some(hl) = &enhance.highlights {
                check(
                    (0.0..=1.0).contains(&hl.strength),
                    "enhance.highlights.strength must be within [0, 1]",
                )?;
                check(
                    (0.0..1.0).contains(&hl.pivot),
                    "enhance.highlights.pivot must be within [0, 1)",
                )?;
            }
            if let Some(cl) = &enhance.clarity {
                check(
                    cl.radius.is_finite() && cl.amount.is_finite(),
                    "enhance.clarity values must be finite",
                )?;
            }
            if let Some(v) = &enhance.vignette {
                check(
                    v.amount.is_finite() && (0.0..=1.0).contains(&v.softness),
                    "enhance.vignette.softness must be within [0, 1]",
                )?;
            }
        }
        if let Some(sh) = &self.sharpen {
            check(
                sh.radius.is_finite() && sh.radius >= 0.0,
                "sharpen.radius must be non-negative",
            )?;
            check(
                sh.amount.is_finite() && sh.threshold.is_finite() && sh.threshold >= 0.0,
                "sharpen.amount and sharpen.threshold must be finite",
            )?;
        }
        match self.export {
            ExportTarget::Fixed { quality, .. } => {
                check(
                    quality > 0.0 && quality <= 1.0,
                    "export.quality must be within (0, 1]",
                )?;
            }
            ExportTarget::Adaptive {
                target_ssim,
                min_quality,
                max_quality,
                ..
            } => {
                check(
                    target_ssim > 0.0 && target_ssim <= 1.0,
                    "export.target_ssim must be within (0, 1]",
                )?;
                check(
                    min_quality > 0.0 && min_quality <= max_quality && max_quality <= 1.0,
                    "export quality bounds must satisfy 0 < min <= max <= 1",
                )?;
            }
        }
        Ok(())
    }
}

// ───────────────────────────── Errors ───────────────────────────────

/// A named pipeline stage, used in reports and to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Validation, decode, and orientation.
    Decode,
    /// Horizon leveling.
    Level,
    /// Downscale to a maximum dimension.
    Fit,
    /// Composition-aware crop.
    Crop,
    /// Tiled upscale.
    Upscale,
    /// Median denoise and preset chain.
    Denoise,
    /// Tonal corrections.
    Enhance,
    /// Unsharp mask.
    Sharpen,
    /// Serialization (fixed or adaptive).
    Encode,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Decode => "decode",
            Self::Level => "level",
            Self::Fit => "fit",
            Self::Crop => "crop",
            Self::Upscale => "upscale",
            Self::Denoise => "denoise",
            Self::Enhance => "enhance",
            Self::Sharpen => "sharpen",
            Self::Encode => "encode",
        };
        f.write_str(name)
    }
}

/// The ways a single stage can fail.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// The input bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The input exceeds the accepted size.
    #[error("input image is too large: {size} bytes (max {max})")]
    InputTooLarge {
        /// Input size in bytes.
        size: usize,
        /// Maximum accepted size in bytes.
        max: usize,
    },

    /// The input is not a recognized image format.
    #[error("unsupported image format")]
    UnsupportedFormat,

    /// The image data could not be decoded.
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// A tile's destination region fell outside the output raster.
    #[error("tile {tile:?} lies outside the {bounds} destination")]
    TileBounds {
        /// Destination region of the offending tile.
        tile: PixelRect,
        /// Destination raster dimensions.
        bounds: Dimensions,
    },

    /// The encoder rejected the raster or its parameters.
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    /// The encoder reported success but wrote nothing.
    #[error("encoder produced empty output")]
    EmptyOutput,

    /// The run was interrupted by its caller.
    #[error("processing was cancelled")]
    Cancelled,

    /// A configuration value is out of range.
    #[error("invalid pipeline options: {0}")]
    InvalidOptions(String),
}

/// A stage failure, tagged with the stage that produced it.
#[derive(Debug, thiserror::Error)]
#[error("{stage} stage failed: {source}")]
pub struct PipelineError {
    /// The stage that failed.
    pub stage: StageKind,
    /// What went wrong.
    #[source]
    pub source: StageError,
}

impl PipelineError {
    /// Attribute `source` to `stage`.
    #[must_use]
    pub const fn new(stage: StageKind, source: StageError) -> Self {
        Self { stage, source }
    }

    /// Whether the run stopped because its caller cancelled it.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.source, StageError::Cancelled)
    }
}
