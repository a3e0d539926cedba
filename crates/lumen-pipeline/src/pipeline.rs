//! Typestate pipeline: advance stage by stage, inspecting each
//! intermediate raster before continuing.
//!
//! ```rust
//! # use lumen_pipeline::{Pipeline, PipelineError, PipelineOptions};
//! # fn run(jpeg: Vec<u8>) -> Result<(), PipelineError> {
//! let output = Pipeline::new(jpeg, PipelineOptions::default())
//!     .decode()?
//!     .frame()?
//!     .upscale()?
//!     .denoise()?
//!     .sharpen()?
//!     .encode()?
//!     .into_output();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state. The
//! order is fixed: framing happens before upscaling, and denoise always
//! runs before sharpen. Stages whose options are `None` pass the raster
//! through untouched and add nothing to the report.
//!
//! The interrupt installed with [`Pending::with_interrupt`] is polled at
//! the start of every stage, between upscale tiles, and between adaptive
//! encode probes.
//!
//! # Memory
//!
//! Exactly one raster is alive between stages. The adaptive encoder
//! borrows the sharpened raster as its SSIM baseline while it probes.

use std::time::Duration;

use web_time::Instant;

use crate::codec::{AdaptiveTarget, adaptive_encode, encode};
use crate::diagnostics::{ProcessingReport, StageMetrics, StageRecord};
use crate::types::{
    CropChoice, Dimensions, EncodeFormat, ExportTarget, PipelineError, PipelineOptions, RgbaImage,
    StageError, StageKind,
};

/// Cooperative cancellation check, polled between units of work.
pub type Interrupt = Box<dyn Fn() -> bool + Send>;

/// Entry point of the typestate chain.
pub struct Pipeline;

impl Pipeline {
    /// Start a run over `source` bytes.
    pub fn new(source: Vec<u8>, options: PipelineOptions) -> Pending {
        Pending {
            ctx: Context {
                options,
                interrupt: Box::new(|| false),
                records: Vec::new(),
                started: Instant::now(),
                input_bytes: source.len(),
                source_dimensions: Dimensions::new(0, 0),
            },
            source,
        }
    }
}

/// State threaded through every stage.
struct Context {
    options: PipelineOptions,
    interrupt: Interrupt,
    records: Vec<StageRecord>,
    started: Instant,
    input_bytes: usize,
    source_dimensions: Dimensions,
}

impl Context {
    fn check(&self, stage: StageKind) -> Result<(), PipelineError> {
        if (self.interrupt)() {
            log::debug!("interrupted before {stage}");
            return Err(PipelineError::new(stage, StageError::Cancelled));
        }
        Ok(())
    }

    fn record(&mut self, stage: StageKind, started: Instant, metrics: StageMetrics) {
        let duration = started.elapsed();
        log::debug!("{stage} finished in {:.3}ms", duration.as_secs_f64() * 1000.0);
        self.records.push(StageRecord {
            stage,
            duration,
            metrics,
        });
    }
}

/// Attribute a stage error to `stage`.
fn at(stage: StageKind) -> impl Fn(StageError) -> PipelineError {
    move |source| PipelineError::new(stage, source)
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Source bytes and options, not yet touched.
#[must_use = "pipeline stages are consumed by advancing — call .decode() to continue"]
pub struct Pending {
    ctx: Context,
    source: Vec<u8>,
}

impl Pending {
    /// The raw source bytes.
    #[must_use]
    pub fn source(&self) -> &[u8] {
        &self.source
    }

    /// Install a cancellation check.
    pub fn with_interrupt(mut self, interrupt: impl Fn() -> bool + Send + 'static) -> Self {
        self.ctx.interrupt = Box::new(interrupt);
        self
    }

    /// Validate options and input, decode, and apply EXIF orientation.
    ///
    /// # Errors
    ///
    /// Fails in [`StageKind::Decode`] with `InvalidOptions`, `EmptyInput`,
    /// `InputTooLarge`, `UnsupportedFormat`, `Decode`, or `Cancelled`.
    pub fn decode(mut self) -> Result<Loaded, PipelineError> {
        self.ctx.check(StageKind::Decode)?;
        let t = Instant::now();
        self.ctx.options.validate().map_err(at(StageKind::Decode))?;
        let (image, format) = crate::decode::decode_image(&self.source).map_err(at(StageKind::Decode))?;
        let dimensions = Dimensions::of(&image);
        self.ctx.source_dimensions = dimensions;
        self.ctx.record(
            StageKind::Decode,
            t,
            StageMetrics::Decode {
                input_bytes: self.source.len(),
                format: format!("{format:?}"),
                dimensions,
            },
        );
        Ok(Loaded {
            ctx: self.ctx,
            image,
        })
    }
}

// ───────────────────────── Stage 1: Loaded ───────────────────────────

/// Upright decoded raster.
#[must_use = "pipeline stages are consumed by advancing — call .frame() to continue"]
pub struct Loaded {
    ctx: Context,
    image: RgbaImage,
}

impl Loaded {
    /// The decoded raster.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Level the horizon, fit to the maximum dimension, then auto-crop;
    /// each step only when its option is set.
    ///
    /// # Errors
    ///
    /// Only `Cancelled`, attributed to the step about to run.
    pub fn frame(mut self) -> Result<Framed, PipelineError> {
        let mut image = self.image;

        if self.ctx.options.level {
            self.ctx.check(StageKind::Level)?;
            let t = Instant::now();
            let (leveled, angle) = crate::horizon::level_horizon(image);
            image = leveled;
            self.ctx.record(StageKind::Level, t, StageMetrics::Level { angle });
        }

        if let Some(max_dimension) = self.ctx.options.max_dimension {
            self.ctx.check(StageKind::Fit)?;
            let t = Instant::now();
            let (fitted, resized) = crate::resample::fit_within(
                image,
                max_dimension,
                crate::resample::ResampleFilter::Lanczos3,
            );
            image = fitted;
            self.ctx.record(
                StageKind::Fit,
                t,
                StageMetrics::Fit {
                    max_dimension,
                    dimensions: Dimensions::of(&image),
                    resized,
                },
            );
        }

        let mut crop = None;
        if let Some(options) = self.ctx.options.crop {
            self.ctx.check(StageKind::Crop)?;
            let t = Instant::now();
            let choice = crate::crop::auto_crop(&image, &options);
            let region = choice.rect.to_pixel_rect(Dimensions::of(&image));
            image = crate::crop::extract(&image, choice.rect);
            self.ctx.record(
                StageKind::Crop,
                t,
                StageMetrics::Crop {
                    key: choice.key,
                    score: choice.score,
                    region,
                },
            );
            crop = Some(choice);
        }

        Ok(Framed {
            ctx: self.ctx,
            image,
            crop,
        })
    }
}

// ───────────────────────── Stage 2: Framed ───────────────────────────

/// Leveled, fitted, and cropped raster.
#[must_use = "pipeline stages are consumed by advancing — call .upscale() to continue"]
pub struct Framed {
    ctx: Context,
    image: RgbaImage,
    crop: Option<CropChoice>,
}

impl Framed {
    /// The framed raster.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// The auto-crop decision, if cropping was enabled.
    #[must_use]
    pub const fn crop(&self) -> Option<&CropChoice> {
        self.crop.as_ref()
    }

    /// Tiled upscale, when configured.
    ///
    /// # Errors
    ///
    /// `Cancelled` (also between tiles) or `TileBounds`, attributed to
    /// [`StageKind::Upscale`].
    pub fn upscale(mut self) -> Result<Upscaled, PipelineError> {
        let Some(options) = self.ctx.options.upscale else {
            return Ok(Upscaled {
                ctx: self.ctx,
                image: self.image,
                crop: self.crop,
            });
        };
        self.ctx.check(StageKind::Upscale)?;
        let t = Instant::now();
        let upscaled = crate::upscale::tiled_upscale(&self.image, &options, &*self.ctx.interrupt)
            .map_err(at(StageKind::Upscale))?;
        self.ctx.record(
            StageKind::Upscale,
            t,
            StageMetrics::Upscale {
                scale: options.scale,
                tile_size: options.tile_size,
                tiles: upscaled.tiles,
                dimensions: Dimensions::of(&upscaled.image),
            },
        );
        Ok(Upscaled {
            ctx: self.ctx,
            image: upscaled.image,
            crop: self.crop,
        })
    }
}

// ───────────────────────── Stage 3: Upscaled ─────────────────────────

/// Raster at its final size.
#[must_use = "pipeline stages are consumed by advancing — call .denoise() to continue"]
pub struct Upscaled {
    ctx: Context,
    image: RgbaImage,
    crop: Option<CropChoice>,
}

impl Upscaled {
    /// The upscaled raster.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Median denoise (or a noise preset), then the optional tonal
    /// corrections.
    ///
    /// # Errors
    ///
    /// Only `Cancelled`.
    pub fn denoise(mut self) -> Result<Denoised, PipelineError> {
        let mut image = self.image;

        if let Some(options) = self.ctx.options.denoise {
            self.ctx.check(StageKind::Denoise)?;
            let t = Instant::now();
            let radius = match options.preset {
                Some(preset) => {
                    preset.apply(&mut image);
                    preset.median_radius()
                }
                None => {
                    crate::filters::median_denoise(&mut image, options.radius);
                    options.radius
                }
            };
            self.ctx.record(
                StageKind::Denoise,
                t,
                StageMetrics::Denoise {
                    radius,
                    preset: options.preset,
                },
            );
        }

        if let Some(options) = self.ctx.options.enhance {
            self.ctx.check(StageKind::Enhance)?;
            let t = Instant::now();
            let threshold = crate::metrics::DEFAULT_CLIP_THRESHOLD;
            let clipped_before = crate::metrics::highlight_clip_fraction(&image, threshold);
            if let Some(h) = options.highlights {
                crate::filters::tone_map_highlights(&mut image, h.strength, h.pivot);
            }
            if let Some(c) = options.clarity {
                crate::filters::clarity(&mut image, c.radius, c.amount);
            }
            if let Some(v) = options.vignette {
                crate::filters::vignette_correct(&mut image, v.amount, v.softness);
            }
            let clipped_after = crate::metrics::highlight_clip_fraction(&image, threshold);
            self.ctx.record(
                StageKind::Enhance,
                t,
                StageMetrics::Enhance {
                    highlights: options.highlights.is_some(),
                    clarity: options.clarity.is_some(),
                    vignette: options.vignette.is_some(),
                    clipped_before,
                    clipped_after,
                },
            );
        }

        Ok(Denoised {
            ctx: self.ctx,
            image,
            crop: self.crop,
        })
    }
}

// ───────────────────────── Stage 4: Denoised ─────────────────────────

/// Cleaned raster, ready for sharpening.
#[must_use = "pipeline stages are consumed by advancing — call .sharpen() to continue"]
pub struct Denoised {
    ctx: Context,
    image: RgbaImage,
    crop: Option<CropChoice>,
}

impl Denoised {
    /// The denoised raster.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Unsharp mask, when configured.
    ///
    /// # Errors
    ///
    /// Only `Cancelled`.
    pub fn sharpen(mut self) -> Result<Sharpened, PipelineError> {
        let mut image = self.image;
        if let Some(options) = self.ctx.options.sharpen {
            self.ctx.check(StageKind::Sharpen)?;
            let t = Instant::now();
            let tenengrad_before = crate::metrics::tenengrad_score(&image, None);
            crate::filters::unsharp_mask(&mut image, options.radius, options.amount, options.threshold);
            let tenengrad_after = crate::metrics::tenengrad_score(&image, None);
            self.ctx.record(
                StageKind::Sharpen,
                t,
                StageMetrics::Sharpen {
                    radius: options.radius,
                    amount: options.amount,
                    threshold: options.threshold,
                    tenengrad_before,
                    tenengrad_after,
                },
            );
        }
        Ok(Sharpened {
            ctx: self.ctx,
            image,
            crop: self.crop,
        })
    }
}

// ───────────────────────── Stage 5: Sharpened ────────────────────────

/// Final raster, ready to encode.
#[must_use = "pipeline stages are consumed by advancing — call .encode() to continue"]
pub struct Sharpened {
    ctx: Context,
    image: RgbaImage,
    crop: Option<CropChoice>,
}

impl Sharpened {
    /// The sharpened raster.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Encode at a fixed quality, or search for the lowest quality that
    /// meets the SSIM target.
    ///
    /// # Errors
    ///
    /// `Encode`, `EmptyOutput`, or `Cancelled`, attributed to
    /// [`StageKind::Encode`].
    pub fn encode(mut self) -> Result<Encoded, PipelineError> {
        self.ctx.check(StageKind::Encode)?;
        let t = Instant::now();
        let (bytes, format, metrics) = match self.ctx.options.export {
            ExportTarget::Fixed { format, quality } => {
                let bytes = encode(&self.image, format, quality).map_err(at(StageKind::Encode))?;
                let metrics = StageMetrics::Encode {
                    format,
                    quality,
                    output_bytes: bytes.len(),
                    ssim: None,
                    iterations: 0,
                    met_target: true,
                };
                (bytes, format, metrics)
            }
            ExportTarget::Adaptive {
                format,
                target_ssim,
                min_quality,
                max_quality,
            } => {
                let target = AdaptiveTarget {
                    format,
                    target_ssim,
                    min_quality,
                    max_quality,
                };
                let outcome = adaptive_encode(&self.image, target, &*self.ctx.interrupt)
                    .map_err(at(StageKind::Encode))?;
                let metrics = StageMetrics::Encode {
                    format,
                    quality: outcome.quality,
                    output_bytes: outcome.bytes.len(),
                    ssim: Some(outcome.ssim),
                    iterations: outcome.iterations,
                    met_target: outcome.met_target,
                };
                (outcome.bytes, format, metrics)
            }
        };
        self.ctx.record(StageKind::Encode, t, metrics);

        let report = ProcessingReport {
            stages: self.ctx.records,
            total_duration: self.ctx.started.elapsed(),
            input_bytes: self.ctx.input_bytes,
            output_bytes: bytes.len(),
            source_dimensions: self.ctx.source_dimensions,
            output_dimensions: Dimensions::of(&self.image),
        };
        log::info!(
            "processed {} -> {} ({} -> {} bytes) in {:.1}ms",
            report.source_dimensions,
            report.output_dimensions,
            report.input_bytes,
            report.output_bytes,
            report.total_duration.as_secs_f64() * 1000.0,
        );

        Ok(Encoded {
            output: ProcessOutput {
                bytes,
                format,
                raster: self.image,
                crop: self.crop,
                report,
            },
        })
    }
}

// ───────────────────────── Stage 6: Encoded ──────────────────────────

/// Result of a complete run.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Encoded output.
    pub bytes: Vec<u8>,
    /// Format of `bytes`.
    pub format: EncodeFormat,
    /// The raster that was encoded.
    pub raster: RgbaImage,
    /// Auto-crop decision, if cropping was enabled.
    pub crop: Option<CropChoice>,
    /// Timing and metrics.
    pub report: ProcessingReport,
}

impl ProcessOutput {
    /// Total wall-clock time of the run.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.report.total_duration
    }
}

/// Encoded output.
#[must_use = "call .into_output() to extract the ProcessOutput"]
pub struct Encoded {
    output: ProcessOutput,
}

impl Encoded {
    /// The encoded bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.output.bytes
    }

    /// The report so far (complete at this stage).
    #[must_use]
    pub const fn report(&self) -> &ProcessingReport {
        &self.output.report
    }

    /// Consume the final stage.
    pub fn into_output(self) -> ProcessOutput {
        self.output
    }
}

// ───────────────────────── Dynamic API ───────────────────────────────

/// Number of pipeline states, from [`Pending`] to [`Encoded`].
pub const STAGE_COUNT: usize = 7;

/// Implemented by every pipeline state, so callers can treat them
/// uniformly through [`Stage`].
pub trait PipelineStage: Sized {
    /// Name of the state (e.g. `"source"`, `"upscaled"`).
    const NAME: &str;

    /// Zero-based position in the chain.
    const INDEX: usize;

    /// The current raster, if one has been decoded.
    fn raster(&self) -> Option<&RgbaImage>;

    /// Run every remaining stage.
    ///
    /// # Errors
    ///
    /// The first [`PipelineError`] raised by a remaining stage.
    fn complete(self) -> Result<ProcessOutput, PipelineError>;
}

impl PipelineStage for Pending {
    const NAME: &str = "source";
    const INDEX: usize = 0;

    fn raster(&self) -> Option<&RgbaImage> {
        None
    }

    fn complete(self) -> Result<ProcessOutput, PipelineError> {
        self.decode()?.complete()
    }
}

impl PipelineStage for Loaded {
    const NAME: &str = "loaded";
    const INDEX: usize = 1;

    fn raster(&self) -> Option<&RgbaImage> {
        Some(&self.image)
    }

    fn complete(self) -> Result<ProcessOutput, PipelineError> {
        self.frame()?.complete()
    }
}

impl PipelineStage for Framed {
    const NAME: &str = "framed";
    const INDEX: usize = 2;

    fn raster(&self) -> Option<&RgbaImage> {
        Some(&self.image)
    }

    fn complete(self) -> Result<ProcessOutput, PipelineError> {
        self.upscale()?.complete()
    }
}

impl PipelineStage for Upscaled {
    const NAME: &str = "upscaled";
    const INDEX: usize = 3;

    fn raster(&self) -> Option<&RgbaImage> {
        Some(&self.image)
    }

    fn complete(self) -> Result<ProcessOutput, PipelineError> {
        self.denoise()?.complete()
    }
}

impl PipelineStage for Denoised {
    const NAME: &str = "denoised";
    const INDEX: usize = 4;

    fn raster(&self) -> Option<&RgbaImage> {
        Some(&self.image)
    }

    fn complete(self) -> Result<ProcessOutput, PipelineError> {
        self.sharpen()?.complete()
    }
}

impl PipelineStage for Sharpened {
    const NAME: &str = "sharpened";
    const INDEX: usize = 5;

    fn raster(&self) -> Option<&RgbaImage> {
        Some(&self.image)
    }

    fn complete(self) -> Result<ProcessOutput, PipelineError> {
        Ok(self.encode()?.into_output())
    }
}

impl PipelineStage for Encoded {
    const NAME: &str = "encoded";
    const INDEX: usize = 6;

    fn raster(&self) -> Option<&RgbaImage> {
        Some(&self.output.raster)
    }

    fn complete(self) -> Result<ProcessOutput, PipelineError> {
        Ok(self.into_output())
    }
}

/// Any pipeline state.
#[must_use]
pub enum Stage {
    /// See [`Pending`].
    Pending(Pending),
    /// See [`Loaded`].
    Loaded(Loaded),
    /// See [`Framed`].
    Framed(Framed),
    /// See [`Upscaled`].
    Upscaled(Upscaled),
    /// See [`Denoised`].
    Denoised(Denoised),
    /// See [`Sharpened`].
    Sharpened(Sharpened),
    /// See [`Encoded`].
    Encoded(Encoded),
}

/// Result of [`Stage::advance`].
#[must_use]
pub enum Advance {
    /// The pipeline moved to this stage.
    Next(Stage),
    /// Already at [`Encoded`]; returned unchanged.
    Complete(Stage),
}

/// Call a [`PipelineStage`] item on whichever state is active.
macro_rules! delegate {
    ($self:ident, |$s:ident| $body:expr) => {
        match $self {
            Self::Pending($s) => $body,
            Self::Loaded($s) => $body,
            Self::Framed($s) => $body,
            Self::Upscaled($s) => $body,
            Self::Denoised($s) => $body,
            Self::Sharpened($s) => $body,
            Self::Encoded($s) => $body,
        }
    };
}

/// `NAME` and `INDEX` of a state value.
const fn meta<T: PipelineStage>(_: &T) -> (&'static str, usize) {
    (T::NAME, T::INDEX)
}

impl Stage {
    /// Name of the current state.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        delegate!(self, |s| meta(s).0)
    }

    /// Zero-based position of the current state.
    #[must_use]
    pub const fn index(&self) -> usize {
        delegate!(self, |s| meta(s).1)
    }

    /// The current raster, if one has been decoded.
    #[must_use]
    pub fn raster(&self) -> Option<&RgbaImage> {
        delegate!(self, |s| s.raster())
    }

    /// Whether the pipeline has reached [`Encoded`].
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Encoded(_))
    }

    /// Run exactly one more stage.
    ///
    /// # Errors
    ///
    /// The [`PipelineError`] raised by that stage.
    pub fn advance(self) -> Result<Advance, PipelineError> {
        Ok(match self {
            Self::Pending(s) => Advance::Next(Self::Loaded(s.decode()?)),
            Self::Loaded(s) => Advance::Next(Self::Framed(s.frame()?)),
            Self::Framed(s) => Advance::Next(Self::Upscaled(s.upscale()?)),
            Self::Upscaled(s) => Advance::Next(Self::Denoised(s.denoise()?)),
            Self::Denoised(s) => Advance::Next(Self::Sharpened(s.sharpen()?)),
            Self::Sharpened(s) => Advance::Next(Self::Encoded(s.encode()?)),
            Self::Encoded(s) => Advance::Complete(Self::Encoded(s)),
        })
    }

    /// Run every remaining stage.
    ///
    /// # Errors
    ///
    /// The first [`PipelineError`] raised by a remaining stage.
    pub fn complete(self) -> Result<ProcessOutput, PipelineError> {
        delegate!(self, |s| s.complete())
    }
}

impl From<Pending> for Stage {
    fn from(s: Pending) -> Self {
        Self::Pending(s)
    }
}
