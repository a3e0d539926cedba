//! lumen-pipeline: Pure image enhancement and adaptive encoding (sans-IO).
//!
//! Takes encoded image bytes and produces encoded image bytes through:
//! decode -> level -> fit -> auto-crop -> tiled upscale -> denoise ->
//! enhance -> sharpen -> encode (fixed or SSIM-driven).
//!
//! Every step after decode is optional and configured through
//! [`PipelineOptions`]. The building blocks (filters, metrics, SSIM,
//! horizon estimation, crop proposal) are public so callers can use them
//! on their own.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! byte slices and rasters. Scheduling, cancellation tokens, and caching
//! live in `lumen-runtime`.

pub mod blur;
pub mod codec;
pub mod composition;
pub mod crop;
pub mod decode;
pub mod diagnostics;
pub mod filters;
pub mod horizon;
pub mod metrics;
pub mod pipeline;
pub mod raster;
pub mod resample;
pub mod ssim;
pub mod types;
pub mod upscale;

pub use diagnostics::{ProcessingReport, StageMetrics, StageRecord};
pub use filters::NoisePreset;
pub use pipeline::{Pipeline, ProcessOutput};
pub use resample::ResampleFilter;
pub use types::{
    CropChoice, CropKey, CropOptions, Dimensions, EncodeFormat, ExportTarget, PipelineError,
    PipelineOptions, RasterBuffer, Rect, StageError, StageKind, Trio,
};

/// Run the full pipeline.
///
/// Takes raw image bytes (JPEG, PNG, WebP, GIF, BMP) and options, and
/// returns the encoded result along with the final raster and a
/// per-stage [`ProcessingReport`].
///
/// # Errors
///
/// Returns the first [`PipelineError`] raised; its `stage` names the
/// step that failed.
pub fn process(bytes: &[u8], options: &PipelineOptions) -> Result<ProcessOutput, PipelineError> {
    run(Pipeline::new(bytes.to_vec(), options.clone()))
}

/// Like [`process`], but polls `interrupt` between stages, between
/// upscale tiles, and between adaptive encode probes.
///
/// # Errors
///
/// As [`process`]. When `interrupt` returns `true` the run stops with
/// [`StageError::Cancelled`] attributed to the stage about to run.
pub fn process_with_interrupt(
    bytes: &[u8],
    options: &PipelineOptions,
    interrupt: impl Fn() -> bool + Send + 'static,
) -> Result<ProcessOutput, PipelineError> {
    run(Pipeline::new(bytes.to_vec(), options.clone()).with_interrupt(interrupt))
}

fn run(pending: pipeline::Pending) -> Result<ProcessOutput, PipelineError> {
    Ok(pending
        .decode()?
        .frame()?
        .upscale()?
        .denoise()?
        .sharpen()?
        .encode()?
        .into_output())
}
