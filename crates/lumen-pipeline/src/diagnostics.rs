//! Processing report: timing and stage-specific metrics for one run.
//!
//! Every call to [`process`](crate::process) returns a
//! [`ProcessingReport`] alongside the encoded bytes. Only stages that
//! actually ran appear in it, in execution order.
//!
//! Timestamps are captured with the `web-time` crate, which uses
//! `performance.now()` on WASM and `std::time::Instant` on native.
//! Durations are serialized as fractional seconds (`f64`) because
//! `std::time::Duration` has no serde representation of its own.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::filters::NoisePreset;
use crate::types::{CropKey, Dimensions, EncodeFormat, PixelRect, StageKind};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| serde::de::Error::custom("duration seconds must be finite and non-negative"))
    }
}

/// One executed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Which stage ran.
    pub stage: StageKind,
    /// Wall-clock duration (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// What it did.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Validation and decode.
    Decode {
        /// Size of the input bytes.
        input_bytes: usize,
        /// Sniffed source format.
        format: String,
        /// Upright dimensions.
        dimensions: Dimensions,
    },
    /// Horizon leveling.
    Level {
        /// Applied rotation in degrees (0 when already level).
        angle: f64,
    },
    /// Downscale to a maximum dimension.
    Fit {
        /// Requested longest side.
        max_dimension: u32,
        /// Dimensions after the stage.
        dimensions: Dimensions,
        /// Whether any resampling happened.
        resized: bool,
    },
    /// Auto-crop.
    Crop {
        /// Winning candidate.
        key: CropKey,
        /// Its composition score.
        score: f64,
        /// Extracted region in pre-crop pixels.
        region: PixelRect,
    },
    /// Tiled upscale.
    Upscale {
        /// Scale factor.
        scale: f64,
        /// Source tile edge length.
        tile_size: u32,
        /// Tiles processed.
        tiles: u32,
        /// Output dimensions.
        dimensions: Dimensions,
    },
    /// Denoise.
    Denoise {
        /// Median radius actually used.
        radius: u32,
        /// Preset, if one replaced the plain median.
        preset: Option<NoisePreset>,
    },
    /// Tonal corrections.
    Enhance {
        /// Whether highlight recovery ran.
        highlights: bool,
        /// Whether clarity ran.
        clarity: bool,
        /// Whether vignette correction ran.
        vignette: bool,
        /// Highlight clip fraction before the stage.
        clipped_before: f64,
        /// Highlight clip fraction after the stage.
        clipped_after: f64,
    },
    /// Unsharp mask.
    Sharpen {
        /// Blur radius of the mask.
        radius: f32,
        /// Amount.
        amount: f64,
        /// Threshold.
        threshold: f64,
        /// Tenengrad before sharpening.
        tenengrad_before: f64,
        /// Tenengrad after sharpening.
        tenengrad_after: f64,
    },
    /// Serialization.
    Encode {
        /// Output format.
        format: EncodeFormat,
        /// Quality the output was encoded at.
        quality: f64,
        /// Size of the output.
        output_bytes: usize,
        /// SSIM against the pre-encode raster (adaptive mode only).
        ssim: Option<f64>,
        /// Probes encoded by the adaptive search (0 for fixed mode).
        iterations: u32,
        /// Whether the adaptive target was met (always true for fixed mode).
        met_target: bool,
    },
}

/// Everything measured during one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingReport {
    /// Stages that ran, in order.
    pub stages: Vec<StageRecord>,
    /// Total wall-clock duration (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Input size in bytes.
    pub input_bytes: usize,
    /// Output size in bytes.
    pub output_bytes: usize,
    /// Decoded (upright) source dimensions.
    pub source_dimensions: Dimensions,
    /// Dimensions of the encoded raster.
    pub output_dimensions: Dimensions,
}

impl ProcessingReport {
    /// `(input - output) / input`; see [`compression_ratio`].
    #[must_use]
    pub fn compression_ratio(&self) -> f64 {
        compression_ratio(self.input_bytes, self.output_bytes)
    }

    /// The record for `stage`, if it ran.
    #[must_use]
    pub fn stage(&self, stage: StageKind) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Format as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Processing Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {} -> {}",
            self.source_dimensions, self.output_dimensions,
        ));
        lines.push(format!(
            "Size: {} -> {} ({:.1}% smaller)",
            format_file_size(self.input_bytes as u64),
            format_file_size(self.output_bytes as u64),
            self.compression_ratio() * 100.0,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration)
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<12} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for record in &self.stages {
            let ms = duration_ms(record.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&record.metrics);
            lines.push(format!(
                "{:<12} {ms:>8.3}ms {pct:>9.1}%  {details}",
                record.stage.to_string()
            ));
        }

        lines.join("\n")
    }
}

/// Fraction of bytes saved: `(original - compressed) / original`.
///
/// Negative when the output grew; 0 when `original` is 0.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (original as f64 - compressed as f64) / original as f64
}

/// Human-readable byte count with 1024-based units and at most two
/// decimals: `0 B`, `512 B`, `1.5 KB`, `2 GB`.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut exponent = 0;
    let mut whole = bytes;
    while whole >= 1024 && exponent < UNITS.len() - 1 {
        whole /= 1024;
        exponent += 1;
    }
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[exponent])
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            format,
            dimensions,
        } => format!("{format} {input_bytes} bytes -> {dimensions}"),
        StageMetrics::Level { angle } => format!("rotated {angle:+.2}°"),
        StageMetrics::Fit {
            max_dimension,
            dimensions,
            resized,
        } => {
            if *resized {
                format!("max={max_dimension} -> {dimensions}")
            } else {
                format!("max={max_dimension} (unchanged {dimensions})")
            }
        }
        StageMetrics::Crop { key, score, region } => format!(
            "{key} score={score:.3} {}x{} at ({}, {})",
            region.width, region.height, region.x, region.y,
        ),
        StageMetrics::Upscale {
            scale,
            tile_size,
            tiles,
            dimensions,
        } => format!("x{scale:.2} {tiles} tiles of {tile_size}px -> {dimensions}"),
        StageMetrics::Denoise { radius, preset } => match preset {
            Some(p) => format!("preset={p} (median r={radius})"),
            None => format!("median r={radius}"),
        },
        StageMetrics::Enhance {
            highlights,
            clarity,
            vignette,
            clipped_before,
            clipped_after,
        } => {
            let applied: Vec<&str> = [
                (*highlights, "highlights"),
                (*clarity, "clarity"),
                (*vignette, "vignette"),
            ]
            .into_iter()
            .filter_map(|(on, name)| on.then_some(name))
            .collect();
            format!(
                "{} clipped {:.2}% -> {:.2}%",
                applied.join("+"),
                clipped_before * 100.0,
                clipped_after * 100.0,
            )
        }
        StageMetrics::Sharpen {
            radius,
            amount,
            threshold,
            tenengrad_before,
            tenengrad_after,
        } => format!(
            "r={radius:.1} amount={amount:.2} threshold={threshold:.0} tenengrad {tenengrad_before:.0}->{tenengrad_after:.0}",
        ),
        StageMetrics::Encode {
            format,
            quality,
            output_bytes,
            ssim,
            iterations,
            met_target,
        } => match ssim {
            Some(s) => format!(
                "{format} q={quality:.3} {output_bytes} bytes ssim={s:.4} after {iterations} probes{}",
                if *met_target { "" } else { " (target missed)" },
            ),
            None => format!("{format} q={quality:.2} {output_bytes} bytes"),
        },
    }
}
