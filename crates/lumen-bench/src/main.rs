//! lumen-bench: CLI tool for running the pipeline on image files.
//!
//! Runs the enhancement and encoding pipeline on one or more images with
//! configurable options, printing per-stage diagnostics. Useful for:
//!
//! - Comparing intent presets (`avatar`, `post`, `chat`)
//! - Tuning sharpen, denoise, and adaptive SSIM targets
//! - Measuring per-stage durations to identify bottlenecks
//! - Inspecting the auto-crop candidates and their scores
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin lumen-bench -- [OPTIONS] <IMAGE_PATH>...
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use lumen_pipeline::types::{DenoiseOptions, SharpenOptions, UpscaleOptions};
use lumen_pipeline::{
    CropOptions, Dimensions, EncodeFormat, ExportTarget, NoisePreset, PipelineOptions,
    ProcessOutput, ProcessingReport,
};
use lumen_runtime::{PipelineQueue, ResultCache, TaskError, process_cached};

/// Run the lumen pipeline on image files and report diagnostics.
///
/// Flags refine the chosen intent preset; `--config-json` replaces it.
#[derive(Parser)]
#[command(name = "lumen-bench", version)]
struct Cli {
    /// Input images (JPEG, PNG, WebP, GIF, BMP).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// What the output is for.
    #[arg(long, value_enum, default_value_t = Intent::Post)]
    intent: Intent,

    /// Fit the longer side to this many pixels (overrides the intent).
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    max_dimension: Option<u32>,

    /// Level the horizon before framing.
    #[arg(long)]
    level: bool,

    /// Auto-crop to this width/height ratio.
    #[arg(long)]
    crop_aspect: Option<f64>,

    /// Upscale by this factor after framing.
    #[arg(long)]
    upscale: Option<f64>,

    /// Tile size for upscaling.
    #[arg(long, default_value_t = UpscaleOptions::DEFAULT_TILE_SIZE)]
    tile_size: u32,

    /// Median denoise radius.
    #[arg(long)]
    denoise: Option<u32>,

    /// Noise preset (replaces the plain median).
    #[arg(long, value_enum)]
    noise_preset: Option<Preset>,

    /// Unsharp mask amount (enables sharpening).
    #[arg(long)]
    sharpen: Option<f64>,

    /// Output format.
    #[arg(long, value_enum)]
    format: Option<Format>,

    /// Fixed encoder quality in (0, 1] (overrides the intent).
    #[arg(long, conflicts_with = "target_ssim")]
    quality: Option<f64>,

    /// Search for the lowest quality reaching this SSIM.
    #[arg(long)]
    target_ssim: Option<f64>,

    /// Full pipeline options as a JSON string.
    ///
    /// When provided, the intent and all other option flags are ignored.
    #[arg(long)]
    config_json: Option<String>,

    /// Directory to write encoded outputs into.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Print the auto-crop candidates instead of running the pipeline.
    #[arg(long)]
    propose_crop: bool,

    /// Number of runs per image for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Run images through the task queue with this many workers.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    jobs: Option<usize>,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,
}

/// Output intent presets.
#[derive(Clone, Copy, ValueEnum)]
enum Intent {
    /// Profile picture: fit 512, JPEG 0.8.
    Avatar,
    /// Feed post: fit 1920, JPEG 0.75.
    Post,
    /// Chat attachment: fit 1024, JPEG 0.7.
    Chat,
}

impl Intent {
    const fn preset(self) -> (u32, f64) {
        match self {
            Self::Avatar => (512, 0.8),
            Self::Post => (1920, 0.75),
            Self::Chat => (1024, 0.7),
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    Gentle,
    Balanced,
    Strong,
}

impl From<Preset> for NoisePreset {
    fn from(p: Preset) -> Self {
        match p {
            Preset::Gentle => Self::Gentle,
            Preset::Balanced => Self::Balanced,
            Preset::Strong => Self::Strong,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Jpeg,
    Png,
    Webp,
}

impl From<Format> for EncodeFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Jpeg => Self::Jpeg,
            Format::Png => Self::Png,
            Format::Webp => Self::WebP,
        }
    }
}

/// Build [`PipelineOptions`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// other option flags are ignored. Otherwise the intent preset is
/// refined by the individual flags.
fn options_from_cli(cli: &Cli) -> Result<PipelineOptions, String> {
    if let Some(ref json) = cli.config_json {
        let options: PipelineOptions =
            serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?;
        options.validate().map_err(|e| format!("Invalid --config-json: {e}"))?;
        return Ok(options);
    }

    let (fit, preset_quality) = cli.intent.preset();
    let format = cli.format.map_or(EncodeFormat::Jpeg, EncodeFormat::from);
    let export = match cli.target_ssim {
        Some(target) => ExportTarget::adaptive(format, target),
        None => ExportTarget::Fixed {
            format,
            quality: cli.quality.unwrap_or(preset_quality),
        },
    };

    let options = PipelineOptions {
        level: cli.level,
        max_dimension: Some(cli.max_dimension.unwrap_or(fit)),
        crop: cli.crop_aspect.map(|aspect_ratio| CropOptions {
            aspect_ratio,
            ..CropOptions::default()
        }),
        upscale: cli.upscale.map(|scale| UpscaleOptions {
            scale,
            tile_size: cli.tile_size,
            ..UpscaleOptions::default()
        }),
        denoise: match (cli.denoise, cli.noise_preset) {
            (None, None) => None,
            (radius, preset) => Some(DenoiseOptions {
                radius: radius.unwrap_or(DenoiseOptions::DEFAULT_RADIUS),
                preset: preset.map(NoisePreset::from),
            }),
        },
        sharpen: cli.sharpen.map(|amount| SharpenOptions {
            amount,
            ..SharpenOptions::default()
        }),
        export,
        ..PipelineOptions::default()
    };
    options.validate().map_err(|e| e.to_string())?;
    Ok(options)
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let options = match options_from_cli(&cli) {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    eprintln!("Options: {options:#?}");
    eprintln!();

    if cli.propose_crop {
        return propose_crops(&cli, &options);
    }
    if let Some(jobs) = cli.jobs {
        return run_batch(&cli, options, jobs);
    }

    let mut failures = 0usize;
    for path in &cli.inputs {
        let Some(bytes) = read_input(path) else {
            failures += 1;
            continue;
        };
        let mut reports = Vec::with_capacity(cli.runs);
        for run in 0..cli.runs {
            if cli.runs > 1 {
                eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
            }
            match lumen_pipeline::process(&bytes, &options) {
                Ok(output) => {
                    print_report(&output.report, cli.json);
                    if run == 0 {
                        write_output(cli.out_dir.as_deref(), path, &output);
                    }
                    reports.push(output.report);
                }
                Err(e) => {
                    eprintln!("{}: {e}", path.display());
                    failures += 1;
                    break;
                }
            }
        }
        if reports.len() > 1 {
            print_multi_run_summary(&reports);
        }
    }

    exit_code(failures, cli.inputs.len())
}

/// Process every input through a [`PipelineQueue`], caching results by
/// content so duplicate inputs are encoded once. A failing image is
/// reported and skipped.
fn run_batch(cli: &Cli, options: PipelineOptions, jobs: usize) -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error starting runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let failures = runtime.block_on(async {
        let queue = PipelineQueue::new(jobs);
        let cache = Arc::new(ResultCache::new(cli.inputs.len().max(1)));
        let mut set = tokio::task::JoinSet::new();

        for path in cli.inputs.clone() {
            let Some(bytes) = read_input(&path) else {
                continue;
            };
            let queue = queue.clone();
            let cache = Arc::clone(&cache);
            let options = options.clone();
            set.spawn(async move {
                let id = path.display().to_string();
                let result = process_cached(&queue, &cache, id, bytes, options).await;
                (path, result)
            });
        }

        let mut failures = cli.inputs.len() - set.len();
        log::info!("queued {} inputs, {} at a time", set.len(), queue.max_concurrency());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((path, Ok(output))) => {
                    eprintln!("== {} ==", path.display());
                    print_report(&output.report, cli.json);
                    write_output(cli.out_dir.as_deref(), &path, &output);
                }
                Ok((path, Err(TaskError::Cancelled))) => {
                    eprintln!("{}: cancelled", path.display());
                    failures += 1;
                }
                Ok((path, Err(e))) => {
                    eprintln!("{}: {e}", path.display());
                    failures += 1;
                }
                Err(e) => {
                    eprintln!("batch task failed: {e}");
                    failures += 1;
                }
            }
        }
        log::debug!("{} distinct results cached", cache.len());
        failures
    });

    exit_code(failures, cli.inputs.len())
}

/// Decode each input and print the tight/medium/loose candidates with
/// their composition scores.
fn propose_crops(cli: &Cli, options: &PipelineOptions) -> ExitCode {
    let crop = options.crop.unwrap_or_default();
    let mut failures = 0usize;
    for path in &cli.inputs {
        let Some(bytes) = read_input(path) else {
            failures += 1;
            continue;
        };
        let image = match lumen_pipeline::decode::decode_image(&bytes) {
            Ok((image, _)) => image,
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                failures += 1;
                continue;
            }
        };
        let dimensions = Dimensions::of(&image);
        let trio = lumen_pipeline::crop::propose_trio_crops(dimensions, crop.aspect_ratio, crop.subject);
        let best = lumen_pipeline::crop::best_of_3(&image, &trio, crop.eye_line);

        if cli.json {
            let value = serde_json::json!({
                "path": path.display().to_string(),
                "dimensions": dimensions,
                "trio": trio,
                "best": best,
            });
            println!("{value:#}");
            continue;
        }
        println!("{} ({dimensions})", path.display());
        for (key, rect) in trio.candidates() {
            let score = lumen_pipeline::composition::composition_score(&image, rect, crop.eye_line);
            let marker = if key == best.key { "*" } else { " " };
            println!(
                " {marker} {:<6} x={:>7.1} y={:>7.1} w={:>7.1} h={:>7.1} score={score:.4}",
                key.to_string(),
                rect.x,
                rect.y,
                rect.w,
                rect.h,
            );
        }
    }
    exit_code(failures, cli.inputs.len())
}

fn read_input(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) => {
            eprintln!("Image: {} ({} bytes)", path.display(), bytes.len());
            Some(bytes)
        }
        Err(e) => {
            eprintln!("Error reading {}: {e}", path.display());
            None
        }
    }
}

fn print_report(report: &ProcessingReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Error serializing report: {e}"),
        }
    } else {
        println!("{}", report.report());
    }
}

/// Write `output` next to its name in `out_dir`, if one was given.
fn write_output(out_dir: Option<&Path>, input: &Path, output: &ProcessOutput) {
    let Some(dir) = out_dir else {
        return;
    };
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let path = dir.join(format!("{stem}.{}", output.format));
    match std::fs::write(&path, &output.bytes) {
        Ok(()) => eprintln!(
            "Wrote {} ({}, {} bytes)",
            path.display(),
            output.format.mime_type(),
            output.bytes.len()
        ),
        Err(e) => eprintln!("Error writing {}: {e}", path.display()),
    }
}

fn exit_code(failures: usize, total: usize) -> ExitCode {
    if failures > 0 {
        eprintln!("{failures} of {total} inputs failed");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Print aggregated statistics across multiple runs of one image.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(reports: &[ProcessingReport]) {
    println!();
    println!("Summary ({} runs)\n{}", reports.len(), "=".repeat(60));

    let durations: Vec<f64> = reports
        .iter()
        .map(|r| r.total_duration.as_secs_f64() * 1000.0)
        .collect();
    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let Some(first) = reports.first() else {
        return;
    };
    for record in &first.stages {
        let stage_durations: Vec<f64> = reports
            .iter()
            .filter_map(|r| r.stage(record.stage))
            .map(|s| s.duration.as_secs_f64() * 1000.0)
            .collect();
        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{:<24} {stage_mean:>10.3}ms", record.stage.to_string());
    }
}
