//! Integration test: run synthetic photos through the full pipeline and
//! check the encoded output and the report.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use image::{Rgba, RgbaImage};
use lumen_pipeline::types::{DenoiseOptions, EnhanceOptions, HighlightOptions, SharpenOptions, UpscaleOptions};
use lumen_pipeline::{
    CropOptions, Dimensions, EncodeFormat, ExportTarget, PipelineOptions, StageKind, StageMetrics,
};

/// Sky band over a textured foreground with a darker "subject" block.
#[allow(clippy::cast_possible_truncation)]
fn photo(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        if y < height / 3 {
            Rgba([240, 244, 250, 255])
        } else if (width / 3..2 * width / 3).contains(&x) && y < 3 * height / 4 {
            let v = ((x * 7 + y * 13) % 40) as u8;
            Rgba([90 + v, 60 + v, 50 + v, 255])
        } else {
            let v = ((x * 31 + y * 17) % 90) as u8;
            Rgba([40 + v, 110 + v / 2, 30 + v / 3, 255])
        }
    })
}

fn jpeg(img: &RgbaImage) -> Vec<u8> {
    let rgb = image::DynamicImage::ImageRgba8(img.clone()).into_rgb8();
    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 95);
    image::ImageEncoder::write_image(
        encoder,
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )
    .unwrap();
    buf
}

#[test]
fn post_style_run_produces_smaller_adaptive_jpeg() {
    let source = jpeg(&photo(320, 240));
    let options = PipelineOptions {
        max_dimension: Some(160),
        denoise: Some(DenoiseOptions::default()),
        sharpen: Some(SharpenOptions::default()),
        export: ExportTarget::adaptive(EncodeFormat::Jpeg, 0.85),
        ..PipelineOptions::default()
    };

    let output = lumen_pipeline::process(&source, &options).expect("pipeline should succeed");
    eprintln!("{}", output.report.report());

    assert_eq!(output.raster.dimensions(), (160, 120));
    assert_eq!(output.report.source_dimensions, Dimensions::new(320, 240));
    assert!(output.bytes.len() < source.len());
    assert!(output.report.compression_ratio() > 0.0);

    let Some(StageMetrics::Encode {
        quality,
        ssim,
        iterations,
        met_target,
        ..
    }) = output.report.stage(StageKind::Encode).map(|r| r.metrics.clone())
    else {
        panic!("encode stage missing from report");
    };
    assert!((0.6..=0.95).contains(&quality));
    assert!(iterations >= 1);
    if met_target {
        assert!(ssim.unwrap() >= 0.85);
    } else {
        assert!((quality - 0.95).abs() < f64::EPSILON);
    }

    let decoded = image::load_from_memory(&output.bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (160, 120));
}

#[test]
fn avatar_style_run_crops_and_upscales() {
    let source = jpeg(&photo(200, 150));
    let options = PipelineOptions {
        crop: Some(CropOptions {
            aspect_ratio: 1.0,
            ..CropOptions::default()
        }),
        upscale: Some(UpscaleOptions {
            scale: 2.0,
            tile_size: 64,
            ..UpscaleOptions::default()
        }),
        enhance: Some(EnhanceOptions {
            highlights: Some(HighlightOptions::default()),
            ..EnhanceOptions::default()
        }),
        export: ExportTarget::Fixed {
            format: EncodeFormat::Png,
            quality: 1.0,
        },
        ..PipelineOptions::default()
    };

    let output = lumen_pipeline::process(&source, &options).unwrap();
    let crop = output.crop.expect("crop decision recorded");
    let (w, h) = output.raster.dimensions();

    // A 150px box (ratio 1) at tight/medium/loose scales, doubled.
    assert!([246, 300, 346].contains(&w), "unexpected width {w}");
    assert!(h <= 300);
    assert!(crop.rect.w <= 200.0 && crop.rect.h <= 150.0);

    let Some(StageMetrics::Upscale { tiles, .. }) =
        output.report.stage(StageKind::Upscale).map(|r| r.metrics.clone())
    else {
        panic!("upscale stage missing from report");
    };
    assert!(tiles >= 4);

    let Some(StageMetrics::Enhance {
        clipped_before,
        clipped_after,
        ..
    }) = output.report.stage(StageKind::Enhance).map(|r| r.metrics.clone())
    else {
        panic!("enhance stage missing from report");
    };
    assert!(clipped_after <= clipped_before);

    let decoded = image::load_from_memory(&output.bytes).unwrap().into_rgba8();
    assert_eq!(decoded, output.raster);
}

#[test]
fn report_serializes_to_json() {
    let output = lumen_pipeline::process(&jpeg(&photo(64, 48)), &PipelineOptions::default()).unwrap();
    let json = serde_json::to_string(&output.report).unwrap();
    assert!(json.contains("\"decode\""));
    assert!(json.contains("\"encode\""));
    let back: lumen_pipeline::ProcessingReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back.stages.len(), output.report.stages.len());
}

#[test]
fn options_load_from_partial_json() {
    let json = r#"{
        "max_dimension": 512,
        "sharpen": { "amount": 0.4 },
        "export": { "mode": "adaptive", "format": "jpeg", "target_ssim": 0.9 }
    }"#;
    let options: PipelineOptions = serde_json::from_str(json).unwrap();
    assert_eq!(options.max_dimension, Some(512));
    assert!((options.sharpen.unwrap().amount - 0.4).abs() < f64::EPSILON);
    assert!(matches!(
        options.export,
        ExportTarget::Adaptive { min_quality, .. } if (min_quality - 0.6).abs() < f64::EPSILON
    ));
    options.validate().unwrap();
}
