//! Square letterboxing and re-encoding of product images.

use crate::calligraph::models::MediaKind;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use thiserror::Error;

pub const TRANSFORM_SKIPPED: &str = "TRANSFORM_SKIPPED";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    pub target_side: u32,
    /// Encoder quality in `0.0..=1.0`. Only JPEG honours it.
    pub quality: f32,
    pub background: [u8; 3],
    pub output_kind: MediaKind,
    /// `false` stretches the source over the full canvas.
    pub preserve_aspect_ratio: bool,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            target_side: 1200,
            quality: 0.9,
            background: [0xFF, 0xFF, 0xFF],
            output_kind: MediaKind::Jpeg,
            preserve_aspect_ratio: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("source image has no pixels")]
    EmptyImage,
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("{0} output is not supported")]
    UnsupportedOutput(MediaKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub bytes: Bytes,
    pub media_kind: MediaKind,
    /// `false` when the original bytes were passed through.
    pub applied: bool,
    pub warning: Option<String>,
}

impl TransformOutput {
    /// Passes the source through untouched and records why.
    pub fn skipped(bytes: Bytes, media_kind: MediaKind, reason: impl std::fmt::Display) -> Self {
        Self {
            bytes,
            media_kind,
            applied: false,
            warning: Some(format!("{TRANSFORM_SKIPPED}: {reason}")),
        }
    }
}

/// Never fails: anything that cannot be decoded or encoded is passed
/// through with a `TRANSFORM_SKIPPED` warning.
pub fn transform_image(source: &Bytes, source_kind: MediaKind, params: &TransformParams) -> TransformOutput {
    match letterbox(source, params) {
        Ok(encoded) => TransformOutput {
            bytes: Bytes::from(encoded),
            media_kind: params.output_kind,
            applied: true,
            warning: None,
        },
        Err(err) => TransformOutput::skipped(source.clone(), source_kind, err),
    }
}

/// Largest size with the source aspect ratio that fits a `target` square.
pub fn fit_within(width: u32, height: u32, target: u32) -> (u32, u32) {
    let scale = f64::min(
        f64::from(target) / f64::from(width),
        f64::from(target) / f64::from(height),
    );
    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).clamp(1, target);
    (scaled(width), scaled(height))
}

fn letterbox(source: &[u8], params: &TransformParams) -> Result<Vec<u8>, TransformError> {
    let decoded =
        image::load_from_memory(source).map_err(|err| TransformError::Decode(err.to_string()))?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(TransformError::EmptyImage);
    }

    let side = params.target_side.max(1);
    let (width, height) = if params.preserve_aspect_ratio {
        fit_within(decoded.width(), decoded.height(), side)
    } else {
        (side, side)
    };
    let scaled = decoded
        .resize_exact(width, height, FilterType::Lanczos3)
        .to_rgba8();

    let [r, g, b] = params.background;
    let mut canvas = RgbaImage::from_pixel(side, side, Rgba([r, g, b, 0xFF]));
    let x = i64::from((side - width) / 2);
    let y = i64::from((side - height) / 2);
    imageops::overlay(&mut canvas, &scaled, x, y);

    encode(DynamicImage::ImageRgba8(canvas), params)
}

fn encode(canvas: DynamicImage, params: &TransformParams) -> Result<Vec<u8>, TransformError> {
    let rgb = DynamicImage::ImageRgb8(canvas.to_rgb8());
    let mut buffer = Cursor::new(Vec::new());
    match params.output_kind {
        MediaKind::Jpeg => {
            let quality = (params.quality * 100.0).round().clamp(1.0, 100.0) as u8;
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            rgb.write_with_encoder(encoder)
                .map_err(|err| TransformError::Encode(err.to_string()))?;
        }
        MediaKind::Png => rgb
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|err| TransformError::Encode(err.to_string()))?,
        MediaKind::Webp => rgb
            .write_to(&mut buffer, ImageFormat::WebP)
            .map_err(|err| TransformError::Encode(err.to_string()))?,
        MediaKind::Gif => return Err(TransformError::UnsupportedOutput(MediaKind::Gif)),
    }
    Ok(buffer.into_inner())
}
