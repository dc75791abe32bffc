//! Pipeline settings: defaults, optional YAML file, environment, per-request overrides.

use crate::calligraph::models::MediaKind;
use crate::calligraph::transform::TransformParams;
use serde::{Deserialize, Serialize};
use std::{env, path::Path, time::Duration};
use thiserror::Error;
use tracing::warn;

pub const CONFIG_PATH_ENV: &str = "CALLIGRAPH_CONFIG";

const QUALITY_RANGE: (f32, f32) = (0.60, 1.00);
const TARGET_SIZE_RANGE: (u32, u32) = (800, 2000);
const BATCH_SIZE_RANGE: (usize, usize) = (1, 10);
const MAX_BATCH_DELAY_MS: u64 = 5000;
const MAX_UPLOAD_RETRIES: u32 = 5;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid background color `{0}`, expected #RRGGBB")]
    InvalidColor(String),
    #[error("{0} is not a supported output format")]
    UnsupportedOutput(MediaKind),
    #[error("invalid value `{value}` for {key}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("failed to read settings file {path}: {message}")]
    File { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub process_images: bool,
    pub image_quality: f32,
    pub target_size: u32,
    pub batch_size: usize,
    /// Milliseconds slept between two batches of SKU groups.
    pub delay_between_batches: u64,
    pub background_color: String,
    pub preserve_aspect_ratio: bool,
    pub output_format: MediaKind,
    pub upload_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            process_images: true,
            image_quality: 0.90,
            target_size: 1200,
            batch_size: 3,
            delay_between_batches: 2000,
            background_color: "#FFFFFF".into(),
            preserve_aspect_ratio: true,
            output_format: MediaKind::Jpeg,
            upload_retries: 0,
            retry_backoff_ms: 500,
        }
    }
}

/// Partial settings supplied with a single request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsOverride {
    pub process_images: Option<bool>,
    pub image_quality: Option<f32>,
    pub target_size: Option<u32>,
    pub batch_size: Option<usize>,
    pub delay_between_batches: Option<u64>,
    pub background_color: Option<String>,
    pub preserve_aspect_ratio: Option<bool>,
    pub output_format: Option<MediaKind>,
    pub upload_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

impl PipelineSettings {
    /// Defaults, then the YAML file named by `CALLIGRAPH_CONFIG`, then
    /// `CALLIGRAPH_*` variables.
    pub fn from_env() -> Result<Self, SettingsError> {
        let mut settings = match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_yaml_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        settings.apply(&SettingsOverride::from_env()?);
        settings.normalized()
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|err| SettingsError::File {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_yaml_str(&raw).map_err(|err| SettingsError::File {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn apply(&mut self, ov: &SettingsOverride) {
        if let Some(v) = ov.process_images {
            self.process_images = v;
        }
        if let Some(v) = ov.image_quality {
            self.image_quality = v;
        }
        if let Some(v) = ov.target_size {
            self.target_size = v;
        }
        if let Some(v) = ov.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = ov.delay_between_batches {
            self.delay_between_batches = v;
        }
        if let Some(v) = &ov.background_color {
            self.background_color = v.clone();
        }
        if let Some(v) = ov.preserve_aspect_ratio {
            self.preserve_aspect_ratio = v;
        }
        if let Some(v) = ov.output_format {
            self.output_format = v;
        }
        if let Some(v) = ov.upload_retries {
            self.upload_retries = v;
        }
        if let Some(v) = ov.retry_backoff_ms {
            self.retry_backoff_ms = v;
        }
    }

    pub fn with_override(&self, ov: Option<&SettingsOverride>) -> Result<Self, SettingsError> {
        let mut merged = self.clone();
        if let Some(ov) = ov {
            merged.apply(ov);
        }
        merged.normalized()
    }

    /// Clamps numeric knobs into their documented ranges and validates the rest.
    pub fn normalized(mut self) -> Result<Self, SettingsError> {
        parse_hex_color(&self.background_color)?;
        if self.output_format == MediaKind::Gif {
            return Err(SettingsError::UnsupportedOutput(self.output_format));
        }

        let quality = if self.image_quality.is_finite() {
            self.image_quality.clamp(QUALITY_RANGE.0, QUALITY_RANGE.1)
        } else {
            QUALITY_RANGE.1
        };
        let target_size = self.target_size.clamp(TARGET_SIZE_RANGE.0, TARGET_SIZE_RANGE.1);
        let batch_size = self.batch_size.clamp(BATCH_SIZE_RANGE.0, BATCH_SIZE_RANGE.1);
        let delay = self.delay_between_batches.min(MAX_BATCH_DELAY_MS);
        let retries = self.upload_retries.min(MAX_UPLOAD_RETRIES);

        if quality != self.image_quality
            || target_size != self.target_size
            || batch_size != self.batch_size
            || delay != self.delay_between_batches
            || retries != self.upload_retries
        {
            warn!(
                target = "calligraph.settings",
                image_quality = self.image_quality,
                target_size = self.target_size,
                batch_size = self.batch_size,
                delay_between_batches = self.delay_between_batches,
                upload_retries = self.upload_retries,
                "settings_clamped"
            );
        }

        self.image_quality = quality;
        self.target_size = target_size;
        self.batch_size = batch_size;
        self.delay_between_batches = delay;
        self.upload_retries = retries;
        Ok(self)
    }

    pub fn transform_params(&self) -> Result<TransformParams, SettingsError> {
        Ok(TransformParams {
            target_side: self.target_size,
            quality: self.image_quality,
            background: parse_hex_color(&self.background_color)?,
            output_kind: self.output_format,
            preserve_aspect_ratio: self.preserve_aspect_ratio,
        })
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.delay_between_batches)
    }
}

impl SettingsOverride {
    fn from_env() -> Result<Self, SettingsError> {
        Ok(Self {
            process_images: env_parse("CALLIGRAPH_PROCESS_IMAGES", parse_bool)?,
            image_quality: env_parse("CALLIGRAPH_IMAGE_QUALITY", |v| v.parse().ok())?,
            target_size: env_parse("CALLIGRAPH_TARGET_SIZE", |v| v.parse().ok())?,
            batch_size: env_parse("CALLIGRAPH_BATCH_SIZE", |v| v.parse().ok())?,
            delay_between_batches: env_parse("CALLIGRAPH_BATCH_DELAY_MS", |v| v.parse().ok())?,
            background_color: env::var("CALLIGRAPH_BACKGROUND").ok(),
            preserve_aspect_ratio: None,
            output_format: env_parse("CALLIGRAPH_OUTPUT_FORMAT", MediaKind::from_extension)?,
            upload_retries: env_parse("CALLIGRAPH_UPLOAD_RETRIES", |v| v.parse().ok())?,
            retry_backoff_ms: None,
        })
    }
}

fn env_parse<T>(
    key: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, SettingsError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => parse(value.trim())
            .map(Some)
            .ok_or(SettingsError::InvalidEnv { key, value }),
        _ => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_hex_color(input: &str) -> Result<[u8; 3], SettingsError> {
    let invalid = || SettingsError::InvalidColor(input.to_string());
    let hex = input.trim().strip_prefix('#').ok_or_else(invalid)?;
    if hex.len() != 6 || !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let channel = |idx: usize| u8::from_str_radix(&hex[idx..idx + 2], 16).map_err(|_| invalid());
    Ok([channel(0)?, channel(2)?, channel(4)?])
}
