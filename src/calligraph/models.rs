use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;

/// Largest raw image accepted into matching (10 MiB, inclusive).
pub const MAX_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[serde(alias = "jpg")]
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl MediaKind {
    pub fn mime(&self) -> &'static str {
        match self {
            MediaKind::Jpeg => "image/jpeg",
            MediaKind::Png => "image/png",
            MediaKind::Gif => "image/gif",
            MediaKind::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Jpeg => "jpg",
            MediaKind::Png => "png",
            MediaKind::Gif => "gif",
            MediaKind::Webp => "webp",
        }
    }

    pub fn from_mime(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(MediaKind::Jpeg),
            "image/png" => Some(MediaKind::Png),
            "image/gif" => Some(MediaKind::Gif),
            "image/webp" => Some(MediaKind::Webp),
            _ => None,
        }
    }

    pub fn from_extension(input: &str) -> Option<Self> {
        match input.trim().trim_start_matches('.').to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(MediaKind::Jpeg),
            "png" => Some(MediaKind::Png),
            "gif" => Some(MediaKind::Gif),
            "webp" => Some(MediaKind::Webp),
            _ => None,
        }
    }

    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        Self::from_extension(ext)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// One manifest row. `sku` and `reference` are trimmed and never empty.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    pub sku: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub image_name: Option<String>,
    pub product_name: Option<String>,
    pub source_row: usize,
}

/// An accepted image file. Only the validator constructs these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawImage {
    pub filename: String,
    pub byte_length: u64,
    pub media_kind: MediaKind,
    #[serde(skip)]
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ExtractedRef {
    pub base_ref: String,
    pub ordinal: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStrategy {
    Ref,
    ImageName,
    Fuzzy,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::Ref => "REF",
            MatchStrategy::ImageName => "IMAGE_NAME",
            MatchStrategy::Fuzzy => "FUZZY",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned upload: a single image bound to a single (sku, ordinal) slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchTask {
    pub sku: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub image: RawImage,
    /// Ordinal parsed from the filename, before renumbering.
    pub source_ordinal: u32,
    pub ordinal: u32,
    pub total_for_sku: u32,
    pub final_stem: String,
    pub strategy: MatchStrategy,
}

impl MatchTask {
    /// Zero-based gallery position sent upstream.
    pub fn position(&self) -> u32 {
        self.ordinal.saturating_sub(1)
    }

    /// Copy that keeps the image metadata but releases its bytes.
    pub fn without_payload(&self) -> MatchTask {
        let mut task = self.clone();
        task.image.bytes = Bytes::new();
        task
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Processing,
    Uploading,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Uploading => "UPLOADING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
        }
    }
}

/// Outcome of one [`MatchTask`], written once by the scheduler.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskResult {
    #[serde(flatten)]
    pub task: MatchTask,
    pub status: TaskStatus,
    pub message: String,
    pub stored_filename: String,
    pub original_bytes: u64,
    pub transformed_bytes: Option<u64>,
    pub media_id: Option<String>,
    pub url: Option<String>,
    pub warning: Option<String>,
}

impl TaskResult {
    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// Bytes actually sent upstream.
    pub fn processed_bytes(&self) -> u64 {
        self.transformed_bytes.unwrap_or(self.original_bytes)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StrategyCounts {
    #[serde(rename = "REF")]
    pub reference: usize,
    #[serde(rename = "IMAGE_NAME")]
    pub image_name: usize,
    #[serde(rename = "FUZZY")]
    pub fuzzy: usize,
}

impl StrategyCounts {
    pub fn record(&mut self, strategy: MatchStrategy) {
        match strategy {
            MatchStrategy::Ref => self.reference += 1,
            MatchStrategy::ImageName => self.image_name += 1,
            MatchStrategy::Fuzzy => self.fuzzy += 1,
        }
    }

    pub fn get(&self, strategy: MatchStrategy) -> usize {
        match strategy {
            MatchStrategy::Ref => self.reference,
            MatchStrategy::ImageName => self.image_name,
            MatchStrategy::Fuzzy => self.fuzzy,
        }
    }

    pub fn total(&self) -> usize {
        self.reference + self.image_name + self.fuzzy
    }
}
