use crate::calligraph::models::{ExtractedRef, MatchTask, ProductRecord, StrategyCounts, TaskResult};
use crate::calligraph::report::ReportSummary;
use crate::calligraph::settings::SettingsOverride;
use crate::calligraph::validate::RejectedFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct UploadRequest {
    pub manifest_path: PathBuf,
    pub images_dir: PathBuf,
    #[serde(default)]
    pub settings: Option<SettingsOverride>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize, Clone)]
pub struct UploadResponse {
    pub run_id: String,
    pub dry_run: bool,
    pub stages: Vec<StageReport>,
    /// 1-based manifest lines dropped for a blank sku or ref.
    pub skipped_rows: Vec<usize>,
    pub rejected: Vec<RejectedFile>,
    pub unmatched_products: Vec<ProductRecord>,
    pub unmatched_images: Vec<String>,
    pub strategy_counts: StrategyCounts,
    pub results: Vec<TaskResult>,
    /// Absent on dry runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ReportSummary>,
}

#[derive(Debug, Serialize, Clone)]
pub struct MatchPreviewResponse {
    pub skipped_rows: Vec<usize>,
    pub rejected: Vec<RejectedFile>,
    pub tasks: Vec<MatchTask>,
    pub unmatched_products: Vec<ProductRecord>,
    pub unmatched_images: Vec<String>,
    pub strategy_counts: StrategyCounts,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceRequest {
    pub filenames: Vec<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct ReferenceEntry {
    pub filename: String,
    #[serde(flatten)]
    pub extracted: ExtractedRef,
}

#[derive(Debug, Serialize, Clone)]
pub struct ReferenceResponse {
    pub references: Vec<ReferenceEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
