use crate::calligraph::models::{MatchStrategy, StrategyCounts, TaskResult, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("csv buffer: {0}")]
    Buffer(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub unique_products: usize,
    pub average_images_per_product: f64,
    pub total_original_bytes: u64,
    pub total_transformed_bytes: u64,
    /// `(original - transformed) / original`; negative when output grew.
    pub compression_ratio: f64,
    pub strategy_counts: StrategyCounts,
    pub generated_at: DateTime<Utc>,
}

/// One CSV line of the downloadable report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    #[serde(rename = "SKU")]
    pub sku: String,
    #[serde(rename = "REF")]
    pub reference: String,
    #[serde(rename = "OriginalFileName")]
    pub original_file_name: String,
    #[serde(rename = "FinalFileName")]
    pub final_file_name: String,
    #[serde(rename = "Status")]
    pub status: TaskStatus,
    #[serde(rename = "MatchStrategy")]
    pub match_strategy: MatchStrategy,
    #[serde(rename = "Message")]
    pub message: String,
    /// Megabytes, two decimals.
    #[serde(rename = "OriginalSize")]
    pub original_size: f64,
    #[serde(rename = "ProcessedSize")]
    pub processed_size: f64,
    /// Percentage, two decimals.
    #[serde(rename = "CompressionRatio")]
    pub compression_ratio: f64,
}

impl ReportRow {
    fn from_result(result: &TaskResult) -> Self {
        let original = result.original_bytes;
        let processed = result.processed_bytes();
        Self {
            sku: result.task.sku.clone(),
            reference: result.task.reference.clone(),
            original_file_name: result.task.image.filename.clone(),
            final_file_name: result.stored_filename.clone(),
            status: result.status,
            match_strategy: result.task.strategy,
            message: result.message.clone(),
            original_size: round2(original as f64 / BYTES_PER_MB),
            processed_size: round2(processed as f64 / BYTES_PER_MB),
            compression_ratio: round2(ratio(original, processed) * 100.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub summary: ReportSummary,
    pub rows: Vec<ReportRow>,
}

impl Report {
    pub fn build(results: &[TaskResult]) -> Self {
        let total = results.len();
        let successful = results.iter().filter(|r| r.succeeded()).count();
        let unique_products = results
            .iter()
            .map(|r| r.task.sku.as_str())
            .collect::<HashSet<_>>()
            .len();
        let total_original_bytes: u64 = results.iter().map(|r| r.original_bytes).sum();
        let total_transformed_bytes: u64 = results.iter().map(TaskResult::processed_bytes).sum();

        let mut strategy_counts = StrategyCounts::default();
        for result in results {
            strategy_counts.record(result.task.strategy);
        }

        let summary = ReportSummary {
            total,
            successful,
            failed: total - successful,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64
            },
            unique_products,
            average_images_per_product: if unique_products == 0 {
                0.0
            } else {
                total as f64 / unique_products as f64
            },
            total_original_bytes,
            total_transformed_bytes,
            compression_ratio: ratio(total_original_bytes, total_transformed_bytes),
            strategy_counts,
            generated_at: Utc::now(),
        };

        Self {
            summary,
            rows: results.iter().map(ReportRow::from_result).collect(),
        }
    }

    pub fn to_csv(&self) -> Result<String, ReportError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &self.rows {
            writer.serialize(row)?;
        }
        if self.rows.is_empty() {
            writer.write_record(HEADER)?;
        }
        let buffer = writer
            .into_inner()
            .map_err(|err| ReportError::Buffer(err.to_string()))?;
        String::from_utf8(buffer).map_err(|err| ReportError::Buffer(err.to_string()))
    }
}

const HEADER: [&str; 10] = [
    "SKU",
    "REF",
    "OriginalFileName",
    "FinalFileName",
    "Status",
    "MatchStrategy",
    "Message",
    "OriginalSize",
    "ProcessedSize",
    "CompressionRatio",
];

pub fn rows_from_csv(input: &str) -> Result<Vec<ReportRow>, ReportError> {
    let mut reader = csv::Reader::from_reader(input.as_bytes());
    reader
        .deserialize()
        .collect::<Result<Vec<ReportRow>, csv::Error>>()
        .map_err(ReportError::from)
}

fn ratio(original: u64, processed: u64) -> f64 {
    if original == 0 {
        0.0
    } else {
        (original as f64 - processed as f64) / original as f64
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calligraph::testing::task;

    fn result(sku: &str, ordinal: u32, total: u32, ok: bool, original: u64, transformed: Option<u64>) -> TaskResult {
        let task = task(sku, ordinal, total);
        TaskResult {
            stored_filename: format!("{}.jpg", task.final_stem),
            task,
            status: if ok { TaskStatus::Success } else { TaskStatus::Failure },
            message: if ok { "uploaded".into() } else { "HTTP 500: boom, try later".into() },
            original_bytes: original,
            transformed_bytes: transformed,
            media_id: None,
            url: None,
            warning: None,
        }
    }

    #[test]
    fn summary_totals_close_over_results() {
        let results = vec![
            result("A", 1, 2, true, 4_000_000, Some(1_000_000)),
            result("A", 2, 2, false, 2_000_000, Some(1_000_000)),
            result("B", 1, 1, true, 2_000_000, None),
        ];
        let report = Report::build(&results);
        let s = &report.summary;

        assert_eq!(s.total, s.successful + s.failed);
        assert_eq!((s.successful, s.failed), (2, 1));
        assert_eq!(s.total_original_bytes, 8_000_000);
        assert_eq!(s.total_transformed_bytes, 4_000_000);
        assert!((s.compression_ratio - 0.5).abs() < f64::EPSILON);
        assert!((s.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(s.unique_products, 2);
        assert!((s.average_images_per_product - 1.5).abs() < f64::EPSILON);
        assert_eq!(s.strategy_counts.get(MatchStrategy::Ref), 3);
    }

    #[test]
    fn empty_results_do_not_divide_by_zero() {
        let report = Report::build(&[]);
        assert_eq!(report.summary.total, 0);
        assert_eq!(report.summary.success_rate, 0.0);
        assert_eq!(report.summary.average_images_per_product, 0.0);
        assert_eq!(report.summary.compression_ratio, 0.0);
        let csv = report.to_csv().unwrap();
        assert_eq!(
            csv.trim_end(),
            "SKU,REF,OriginalFileName,FinalFileName,Status,MatchStrategy,Message,OriginalSize,ProcessedSize,CompressionRatio"
        );
        assert!(rows_from_csv(&csv).unwrap().is_empty());
    }

    #[test]
    fn zero_byte_original_has_zero_ratio() {
        let report = Report::build(&[result("A", 1, 1, true, 0, Some(0))]);
        assert_eq!(report.rows[0].compression_ratio, 0.0);
        assert_eq!(report.summary.compression_ratio, 0.0);
    }

    #[test]
    fn rows_use_megabytes_and_percentages() {
        let report = Report::build(&[result("A", 1, 1, true, 3 * 1024 * 1024, Some(786_432))]);
        let row = &report.rows[0];
        assert_eq!(row.original_size, 3.0);
        assert_eq!(row.processed_size, 0.75);
        assert_eq!(row.compression_ratio, 75.0);
        assert_eq!(row.final_file_name, "A.jpg");
        assert_eq!(row.original_file_name, "A.jpg");
    }

    #[test]
    fn csv_parses_back_to_the_same_rows() {
        let results = vec![
            result("A", 1, 2, true, 1_234_567, Some(345_678)),
            result("A", 2, 2, false, 2_000_000, None),
        ];
        let report = Report::build(&results);
        let csv = report.to_csv().unwrap();
        assert!(csv.starts_with("SKU,REF,OriginalFileName,FinalFileName,Status,MatchStrategy,"));
        assert!(csv.contains("\"HTTP 500: boom, try later\""));
        assert!(csv.contains(",FAILURE,REF,"));

        assert_eq!(rows_from_csv(&csv).unwrap(), report.rows);
    }
}
