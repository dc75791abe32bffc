//! Product manifest reader.
//!
//! The manifest dialect is deliberately small: comma separated, first line is
//! the header, quotes are stripped but never protect embedded commas.

use crate::calligraph::models::ProductRecord;
use serde::Serialize;
use thiserror::Error;

pub const SKU_COLUMN: &str = "sku";
pub const REF_COLUMN: &str = "ref";
pub const IMAGE_NAME_COLUMN: &str = "image name";
pub const NAME_COLUMN: &str = "name";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("manifest is missing required column `{0}`")]
    MissingColumn(&'static str),
    #[error("manifest has no data rows")]
    Empty,
}

/// Positions of the logical columns inside the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnMapping {
    pub sku: usize,
    #[serde(rename = "ref")]
    pub reference: usize,
    pub image_name: Option<usize>,
    pub product_name: Option<usize>,
}

impl ColumnMapping {
    fn from_header(header: &[String]) -> Result<Self, ManifestError> {
        let position = |name: &str| header.iter().position(|col| col == name);
        Ok(Self {
            sku: position(SKU_COLUMN).ok_or(ManifestError::MissingColumn(SKU_COLUMN))?,
            reference: position(REF_COLUMN).ok_or(ManifestError::MissingColumn(REF_COLUMN))?,
            image_name: position(IMAGE_NAME_COLUMN),
            product_name: position(NAME_COLUMN),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedManifest {
    pub columns: ColumnMapping,
    pub records: Vec<ProductRecord>,
    /// 1-based line numbers of data rows dropped for a blank sku or ref.
    pub skipped_rows: Vec<usize>,
}

pub fn parse_manifest(input: &[u8]) -> Result<ParsedManifest, ManifestError> {
    let text = String::from_utf8_lossy(input);
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let mut lines = text
        .split('\n')
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header_line)) = lines.next() else {
        return Err(ManifestError::Empty);
    };
    let header = split_fields(header_line)
        .into_iter()
        .map(|col| col.to_lowercase())
        .collect::<Vec<_>>();
    let columns = ColumnMapping::from_header(&header)?;

    let mut records = Vec::new();
    let mut skipped_rows = Vec::new();
    let mut data_rows = 0usize;

    for (line_no, line) in lines {
        data_rows += 1;
        let fields = split_fields(line);
        let cell = |idx: usize| fields.get(idx).map(String::as_str).unwrap_or("");
        let optional = |idx: Option<usize>| {
            idx.map(cell)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let sku = cell(columns.sku);
        let reference = cell(columns.reference);
        if sku.is_empty() || reference.is_empty() {
            skipped_rows.push(line_no);
            continue;
        }

        records.push(ProductRecord {
            sku: sku.to_string(),
            reference: reference.to_string(),
            image_name: optional(columns.image_name),
            product_name: optional(columns.product_name),
            source_row: line_no,
        });
    }

    if data_rows == 0 {
        return Err(ManifestError::Empty);
    }

    Ok(ParsedManifest {
        columns,
        records,
        skipped_rows,
    })
}

fn split_fields(line: &str) -> Vec<String> {
    line.split(',')
        .map(|field| field.trim().trim_matches('"').trim().to_string())
        .collect()
}
