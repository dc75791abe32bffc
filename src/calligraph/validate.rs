use crate::calligraph::models::{MAX_BYTES, MediaKind, RawImage};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// A user-supplied file before validation.
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub filename: String,
    pub declared_mime: Option<String>,
    pub byte_length: u64,
    pub bytes: Bytes,
}

impl ImageFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            filename: filename.into(),
            declared_mime: None,
            byte_length: bytes.len() as u64,
            bytes,
        }
    }

    #[cfg(test)]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.declared_mime = Some(mime.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    InvalidType,
    TooLarge,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidType => f.write_str("INVALID_TYPE"),
            RejectReason::TooLarge => f.write_str("TOO_LARGE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedFile {
    pub filename: String,
    pub byte_length: u64,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub accepted: Vec<RawImage>,
    pub rejected: Vec<RejectedFile>,
}

/// Splits files into accepted images and rejections. The declared type is
/// trusted; the extension is only consulted when nothing was declared.
pub fn validate_images(files: Vec<ImageFile>) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();
    for file in files {
        match classify(&file) {
            Ok(media_kind) => outcome.accepted.push(RawImage {
                filename: file.filename,
                byte_length: file.byte_length,
                media_kind,
                bytes: file.bytes,
            }),
            Err(reason) => outcome.rejected.push(RejectedFile {
                filename: file.filename,
                byte_length: file.byte_length,
                reason,
            }),
        }
    }
    outcome
}

fn classify(file: &ImageFile) -> Result<MediaKind, RejectReason> {
    let declared = file
        .declared_mime
        .as_deref()
        .map(str::trim)
        .filter(|mime| !mime.is_empty());
    let kind = match declared {
        Some(mime) => MediaKind::from_mime(mime),
        None => MediaKind::from_filename(&file.filename),
    }
    .ok_or(RejectReason::InvalidType)?;

    if file.byte_length > MAX_BYTES {
        return Err(RejectReason::TooLarge);
    }
    Ok(kind)
}
