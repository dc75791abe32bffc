//! Shared fixtures for pipeline tests.

use crate::calligraph::models::{MatchStrategy, MatchTask, MediaKind, RawImage};
use crate::calligraph::progress::{ProgressEvent, ProgressSink};
use crate::magento::{MediaUpload, MediaUploader, UploadOutcome};
use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let img = RgbImage::from_pixel(width, height, Rgb([30, 60, 90]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("encode png fixture");
    Bytes::from(buffer.into_inner())
}

pub fn raw_image(filename: &str, bytes: Bytes) -> RawImage {
    RawImage {
        filename: filename.to_string(),
        byte_length: bytes.len() as u64,
        media_kind: MediaKind::from_filename(filename).unwrap_or(MediaKind::Jpeg),
        bytes,
    }
}

pub fn task(sku: &str, ordinal: u32, total: u32) -> MatchTask {
    let stem = if total == 1 {
        sku.to_string()
    } else {
        format!("{sku}_{ordinal}")
    };
    MatchTask {
        sku: sku.to_string(),
        reference: sku.to_string(),
        image: raw_image(&format!("{stem}.jpg"), Bytes::from(vec![7u8; 16])),
        source_ordinal: ordinal,
        ordinal,
        total_for_sku: total,
        final_stem: stem,
        strategy: MatchStrategy::Ref,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpload {
    pub sku: String,
    pub position: u32,
    pub stored_filename: String,
    pub bytes: Bytes,
    pub roles: Vec<String>,
}

/// Deterministic uploader that records calls and tracks concurrency.
#[derive(Default)]
pub struct StubUploader {
    pub calls: Mutex<Vec<RecordedUpload>>,
    pub fail_skus: HashSet<String>,
    pub latency: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    sku_in_flight: Mutex<HashMap<String, usize>>,
    max_sku_in_flight: AtomicUsize,
}

impl StubUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(skus: &[&str]) -> Self {
        Self {
            fail_skus: skus.iter().map(|sku| sku.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn recorded(&self) -> Vec<RecordedUpload> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls seen for any one SKU.
    pub fn peak_per_sku(&self) -> usize {
        self.max_sku_in_flight.load(Ordering::SeqCst)
    }

    fn track_sku(&self, sku: &str, entering: bool) {
        let mut guard = self.sku_in_flight.lock().expect("sku lock");
        let count = guard.entry(sku.to_string()).or_default();
        if entering {
            *count += 1;
            self.max_sku_in_flight.fetch_max(*count, Ordering::SeqCst);
        } else {
            *count -= 1;
        }
    }
}

#[async_trait]
impl MediaUploader for StubUploader {
    async fn upload(&self, upload: &MediaUpload) -> UploadOutcome {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.track_sku(&upload.sku, true);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.calls.lock().expect("calls lock").push(RecordedUpload {
            sku: upload.sku.clone(),
            position: upload.position,
            stored_filename: upload.stored_filename.clone(),
            bytes: upload.bytes.clone(),
            roles: upload.roles.clone(),
        });
        self.track_sku(&upload.sku, false);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_skus.contains(&upload.sku) {
            UploadOutcome::failure(format!("HTTP 400: rejected {}", upload.stored_filename))
        } else {
            UploadOutcome::success(
                Some(format!("{}-{}", upload.sku, upload.position)),
                format!("uploaded {}", upload.stored_filename),
            )
        }
    }
}

#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}
