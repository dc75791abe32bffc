//! Retry decorator for any [`MediaUploader`].
//!
//! Waits `backoff * 2^attempt` plus up to 25% jitter between attempts, for at
//! most `max_retries` additional attempts after the first failure.

use crate::magento::media::{MediaUpload, MediaUploader, UploadOutcome};
use async_trait::async_trait;
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tracing::warn;

pub struct RetryingUploader {
    inner: Arc<dyn MediaUploader>,
    max_retries: u32,
    backoff: Duration,
}

impl RetryingUploader {
    pub fn new(inner: Arc<dyn MediaUploader>, max_retries: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            backoff,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_cap = (base.as_millis() / 4) as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_cap)
        };
        base + Duration::from_millis(jitter)
    }
}

#[async_trait]
impl MediaUploader for RetryingUploader {
    async fn upload(&self, upload: &MediaUpload) -> UploadOutcome {
        let mut attempt = 0;
        loop {
            let outcome = self.inner.upload(upload).await;
            if outcome.ok || attempt >= self.max_retries {
                return outcome;
            }
            let delay = self.delay_for(attempt);
            warn!(
                target = "calligraph.magento",
                sku = %upload.sku,
                file = %upload.stored_filename,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %outcome.message,
                "media_upload_retry"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
