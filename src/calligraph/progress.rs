use crate::calligraph::models::TaskStatus;
use serde::Serialize;
use serde_with::skip_serializing_none;
use tracing::debug;

/// Emitted at every task state transition.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Terminal events seen so far, including this one when it is terminal.
    pub current: usize,
    pub total: usize,
    pub sku: String,
    pub file_name: String,
    pub status: TaskStatus,
    pub stage: Option<String>,
    pub message: Option<String>,
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Logs each event; used when no caller is listening.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: ProgressEvent) {
        debug!(
            target = "calligraph.progress",
            current = event.current,
            total = event.total,
            sku = %event.sku,
            file = %event.file_name,
            status = event.status.as_str(),
            message = event.message.as_deref().unwrap_or(""),
            "task_progress"
        );
    }
}
