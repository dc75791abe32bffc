//! Bounded-concurrency upload loop.
//!
//! Tasks are grouped by SKU. Up to `batch_size` groups run concurrently; the
//! tasks of one group run strictly in order so gallery positions land in
//! ordinal order. A failed task never cancels anything else.

use crate::calligraph::models::{MatchTask, TaskResult, TaskStatus};
use crate::calligraph::progress::{ProgressEvent, ProgressSink};
use crate::calligraph::transform::{TransformOutput, TransformParams, transform_image};
use crate::magento::{MediaUpload, MediaUploader};
use crate::metrics;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// `None` uploads the original bytes untouched.
    pub transform: Option<TransformParams>,
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            transform: Some(TransformParams::default()),
            batch_size: 3,
            inter_batch_delay: Duration::from_millis(2000),
        }
    }
}

struct RunContext<'a> {
    config: &'a SchedulerConfig,
    uploader: &'a dyn MediaUploader,
    sink: &'a dyn ProgressSink,
    total: usize,
    completed: AtomicUsize,
}

/// Runs every task and returns one result per task, in task order.
pub async fn run_uploads(
    tasks: Vec<MatchTask>,
    config: &SchedulerConfig,
    uploader: &dyn MediaUploader,
    sink: &dyn ProgressSink,
) -> Vec<TaskResult> {
    let total = tasks.len();
    let groups = group_by_sku(tasks);
    let ctx = RunContext {
        config,
        uploader,
        sink,
        total,
        completed: AtomicUsize::new(0),
    };

    let batch_size = config.batch_size.max(1);
    let batch_count = groups.len().div_ceil(batch_size);
    let mut slots: Vec<Option<TaskResult>> = vec![None; total];

    for (batch_idx, chunk) in groups.chunks(batch_size).enumerate() {
        let started = Instant::now();
        info!(
            target = "calligraph.scheduler",
            batch = batch_idx + 1,
            batches = batch_count,
            groups = chunk.len(),
            "batch_started"
        );

        let finished = join_all(chunk.iter().map(|group| run_group(&ctx, group))).await;
        for (index, result) in finished.into_iter().flatten() {
            slots[index] = Some(result);
        }

        metrics::batch_finished(batch_idx + 1, chunk.len(), started.elapsed().as_millis());
        if batch_idx + 1 < batch_count && !config.inter_batch_delay.is_zero() {
            tokio::time::sleep(config.inter_batch_delay).await;
        }
    }

    slots.into_iter().flatten().collect()
}

/// Groups by exact SKU, keeping first-appearance order of groups and the
/// original order inside each group. Each task carries its input index.
fn group_by_sku(tasks: Vec<MatchTask>) -> Vec<Vec<(usize, MatchTask)>> {
    let mut groups: Vec<Vec<(usize, MatchTask)>> = Vec::new();
    let mut by_sku: HashMap<String, usize> = HashMap::new();
    for (index, task) in tasks.into_iter().enumerate() {
        let slot = *by_sku.entry(task.sku.clone()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push((index, task));
    }
    groups
}

async fn run_group(ctx: &RunContext<'_>, group: &[(usize, MatchTask)]) -> Vec<(usize, TaskResult)> {
    let mut results = Vec::with_capacity(group.len());
    for (index, task) in group {
        results.push((*index, run_task(ctx, task).await));
    }
    results
}

async fn run_task(ctx: &RunContext<'_>, task: &MatchTask) -> TaskResult {
    let started = Instant::now();
    let source = &task.image;

    let prepared = match &ctx.config.transform {
        Some(params) => {
            emit(ctx, task, TaskStatus::Processing, Some("transform"), None);
            let bytes = source.bytes.clone();
            let kind = source.media_kind;
            let params = *params;
            match tokio::task::spawn_blocking(move || transform_image(&bytes, kind, &params)).await
            {
                Ok(output) => output,
                Err(err) => TransformOutput::skipped(source.bytes.clone(), kind, err),
            }
        }
        None => TransformOutput {
            bytes: source.bytes.clone(),
            media_kind: source.media_kind,
            applied: false,
            warning: None,
        },
    };
    if let Some(warning) = &prepared.warning {
        warn!(
            target = "calligraph.scheduler",
            sku = %task.sku,
            file = %source.filename,
            warning = %warning,
            "transform_skipped"
        );
    }

    emit(ctx, task, TaskStatus::Uploading, Some("upload"), None);
    let stored_filename = format!("{}.{}", task.final_stem, prepared.media_kind.extension());
    let position = task.position();
    let upload = MediaUpload {
        sku: task.sku.clone(),
        bytes: prepared.bytes.clone(),
        media_kind: prepared.media_kind,
        label: task.final_stem.clone(),
        position,
        roles: MediaUpload::roles_for_position(position),
        stored_filename: stored_filename.clone(),
    };
    let outcome = ctx.uploader.upload(&upload).await;
    metrics::upload_finished(outcome.ok, started.elapsed().as_millis());

    let status = if outcome.ok {
        TaskStatus::Success
    } else {
        TaskStatus::Failure
    };
    emit(ctx, task, status, None, Some(outcome.message.clone()));

    TaskResult {
        task: task.without_payload(),
        status,
        message: outcome.message,
        stored_filename,
        original_bytes: source.byte_length,
        transformed_bytes: prepared.applied.then(|| prepared.bytes.len() as u64),
        media_id: outcome.media_id,
        url: outcome.url,
        warning: prepared.warning,
    }
}

fn emit(
    ctx: &RunContext<'_>,
    task: &MatchTask,
    status: TaskStatus,
    stage: Option<&str>,
    message: Option<String>,
) {
    let current = if status.is_terminal() {
        ctx.completed.fetch_add(1, Ordering::SeqCst) + 1
    } else {
        ctx.completed.load(Ordering::SeqCst)
    };
    ctx.sink.emit(ProgressEvent {
        current,
        total: ctx.total,
        sku: task.sku.clone(),
        file_name: task.image.filename.clone(),
        status,
        stage: stage.map(str::to_string),
        message,
    });
}
