use crate::calligraph::loader::{self, LoadError};
use crate::calligraph::manifest::{self, ManifestError, ParsedManifest};
use crate::calligraph::matcher::{self, MatchPlan};
use crate::calligraph::models::{ProductRecord, RawImage, TaskResult};
use crate::calligraph::progress::ProgressSink;
use crate::calligraph::report::Report;
use crate::calligraph::scheduler::{self, SchedulerConfig};
use crate::calligraph::settings::{PipelineSettings, SettingsError};
use crate::calligraph::validate::{self, ImageFile, ValidationOutcome};
use crate::magento::{MagentoUploader, MediaUploader, RetryingUploader};
use crate::models::{MatchPreviewResponse, StageReport, UploadRequest, UploadResponse};
use serde_json::{Value, json};
use std::{future::Future, sync::Arc, time::Duration, time::Instant};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct Pipeline {
    settings: Arc<PipelineSettings>,
    uploader: Arc<dyn MediaUploader>,
}

/// Everything one run needs, already in memory.
pub struct PipelineInput {
    pub manifest: Vec<u8>,
    pub images: Vec<ImageFile>,
    pub settings: PipelineSettings,
    pub dry_run: bool,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, uploader: Arc<dyn MediaUploader>) -> Self {
        Self {
            settings: Arc::new(settings),
            uploader,
        }
    }

    pub fn from_env() -> Result<Self, SettingsError> {
        Ok(Self::new(
            PipelineSettings::from_env()?,
            Arc::new(MagentoUploader::from_env()),
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn run_request(
        &self,
        request: &UploadRequest,
        sink: &dyn ProgressSink,
    ) -> Result<UploadResponse, PipelineError> {
        let input = self.load(request).await?;
        self.run(input, sink).await
    }

    /// Parses, validates and matches without uploading anything.
    pub async fn preview_request(
        &self,
        request: &UploadRequest,
    ) -> Result<MatchPreviewResponse, PipelineError> {
        let input = self.load(request).await?;
        let parsed = stages::parse_manifest(&input.manifest).await?.value;
        let validation = stages::validate_images(input.images).await?.value;
        let plan = stages::match_images(&parsed.records, &validation.accepted)
            .await?
            .value;
        Ok(MatchPreviewResponse {
            skipped_rows: parsed.skipped_rows,
            rejected: validation.rejected,
            tasks: plan.tasks,
            unmatched_products: plan.unmatched_products,
            unmatched_images: plan.unmatched_images,
            strategy_counts: plan.strategy_counts,
        })
    }

    async fn load(&self, request: &UploadRequest) -> Result<PipelineInput, PipelineError> {
        let settings = self
            .settings
            .with_override(request.settings.as_ref())
            .map_err(PipelineError::settings)?;
        let manifest = loader::load_manifest(&request.manifest_path)
            .await
            .map_err(|err| PipelineError::load("parse_manifest", err))?;
        let images = loader::load_image_dir(&request.images_dir)
            .await
            .map_err(|err| PipelineError::load("validate_images", err))?;
        Ok(PipelineInput {
            manifest,
            images,
            settings,
            dry_run: request.dry_run,
        })
    }

    /// Runs every stage in order. Only manifest and settings problems are
    /// fatal; everything after matching is reported per task.
    pub async fn run(
        &self,
        input: PipelineInput,
        sink: &dyn ProgressSink,
    ) -> Result<UploadResponse, PipelineError> {
        let PipelineInput {
            manifest,
            images,
            settings,
            dry_run,
        } = input;
        let settings = settings.normalized().map_err(PipelineError::settings)?;
        let config = scheduler_config(&settings)?;
        let run_id = Uuid::new_v4();
        let mut stages = Vec::new();

        let parsed = self
            .capture_stage(
                "parse_manifest",
                &mut stages,
                stages::parse_manifest(&manifest),
            )
            .await?;
        let validation = self
            .capture_stage(
                "validate_images",
                &mut stages,
                stages::validate_images(images),
            )
            .await?;
        let plan = self
            .capture_stage(
                "match_images",
                &mut stages,
                stages::match_images(&parsed.records, &validation.accepted),
            )
            .await?;

        info!(
            target = "calligraph.pipeline",
            run_id = %run_id,
            products = parsed.records.len(),
            images = validation.accepted.len(),
            rejected = validation.rejected.len(),
            tasks = plan.tasks.len(),
            dry_run,
            "match_complete"
        );

        let MatchPlan {
            tasks,
            unmatched_products,
            unmatched_images,
            strategy_counts,
        } = plan;
        let mut response = UploadResponse {
            run_id: run_id.to_string(),
            dry_run,
            stages: Vec::new(),
            skipped_rows: parsed.skipped_rows,
            rejected: validation.rejected,
            unmatched_products,
            unmatched_images,
            strategy_counts,
            results: Vec::new(),
            summary: None,
        };
        if dry_run {
            response.stages = stages;
            return Ok(response);
        }

        let uploader = self.uploader_for(&settings);
        let results = self
            .capture_stage(
                "upload_media",
                &mut stages,
                stages::upload_media(tasks, &config, uploader.as_ref(), sink),
            )
            .await?;
        let report = self
            .capture_stage("build_report", &mut stages, stages::build_report(&results))
            .await?;

        info!(
            target = "calligraph.pipeline",
            run_id = %run_id,
            successful = report.summary.successful,
            failed = report.summary.failed,
            "run_complete"
        );

        response.results = results;
        response.summary = Some(report.summary);
        response.stages = stages;
        Ok(response)
    }

    fn uploader_for(&self, settings: &PipelineSettings) -> Arc<dyn MediaUploader> {
        if settings.upload_retries == 0 {
            return self.uploader.clone();
        }
        Arc::new(RetryingUploader::new(
            self.uploader.clone(),
            settings.upload_retries,
            Duration::from_millis(settings.retry_backoff_ms),
        ))
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

fn scheduler_config(settings: &PipelineSettings) -> Result<SchedulerConfig, PipelineError> {
    let transform = if settings.process_images {
        Some(
            settings
                .transform_params()
                .map_err(PipelineError::settings)?,
        )
    } else {
        None
    };
    Ok(SchedulerConfig {
        transform,
        batch_size: settings.batch_size,
        inter_batch_delay: settings.batch_delay(),
    })
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    ManifestMissingColumn,
    ManifestEmpty,
    InvalidInput,
    Internal,
}

impl PipelineErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineErrorKind::ManifestMissingColumn => "MANIFEST_MISSING_COLUMN",
            PipelineErrorKind::ManifestEmpty => "MANIFEST_EMPTY",
            PipelineErrorKind::InvalidInput => "INVALID_INPUT",
            PipelineErrorKind::Internal => "INTERNAL",
        }
    }
}

impl PipelineError {
    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: PipelineErrorKind::Internal,
        }
    }

    fn settings(err: SettingsError) -> Self {
        Self::invalid_input("settings", err.to_string())
    }

    fn load(stage: &'static str, err: LoadError) -> Self {
        Self::invalid_input(stage, err.to_string())
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

impl From<ManifestError> for PipelineError {
    fn from(err: ManifestError) -> Self {
        let kind = match err {
            ManifestError::MissingColumn(_) => PipelineErrorKind::ManifestMissingColumn,
            ManifestError::Empty => PipelineErrorKind::ManifestEmpty,
        };
        Self {
            stage: "parse_manifest",
            message: err.to_string(),
            kind,
        }
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}

pub mod stages {
    use super::*;

    pub async fn parse_manifest(
        input: &[u8],
    ) -> Result<StageOutcome<ParsedManifest>, PipelineError> {
        let parsed = manifest::parse_manifest(input)?;
        let output = json!({
            "records": parsed.records.len(),
            "columns": parsed.columns,
            "skipped_rows": parsed.skipped_rows,
        });
        Ok(StageOutcome::new(parsed, output))
    }

    pub async fn validate_images(
        files: Vec<ImageFile>,
    ) -> Result<StageOutcome<ValidationOutcome>, PipelineError> {
        let outcome = validate::validate_images(files);
        let output = json!({
            "accepted": outcome.accepted.len(),
            "rejected": outcome.rejected,
        });
        Ok(StageOutcome::new(outcome, output))
    }

    pub async fn match_images(
        products: &[ProductRecord],
        images: &[RawImage],
    ) -> Result<StageOutcome<MatchPlan>, PipelineError> {
        let plan = matcher::match_products(products, images);
        let output = json!({
            "tasks": plan.tasks.len(),
            "strategy_counts": plan.strategy_counts,
            "unmatched_products": plan.unmatched_products.len(),
            "unmatched_images": plan.unmatched_images,
        });
        Ok(StageOutcome::new(plan, output))
    }

    pub async fn upload_media(
        tasks: Vec<crate::calligraph::models::MatchTask>,
        config: &SchedulerConfig,
        uploader: &dyn MediaUploader,
        sink: &dyn ProgressSink,
    ) -> Result<StageOutcome<Vec<TaskResult>>, PipelineError> {
        let results = scheduler::run_uploads(tasks, config, uploader, sink).await;
        let succeeded = results.iter().filter(|r| r.succeeded()).count();
        let output = json!({
            "uploaded": succeeded,
            "failed": results.len() - succeeded,
            "transform": config.transform.is_some(),
            "batch_size": config.batch_size,
        });
        Ok(StageOutcome::new(results, output))
    }

    pub async fn build_report(
        results: &[TaskResult],
    ) -> Result<StageOutcome<Report>, PipelineError> {
        let report = Report::build(results);
        let output = serde_json::to_value(&report.summary)
            .map_err(|err| PipelineError::internal("build_report", err.to_string()))?;
        Ok(StageOutcome::new(report, output))
    }
}
