use crate::{
    calligraph::{
        progress::ProgressEvent,
        report::{Report, ReportError},
    },
    models::{ApiError, UploadRequest, UploadResponse},
    pipeline::Pipeline,
};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
}

#[derive(Clone)]
struct Job {
    id: Uuid,
    request: UploadRequest,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running {
        completed: usize,
        total: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<ProgressEvent>,
    },
    Completed {
        result: UploadResponse,
    },
    Failed {
        error: String,
        kind: String,
        stage: Option<String>,
    },
}

impl JobState {
    fn name(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running { .. } => "running",
            JobState::Completed { .. } => "completed",
            JobState::Failed { .. } => "failed",
        }
    }
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

#[derive(Debug, Error)]
pub enum JobReportError {
    #[error("job not found")]
    NotFound,
    #[error("job is {0}, no report yet")]
    NotReady(&'static str),
    #[error(transparent)]
    Report(#[from] ReportError),
}

impl JobQueue {
    pub fn spawn(pipeline: Pipeline) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(
                        job.id,
                        JobState::Running {
                            completed: 0,
                            total: 0,
                            progress: None,
                        },
                    );
                }

                let (progress_tx, progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
                let forwarder = tokio::spawn(forward_progress(
                    job.id,
                    progress_rx,
                    statuses_bg.clone(),
                ));
                let sink = move |event: ProgressEvent| {
                    let _ = progress_tx.send(event);
                };

                let result = pipeline.run_request(&job.request, &sink).await;
                drop(sink);
                let _ = forwarder.await;

                let mut guard = statuses_bg.lock().await;
                match result {
                    Ok(resp) => {
                        info!(
                            target = "calligraph.jobs",
                            job_id = %job.id,
                            results = resp.results.len(),
                            "job_completed"
                        );
                        guard.insert(job.id, JobState::Completed { result: resp });
                    }
                    Err(err) => {
                        info!(
                            target = "calligraph.jobs",
                            job_id = %job.id,
                            stage = err.stage(),
                            error = %err.detail(),
                            "job_failed"
                        );
                        guard.insert(
                            job.id,
                            JobState::Failed {
                                error: err.detail().to_string(),
                                kind: err.kind().as_str().to_string(),
                                stage: Some(err.stage().to_string()),
                            },
                        );
                    }
                }
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue_upload(&self, request: UploadRequest) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(id, JobState::Queued);
        }
        let job = Job { id, request };
        self.tx.send(job).await.map_err(|_| ApiError {
            error: "queue_send_failed".into(),
            kind: None,
            detail: Some("worker not available".into()),
        })?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }

    /// CSV report of a completed job.
    pub async fn report_csv(&self, id: Uuid) -> Result<String, JobReportError> {
        let guard = self.statuses.lock().await;
        match guard.get(&id) {
            None => Err(JobReportError::NotFound),
            Some(JobState::Completed { result }) => Ok(Report::build(&result.results).to_csv()?),
            Some(other) => Err(JobReportError::NotReady(other.name())),
        }
    }
}

async fn forward_progress(
    id: Uuid,
    mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
) {
    while let Some(event) = rx.recv().await {
        let mut guard = statuses.lock().await;
        guard.insert(
            id,
            JobState::Running {
                completed: event.current,
                total: event.total,
                progress: Some(event),
            },
        );
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calligraph::settings::PipelineSettings;
    use crate::calligraph::testing::StubUploader;
    use std::path::Path;
    use std::time::Duration;

    fn pipeline(uploader: Arc<StubUploader>) -> Pipeline {
        let settings = PipelineSettings {
            process_images: false,
            delay_between_batches: 0,
            ..PipelineSettings::default()
        };
        Pipeline::new(settings, uploader)
    }

    fn request(dir: &Path, manifest: &str, files: &[&str]) -> UploadRequest {
        let manifest_path = dir.join("products.csv");
        let images_dir = dir.join("images");
        std::fs::write(&manifest_path, manifest).unwrap();
        std::fs::create_dir_all(&images_dir).unwrap();
        for name in files {
            std::fs::write(images_dir.join(name), name.as_bytes()).unwrap();
        }
        UploadRequest {
            manifest_path,
            images_dir,
            settings: None,
            dry_run: false,
        }
    }

    async fn wait_for_terminal(queue: &JobQueue, id: Uuid) -> JobState {
        for _ in 0..200 {
            if let Some(info) = queue.get(id).await {
                if matches!(
                    info.state,
                    JobState::Completed { .. } | JobState::Failed { .. }
                ) {
                    return info.state;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn completed_job_exposes_result_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _worker) = JobQueue::spawn(pipeline(Arc::new(StubUploader::new())));
        let id = queue
            .enqueue_upload(request(
                dir.path(),
                "sku,ref\nSKU2,5500C\n",
                &["5500C_1.jpg", "5500C_2.jpg"],
            ))
            .await
            .unwrap();

        let JobState::Completed { result } = wait_for_terminal(&queue, id).await else {
            panic!("expected completion");
        };
        assert_eq!(result.results.len(), 2);

        let csv = queue.report_csv(id).await.unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("SKU2,5500C,5500C_1.jpg,5500C_1.jpg,SUCCESS,REF,"));
    }

    #[tokio::test]
    async fn manifest_errors_fail_the_job_with_their_kind() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _worker) = JobQueue::spawn(pipeline(Arc::new(StubUploader::new())));
        let id = queue
            .enqueue_upload(request(dir.path(), "sku,title\nA,B\n", &[]))
            .await
            .unwrap();

        match wait_for_terminal(&queue, id).await {
            JobState::Failed { kind, stage, .. } => {
                assert_eq!(kind, "MANIFEST_MISSING_COLUMN");
                assert_eq!(stage.as_deref(), Some("parse_manifest"));
            }
            _ => panic!("expected failure"),
        }
        assert!(matches!(
            queue.report_csv(id).await,
            Err(JobReportError::NotReady("failed"))
        ));
    }

    #[tokio::test]
    async fn unknown_job_has_no_report() {
        let (queue, _worker) = JobQueue::spawn(pipeline(Arc::new(StubUploader::new())));
        assert!(queue.get(Uuid::new_v4()).await.is_none());
        assert!(matches!(
            queue.report_csv(Uuid::new_v4()).await,
            Err(JobReportError::NotFound)
        ));
    }

    #[test]
    fn running_state_serializes_progress() {
        let state = JobState::Running {
            completed: 1,
            total: 3,
            progress: None,
        };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            serde_json::json!({"state": "running", "completed": 1, "total": 3})
        );
    }
}
