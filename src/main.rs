mod calligraph;
mod http;
mod jobs;
mod magento;
mod metrics;
mod models;
mod pipeline;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use calligraph::progress::TracingProgress;
use calligraph::reference::extract_reference;
use eyre::WrapErr;
use jobs::JobReportError;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, MatchPreviewResponse, ReferenceEntry, ReferenceRequest, ReferenceResponse,
    UploadRequest, UploadResponse,
};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "calligraph.api", "server crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let pipeline = Pipeline::from_env().wrap_err("invalid pipeline settings")?;
    info!(
        target = "calligraph.api",
        batch_size = pipeline.settings().batch_size,
        process_images = pipeline.settings().process_images,
        "pipeline configured"
    );
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("failed to install prometheus recorder")?;

    let app = router(AppState {
        pipeline,
        queue,
        prometheus_handle,
    });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "calligraph.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    prometheus_handle: PrometheusHandle,
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/uploads", post(create_upload))
        .nest(
            "/stages",
            Router::new()
                .route("/match", post(stage_match))
                .route("/reference", post(stage_reference)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/uploads", post(enqueue_upload_job))
                .route("/{id}", get(get_job_status))
                .route("/{id}/report.csv", get(get_job_report)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "calligraph-media",
    }))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: axum::http::HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Run the manifest + image directory → Magento pipeline to completion.
///
/// - Method: `POST`
/// - Path: `/uploads`
/// - Body: `UploadRequest`
/// - Response: `UploadResponse` (per-task results, report summary and per-stage transcript)
async fn create_upload(
    State(state): State<AppState>,
    Json(payload): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    crate::metrics::inc_requests("/uploads");
    info!(
        target = "calligraph.api",
        manifest = %payload.manifest_path.display(),
        images = %payload.images_dir.display(),
        dry_run = payload.dry_run,
        "upload pipeline invoked",
    );
    let response = state.pipeline.run_request(&payload, &TracingProgress).await?;
    Ok(Json(response))
}

async fn stage_match(
    State(state): State<AppState>,
    Json(payload): Json<UploadRequest>,
) -> Result<Json<MatchPreviewResponse>, AppError> {
    crate::metrics::inc_requests("/stages/match");
    let preview = state.pipeline.preview_request(&payload).await?;
    Ok(Json(preview))
}

async fn stage_reference(Json(payload): Json<ReferenceRequest>) -> Json<ReferenceResponse> {
    crate::metrics::inc_requests("/stages/reference");
    let references = payload
        .filenames
        .into_iter()
        .map(|filename| ReferenceEntry {
            extracted: extract_reference(&filename),
            filename,
        })
        .collect();
    Json(ReferenceResponse { references })
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_upload_job(
    State(state): State<AppState>,
    Json(payload): Json<UploadRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/uploads");
    let id = state
        .queue
        .enqueue_upload(payload)
        .await
        .map_err(|err| AppError::Pipeline(PipelineError::internal("enqueue", err.error)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

fn parse_job_id(id: &str) -> Result<uuid::Uuid, AppError> {
    uuid::Uuid::parse_str(id)
        .map_err(|_| AppError::Pipeline(PipelineError::invalid_input("jobs", "invalid_job_id")))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let uuid = parse_job_id(&id)?;
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::Job(JobReportError::NotFound))
}

async fn get_job_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let uuid = parse_job_id(&id)?;
    let csv = state.queue.report_csv(uuid).await?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv).into_response())
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    Job(JobReportError),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl From<JobReportError> for AppError {
    fn from(value: JobReportError) -> Self {
        Self::Job(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::ManifestMissingColumn | PipelineErrorKind::ManifestEmpty => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    kind: Some(err.kind().as_str().to_string()),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
            AppError::Job(err) => {
                let status = match err {
                    JobReportError::NotFound => StatusCode::NOT_FOUND,
                    JobReportError::NotReady(_) => StatusCode::CONFLICT,
                    JobReportError::Report(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: "jobs".to_string(),
                    kind: None,
                    detail: Some(err.to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calligraph::settings::PipelineSettings;
    use crate::calligraph::testing::StubUploader;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let settings = PipelineSettings {
            process_images: false,
            delay_between_batches: 0,
            ..PipelineSettings::default()
        };
        let pipeline = Pipeline::new(settings, Arc::new(StubUploader::new()));
        let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
        router(AppState {
            pipeline,
            queue,
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        })
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn write_inputs(dir: &std::path::Path, manifest: &str, files: &[&str]) -> serde_json::Value {
        let manifest_path = dir.join("products.csv");
        let images_dir = dir.join("images");
        std::fs::write(&manifest_path, manifest).unwrap();
        std::fs::create_dir_all(&images_dir).unwrap();
        for name in files {
            std::fs::write(images_dir.join(name), name.as_bytes()).unwrap();
        }
        json!({
            "manifest_path": manifest_path,
            "images_dir": images_dir,
        })
    }

    #[tokio::test]
    async fn health_reports_service() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["service"], "calligraph-media");
    }

    #[tokio::test]
    async fn reference_stage_extracts_each_filename() {
        let response = app()
            .oneshot(post_json(
                "/stages/reference",
                json!({"filenames": ["5500c_3.JPG", "7203C.jpg"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(
            body["references"][0],
            json!({"filename": "5500c_3.JPG", "base_ref": "5500C", "ordinal": 3})
        );
        assert_eq!(body["references"][1]["ordinal"], 1);
    }

    #[tokio::test]
    async fn upload_runs_pipeline_and_returns_summary() {
        let dir = tempfile::tempdir().unwrap();
        let body = write_inputs(dir.path(), "sku,ref\nSKU1,7203C\n", &["7203C.jpg"]);
        let response = app().oneshot(post_json("/uploads", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["summary"]["successful"], 1);
        assert_eq!(body["results"][0]["status"], "SUCCESS");
        assert_eq!(body["results"][0]["final_stem"], "7203C");
        assert_eq!(body["strategy_counts"]["REF"], 1);
    }

    #[tokio::test]
    async fn manifest_errors_map_to_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        let body = write_inputs(dir.path(), "sku,title\nSKU1,Pen\n", &[]);
        let response = app().oneshot(post_json("/uploads", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = read_json(response).await;
        assert_eq!(body["error"], "parse_manifest");
        assert_eq!(body["kind"], "MANIFEST_MISSING_COLUMN");
    }

    #[tokio::test]
    async fn bad_settings_override_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = write_inputs(dir.path(), "sku,ref\nSKU1,7203C\n", &[]);
        body["settings"] = json!({"backgroundColor": "blue"});
        let response = app().oneshot(post_json("/stages/match", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["error"], "settings");
    }

    #[tokio::test]
    async fn match_stage_previews_without_uploading() {
        let dir = tempfile::tempdir().unwrap();
        let body = write_inputs(
            dir.path(),
            "sku,ref\nSKU2,5500C\n",
            &["5500C_3.jpg", "5500C_1.jpg", "orphan.jpg"],
        );
        let response = app().oneshot(post_json("/stages/match", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["tasks"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["tasks"][1]["final_stem"], "5500C_2");
        assert_eq!(body["unmatched_images"], json!(["orphan.jpg"]));
    }

    #[tokio::test]
    async fn job_lookups_validate_ids() {
        let app = app();
        let response = app
            .clone()
            .oneshot(Request::get("/jobs/not-a-uuid").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let uri = format!("/jobs/{}/report.csv", uuid::Uuid::new_v4());
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn queued_job_produces_csv_report() {
        let dir = tempfile::tempdir().unwrap();
        let app = app();
        let body = write_inputs(dir.path(), "sku,ref\nSKU1,7203C\n", &["7203C.jpg"]);
        let response = app
            .clone()
            .oneshot(post_json("/jobs/uploads", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job_id = read_json(response).await["job_id"]
            .as_str()
            .unwrap()
            .to_string();

        let mut state = serde_json::Value::Null;
        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(
                    Request::get(format!("/jobs/{job_id}"))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            state = read_json(response).await;
            if state["state"] == "completed" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(state["state"], "completed");

        let response = app
            .oneshot(
                Request::get(format!("/jobs/{job_id}/report.csv"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(csv.starts_with("SKU,REF,OriginalFileName"));
        assert!(csv.contains("SKU1,7203C,7203C.jpg,7203C.jpg,SUCCESS,REF"));
    }
}
