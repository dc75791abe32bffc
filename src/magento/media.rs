use crate::calligraph::models::MediaKind;
use crate::http::build_client;
use crate::magento::config::MagentoEndpoint;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use serde_with::skip_serializing_none;
use thiserror::Error;
use tracing::debug;

pub const PRIMARY_ROLES: [&str; 3] = ["image", "small_image", "thumbnail"];

#[derive(Debug, Error)]
pub enum MagentoMediaError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("encoding failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaEntryRequest {
    pub entry: MediaEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaEntry {
    pub media_type: &'static str,
    pub label: String,
    pub position: u32,
    pub disabled: bool,
    pub types: Vec<String>,
    pub content: MediaContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaContent {
    pub base64_encoded_data: String,
    #[serde(rename = "type")]
    pub mime: &'static str,
    pub name: String,
}

/// One media entry to attach to a SKU.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub sku: String,
    pub bytes: Bytes,
    pub media_kind: MediaKind,
    pub label: String,
    pub position: u32,
    pub roles: Vec<String>,
    pub stored_filename: String,
}

impl MediaUpload {
    /// The main gallery image also carries the small image and thumbnail roles.
    pub fn roles_for_position(position: u32) -> Vec<String> {
        if position == 0 {
            PRIMARY_ROLES.iter().map(|role| role.to_string()).collect()
        } else {
            vec!["image".to_string()]
        }
    }

    /// Same as [`MediaUpload::to_entry`], run on the blocking pool.
    pub async fn encode_entry(&self) -> Result<MediaEntryRequest, MagentoMediaError> {
        let upload = self.clone();
        tokio::task::spawn_blocking(move || upload.to_entry())
            .await
            .map_err(|err| MagentoMediaError::Encode(err.to_string()))
    }

    /// Fully encodes the payload before anything is sent.
    pub fn to_entry(&self) -> MediaEntryRequest {
        MediaEntryRequest {
            entry: MediaEntry {
                media_type: "image",
                label: self.label.clone(),
                position: self.position,
                disabled: false,
                types: self.roles.clone(),
                content: MediaContent {
                    base64_encoded_data: BASE64.encode(&self.bytes),
                    mime: self.media_kind.mime(),
                    name: self.stored_filename.clone(),
                },
            },
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub ok: bool,
    pub media_id: Option<String>,
    pub url: Option<String>,
    pub message: String,
}

impl UploadOutcome {
    pub fn success(media_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            ok: true,
            media_id,
            url: None,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            media_id: None,
            url: None,
            message: message.into(),
        }
    }
}

/// Sends one media entry upstream. Implementations report failures in the
/// outcome instead of returning errors.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, upload: &MediaUpload) -> UploadOutcome;
}

#[derive(Debug, Clone)]
pub struct MagentoUploader {
    http: Client,
    endpoint: MagentoEndpoint,
}

impl MagentoUploader {
    pub fn new(endpoint: MagentoEndpoint) -> Self {
        Self {
            http: build_client(),
            endpoint,
        }
    }

    pub fn from_env() -> Self {
        Self::new(MagentoEndpoint::from_env())
    }

    /// Returns the id Magento assigned to the new entry, when it sent one.
    pub async fn create_media_entry(
        &self,
        upload: &MediaUpload,
    ) -> Result<Option<String>, MagentoMediaError> {
        let payload = upload.encode_entry().await?;
        let url = self.endpoint.media_url(&upload.sku);
        let mut request = self.http.post(url).json(&payload);
        if let Some(token) = &self.endpoint.access_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|err| MagentoMediaError::Request(err.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(MagentoMediaError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(parse_media_id(&body))
    }
}

#[async_trait]
impl MediaUploader for MagentoUploader {
    async fn upload(&self, upload: &MediaUpload) -> UploadOutcome {
        match self.create_media_entry(upload).await {
            Ok(media_id) => {
                debug!(
                    target = "calligraph.magento",
                    sku = %upload.sku,
                    file = %upload.stored_filename,
                    media_id = media_id.as_deref().unwrap_or("-"),
                    "media_entry_created"
                );
                UploadOutcome::success(media_id, format!("uploaded {}", upload.stored_filename))
            }
            Err(err) => UploadOutcome::failure(err.to_string()),
        }
    }
}

fn parse_media_id(body: &str) -> Option<String> {
    match serde_json::from_str::<Value>(body).ok()? {
        Value::String(id) if !id.is_empty() => Some(id),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Magento error bodies look like `{"message": "...", "parameters": [...]}`
/// with `%1`-style placeholders.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().chars().take(200).collect();
    };
    let Some(message) = value.get("message").and_then(Value::as_str) else {
        return body.trim().chars().take(200).collect();
    };
    let mut rendered = message.to_string();
    match value.get("parameters") {
        Some(Value::Array(params)) => {
            for (idx, param) in params.iter().enumerate() {
                let text = param
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| param.to_string());
                rendered = rendered.replace(&format!("%{}", idx + 1), &text);
            }
        }
        Some(Value::Object(params)) => {
            for (key, param) in params {
                let text = param
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| param.to_string());
                rendered = rendered.replace(&format!("%{key}"), &text);
            }
        }
        _ => {}
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_upload(position: u32) -> MediaUpload {
        MediaUpload {
            sku: "SKU 1".into(),
            bytes: Bytes::from_static(b"abc"),
            media_kind: MediaKind::Jpeg,
            label: "7203C".into(),
            position,
            roles: MediaUpload::roles_for_position(position),
            stored_filename: "7203C.jpg".into(),
        }
    }

    #[test]
    fn entry_matches_wire_format() {
        let payload = serde_json::to_value(sample_upload(0).to_entry()).unwrap();
        assert_eq!(
            payload,
            json!({
                "entry": {
                    "media_type": "image",
                    "label": "7203C",
                    "position": 0,
                    "disabled": false,
                    "types": ["image", "small_image", "thumbnail"],
                    "content": {
                        "base64_encoded_data": "YWJj",
                        "type": "image/jpeg",
                        "name": "7203C.jpg"
                    }
                }
            })
        );
    }

    #[tokio::test]
    async fn encoded_entry_carries_the_whole_image() {
        let mut upload = sample_upload(1);
        upload.bytes = Bytes::from(vec![0xABu8; 1024 * 1024]);
        let entry = upload.encode_entry().await.unwrap().entry;
        assert_eq!(entry.position, 1);
        let decoded = BASE64
            .decode(entry.content.base64_encoded_data)
            .unwrap();
        assert_eq!(decoded.len(), 1024 * 1024);
        assert!(decoded.iter().all(|b| *b == 0xAB));
    }

    #[test]
    fn secondary_positions_only_carry_image_role() {
        assert_eq!(MediaUpload::roles_for_position(2), vec!["image".to_string()]);
    }

    #[test]
    fn error_message_fills_placeholders() {
        let body = r#"{"message":"The \"%1\" SKU doesn't exist.","parameters":["X9"]}"#;
        assert_eq!(error_message(body), "The \"X9\" SKU doesn't exist.");
        let named = r#"{"message":"Invalid %fieldName","parameters":{"fieldName":"content"}}"#;
        assert_eq!(error_message(named), "Invalid content");
        assert_eq!(error_message("gateway down"), "gateway down");
    }

    #[tokio::test]
    async fn upload_posts_entry_and_reads_media_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/V1/products/SKU%201/media"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "entry": {"position": 0, "content": {"name": "7203C.jpg"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("318")))
            .expect(1)
            .mount(&server)
            .await;

        let uploader =
            MagentoUploader::new(MagentoEndpoint::new(server.uri()).with_token("secret"));
        let outcome = uploader.upload(&sample_upload(0)).await;
        assert!(outcome.ok, "unexpected failure: {}", outcome.message);
        assert_eq!(outcome.media_id.as_deref(), Some("318"));
    }

    #[tokio::test]
    async fn non_success_status_is_normalised_to_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "message": "The product that was requested doesn't exist.",
            })))
            .mount(&server)
            .await;

        let uploader = MagentoUploader::new(MagentoEndpoint::new(server.uri()));
        let outcome = uploader.upload(&sample_upload(1)).await;
        assert!(!outcome.ok);
        assert!(outcome.media_id.is_none());
        assert_eq!(
            outcome.message,
            "HTTP 404: The product that was requested doesn't exist."
        );
    }

    #[tokio::test]
    async fn network_error_is_a_failure() {
        let uploader = MagentoUploader::new(MagentoEndpoint::new("http://127.0.0.1:9"));
        let outcome = uploader.upload(&sample_upload(0)).await;
        assert!(!outcome.ok);
        assert!(outcome.message.starts_with("request failed"));
    }
}
