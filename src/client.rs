//! HTTP client for the `image-to-3d` task endpoints.
//!
//! Keep deps small: `gloo-net` on the web, `reqwest` natively, `serde_json`
//! for the bodies. Response parsing is kept free of I/O so it can be tested
//! against literal bodies.

use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(target_arch = "wasm32")]
use gloo_net::http::Request;

use crate::config::{ApiKey, GenerationOptions, ServiceConfig};
use crate::error::{PollError, SubmissionError, TransportError};

/// Opaque identifier issued by the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Canceled,
    Expired,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Canceled | TaskStatus::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Canceled => "CANCELED",
            TaskStatus::Expired => "EXPIRED",
            TaskStatus::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModelUrls {
    #[serde(default)]
    pub glb: Option<String>,
    #[serde(default)]
    pub fbx: Option<String>,
    #[serde(default)]
    pub obj: Option<String>,
    #[serde(default)]
    pub usdz: Option<String>,
}

/// One status read of a remote task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub status: TaskStatus,
    pub progress: Option<u8>,
    pub model_urls: ModelUrls,
    pub error_message: Option<String>,
}

impl TaskSnapshot {
    pub fn glb_url(&self) -> Option<&str> {
        self.model_urls.glb.as_deref().filter(|u| !u.is_empty())
    }
}

#[derive(Serialize)]
struct CreateTaskBody<'a> {
    image_url: &'a str,
    enable_pbr: bool,
    should_remesh: bool,
    should_texture: bool,
}

#[derive(Deserialize)]
struct CreatedBody {
    result: String,
}

#[derive(Deserialize)]
struct TaskErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct StatusBody {
    status: TaskStatus,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    model_urls: Option<ModelUrls>,
    #[serde(default)]
    task_error: Option<TaskErrorBody>,
}

pub fn create_body(data_uri: &str, options: GenerationOptions) -> String {
    let body = CreateTaskBody {
        image_url: data_uri,
        enable_pbr: options.enable_pbr,
        should_remesh: options.should_remesh,
        should_texture: options.should_texture,
    };
    // A struct of a &str and three bools always serializes.
    serde_json::to_string(&body).unwrap_or_default()
}

pub fn parse_created(body: &str) -> Result<TaskId, TransportError> {
    let created: CreatedBody =
        serde_json::from_str(body).map_err(|e| TransportError::Decode(e.to_string()))?;
    if created.result.is_empty() {
        return Err(TransportError::Decode("empty task id".into()));
    }
    Ok(TaskId(created.result))
}

pub fn parse_snapshot(body: &str) -> Result<TaskSnapshot, TransportError> {
    let raw: StatusBody =
        serde_json::from_str(body).map_err(|e| TransportError::Decode(e.to_string()))?;
    Ok(TaskSnapshot {
        status: raw.status,
        progress: raw.progress.map(|p| p.min(100)),
        model_urls: raw.model_urls.unwrap_or_default(),
        error_message: raw.task_error.map(|e| e.message).filter(|m| !m.is_empty()),
    })
}

/// Client scoped to one credential. Cheap to clone into spawned futures.
#[derive(Debug, Clone)]
pub struct TaskClient {
    base: ServiceConfig,
    api_key: ApiKey,
    #[cfg(not(target_arch = "wasm32"))]
    http: reqwest::Client,
}

impl TaskClient {
    /// `None` when no credential is configured.
    pub fn new(config: &ServiceConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            base: config.clone(),
            api_key,
            #[cfg(not(target_arch = "wasm32"))]
            http: reqwest::Client::new(),
        })
    }

    pub async fn create_task(
        &self,
        data_uri: &str,
        options: GenerationOptions,
    ) -> Result<TaskId, SubmissionError> {
        let url = self.base.endpoint("image-to-3d");
        let body = create_body(data_uri, options);
        let text = self.send(Method::Post(body), &url).await.map_err(SubmissionError)?;
        let id = parse_created(&text).map_err(SubmissionError)?;
        log::info!("created image-to-3d task {id}");
        Ok(id)
    }

    pub async fn get_task_status(&self, id: &TaskId) -> Result<TaskSnapshot, PollError> {
        let url = self.base.endpoint(&format!("image-to-3d/{id}"));
        let text = self.send(Method::Get, &url).await.map_err(PollError)?;
        let snapshot = parse_snapshot(&text).map_err(PollError)?;
        log::debug!(
            "task {id}: {} ({}%)",
            snapshot.status.as_str(),
            snapshot.progress.unwrap_or(0)
        );
        Ok(snapshot)
    }

    /// Download a result asset. Result URLs are pre-signed, so no credential
    /// is attached.
    pub async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        #[cfg(not(target_arch = "wasm32"))]
        let bytes = fetch_bytes(&self.http, url).await?;
        #[cfg(target_arch = "wasm32")]
        let bytes = fetch_bytes(url).await?;
        log::info!("downloaded model asset ({} bytes)", bytes.len());
        Ok(bytes)
    }
}

enum Method {
    Get,
    Post(String),
}

#[cfg(not(target_arch = "wasm32"))]
impl TaskClient {
    async fn send(&self, method: Method, url: &str) -> Result<String, TransportError> {
        let req = match method {
            Method::Get => self.http.get(url),
            Method::Post(body) => self
                .http
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body),
        };
        let resp = req
            .bearer_auth(self.api_key.expose())
            .send().await.map_err(|e| TransportError::Network(e.to_string()))?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| TransportError::Network(e.to_string()))?;
        check_status(status, text)
    }
}

#[cfg(target_arch = "wasm32")]
impl TaskClient {
    async fn send(&self, method: Method, url: &str) -> Result<String, TransportError> {
        let bearer = format!("Bearer {}", self.api_key.expose());
        let req = match method {
            Method::Get => Request::get(url).header("Authorization", &bearer).build(),
            Method::Post(body) => Request::post(url)
                .header("Authorization", &bearer)
                .header("Content-Type", "application/json")
                .body(body),
        }
        .map_err(|e| TransportError::Network(e.to_string()))?;
        let resp = req.send().await.map_err(|e| TransportError::Network(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| TransportError::Network(e.to_string()))?;
        check_status(status, text)
    }
}

fn check_status(status: u16, body: String) -> Result<String, TransportError> {
    if (200..300).contains(&status) {
        Ok(body)
    } else {
        log::warn!("service answered HTTP {status}");
        Err(TransportError::Http { status, body })
    }
}

#[cfg(not(target_arch = "wasm32"))]
async fn fetch_bytes(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, TransportError> {
    let resp = http.get(url).send().await.map_err(|e| TransportError::Network(e.to_string()))?;
    let status = resp.status().as_u16();
    if !(200..300).contains(&status) {
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::Http { status, body });
    }
    let bytes = resp.bytes().await.map_err(|e| TransportError::Network(e.to_string()))?;
    Ok(bytes.to_vec())
}

#[cfg(target_arch = "wasm32")]
async fn fetch_bytes(url: &str) -> Result<Vec<u8>, TransportError> {
    let resp = Request::get(url).send().await.map_err(|e| TransportError::Network(e.to_string()))?;
    let status = resp.status();
    if !(200..300).contains(&status) {
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::Http { status, body });
    }
    resp.binary().await.map_err(|e| TransportError::Network(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_body_carries_flags() {
        let options = GenerationOptions { enable_pbr: false, should_remesh: true, should_texture: false };
        let body: serde_json::Value =
            serde_json::from_str(&create_body("data:image/png;base64,AA==", options)).unwrap();
        assert_eq!(body["image_url"], "data:image/png;base64,AA==");
        assert_eq!(body["enable_pbr"], false);
        assert_eq!(body["should_remesh"], true);
        assert_eq!(body["should_texture"], false);
    }

    #[test]
    fn parses_created_task() {
        assert_eq!(
            parse_created(r#"{"result":"0193bfc5-ee4f-73f8"}"#).unwrap(),
            TaskId("0193bfc5-ee4f-73f8".into())
        );
        assert!(matches!(parse_created(r#"{"result":""}"#), Err(TransportError::Decode(_))));
        assert!(matches!(parse_created("<html>"), Err(TransportError::Decode(_))));
    }

    #[test]
    fn parses_pending_snapshot() {
        let snap = parse_snapshot(r#"{"id":"t","status":"IN_PROGRESS","progress":42,"model_urls":{}}"#).unwrap();
        assert_eq!(snap.status, TaskStatus::InProgress);
        assert_eq!(snap.progress, Some(42));
        assert_eq!(snap.glb_url(), None);
        assert!(!snap.status.is_terminal());
    }

    #[test]
    fn parses_succeeded_snapshot() {
        let body = r#"{
            "status": "SUCCEEDED",
            "progress": 100,
            "model_urls": {"glb": "https://assets.test/m.glb", "fbx": "https://assets.test/m.fbx"},
            "task_error": {"message": ""}
        }"#;
        let snap = parse_snapshot(body).unwrap();
        assert!(snap.status.is_terminal());
        assert_eq!(snap.glb_url(), Some("https://assets.test/m.glb"));
        assert_eq!(snap.error_message, None);
    }

    #[test]
    fn failed_snapshot_keeps_message() {
        let snap = parse_snapshot(r#"{"status":"FAILED","task_error":{"message":"bad input"}}"#).unwrap();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert_eq!(snap.error_message.as_deref(), Some("bad input"));
    }

    #[test]
    fn unknown_status_is_not_terminal() {
        let snap = parse_snapshot(r#"{"status":"QUEUED_FOR_GPU"}"#).unwrap();
        assert_eq!(snap.status, TaskStatus::Unknown);
        assert!(!snap.status.is_terminal());
    }

    #[test]
    fn non_success_status_is_http_error() {
        assert_eq!(
            check_status(401, "unauthorized".into()),
            Err(TransportError::Http { status: 401, body: "unauthorized".into() })
        );
        assert_eq!(check_status(202, "ok".into()), Ok("ok".into()));
    }

    #[test]
    fn client_requires_key() {
        assert!(TaskClient::new(&ServiceConfig::default()).is_none());
    }
}
