//! Outbound HTTP to the camera servers.
//!
//! [`Transport`] is the raw network seam. [`HttpActionClient`] and
//! [`ViscaClient`] layer the success rules of each backend on top of it.

use crate::error::{CameraError, CameraResult};
use crate::types::{Direction, PtzPosition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Response as seen on the wire. `status == 0` means the transport produced
/// no HTTP status at all (e.g. a local file fetch).
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200 || self.status == 0
    }
}

/// The request never produced an HTTP status.
#[derive(Debug, Clone, Error)]
#[error("network error: {0}")]
pub struct NetworkError(pub String);

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<RawResponse, NetworkError>;

    async fn post_json(&self, url: &str, body: &JsonValue) -> Result<RawResponse, NetworkError>;
}

/// reqwest-backed transport used in production.
#[derive(Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    async fn into_raw(response: reqwest::Response) -> Result<RawResponse, NetworkError> {
        let status = response.status();
        let status_text = status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.as_str().to_string());
        let body = response
            .text()
            .await
            .map_err(|e| NetworkError(e.to_string()))?;

        Ok(RawResponse {
            status: status.as_u16(),
            status_text,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<RawResponse, NetworkError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| NetworkError(e.to_string()))?;
        Self::into_raw(response).await
    }

    async fn post_json(&self, url: &str, body: &JsonValue) -> Result<RawResponse, NetworkError> {
        let response = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| NetworkError(e.to_string()))?;
        Self::into_raw(response).await
    }
}

/// What a GET that fails without any HTTP status means for the PTZApp
/// server. Browsers hide cross-origin failures this way, so the request may
/// well have been delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpaqueFailurePolicy {
    #[default]
    AssumeDelivered,
    Fail,
}

/// GET client for the PTZApp HTTP action server.
#[derive(Clone)]
pub struct HttpActionClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    opaque_failure: OpaqueFailurePolicy,
}

impl HttpActionClient {
    pub fn new(
        address: &str,
        transport: Arc<dyn Transport>,
        opaque_failure: OpaqueFailurePolicy,
    ) -> Self {
        Self {
            base_url: format!("http://{}", address.trim_end_matches('/')),
            transport,
            opaque_failure,
        }
    }

    /// GET `path` (relative, with query) and classify the outcome.
    pub async fn get(&self, path: &str) -> CameraResult<()> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "sending PTZApp request");

        match self.transport.get(&url).await {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(CameraError::transport(format!(
                "Error from server: {}",
                response.status_text
            ))),
            Err(e) => match self.opaque_failure {
                OpaqueFailurePolicy::AssumeDelivered => {
                    warn!(url = %url, error = %e, "no HTTP status, assuming request was delivered");
                    Ok(())
                }
                OpaqueFailurePolicy::Fail => Err(CameraError::transport("Network error")),
            },
        }
    }
}

/// Commands understood by the VISCA bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViscaCommand {
    #[serde(rename = "go-preset")]
    GoPreset,
    #[serde(rename = "set-preset")]
    SetPreset,
    #[serde(rename = "moveto")]
    MoveTo,
    #[serde(rename = "slew")]
    Slew,
    #[serde(rename = "zoom")]
    Zoom,
    #[serde(rename = "report")]
    Report,
    #[serde(rename = "version-info")]
    VersionInfo,
    #[serde(rename = "send_raw")]
    SendRaw,
}

impl ViscaCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoPreset => "go-preset",
            Self::SetPreset => "set-preset",
            Self::MoveTo => "moveto",
            Self::Slew => "slew",
            Self::Zoom => "zoom",
            Self::Report => "report",
            Self::VersionInfo => "version-info",
            Self::SendRaw => "send_raw",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RequestValue {
    Preset(u32),
    Direction(Direction),
}

/// Body of one VISCA bridge request, minus the `camera` and `sendCount`
/// fields the client adds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViscaRequest {
    pub command: ViscaCommand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<RequestValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    #[serde(rename = "pan-value", skip_serializing_if = "Option::is_none")]
    pub pan_value: Option<Direction>,
    #[serde(rename = "pan-speed", skip_serializing_if = "Option::is_none")]
    pub pan_speed: Option<u8>,
    #[serde(rename = "tilt-value", skip_serializing_if = "Option::is_none")]
    pub tilt_value: Option<Direction>,
    #[serde(rename = "tilt-speed", skip_serializing_if = "Option::is_none")]
    pub tilt_speed: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pan: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tilt: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom: Option<i32>,
    #[serde(rename = "bytes-to-send", skip_serializing_if = "Option::is_none")]
    pub bytes_to_send: Option<String>,
    #[serde(rename = "reply-length", skip_serializing_if = "Option::is_none")]
    pub reply_length: Option<usize>,
}

impl ViscaRequest {
    pub fn new(command: ViscaCommand) -> Self {
        Self {
            command,
            value: None,
            speed: None,
            pan_value: None,
            pan_speed: None,
            tilt_value: None,
            tilt_speed: None,
            pan: None,
            tilt: None,
            zoom: None,
            bytes_to_send: None,
            reply_length: None,
        }
    }

    pub fn go_preset(preset: u32) -> Self {
        Self {
            value: Some(RequestValue::Preset(preset)),
            ..Self::new(ViscaCommand::GoPreset)
        }
    }

    pub fn set_preset(preset: u32) -> Self {
        Self {
            value: Some(RequestValue::Preset(preset)),
            ..Self::new(ViscaCommand::SetPreset)
        }
    }

    pub fn move_to(position: PtzPosition, speed: Option<u8>) -> Self {
        Self {
            pan: Some(position.pan),
            tilt: Some(position.tilt),
            zoom: Some(position.zoom),
            speed,
            ..Self::new(ViscaCommand::MoveTo)
        }
    }

    pub fn slew(pan: Direction, pan_speed: u8, tilt: Direction, tilt_speed: u8) -> Self {
        Self {
            pan_value: Some(pan),
            pan_speed: Some(pan_speed),
            tilt_value: Some(tilt),
            tilt_speed: Some(tilt_speed),
            ..Self::new(ViscaCommand::Slew)
        }
    }

    pub fn zoom(direction: Direction, speed: u8) -> Self {
        Self {
            value: Some(RequestValue::Direction(direction)),
            speed: Some(speed),
            ..Self::new(ViscaCommand::Zoom)
        }
    }

    pub fn send_raw(bytes: impl Into<String>, reply_length: usize) -> Self {
        Self {
            bytes_to_send: Some(bytes.into()),
            reply_length: Some(reply_length),
            ..Self::new(ViscaCommand::SendRaw)
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(flatten)]
    request: &'a ViscaRequest,
    camera: u8,
    #[serde(rename = "sendCount")]
    send_count: u64,
}

/// Successful VISCA bridge reply, annotated with the `sendCount` of the
/// request that produced it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViscaResponse {
    pub status: Option<String>,
    pub pan: Option<i32>,
    pub tilt: Option<i32>,
    pub zoom: Option<i32>,
    pub vendor: Option<u32>,
    pub model: Option<u32>,
    pub version: Option<u32>,
    pub max_socket: Option<u32>,
    #[serde(rename = "response-bytes")]
    pub response_bytes: Option<String>,
    pub errors: Option<JsonValue>,
    #[serde(skip)]
    pub send_count: u64,
}

/// POST client for the HTTP-to-VISCA bridge, one per camera.
pub struct ViscaClient {
    url: String,
    camera_address: u8,
    send_count: AtomicU64,
    transport: Arc<dyn Transport>,
}

impl ViscaClient {
    pub fn new(address: &str, camera_address: u8, transport: Arc<dyn Transport>) -> Self {
        Self {
            url: format!("http://{}/server", address.trim_end_matches('/')),
            camera_address,
            send_count: AtomicU64::new(0),
            transport,
        }
    }

    pub async fn send(&self, request: &ViscaRequest) -> CameraResult<ViscaResponse> {
        let send_count = self.send_count.fetch_add(1, Ordering::Relaxed) + 1;
        let body = serde_json::to_value(Envelope {
            request,
            camera: self.camera_address,
            send_count,
        })
        .map_err(|_| CameraError::InvalidResponse)?;

        debug!(url = %self.url, command = request.command.as_str(), send_count, "sending VISCA request");

        let raw = self
            .transport
            .post_json(&self.url, &body)
            .await
            .map_err(|_| CameraError::transport("Network error"))?;

        if !raw.is_success() {
            return Err(CameraError::transport(format!(
                "Error from server: {}",
                raw.status_text
            )));
        }

        let mut response: ViscaResponse =
            serde_json::from_str(&raw.body).map_err(|_| CameraError::InvalidResponse)?;

        match response.status.as_deref() {
            None => Err(CameraError::InvalidResponse),
            Some("ok") => {
                response.send_count = send_count;
                Ok(response)
            }
            Some(status) => Err(CameraError::Backend {
                errors: response
                    .errors
                    .take()
                    .unwrap_or_else(|| JsonValue::String(status.to_string())),
            }),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Get(String),
        Post(String, JsonValue),
    }

    /// Transport stub that records calls and replays canned outcomes.
    /// When the queue is empty it answers 200 with `{"status":"ok"}`.
    #[derive(Default)]
    pub struct StubTransport {
        pub calls: Mutex<Vec<Call>>,
        pub replies: Mutex<VecDeque<Result<RawResponse, NetworkError>>>,
    }

    impl StubTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub async fn push_json(&self, body: JsonValue) {
            self.replies.lock().await.push_back(Ok(RawResponse {
                status: 200,
                status_text: "OK".into(),
                body: body.to_string(),
            }));
        }

        pub async fn push_status(&self, status: u16, status_text: &str) {
            self.replies.lock().await.push_back(Ok(RawResponse {
                status,
                status_text: status_text.into(),
                body: String::new(),
            }));
        }

        pub async fn push_network_error(&self) {
            self.replies
                .lock()
                .await
                .push_back(Err(NetworkError("connection refused".into())));
        }

        async fn next(&self) -> Result<RawResponse, NetworkError> {
            self.replies.lock().await.pop_front().unwrap_or_else(|| {
                Ok(RawResponse {
                    status: 200,
                    status_text: "OK".into(),
                    body: r#"{"status":"ok"}"#.into(),
                })
            })
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn get(&self, url: &str) -> Result<RawResponse, NetworkError> {
            self.calls.lock().await.push(Call::Get(url.to_string()));
            self.next().await
        }

        async fn post_json(&self, url: &str, body: &JsonValue) -> Result<RawResponse, NetworkError> {
            self.calls
                .lock()
                .await
                .push(Call::Post(url.to_string(), body.clone()));
            self.next().await
        }
    }
}
