use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Where a message event was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    RequestResponse,
    StreamPush,
    DomText,
}

#[derive(Debug, Clone)]
pub enum PayloadBody {
    Structured(serde_json::Value),
    Text(String),
}

/// Opaque capture from one interception point. Consumed by extraction and
/// discarded.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub kind: TransportKind,
    pub source: String,
    pub body: PayloadBody,
}

/// The canonical record the dispatcher understands. `author` is never empty
/// or "Unknown" and `body` carries no markup once extraction is done.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NormalizedMessage {
    pub id: String,
    pub author: String,
    pub body: String,
    pub thread: String,
    /// Numeric author id when the payload carried one. Used for exact
    /// own-message suppression, never displayed.
    #[serde(default)]
    pub author_ref: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Unsupported,
    Default,
    Granted,
    Denied,
}

impl PermissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionState::Unsupported => "unsupported",
            PermissionState::Default => "default",
            PermissionState::Granted => "granted",
            PermissionState::Denied => "denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioState {
    Available,
    Unavailable,
}

/// One message element as the host currently renders it.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub element_id: String,
    pub author: String,
    pub body: String,
    pub thread: String,
    pub scanned: bool,
}

/// A single inbound frame on a streaming transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            url: url.into(),
            body: Some(body.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct EngineStatus {
    pub active: bool,
    pub total_notifications: u64,
    pub processed_message_count: u64,
    pub permission_state: &'static str,
}

#[derive(Debug, Serialize, Clone)]
pub struct RuntimeDiagnostics {
    pub active: bool,
    pub last_observed_at: Option<u64>,
    pub last_dispatch_at: Option<u64>,
    pub last_dispatch_id: Option<String>,
    pub stale_for_seconds: Option<u64>,
    pub pause_until: Option<u64>,
}

pub(crate) struct RuntimeState {
    pub(crate) active: bool,
    pub(crate) scan_stop_tx: Option<watch::Sender<bool>>,
    pub(crate) scan_epoch: u64,
    pub(crate) processed_message_count: u64,
    pub(crate) last_observed_at: Option<u64>,
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self {
            active: true,
            scan_stop_tx: None,
            scan_epoch: 0,
            processed_message_count: 0,
            last_observed_at: None,
        }
    }
}
