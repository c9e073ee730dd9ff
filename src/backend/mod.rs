//! Backend request/response contracts
//!
//! The backend owns durable state and preset files. The client talks to it
//! through the [`Backend`] trait; [`HttpBackend`] is the production
//! implementation, tests substitute their own.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::midi::ControlChange;
use crate::state::PushMessage;

pub mod http;

pub use http::HttpBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend request failed: status={status} body={body}")]
    BadStatus { status: StatusCode, body: String },
    #[error("backend rejected request: {0}")]
    Rejected(String),
    #[error("invalid backend url '{0}'")]
    InvalidUrl(String),
}

/// Port names the backend process can see
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortList {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Live value forwarded from the hardware; `channel` is the 0-based wire channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LiveValue {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub control: u8,
    pub value: u8,
    pub channel: u8,
}

impl From<ControlChange> for LiveValue {
    fn from(cc: ControlChange) -> Self {
        Self {
            kind: "control_change",
            control: cc.control,
            value: cc.value,
            channel: cc.channel,
        }
    }
}

/// Temp-mapping write; `channel` is 1-based
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRequest {
    pub bank: u8,
    pub encoder: u8,
    pub cc: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StageResponse {
    #[serde(default)]
    pub mapping: Option<Value>,
    #[serde(default)]
    pub channels: Option<Value>,
    /// Absent on success; `false` when the backend refused the edit
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Direct write into the active preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistRequest {
    pub bank: u8,
    pub encoder: u8,
    pub cc: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PersistResponse {
    #[serde(default)]
    pub mapping: Option<Value>,
    #[serde(default)]
    pub ok: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Mapping responses that may carry an explicit `ok: false`
pub(crate) trait Acknowledged {
    /// Error text when the backend refused the request
    fn refusal(&self) -> Option<String>;
}

fn refusal(ok: Option<bool>, error: &Option<String>) -> Option<String> {
    match ok {
        Some(false) => Some(
            error
                .clone()
                .unwrap_or_else(|| "request not accepted".to_string()),
        ),
        _ => None,
    }
}

impl Acknowledged for StageResponse {
    fn refusal(&self) -> Option<String> {
        refusal(self.ok, &self.error)
    }
}

impl Acknowledged for PersistResponse {
    fn refusal(&self) -> Option<String> {
        refusal(self.ok, &self.error)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PresetList {
    #[serde(default)]
    pub presets: Vec<String>,
    #[serde(default)]
    pub current: Option<String>,
}

/// Result body of preset load/save
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PresetResult {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Everything the client asks of the backend
///
/// Implementations report `ok: false` responses as [`BackendError::Rejected`],
/// so callers only ever see successful results in `Ok`.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<PushMessage, BackendError>;

    async fn list_ports(&self) -> Result<PortList, BackendError>;

    async fn change_bank(&self, bank: u8) -> Result<(), BackendError>;

    async fn apply_live_value(&self, value: LiveValue) -> Result<(), BackendError>;

    async fn stage_mapping(&self, request: &StageRequest) -> Result<StageResponse, BackendError>;

    async fn persist_mapping(
        &self,
        request: &PersistRequest,
    ) -> Result<PersistResponse, BackendError>;

    async fn list_presets(&self) -> Result<PresetList, BackendError>;

    async fn load_preset(&self, name: &str) -> Result<PresetResult, BackendError>;

    /// `None` saves over the active preset
    async fn save_preset(&self, name: Option<&str>) -> Result<PresetResult, BackendError>;

    async fn download_preset(&self, name: &str) -> Result<Bytes, BackendError>;
}
