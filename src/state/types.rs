//! Device state and push message types
//!
//! These mirror the JSON the backend sends over the push channel and returns
//! from the snapshot endpoint. All of it is backend-owned; the client only
//! keeps the last copy it received.

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::bridge::MidiAvailability;
use crate::learn::LearnState;
use crate::mapping::{Overlay, ENCODERS};
use crate::midi::Channel;

/// Push `type` announcing a bank change
pub const PUSH_KIND_BANK: &str = "bank";

/// One encoder cell as reported by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderState {
    #[serde(default)]
    pub label: String,
    /// Displayed value (0-127)
    #[serde(default, deserialize_with = "clamped_value")]
    pub value: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankState {
    #[serde(default)]
    pub encoders: BTreeMap<u8, EncoderState>,
}

/// Authoritative device state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default = "default_bank")]
    pub current_bank: u8,
    #[serde(default)]
    pub banks: BTreeMap<u8, BankState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Value>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            current_bank: default_bank(),
            banks: BTreeMap::new(),
            last_message: None,
        }
    }
}

impl AppState {
    pub fn encoder(&self, bank: u8, encoder: u8) -> Option<&EncoderState> {
        self.banks.get(&bank)?.encoders.get(&encoder)
    }
}

fn default_bank() -> u8 {
    1
}

fn clamped_value<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(raw.clamp(0, 127) as u8)
}

/// Message received over the push channel, also the snapshot response body
///
/// `mapping` and `channels` stay as raw JSON because the backend uses more
/// than one shape for them; the store normalizes on apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub state: AppState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirty: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
}

impl PushMessage {
    pub fn is_bank_change(&self) -> bool {
        self.kind.as_deref() == Some(PUSH_KIND_BANK)
    }
}

/// A mapping edit as proposed by the UI or by a learn capture
///
/// Fields are wide integers so that out-of-range input reaches validation
/// instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEdit {
    pub bank: i64,
    pub encoder: i64,
    pub cc: i64,
    pub channel: Option<i64>,
    pub label: Option<String>,
}

impl MappingEdit {
    pub fn new(bank: i64, encoder: i64, cc: i64) -> Self {
        Self {
            bank,
            encoder,
            cc,
            channel: None,
            label: None,
        }
    }

    pub fn with_channel(mut self, channel: i64) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Render-ready view of one encoder cell in the current bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncoderView {
    pub encoder: u8,
    pub label: String,
    pub value: u8,
    /// `value` as a rounded percentage of 127
    pub percent: u8,
    pub cc: u8,
    pub channel: Channel,
}

/// Immutable copy of everything the UI reads
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub state: Option<AppState>,
    pub overlay: Overlay,
    pub dirty: bool,
    pub current_preset: Option<String>,
    pub learn: LearnState,
    pub midi: MidiAvailability,
    pub last_push_at: Option<DateTime<Local>>,
}

impl StoreSnapshot {
    pub fn current_bank(&self) -> u8 {
        self.state.as_ref().map(|s| s.current_bank).unwrap_or(1)
    }

    /// The 16 cells of the current bank, with label and mapping defaults applied
    pub fn encoder_views(&self) -> Vec<EncoderView> {
        let bank = self.current_bank();
        ENCODERS
            .map(|encoder| {
                let cell = self
                    .state
                    .as_ref()
                    .and_then(|s| s.encoder(bank, encoder))
                    .cloned()
                    .unwrap_or_default();
                let label = if cell.label.is_empty() {
                    format!("Enc {}", encoder)
                } else {
                    cell.label
                };
                let mapping = self.overlay.resolve(bank, encoder);
                EncoderView {
                    encoder,
                    label,
                    value: cell.value,
                    percent: ((cell.value as f32 / 127.0) * 100.0).round() as u8,
                    cc: mapping.cc,
                    channel: mapping.channel,
                }
            })
            .collect()
    }
}
