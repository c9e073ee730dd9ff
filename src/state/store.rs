//! State Store
//!
//! Pure, synchronous state owned by the dispatcher: the last authoritative
//! state, the mapping overlay, the dirty flag and the active preset. Every
//! field has exactly one mutation path through the methods below; the
//! dispatcher decides when to call them and performs the requests.

use chrono::{DateTime, Local};
use tracing::debug;

use super::types::{AppState, MappingEdit, PushMessage};
use crate::backend::{PersistRequest, StageRequest, StageResponse};
use crate::mapping::{normalize_channels, normalize_mapping, Overlay, BANKS, ENCODERS};
use crate::midi::{Channel, DATA_MAX};
use crate::presets::same_preset;

#[derive(Debug, Default)]
pub struct StateStore {
    latest: Option<AppState>,
    overlay: Overlay,
    dirty: bool,
    current_preset: Option<String>,
    last_push_at: Option<DateTime<Local>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<&AppState> {
        self.latest.as_ref()
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn current_preset(&self) -> Option<&str> {
        self.current_preset.as_deref()
    }

    pub fn last_push_at(&self) -> Option<DateTime<Local>> {
        self.last_push_at
    }

    /// Apply a push or snapshot. Returns the new bank when the message is a
    /// bank-change notification.
    pub fn apply_push(&mut self, message: PushMessage) -> Option<u8> {
        let bank_change = message.is_bank_change().then_some(message.state.current_bank);

        if let Some(mapping) = &message.mapping {
            self.overlay.mapping = normalize_mapping(mapping);
        }
        if let Some(channels) = &message.channels {
            self.overlay.channels = normalize_channels(channels);
        }
        if let Some(dirty) = message.dirty {
            self.dirty = dirty;
        }
        if let Some(preset) = message.preset {
            self.current_preset = Some(preset);
        }

        debug!(
            "State replaced: bank {} ({} mapped, dirty={})",
            message.state.current_bank,
            self.overlay.mapping.len(),
            self.dirty
        );
        self.latest = Some(message.state);
        self.last_push_at = Some(Local::now());

        bank_change
    }

    /// Validate an edit and build the staging request. `None` means the edit
    /// is rejected and nothing may be sent.
    pub fn prepare_stage(&self, edit: &MappingEdit) -> Option<StageRequest> {
        let (bank, encoder, cc) = validate(edit.bank, edit.encoder, edit.cc)?;
        Some(StageRequest {
            bank,
            encoder,
            cc,
            channel: edit.channel.map(|c| Channel::clamped(c).get()),
            label: edit.label.clone(),
        })
    }

    /// Record a confirmed staging write
    pub fn apply_staged(&mut self, request: &StageRequest, response: StageResponse) {
        self.overlay
            .mapping
            .set(request.bank, request.encoder, request.cc);
        if let Some(channel) = request.channel.and_then(Channel::new) {
            self.overlay
                .channels
                .set(request.bank, request.encoder, channel.get());
        }
        if let Some(mapping) = &response.mapping {
            self.overlay.mapping.merge(&normalize_mapping(mapping));
        }
        if let Some(channels) = &response.channels {
            self.overlay.channels.merge(&normalize_channels(channels));
        }
        self.dirty = true;
    }

    pub fn prepare_persist(&self, edit: &MappingEdit) -> Option<PersistRequest> {
        let (bank, encoder, cc) = validate(edit.bank, edit.encoder, edit.cc)?;
        Some(PersistRequest {
            bank,
            encoder,
            cc,
            label: edit.label.clone(),
        })
    }

    /// Replace the CC table with what the active preset now holds
    pub fn apply_persisted(&mut self, mapping: Option<&serde_json::Value>) {
        if let Some(mapping) = mapping {
            self.overlay.mapping = normalize_mapping(mapping);
        }
    }

    /// Loading `name` would discard unsaved edits
    pub fn needs_discard_confirmation(&self, name: &str) -> bool {
        self.dirty
            && !self
                .current_preset
                .as_deref()
                .is_some_and(|current| same_preset(current, name))
    }

    pub fn preset_loaded(&mut self, name: String) {
        self.current_preset = Some(name);
        self.dirty = false;
    }

    /// A save succeeded; adopt the reported name, else the requested one
    pub fn preset_saved(&mut self, reported: Option<String>, requested: Option<String>) {
        if let Some(name) = reported.or(requested) {
            self.current_preset = Some(name);
        }
        self.dirty = false;
    }

    pub fn adopt_current_preset(&mut self, current: Option<String>) {
        if current.is_some() {
            self.current_preset = current;
        }
    }
}

/// Bank selection is validated before any request
pub fn validate_bank(bank: i64) -> Option<u8> {
    u8::try_from(bank).ok().filter(|b| BANKS.contains(b))
}

fn validate(bank: i64, encoder: i64, cc: i64) -> Option<(u8, u8, u8)> {
    let cc = u8::try_from(cc).ok().filter(|cc| *cc <= DATA_MAX)?;
    let bank = validate_bank(bank)?;
    let encoder = u8::try_from(encoder).ok().filter(|e| ENCODERS.contains(e))?;
    Some((bank, encoder, cc))
}
