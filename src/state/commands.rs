//! Commands for the state dispatcher
//!
//! Every external event is one of these: a push from the transport, raw bytes
//! from the MIDI input, a UI action, or the completion of a backend request
//! that was started by an earlier command.

use bytes::Bytes;
use tokio::sync::oneshot;

use super::types::{MappingEdit, PushMessage, StoreSnapshot};
use crate::backend::{PersistResponse, PortList, PresetList, StageRequest, StageResponse};
use crate::bridge::{BridgeSettings, MidiAvailability};
use crate::presets::{LoadOutcome, PresetListing};

/// Runtime-adjustable dispatcher settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSettings {
    pub bridge: BridgeSettings,
    /// Echo a bank-select message to the hardware on bank-change pushes
    pub send_bank_on_change: bool,
}

/// Local and backend-visible ports plus the open pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortReport {
    pub local: PortList,
    pub backend: Option<PortList>,
    pub selected: MidiAvailability,
}

#[derive(Debug)]
pub enum StateCommand {
    // -------------------------------------------------------------------------
    // Transport and device events
    // -------------------------------------------------------------------------
    /// Authoritative state pushed by the backend
    ApplyPush(PushMessage),
    /// Push channel (re)connected; fetch a fresh snapshot
    Connected,
    /// Raw bytes from the MIDI input
    MidiIn(Vec<u8>),
    /// Check for added or removed MIDI ports
    PollDevices,
    Reconfigure(StateSettings),

    // -------------------------------------------------------------------------
    // UI actions
    // -------------------------------------------------------------------------
    SetLearn(bool),
    ArmLearn {
        bank: i64,
        encoder: i64,
    },
    SelectBank {
        bank: i64,
        response: oneshot::Sender<bool>,
    },
    StageMapping {
        edit: MappingEdit,
        response: oneshot::Sender<bool>,
    },
    PersistMapping {
        edit: MappingEdit,
        response: oneshot::Sender<bool>,
    },
    ListPresets {
        response: oneshot::Sender<Option<PresetListing>>,
    },
    LoadPreset {
        name: String,
        /// Caller accepted discarding unsaved edits
        confirmed: bool,
        response: oneshot::Sender<LoadOutcome>,
    },
    SavePreset {
        name: Option<String>,
        response: oneshot::Sender<bool>,
    },
    DownloadPreset {
        name: String,
        response: oneshot::Sender<Option<Bytes>>,
    },
    ListPorts {
        response: oneshot::Sender<PortReport>,
    },
    GetSnapshot {
        response: oneshot::Sender<StoreSnapshot>,
    },

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------
    /// A backend request finished successfully
    Completed(Completion),
    Shutdown,
}

/// Successful request results that mutate the store
#[derive(Debug)]
pub enum Completion {
    Snapshot(PushMessage),
    Staged {
        request: StageRequest,
        response: StageResponse,
        reply: Option<oneshot::Sender<bool>>,
    },
    Persisted {
        response: PersistResponse,
        reply: oneshot::Sender<bool>,
    },
    PresetsListed {
        list: PresetList,
        reply: oneshot::Sender<Option<PresetListing>>,
    },
    PresetLoaded {
        name: String,
        reply: oneshot::Sender<LoadOutcome>,
    },
    PresetSaved {
        reported: Option<String>,
        requested: Option<String>,
        reply: oneshot::Sender<bool>,
    },
}
