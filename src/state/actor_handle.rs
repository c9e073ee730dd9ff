//! StateActorHandle - Public API for the StateActor
//!
//! Fire-and-forget methods for events and toggles, async methods with
//! oneshot channels for actions whose outcome the caller wants to report.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::commands::{PortReport, StateCommand, StateSettings};
use super::types::{MappingEdit, PushMessage, StoreSnapshot};
use crate::connection::PushSink;
use crate::presets::{LoadOutcome, PresetListing};

/// Handle for interacting with the StateActor
///
/// Cloning is cheap; the actor keeps running while any handle is alive.
#[derive(Clone)]
pub struct StateActorHandle {
    cmd_tx: mpsc::UnboundedSender<StateCommand>,
}

impl StateActorHandle {
    pub(crate) fn new(cmd_tx: mpsc::UnboundedSender<StateCommand>) -> Self {
        Self { cmd_tx }
    }

    // =========================================================================
    // Events (fire-and-forget)
    // =========================================================================

    pub fn apply_push(&self, message: PushMessage) {
        let _ = self.cmd_tx.send(StateCommand::ApplyPush(message));
    }

    pub fn connected(&self) {
        let _ = self.cmd_tx.send(StateCommand::Connected);
    }

    pub fn poll_devices(&self) {
        let _ = self.cmd_tx.send(StateCommand::PollDevices);
    }

    pub fn reconfigure(&self, settings: StateSettings) {
        let _ = self.cmd_tx.send(StateCommand::Reconfigure(settings));
    }

    pub fn set_learn(&self, enabled: bool) {
        let _ = self.cmd_tx.send(StateCommand::SetLearn(enabled));
    }

    /// Arm learn for a cell; ignored while learn mode is off
    pub fn arm_learn(&self, bank: i64, encoder: i64) {
        let _ = self.cmd_tx.send(StateCommand::ArmLearn { bank, encoder });
    }

    // =========================================================================
    // Actions (async with response)
    // =========================================================================

    async fn ask<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> StateCommand,
    ) -> Option<T> {
        let (response_tx, response_rx) = oneshot::channel();
        if self.cmd_tx.send(make(response_tx)).is_err() {
            return None;
        }
        response_rx.await.ok()
    }

    /// Request a bank change. `false` when out of range or the request failed.
    pub async fn select_bank(&self, bank: i64) -> bool {
        self.ask(|response| StateCommand::SelectBank { bank, response })
            .await
            .unwrap_or(false)
    }

    pub async fn stage_mapping(&self, edit: MappingEdit) -> bool {
        self.ask(|response| StateCommand::StageMapping { edit, response })
            .await
            .unwrap_or(false)
    }

    pub async fn persist_mapping(&self, edit: MappingEdit) -> bool {
        self.ask(|response| StateCommand::PersistMapping { edit, response })
            .await
            .unwrap_or(false)
    }

    pub async fn list_presets(&self) -> Option<PresetListing> {
        self.ask(|response| StateCommand::ListPresets { response })
            .await
            .flatten()
    }

    pub async fn load_preset(&self, name: &str, confirmed: bool) -> LoadOutcome {
        let name = name.to_string();
        self.ask(|response| StateCommand::LoadPreset {
            name,
            confirmed,
            response,
        })
        .await
        .unwrap_or(LoadOutcome::Failed)
    }

    /// `None` saves over the active preset
    pub async fn save_preset(&self, name: Option<String>) -> bool {
        self.ask(|response| StateCommand::SavePreset { name, response })
            .await
            .unwrap_or(false)
    }

    pub async fn download_preset(&self, name: &str) -> Option<Bytes> {
        let name = name.to_string();
        self.ask(|response| StateCommand::DownloadPreset { name, response })
            .await
            .flatten()
    }

    pub async fn list_ports(&self) -> Option<PortReport> {
        self.ask(|response| StateCommand::ListPorts { response })
            .await
    }

    /// Immutable copy of the current store; `None` once the actor is gone
    pub async fn snapshot(&self) -> Option<StoreSnapshot> {
        self.ask(|response| StateCommand::GetSnapshot { response })
            .await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(StateCommand::Shutdown);
    }
}

impl PushSink for StateActorHandle {
    fn push(&self, message: PushMessage) {
        self.apply_push(message);
    }

    fn connected(&self) {
        StateActorHandle::connected(self);
    }
}
