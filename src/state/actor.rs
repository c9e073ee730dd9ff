//! StateActor - single dispatcher for all client state
//!
//! Every external event (push, MIDI input, UI action, request completion) is
//! a [`StateCommand`] on one unbounded queue, applied in receipt order by one
//! task. Backend requests run as separate tasks; a successful result
//! re-enters the queue as [`StateCommand::Completed`], so the store is only
//! ever mutated from the run loop. Failures are logged and swallowed and
//! leave the store unchanged.
//!
//! ```text
//!  transport ──ApplyPush/Connected──┐
//!  midir cb  ──MidiIn───────────────┤
//!  UI        ──actions──────────────┼──► command_rx ──► StateActor
//!  requests  ──Completed────────────┘        ▲              │
//!                                            └── spawn ◄────┘
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use super::actor_handle::StateActorHandle;
use super::commands::{Completion, PortReport, StateCommand, StateSettings};
use super::store::{validate_bank, StateStore};
use super::types::{MappingEdit, PushMessage, StoreSnapshot};
use crate::backend::{Backend, BackendError};
use crate::bridge::{InputSink, MidiBridge, MidiDevices, MidiError, Route};
use crate::learn::{EncoderRef, LearnMachine};
use crate::presets::{LoadOutcome, PresetListing};

type WeakCommandSender = mpsc::WeakUnboundedSender<StateCommand>;

pub struct StateActor {
    store: StateStore,
    learn: LearnMachine,
    bridge: MidiBridge,
    backend: Arc<dyn Backend>,
    send_bank_on_change: bool,
    command_rx: mpsc::UnboundedReceiver<StateCommand>,
    /// Used by request tasks to re-enter the queue without keeping it open
    self_tx: WeakCommandSender,
    command_count: u64,
}

impl StateActor {
    /// Spawn the dispatcher and return a handle for interacting with it
    ///
    /// `devices` is the result of probing the platform MIDI stack; an error
    /// puts the bridge in backend-only mode for good.
    pub fn spawn(
        backend: Arc<dyn Backend>,
        devices: Result<Arc<dyn MidiDevices>, MidiError>,
        settings: StateSettings,
    ) -> StateActorHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let self_tx = cmd_tx.downgrade();

        let input_tx = self_tx.clone();
        let sink: InputSink = Arc::new(move |bytes| {
            if let Some(tx) = input_tx.upgrade() {
                let _ = tx.send(StateCommand::MidiIn(bytes));
            }
        });

        let mut bridge = MidiBridge::new(devices, settings.bridge, sink);
        bridge.select_devices();

        let actor = StateActor {
            store: StateStore::new(),
            learn: LearnMachine::new(),
            bridge,
            backend,
            send_bank_on_change: settings.send_bank_on_change,
            command_rx: cmd_rx,
            self_tx,
            command_count: 0,
        };

        tokio::spawn(actor.run());
        info!("StateActor spawned");

        StateActorHandle::new(cmd_tx)
    }

    async fn run(mut self) {
        debug!("StateActor run loop started");

        while let Some(cmd) = self.command_rx.recv().await {
            trace!(?cmd, "Processing command");
            self.command_count += 1;

            match cmd {
                StateCommand::ApplyPush(message) => self.apply_push(message),
                StateCommand::Connected => self.fetch_snapshot(),
                StateCommand::MidiIn(bytes) => self.handle_midi_in(&bytes),
                StateCommand::PollDevices => self.bridge.poll_devices(),
                StateCommand::Reconfigure(settings) => {
                    debug!(?settings, "Reconfiguring");
                    self.send_bank_on_change = settings.send_bank_on_change;
                    self.bridge.reconfigure(settings.bridge);
                }

                StateCommand::SetLearn(enabled) => {
                    self.learn.set_enabled(enabled);
                    info!("Learn mode {}", if enabled { "on" } else { "off" });
                }
                StateCommand::ArmLearn { bank, encoder } => self.arm_learn(bank, encoder),
                StateCommand::SelectBank { bank, response } => self.select_bank(bank, response),
                StateCommand::StageMapping { edit, response } => {
                    self.stage_mapping(edit, Some(response))
                }
                StateCommand::PersistMapping { edit, response } => {
                    self.persist_mapping(edit, response)
                }
                StateCommand::ListPresets { response } => self.list_presets(response),
                StateCommand::LoadPreset {
                    name,
                    confirmed,
                    response,
                } => self.load_preset(name, confirmed, response),
                StateCommand::SavePreset { name, response } => self.save_preset(name, response),
                StateCommand::DownloadPreset { name, response } => {
                    let backend = self.backend.clone();
                    self.request("download preset", async move {
                        let result = backend.download_preset(&name).await;
                        reply_or_log("download preset", result, response, Some);
                    });
                }
                StateCommand::ListPorts { response } => self.list_ports(response),
                StateCommand::GetSnapshot { response } => {
                    let _ = response.send(self.snapshot());
                }

                StateCommand::Completed(completion) => self.complete(completion),
                StateCommand::Shutdown => {
                    info!("StateActor received shutdown command");
                    break;
                }
            }
        }

        info!(
            command_count = self.command_count,
            "StateActor run loop terminated"
        );
    }

    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            state: self.store.state().cloned(),
            overlay: self.store.overlay().clone(),
            dirty: self.store.is_dirty(),
            current_preset: self.store.current_preset().map(str::to_string),
            learn: self.learn.state(),
            midi: self.bridge.availability(),
            last_push_at: self.store.last_push_at(),
        }
    }

    fn request<F>(&self, what: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        trace!("Starting request: {}", what);
        tokio::spawn(task);
    }

    fn apply_push(&mut self, message: PushMessage) {
        if let Some(bank) = self.store.apply_push(message) {
            if self.send_bank_on_change {
                self.bridge.send_bank_select(bank);
            }
        }
    }

    fn fetch_snapshot(&self) {
        let backend = self.backend.clone();
        let tx = self.self_tx.clone();
        self.request("fetch snapshot", async move {
            match backend.fetch_snapshot().await {
                Ok(message) => send_completion(&tx, Completion::Snapshot(message)),
                Err(e) => warn!("Snapshot fetch failed: {}", e),
            }
        });
    }

    fn handle_midi_in(&mut self, bytes: &[u8]) {
        match self.bridge.route(bytes, &mut self.learn) {
            Route::Learn(capture) => {
                info!(
                    "Learned {} -> cc {} ch {}",
                    capture.target, capture.cc, capture.channel
                );
                let edit = MappingEdit::new(
                    capture.target.bank.into(),
                    capture.target.encoder.into(),
                    capture.cc.into(),
                )
                .with_channel(capture.channel.get().into());
                self.stage_mapping(edit, None);
            }
            Route::Forward(message) => {
                let backend = self.backend.clone();
                self.request("live value", async move {
                    if let Err(e) = backend.apply_live_value(message.into()).await {
                        warn!("Live value update failed: {}", e);
                    }
                });
            }
            Route::Ignore => {}
        }
    }

    fn arm_learn(&mut self, bank: i64, encoder: i64) {
        let target = u8::try_from(bank)
            .ok()
            .zip(u8::try_from(encoder).ok())
            .and_then(|(bank, encoder)| EncoderRef::new(bank, encoder));
        let Some(target) = target else {
            debug!("Ignoring arm request for bank {} encoder {}", bank, encoder);
            return;
        };
        if self.learn.arm(target) {
            info!("Learn armed for {}", target);
        } else {
            debug!("Ignoring arm request: learn mode is off");
        }
    }

    fn select_bank(&self, bank: i64, response: oneshot::Sender<bool>) {
        let Some(bank) = validate_bank(bank) else {
            debug!("Ignoring bank {} (out of range)", bank);
            let _ = response.send(false);
            return;
        };
        let backend = self.backend.clone();
        self.request("change bank", async move {
            let result = backend.change_bank(bank).await;
            reply_or_log("change bank", result, response, |_| true);
        });
    }

    fn stage_mapping(&self, edit: MappingEdit, reply: Option<oneshot::Sender<bool>>) {
        let Some(request) = self.store.prepare_stage(&edit) else {
            debug!(?edit, "Rejected mapping edit");
            if let Some(reply) = reply {
                let _ = reply.send(false);
            }
            return;
        };

        let backend = self.backend.clone();
        let tx = self.self_tx.clone();
        self.request("stage mapping", async move {
            match backend.stage_mapping(&request).await {
                Ok(response) => send_completion(
                    &tx,
                    Completion::Staged {
                        request,
                        response,
                        reply,
                    },
                ),
                Err(e) => {
                    warn!("Mapping staging failed: {}", e);
                    if let Some(reply) = reply {
                        let _ = reply.send(false);
                    }
                }
            }
        });
    }

    fn persist_mapping(&self, edit: MappingEdit, reply: oneshot::Sender<bool>) {
        let Some(request) = self.store.prepare_persist(&edit) else {
            debug!(?edit, "Rejected mapping edit");
            let _ = reply.send(false);
            return;
        };

        let backend = self.backend.clone();
        let tx = self.self_tx.clone();
        self.request("persist mapping", async move {
            match backend.persist_mapping(&request).await {
                Ok(response) => send_completion(&tx, Completion::Persisted { response, reply }),
                Err(e) => {
                    warn!("Mapping persist failed: {}", e);
                    let _ = reply.send(false);
                }
            }
        });
    }

    fn list_presets(&self, reply: oneshot::Sender<Option<PresetListing>>) {
        let backend = self.backend.clone();
        let tx = self.self_tx.clone();
        self.request("list presets", async move {
            match backend.list_presets().await {
                Ok(list) => send_completion(&tx, Completion::PresetsListed { list, reply }),
                Err(e) => {
                    warn!("Preset listing failed: {}", e);
                    let _ = reply.send(None);
                }
            }
        });
    }

    fn load_preset(&self, name: String, confirmed: bool, reply: oneshot::Sender<LoadOutcome>) {
        let name = name.trim().to_string();
        if name.is_empty() {
            let _ = reply.send(LoadOutcome::Failed);
            return;
        }
        if !confirmed && self.store.needs_discard_confirmation(&name) {
            debug!("Load of '{}' needs confirmation (unsaved edits)", name);
            let _ = reply.send(LoadOutcome::ConfirmationRequired);
            return;
        }

        let backend = self.backend.clone();
        let tx = self.self_tx.clone();
        self.request("load preset", async move {
            match backend.load_preset(&name).await {
                Ok(result) => {
                    let name = result.preset.unwrap_or(name);
                    send_completion(&tx, Completion::PresetLoaded { name, reply });
                }
                Err(e) => {
                    warn!("Preset load failed: {}", e);
                    let _ = reply.send(LoadOutcome::Failed);
                }
            }
        });
    }

    fn save_preset(&self, name: Option<String>, reply: oneshot::Sender<bool>) {
        let requested = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let backend = self.backend.clone();
        let tx = self.self_tx.clone();
        self.request("save preset", async move {
            match backend.save_preset(requested.as_deref()).await {
                Ok(result) => send_completion(
                    &tx,
                    Completion::PresetSaved {
                        reported: result.preset,
                        requested,
                        reply,
                    },
                ),
                Err(e) => {
                    warn!("Preset save failed: {}", e);
                    let _ = reply.send(false);
                }
            }
        });
    }

    fn list_ports(&self, reply: oneshot::Sender<PortReport>) {
        let local = self.bridge.local_ports();
        let selected = self.bridge.availability();
        let backend = self.backend.clone();
        self.request("list ports", async move {
            let backend = match backend.list_ports().await {
                Ok(ports) => Some(ports),
                Err(e) => {
                    warn!("Backend port listing failed: {}", e);
                    None
                }
            };
            let _ = reply.send(PortReport {
                local,
                backend,
                selected,
            });
        });
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Snapshot(message) => self.apply_push(message),
            Completion::Staged {
                request,
                response,
                reply,
            } => {
                self.store.apply_staged(&request, response);
                debug!(
                    "Staged bank {} encoder {} -> cc {}",
                    request.bank, request.encoder, request.cc
                );
                if let Some(reply) = reply {
                    let _ = reply.send(true);
                }
            }
            Completion::Persisted { response, reply } => {
                self.store.apply_persisted(response.mapping.as_ref());
                let _ = reply.send(true);
            }
            Completion::PresetsListed { list, reply } => {
                self.store.adopt_current_preset(list.current);
                let current = self.store.current_preset().map(str::to_string);
                let _ = reply.send(Some(PresetListing::new(list.presets, current)));
            }
            Completion::PresetLoaded { name, reply } => {
                info!("Preset loaded: {}", name);
                self.store.preset_loaded(name.clone());
                let _ = reply.send(LoadOutcome::Loaded(name));
            }
            Completion::PresetSaved {
                reported,
                requested,
                reply,
            } => {
                self.store.preset_saved(reported, requested);
                info!(
                    "Preset saved: {}",
                    self.store.current_preset().unwrap_or("(active)")
                );
                let _ = reply.send(true);
            }
        }
    }
}

/// Hand a successful result back to the dispatcher
fn send_completion(tx: &WeakCommandSender, completion: Completion) {
    if let Some(tx) = tx.upgrade() {
        let _ = tx.send(StateCommand::Completed(completion));
    }
}

/// Reply directly for requests that do not touch the store
fn reply_or_log<T, R: Default>(
    what: &str,
    result: Result<T, BackendError>,
    reply: oneshot::Sender<R>,
    map: impl FnOnce(T) -> R,
) {
    let value = match result {
        Ok(value) => map(value),
        Err(e) => {
            warn!("Request '{}' failed: {}", what, e);
            R::default()
        }
    };
    let _ = reply.send(value);
}
