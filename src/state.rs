//! Client state: the dispatcher, its command set, and the store it owns
//!
//! The store keeps the last authoritative state pushed by the backend plus
//! the client-side mapping overlay, the dirty flag and the active preset.
//! All mutation goes through [`StateActorHandle`].

mod actor;
mod actor_handle;
mod commands;
mod store;
mod types;

pub use actor::StateActor;
pub use actor_handle::StateActorHandle;
pub use commands::{PortReport, StateSettings};
pub use store::{validate_bank, StateStore};
pub use types::{
    AppState, BankState, EncoderState, EncoderView, MappingEdit, PushMessage, StoreSnapshot,
    PUSH_KIND_BANK,
};
