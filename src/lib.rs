//! twister-sync
//!
//! Keeps a local view of a Midi Fighter Twister backend's live state, bridges
//! the controller's MIDI to it, and drives mapping edits, MIDI Learn and
//! preset management.

pub mod backend;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod connection;
pub mod learn;
pub mod mapping;
pub mod midi;
pub mod paths;
pub mod presets;
pub mod state;
