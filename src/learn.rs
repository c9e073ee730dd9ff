//! MIDI Learn state machine
//!
//! Learn mode is a toggle. While it is on, activating an encoder cell arms
//! that cell; the next Control-Change from the hardware is captured for the
//! armed cell and the target is cleared again. Learn mode itself stays on so
//! cells can be learned one after another.

use serde::Serialize;
use std::fmt;

use crate::mapping::{BANKS, ENCODERS};
use crate::midi::{Channel, ControlChange};

/// A (bank, encoder) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EncoderRef {
    pub bank: u8,
    pub encoder: u8,
}

impl EncoderRef {
    /// Returns `None` when either identity is out of range
    pub fn new(bank: u8, encoder: u8) -> Option<Self> {
        (BANKS.contains(&bank) && ENCODERS.contains(&encoder)).then_some(Self { bank, encoder })
    }
}

impl fmt::Display for EncoderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bank {} encoder {}", self.bank, self.encoder)
    }
}

/// Observable learn state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "target", rename_all = "snake_case")]
pub enum LearnState {
    /// Learn mode disabled
    Off,
    /// Learn mode enabled, no target armed
    Idle,
    /// Waiting for the next Control-Change for this target
    Armed(EncoderRef),
}

/// Mapping captured for an armed target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnCapture {
    pub target: EncoderRef,
    pub cc: u8,
    pub channel: Channel,
}

#[derive(Debug, Default)]
pub struct LearnMachine {
    enabled: bool,
    target: Option<EncoderRef>,
}

impl LearnMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LearnState {
        match (self.enabled, self.target) {
            (false, _) => LearnState::Off,
            (true, None) => LearnState::Idle,
            (true, Some(target)) => LearnState::Armed(target),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_armed(&self) -> bool {
        self.enabled && self.target.is_some()
    }

    /// Turning learn mode off always drops the target
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.target = None;
        }
    }

    /// Arm a target, replacing any previous one. Ignored while learn is off.
    pub fn arm(&mut self, target: EncoderRef) -> bool {
        if !self.enabled {
            return false;
        }
        self.target = Some(target);
        true
    }

    /// Consume a Control-Change for the armed target
    pub fn capture(&mut self, message: &ControlChange) -> Option<LearnCapture> {
        if !self.enabled {
            return None;
        }
        let target = self.target.take()?;
        Some(LearnCapture {
            target,
            cc: message.control,
            channel: message.model_channel(),
        })
    }
}
