//! Encoder mapping tables and payload normalization
//!
//! The backend reports mappings in several shapes: nested under `banks`,
//! flat `{ bank: { encoder: cc } }`, or preset-style entries carrying
//! `{ "cc": .., "channel": .. }` objects. Everything is normalized into an
//! [`EncoderTable`] keyed by integer bank and encoder. Defaults for pairs the
//! table does not mention are resolved by [`Overlay`] at read time.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use tracing::debug;

use crate::midi::{Channel, DATA_MAX};

/// Valid bank identities
pub const BANKS: RangeInclusive<u8> = 1..=4;

/// Valid encoder identities within a bank
pub const ENCODERS: RangeInclusive<u8> = 1..=16;

/// Default CC for an encoder without an explicit mapping
pub fn default_cc(encoder: u8) -> u8 {
    encoder.saturating_sub(1) & DATA_MAX
}

/// Canonical `bank -> encoder -> value` table
///
/// Serializes to the flat JSON shape (`{"1": {"1": 14}}`), which is itself a
/// valid normalizer input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncoderTable(BTreeMap<u8, BTreeMap<u8, u8>>);

impl EncoderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bank: u8, encoder: u8) -> Option<u8> {
        self.0.get(&bank).and_then(|encoders| encoders.get(&encoder)).copied()
    }

    pub fn set(&mut self, bank: u8, encoder: u8, value: u8) {
        self.0.entry(bank).or_default().insert(encoder, value);
    }

    /// Overwrite entries present in `other`, keeping everything else
    pub fn merge(&mut self, other: &EncoderTable) {
        for (bank, encoder, value) in other.iter() {
            self.set(bank, encoder, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, u8, u8)> + '_ {
        self.0.iter().flat_map(|(bank, encoders)| {
            encoders
                .iter()
                .map(move |(encoder, value)| (*bank, *encoder, *value))
        })
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolved mapping for one encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    pub cc: u8,
    pub channel: Channel,
}

/// Client-side mapping overlay: CC table plus channel table
///
/// Absent pairs resolve to `cc = encoder - 1` and channel 1. Defaults are
/// computed on every read and never written back into the tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Overlay {
    pub mapping: EncoderTable,
    pub channels: EncoderTable,
}

impl Overlay {
    pub fn cc(&self, bank: u8, encoder: u8) -> u8 {
        self.mapping
            .get(bank, encoder)
            .unwrap_or_else(|| default_cc(encoder))
    }

    pub fn channel(&self, bank: u8, encoder: u8) -> Channel {
        self.channels
            .get(bank, encoder)
            .and_then(Channel::new)
            .unwrap_or_default()
    }

    pub fn resolve(&self, bank: u8, encoder: u8) -> MappingEntry {
        MappingEntry {
            cc: self.cc(bank, encoder),
            channel: self.channel(bank, encoder),
        }
    }
}

/// Normalize a CC mapping payload of any supported shape
pub fn normalize_mapping(payload: &Value) -> EncoderTable {
    collect(payload, "cc", |raw| {
        (0..=DATA_MAX as i64).contains(&raw).then_some(raw as u8)
    })
}

/// Normalize a channel payload, clamping every channel into 1..=16
pub fn normalize_channels(payload: &Value) -> EncoderTable {
    collect(payload, "channel", |raw| Some(Channel::clamped(raw).get()))
}

fn collect(payload: &Value, field: &str, accept: impl Fn(i64) -> Option<u8>) -> EncoderTable {
    let mut table = EncoderTable::new();
    let Some(banks) = banks_object(payload) else {
        return table;
    };

    for (bank_key, bank_value) in banks {
        let Some(bank) = parse_key(bank_key) else {
            debug!("Skipping non-numeric bank key '{}'", bank_key);
            continue;
        };
        let Some(encoders) = encoders_object(bank_value) else {
            continue;
        };

        for (encoder_key, entry) in encoders {
            let Some(encoder) = parse_key(encoder_key) else {
                debug!("Skipping non-numeric encoder key '{}'", encoder_key);
                continue;
            };
            match entry_value(entry, field).and_then(&accept) {
                Some(value) => table.set(bank, encoder, value),
                None => debug!(
                    "Skipping {} for bank {} encoder {}: {}",
                    field, bank, encoder, entry
                ),
            }
        }
    }

    table
}

/// `{ banks: {...} }` unwraps to the inner object, anything else is taken as flat
fn banks_object(payload: &Value) -> Option<&Map<String, Value>> {
    match payload.get("banks") {
        Some(Value::Object(inner)) => Some(inner),
        _ => payload.as_object(),
    }
}

/// Preset-style banks nest encoders under an `encoders` key
fn encoders_object(bank: &Value) -> Option<&Map<String, Value>> {
    match bank.get("encoders") {
        Some(Value::Object(inner)) => Some(inner),
        _ => bank.as_object(),
    }
}

fn parse_key(key: &str) -> Option<u8> {
    key.trim().parse::<u8>().ok().filter(|k| *k > 0)
}

fn entry_value(entry: &Value, field: &str) -> Option<i64> {
    match entry {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(obj) => obj.get(field).and_then(|v| entry_value(v, field)),
        _ => None,
    }
}
