//! Control-Change wire codec
//!
//! The hardware and the backend only exchange three-byte Control-Change
//! messages. On the wire the channel is 0-based (`status & 0x0F`); everywhere
//! in the mapping model it is 1-based. [`Channel`] is the only place where the
//! two conventions meet.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status nibble of the Control-Change message family
pub const CONTROL_CHANGE: u8 = 0xB0;

/// Highest 7-bit data value
pub const DATA_MAX: u8 = 0x7F;

/// MIDI channel in the 1-based model convention (1..=16)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(u8);

impl Channel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 16;

    /// Model channel, rejecting values outside 1..=16
    pub fn new(channel: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&channel).then_some(Self(channel))
    }

    /// Model channel, clamping any integer into 1..=16
    pub fn clamped(channel: i64) -> Self {
        Self(channel.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    /// Convert a 0-based wire channel (the low status nibble)
    pub fn from_wire(wire: u8) -> Self {
        Self((wire & 0x0F) + 1)
    }

    /// 0-based wire channel for the status byte
    pub fn to_wire(self) -> u8 {
        self.0 - 1
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded Control-Change message
///
/// `channel` keeps the wire convention (0-15) so the message can be echoed
/// back byte-for-byte; use [`ControlChange::model_channel`] for the mapping model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlChange {
    /// Wire channel (0-15)
    pub channel: u8,
    /// Controller number (0-127)
    pub control: u8,
    /// Controller value (0-127)
    pub value: u8,
}

impl ControlChange {
    pub fn new(control: u8, value: u8, channel: Channel) -> Self {
        Self {
            channel: channel.to_wire(),
            control: control & DATA_MAX,
            value: value & DATA_MAX,
        }
    }

    /// Status byte as it appears on the wire
    pub fn status(&self) -> u8 {
        CONTROL_CHANGE | (self.channel & 0x0F)
    }

    pub fn model_channel(&self) -> Channel {
        Channel::from_wire(self.channel)
    }

    pub fn encode(&self) -> [u8; 3] {
        encode(self.control, self.value, self.channel)
    }
}

impl fmt::Display for ControlChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CC ch:{} cc:{} v:{}",
            self.model_channel(),
            self.control,
            self.value
        )
    }
}

/// Encode a Control-Change message; `channel` is the 0-based wire channel
pub fn encode(control: u8, value: u8, channel: u8) -> [u8; 3] {
    [
        CONTROL_CHANGE | (channel & 0x0F),
        control & DATA_MAX,
        value & DATA_MAX,
    ]
}

/// Decode raw bytes, returning `None` for anything that is not a complete
/// Control-Change message
pub fn decode(data: &[u8]) -> Option<ControlChange> {
    let (&status, rest) = data.split_first()?;
    if status & 0xF0 != CONTROL_CHANGE || rest.len() < 2 {
        return None;
    }

    Some(ControlChange {
        channel: status & 0x0F,
        control: rest[0] & DATA_MAX,
        value: rest[1] & DATA_MAX,
    })
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_control_change() {
        assert_eq!(encode(7, 100, 2), [0xB2, 7, 100]);
    }

    #[test]
    fn test_encode_masks_out_of_range_bytes() {
        assert_eq!(encode(0x87, 0xFF, 0x13), [0xB3, 0x07, 0x7F]);
    }

    #[test]
    fn test_decode_control_change() {
        let cc = decode(&[0xB0, 42, 90]).unwrap();
        assert_eq!(
            cc,
            ControlChange {
                channel: 0,
                control: 42,
                value: 90
            }
        );
        assert_eq!(cc.model_channel(), Channel::new(1).unwrap());
        assert_eq!(cc.status(), 0xB0);
    }

    #[test]
    fn test_decode_ignores_other_message_types() {
        assert_eq!(decode(&[0x90, 60, 100]), None); // Note On
        assert_eq!(decode(&[0xE0, 0x00, 0x40]), None); // Pitch Bend
        assert_eq!(decode(&[0xF8]), None); // Clock
    }

    #[test]
    fn test_decode_rejects_truncated_messages() {
        assert_eq!(decode(&[]), None);
        assert_eq!(decode(&[0xB0, 1]), None);
    }

    #[test]
    fn test_channel_conversion() {
        assert_eq!(Channel::from_wire(3).get(), 4);
        assert_eq!(Channel::new(4).unwrap().to_wire(), 3);
        assert_eq!(Channel::new(0), None);
        assert_eq!(Channel::new(17), None);
        assert_eq!(Channel::clamped(0).get(), 1);
        assert_eq!(Channel::clamped(99).get(), 16);
        assert_eq!(Channel::clamped(-5).get(), 1);
    }

    #[test]
    fn test_display_uses_model_channel() {
        let cc = ControlChange::new(14, 64, Channel::new(3).unwrap());
        assert_eq!(cc.to_string(), "CC ch:3 cc:14 v:64");
        assert_eq!(format_hex(&cc.encode()), "B2 0E 40");
    }

    proptest! {
        #[test]
        fn prop_round_trip_over_model_channels(
            control in 0u8..=127,
            value in 0u8..=127,
            channel in 1u8..=16,
        ) {
            let bytes = encode(control, value, channel - 1);
            let decoded = decode(&bytes).unwrap();
            prop_assert_eq!(decoded.control, control);
            prop_assert_eq!(decoded.value, value);
            prop_assert_eq!(decoded.model_channel().get(), channel);
        }
    }
}
