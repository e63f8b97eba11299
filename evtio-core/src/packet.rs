#![allow(clippy::unusual_byte_groupings)]
//! EVT 3.0 packet grammar.
//!
//! Bit-level access to the 16-bit words of an EVT 3.0 stream in both
//! directions: field extractors used by the decoder and word builders used by
//! the encoder. Nothing here does I/O; the only state is the differential
//! [`EncodeState`] threaded through [`encode_event`].

use crate::types::{Event, PacketType};

/// Number of words in a vector group (base word and three validity words).
pub const VECTOR_GROUP_WORDS: usize = 4;

/// Extracts the 4-bit packet type from a 16-bit word.
#[inline]
pub fn get_event_type(word: u16) -> u8 {
    ((word >> 12) & 0xF) as u8
}

/// Parses the packet type from a 16-bit word.
#[inline]
pub fn parse_packet_type(word: u16) -> Option<PacketType> {
    PacketType::from_u8(get_event_type(word))
}

#[inline]
fn make_word(packet: PacketType, payload: u16) -> u16 {
    packet.tag() | (payload & 0x0FFF)
}

/// Camera role carried in bit 11 of every EVT_ADDR_Y word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemType {
    #[default]
    Master,
    Slave,
}

impl SystemType {
    #[inline]
    fn bit(self) -> u16 {
        match self {
            Self::Master => 0,
            Self::Slave => 1,
        }
    }
}

// ============================================================================
// EVT_ADDR_Y (type = 0x0)
// Bits: [15:12] type | [11] system_type | [10:0] y
// ============================================================================

/// Extracts the Y coordinate from an EVT_ADDR_Y word.
#[inline]
pub fn addr_y_get_y(word: u16) -> u16 {
    word & 0x07FF // bits 10:0
}

/// Extracts the system type (master/slave) from an EVT_ADDR_Y word.
#[inline]
pub fn addr_y_get_system_type(word: u16) -> u8 {
    ((word >> 11) & 0x1) as u8
}

/// Builds an EVT_ADDR_Y word.
#[inline]
pub fn addr_y_word(y: u16, system_type: SystemType) -> u16 {
    make_word(PacketType::AddrY, (system_type.bit() << 11) | (y & 0x07FF))
}

// ============================================================================
// EVT_ADDR_X (type = 0x2)
// Bits: [15:12] type | [11] polarity | [10:0] x
// ============================================================================

/// Extracts the X coordinate from an EVT_ADDR_X word.
#[inline]
pub fn addr_x_get_x(word: u16) -> u16 {
    word & 0x07FF // bits 10:0
}

/// Extracts the polarity from an EVT_ADDR_X word.
#[inline]
pub fn addr_x_get_polarity(word: u16) -> u8 {
    ((word >> 11) & 0x1) as u8
}

/// Builds an EVT_ADDR_X word.
#[inline]
pub fn addr_x_word(x: u16, polarity: u8) -> u16 {
    make_word(
        PacketType::AddrX,
        (((polarity & 0x1) as u16) << 11) | (x & 0x07FF),
    )
}

// ============================================================================
// VECT_BASE_X (type = 0x3)
// Bits: [15:12] type | [11] polarity | [10:0] x
// ============================================================================

/// Extracts the base X coordinate from a VECT_BASE_X word.
#[inline]
pub fn vect_base_x_get_x(word: u16) -> u16 {
    word & 0x07FF // bits 10:0
}

/// Extracts the polarity from a VECT_BASE_X word.
#[inline]
pub fn vect_base_x_get_polarity(word: u16) -> u8 {
    ((word >> 11) & 0x1) as u8
}

/// Builds a VECT_BASE_X word.
#[inline]
pub fn vect_base_x_word(x: u16, polarity: u8) -> u16 {
    make_word(
        PacketType::VectBaseX,
        (((polarity & 0x1) as u16) << 11) | (x & 0x07FF),
    )
}

// ============================================================================
// VECT_12 (type = 0x4)
// Bits: [15:12] type | [11:0] valid (12-bit bitmask)
// ============================================================================

/// Extracts the 12-bit validity mask from a VECT_12 word.
#[inline]
pub fn vect_12_get_valid(word: u16) -> u16 {
    word & 0x0FFF // bits 11:0
}

/// Builds a VECT_12 word from the low 12 bits of `valid`.
#[inline]
pub fn vect_12_word(valid: u16) -> u16 {
    make_word(PacketType::Vect12, valid)
}

// ============================================================================
// VECT_8 (type = 0x5)
// Bits: [15:12] type | [11:8] unused | [7:0] valid (8-bit bitmask)
// ============================================================================

/// Extracts the 8-bit validity mask from a VECT_8 word.
#[inline]
pub fn vect_8_get_valid(word: u16) -> u8 {
    (word & 0x00FF) as u8 // bits 7:0
}

/// Builds a VECT_8 word.
#[inline]
pub fn vect_8_word(valid: u8) -> u16 {
    make_word(PacketType::Vect8, valid as u16)
}

/// Builds the four words of a vector group covering `base_x..base_x + 32`.
///
/// Bit `k` of `valid` marks an event at `base_x + k`.
pub fn vector_group_words(base_x: u16, polarity: u8, valid: u32) -> [u16; VECTOR_GROUP_WORDS] {
    [
        vect_base_x_word(base_x, polarity),
        vect_12_word((valid & 0x0FFF) as u16),
        vect_12_word(((valid >> 12) & 0x0FFF) as u16),
        vect_8_word(((valid >> 24) & 0xFF) as u8),
    ]
}

// ============================================================================
// EVT_TIME_LOW (type = 0x6) / EVT_TIME_HIGH (type = 0x8)
// Bits: [15:12] type | [11:0] time
// ============================================================================

/// Extracts the 12-bit time value from a TIME_LOW or TIME_HIGH word.
#[inline]
pub fn time_get_value(word: u16) -> u16 {
    word & 0x0FFF // bits 11:0
}

/// Builds an EVT_TIME_LOW word.
#[inline]
pub fn time_low_word(lower12: u16) -> u16 {
    make_word(PacketType::TimeLow, lower12)
}

/// Builds an EVT_TIME_HIGH word.
#[inline]
pub fn time_high_word(upper12: u16) -> u16 {
    make_word(PacketType::TimeHigh, upper12)
}

// ============================================================================
// EXT_TRIGGER (type = 0xA)
// Bits: [15:12] type | [11:8] id | [7:1] unused | [0] value
// ============================================================================

/// Extracts the trigger channel ID from an EXT_TRIGGER word.
#[inline]
pub fn ext_trigger_get_id(word: u16) -> u8 {
    ((word >> 8) & 0x0F) as u8 // bits 11:8
}

/// Extracts the trigger value (edge polarity) from an EXT_TRIGGER word.
#[inline]
pub fn ext_trigger_get_value(word: u16) -> u8 {
    (word & 0x01) as u8 // bit 0
}

/// Builds an EXT_TRIGGER word.
#[inline]
pub fn ext_trigger_word(id: u8, value: u8) -> u16 {
    make_word(
        PacketType::ExtTrigger,
        (((id & 0x0F) as u16) << 8) | (value & 0x1) as u16,
    )
}

// ============================================================================
// Differential encoding
// ============================================================================

/// Writer-side differential state.
///
/// The `last_*` fields start out of range so that the first event always
/// emits its time and row words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeState {
    pub last_upper12: i32,
    pub last_lower12: i32,
    pub last_y: i32,
    /// Bits 24.. of the last emitted timestamp.
    pub last_epoch: u64,
}

impl Default for EncodeState {
    fn default() -> Self {
        Self {
            last_upper12: -1,
            last_lower12: -1,
            last_y: -1,
            last_epoch: 0,
        }
    }
}

/// Appends the words encoding `event` to `out` and advances `state`.
///
/// Emits, in order: EVT_TIME_HIGH if the upper 12 time bits changed,
/// EVT_TIME_LOW if the lower 12 bits changed, EVT_ADDR_Y if the row changed,
/// and always one EVT_ADDR_X.
///
/// A decoder only notices a wrap of the 24-bit counter when the upper bits go
/// backwards. When `event` sits more epochs ahead than that single wrap can
/// account for, `TIME_HIGH 0xFFF`/`TIME_HIGH 0x000` pairs are emitted first,
/// one per missing wrap.
pub fn encode_event(
    event: &Event,
    state: &mut EncodeState,
    system_type: SystemType,
    out: &mut Vec<u16>,
) {
    let epoch = event.t >> 24;
    let upper12 = ((event.t >> 12) & 0x0FFF) as i32;
    let lower12 = (event.t & 0x0FFF) as i32;

    if epoch > state.last_epoch {
        let missing = epoch - state.last_epoch;
        let wraps_naturally = upper12 < state.last_upper12;
        if !(missing == 1 && wraps_naturally) {
            for _ in 0..missing {
                out.push(time_high_word(0x0FFF));
                out.push(time_high_word(0x0000));
            }
            state.last_upper12 = 0;
        }
    }
    state.last_epoch = state.last_epoch.max(epoch);

    if upper12 != state.last_upper12 {
        state.last_upper12 = upper12;
        out.push(time_high_word(upper12 as u16));
    }

    if lower12 != state.last_lower12 {
        state.last_lower12 = lower12;
        out.push(time_low_word(lower12 as u16));
    }

    if event.y as i32 != state.last_y {
        state.last_y = event.y as i32;
        out.push(addr_y_word(event.y, system_type));
    }

    out.push(addr_x_word(event.x, event.p));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_y_parsing() {
        // type=0, system_type=0, y=500
        let word: u16 = 0b0000_0_00111110100;
        assert_eq!(addr_y_get_y(word), 500);
        assert_eq!(addr_y_get_system_type(word), 0);

        // type=0, system_type=1, y=100
        let word2: u16 = 0b0000_1_00001100100;
        assert_eq!(addr_y_get_y(word2), 100);
        assert_eq!(addr_y_get_system_type(word2), 1);
        assert_eq!(addr_y_word(100, SystemType::Slave), word2);
    }

    #[test]
    fn test_addr_x_parsing() {
        // type=2, pol=1, x=300
        let word: u16 = 0b0010_1_00100101100;
        assert_eq!(get_event_type(word), 0x2);
        assert_eq!(addr_x_get_x(word), 300);
        assert_eq!(addr_x_get_polarity(word), 1);
        assert_eq!(addr_x_word(300, 1), word);
    }

    #[test]
    fn test_coordinates_are_masked_to_11_bits() {
        assert_eq!(addr_x_get_x(addr_x_word(0xFFFF, 0)), 0x07FF);
        assert_eq!(addr_x_get_polarity(addr_x_word(0xFFFF, 0)), 0);
        assert_eq!(get_event_type(addr_y_word(0xFFFF, SystemType::Master)), 0x0);
    }

    #[test]
    fn test_vector_group_words() {
        let words = vector_group_words(100, 1, 0b0101);
        assert_eq!(parse_packet_type(words[0]), Some(PacketType::VectBaseX));
        assert_eq!(vect_base_x_get_x(words[0]), 100);
        assert_eq!(vect_base_x_get_polarity(words[0]), 1);
        assert_eq!(vect_12_get_valid(words[1]), 0b0101);
        assert_eq!(parse_packet_type(words[2]), Some(PacketType::Vect12));
        assert_eq!(vect_12_get_valid(words[2]), 0);
        assert_eq!(parse_packet_type(words[3]), Some(PacketType::Vect8));

        let top = vector_group_words(0, 0, 0xFF00_0000);
        assert_eq!(vect_8_get_valid(top[3]), 0xFF);
    }

    #[test]
    fn test_time_parsing() {
        // TIME_HIGH type=8, time=0xABC
        let word: u16 = 0b1000_101010111100;
        assert_eq!(get_event_type(word), 0x8);
        assert_eq!(time_get_value(word), 0xABC);
        assert_eq!(time_high_word(0xABC), word);
        assert_eq!(time_get_value(time_low_word(0x123)), 0x123);
    }

    #[test]
    fn test_ext_trigger_parsing() {
        // type=A, id=2, value=1
        let word: u16 = 0b1010_0010_0000000_1;
        assert_eq!(get_event_type(word), 0xA);
        assert_eq!(ext_trigger_get_id(word), 2);
        assert_eq!(ext_trigger_get_value(word), 1);
        assert_eq!(ext_trigger_word(2, 1), word);
    }

    #[test]
    fn test_encode_first_event_emits_every_field() {
        let mut state = EncodeState::default();
        let mut out = Vec::new();
        encode_event(&Event::new(0, 5, 0, 1), &mut state, SystemType::Master, &mut out);
        assert_eq!(
            out,
            vec![
                time_high_word(0),
                time_low_word(0),
                addr_y_word(0, SystemType::Master),
                addr_x_word(5, 1)
            ]
        );
    }

    #[test]
    fn test_encode_only_changed_fields() {
        let mut state = EncodeState::default();
        let mut out = Vec::new();
        encode_event(&Event::new(0x1002, 1, 7, 0), &mut state, SystemType::Master, &mut out);
        out.clear();

        // same time, same row
        encode_event(&Event::new(0x1002, 2, 7, 1), &mut state, SystemType::Master, &mut out);
        assert_eq!(out, vec![addr_x_word(2, 1)]);
        out.clear();

        // new lower bits and row
        encode_event(&Event::new(0x1003, 2, 8, 1), &mut state, SystemType::Master, &mut out);
        assert_eq!(
            out,
            vec![
                time_low_word(3),
                addr_y_word(8, SystemType::Master),
                addr_x_word(2, 1)
            ]
        );
        out.clear();

        // new upper bits, same lower bits
        encode_event(&Event::new(0x2003, 2, 8, 1), &mut state, SystemType::Master, &mut out);
        assert_eq!(out, vec![time_high_word(2), addr_x_word(2, 1)]);
        assert_eq!(state.last_upper12, 2);
        assert_eq!(state.last_lower12, 3);
        assert_eq!(state.last_y, 8);
    }

    #[test]
    fn test_encode_natural_wrap_needs_no_bridge() {
        let mut state = EncodeState::default();
        let mut out = Vec::new();
        encode_event(&Event::new(0xFFF_000, 0, 0, 0), &mut state, SystemType::Master, &mut out);
        out.clear();
        encode_event(&Event::new(0x1_001_000, 0, 0, 0), &mut state, SystemType::Master, &mut out);
        assert_eq!(out, vec![time_high_word(1), addr_x_word(0, 0)]);
        assert_eq!(state.last_epoch, 1);
    }

    #[test]
    fn test_encode_bridges_skipped_epochs() {
        let mut state = EncodeState::default();
        let mut out = Vec::new();
        // two full periods ahead of the initial epoch
        encode_event(&Event::new(2 << 24, 0, 0, 0), &mut state, SystemType::Master, &mut out);
        assert_eq!(
            &out[..4],
            &[
                time_high_word(0xFFF),
                time_high_word(0),
                time_high_word(0xFFF),
                time_high_word(0)
            ]
        );
        assert_eq!(state.last_epoch, 2);
    }
}
