//! Differential EVT 3.0 encoder.
//!
//! Turns batches of events into EVT 3.0 bytes. Only fields that changed since
//! the previous event are re-emitted; the state survives across batches so a
//! stream can be written piecewise.

use crate::packet::{self, EncodeState, SystemType};
use crate::types::Event;
use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

/// Epochs (2^24 us, about 16.8 s each) an event may jump ahead before the
/// filler TIME_HIGH pairs it costs are logged.
pub const BRIDGE_WARN_EPOCHS: u64 = 1024;

/// Stateful EVT 3.0 encoder.
#[derive(Debug, Clone, Default)]
pub struct Evt3Encoder {
    state: EncodeState,
    system_type: SystemType,
    words: Vec<u16>,
    last_t: Option<u64>,
}

impl Evt3Encoder {
    /// Creates an encoder for a master camera.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder tagging rows with the given system type.
    pub fn with_system_type(system_type: SystemType) -> Self {
        Self {
            system_type,
            ..Self::default()
        }
    }

    /// Current differential state.
    pub fn state(&self) -> &EncodeState {
        &self.state
    }

    /// Encodes `events` and appends the resulting words to `out`.
    ///
    /// Returns the number of events whose timestamp went backwards; those
    /// cannot be represented faithfully and will decode with a shifted time.
    pub fn encode_words(&mut self, events: &[Event], out: &mut Vec<u16>) -> usize {
        out.reserve(events.len() * 4);
        let mut out_of_order = 0;
        for event in events {
            if self.last_t.is_some_and(|last| event.t < last) {
                out_of_order += 1;
            }
            self.last_t = Some(event.t);

            let epochs_ahead = (event.t >> 24).saturating_sub(self.state.last_epoch);
            if epochs_ahead > BRIDGE_WARN_EPOCHS {
                warn!(
                    "Timestamp {} is {} epochs ahead of the stream; writing {} bytes of TIME_HIGH filler",
                    event.t,
                    epochs_ahead,
                    epochs_ahead.saturating_mul(4)
                );
            }
            packet::encode_event(event, &mut self.state, self.system_type, out);
        }
        out_of_order
    }

    /// Encodes `events` and appends the little-endian bytes to `out`.
    ///
    /// Returns the number of out-of-order events, as [`Self::encode_words`].
    pub fn encode(&mut self, events: &[Event], out: &mut Vec<u8>) -> usize {
        let mut words = std::mem::take(&mut self.words);
        words.clear();
        let out_of_order = self.encode_words(events, &mut words);

        let start = out.len();
        out.resize(start + words.len() * 2, 0);
        LittleEndian::write_u16_into(&words, &mut out[start..]);

        self.words = words;
        out_of_order
    }
}
