//! Stateful, chunked EVT 3.0 decoder.
//!
//! [`decode_words`] runs the EVT 3.0 state machine over one slice of words.
//! [`ChunkDecoder`] feeds it from a byte source in fixed-size chunks and keeps
//! the words of a packet cut by a chunk boundary for the next call, so a
//! vector group is never split across two decode calls.

use crate::packet::{self, VECTOR_GROUP_WORDS};
use crate::types::{Event, EventBatch, PacketType, Trigger};
use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Read};
use tracing::{debug, warn};

/// Default chunk size in 16-bit words.
pub const DEFAULT_CHUNK_WORDS: usize = 1_000_000;

/// Reader-side differential state.
///
/// The reconstructed timestamp is
/// `(time_high_high << 24) | (time_high << 12) | time_low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeState {
    /// Number of times the 24-bit time base wrapped.
    pub time_high_high: u64,
    /// Bits 12..23 of the time base.
    pub time_high: u32,
    /// Bits 0..11 of the time base.
    pub time_low: u32,
    pub last_y: u16,
    /// Set once the first EVT_TIME_HIGH has been seen.
    pub time_base_seen: bool,
}

impl DecodeState {
    /// Current reconstructed timestamp in microseconds.
    #[inline]
    pub fn timestamp(&self) -> u64 {
        (self.time_high_high << 24) | ((self.time_high as u64) << 12) | self.time_low as u64
    }

    /// Applies an EVT_TIME_HIGH value, counting a wrap when it goes backwards.
    #[inline]
    fn apply_time_high(&mut self, upper12: u16) {
        let upper12 = upper12 as u32;
        if upper12 < self.time_high {
            self.time_high_high += 1;
        }
        self.time_high = upper12;
    }

    // Lower bits never wrap on their own in EVT 3.0, so no overflow check here.
    #[inline]
    fn apply_time_low(&mut self, lower12: u16) {
        self.time_low = lower12 as u32;
    }
}

/// What one [`decode_words`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkOutcome {
    /// Events appended to the output.
    pub events: usize,
    /// Triggers appended to the output.
    pub triggers: usize,
    /// Whole words consumed; the rest must be offered again with more data.
    pub consumed: usize,
    /// Vector groups dropped because a continuation word had the wrong type.
    pub malformed_groups: usize,
}

/// Decodes a run of EVT 3.0 words.
///
/// Events and triggers are appended to `events` and `triggers`. Until the
/// first EVT_TIME_HIGH is seen, words are skipped (and counted as consumed).
/// Decoding stops in front of a VECT_BASE_X whose continuation words are not
/// all in `words` yet; `consumed` then tells the caller where to resume.
pub fn decode_words(
    words: &[u16],
    state: &mut DecodeState,
    events: &mut Vec<Event>,
    triggers: &mut Vec<Trigger>,
) -> ChunkOutcome {
    decode_run(words, state, events, triggers, false)
}

/// Decodes the last words of a stream.
///
/// Same as [`decode_words`], except that no more data will follow: a vector
/// group cut short by the end of `words` is dropped as malformed and the
/// words after its base are decoded, so everything is consumed.
pub fn decode_final_words(
    words: &[u16],
    state: &mut DecodeState,
    events: &mut Vec<Event>,
    triggers: &mut Vec<Trigger>,
) -> ChunkOutcome {
    decode_run(words, state, events, triggers, true)
}

fn decode_run(
    words: &[u16],
    state: &mut DecodeState,
    events: &mut Vec<Event>,
    triggers: &mut Vec<Trigger>,
    end_of_stream: bool,
) -> ChunkOutcome {
    let events_before = events.len();
    let triggers_before = triggers.len();
    let mut malformed_groups = 0;
    let mut i = 0;

    if !state.time_base_seen {
        while i < words.len() && packet::parse_packet_type(words[i]) != Some(PacketType::TimeHigh) {
            i += 1;
        }
        if i < words.len() {
            state.time_base_seen = true;
        }
    }

    while i < words.len() {
        let word = words[i];

        match packet::parse_packet_type(word) {
            Some(PacketType::TimeHigh) => {
                state.apply_time_high(packet::time_get_value(word));
            }

            Some(PacketType::TimeLow) => {
                state.apply_time_low(packet::time_get_value(word));
            }

            Some(PacketType::AddrY) => {
                state.last_y = packet::addr_y_get_y(word);
            }

            Some(PacketType::AddrX) => {
                events.push(Event::new(
                    state.timestamp(),
                    packet::addr_x_get_x(word),
                    state.last_y,
                    packet::addr_x_get_polarity(word),
                ));
            }

            Some(PacketType::VectBaseX) => {
                let group = &words[i..words.len().min(i + VECTOR_GROUP_WORDS)];
                match check_vector_group(group) {
                    Err(offset) => {
                        warn!(
                            "Malformed vector group: expected {} at offset {}, got {:#06x}; skipping group",
                            if offset == 3 { "VECT_8" } else { "VECT_12" },
                            offset,
                            group[offset]
                        );
                        malformed_groups += 1;
                    }
                    Ok(()) if group.len() < VECTOR_GROUP_WORDS => {
                        if !end_of_stream {
                            break;
                        }
                        warn!(
                            "Vector group cut after {} of {} words by end of stream; skipping group",
                            group.len(),
                            VECTOR_GROUP_WORDS
                        );
                        malformed_groups += 1;
                    }
                    Ok(()) => {
                        emit_vector_group(group, state, events);
                        i += VECTOR_GROUP_WORDS;
                        continue;
                    }
                }
            }

            Some(PacketType::ExtTrigger) => {
                triggers.push(Trigger::new(
                    state.timestamp(),
                    packet::ext_trigger_get_value(word),
                    packet::ext_trigger_get_id(word),
                ));
            }

            // Stray vector continuations and extension words carry nothing
            // for CD or trigger events.
            Some(PacketType::Vect12)
            | Some(PacketType::Vect8)
            | Some(PacketType::Continued4)
            | Some(PacketType::Others)
            | Some(PacketType::Continued12) => {}

            None => {
                // Reserved/unknown packet type, skip
            }
        }
        i += 1;
    }

    ChunkOutcome {
        events: events.len() - events_before,
        triggers: triggers.len() - triggers_before,
        consumed: i,
        malformed_groups,
    }
}

/// Checks the continuation words present after a VECT_BASE_X.
///
/// `group` starts at the base word and may be shorter than a full group.
/// Returns the offset of the first word that is not the expected
/// `VECT_12, VECT_12, VECT_8`.
fn check_vector_group(group: &[u16]) -> Result<(), usize> {
    let expected = [PacketType::Vect12, PacketType::Vect12, PacketType::Vect8];
    for (offset, (&word, kind)) in group.iter().skip(1).zip(expected.iter()).enumerate() {
        if packet::parse_packet_type(word) != Some(*kind) {
            return Err(offset + 1);
        }
    }
    Ok(())
}

/// Emits the events of one complete, checked vector group.
fn emit_vector_group(group: &[u16], state: &DecodeState, events: &mut Vec<Event>) {
    let base_x = packet::vect_base_x_get_x(group[0]);
    let polarity = packet::vect_base_x_get_polarity(group[0]);
    let mut valid = packet::vect_12_get_valid(group[1]) as u32
        | (packet::vect_12_get_valid(group[2]) as u32) << 12
        | (packet::vect_8_get_valid(group[3]) as u32) << 24;

    let t = state.timestamp();
    let mut x = base_x;
    while valid != 0 {
        if valid & 0x1 != 0 {
            events.push(Event::new(t, x, state.last_y, polarity));
        }
        valid >>= 1;
        x += 1;
    }
}

/// Pulls words from a byte source chunk by chunk and decodes them.
///
/// Words a call could not consume (a vector group cut by the chunk boundary)
/// stay buffered and are decoded in front of the next chunk, which has the
/// same effect as seeking the source back but works on any [`Read`].
#[derive(Debug)]
pub struct ChunkDecoder<R> {
    source: R,
    state: DecodeState,
    chunk_words: usize,
    bytes: Vec<u8>,
    words: Vec<u16>,
    odd_byte: Option<u8>,
    bytes_read: u64,
    malformed_groups: u64,
    exhausted: bool,
}

impl<R: Read> ChunkDecoder<R> {
    /// Creates a decoder reading chunks of [`DEFAULT_CHUNK_WORDS`] words.
    pub fn new(source: R) -> Self {
        Self::with_chunk_words(source, DEFAULT_CHUNK_WORDS)
    }

    /// Creates a decoder reading chunks of `chunk_words` words.
    pub fn with_chunk_words(source: R, chunk_words: usize) -> Self {
        let chunk_words = chunk_words.max(VECTOR_GROUP_WORDS);
        Self {
            source,
            state: DecodeState::default(),
            chunk_words,
            bytes: vec![0u8; chunk_words * 2 + 1],
            words: Vec::with_capacity(chunk_words + VECTOR_GROUP_WORDS),
            odd_byte: None,
            bytes_read: 0,
            malformed_groups: 0,
            exhausted: false,
        }
    }

    /// Current decode state.
    pub fn state(&self) -> &DecodeState {
        &self.state
    }

    /// Bytes pulled from the source so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Vector groups dropped so far.
    pub fn malformed_groups(&self) -> u64 {
        self.malformed_groups
    }

    /// True once the source returned end of file.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Fetches the next chunk and decodes it into `events` and `triggers`.
    ///
    /// Returns `Ok(None)` once the source is exhausted. Words still held back
    /// at that point are decoded with [`decode_final_words`] first.
    pub fn decode_next(
        &mut self,
        events: &mut Vec<Event>,
        triggers: &mut Vec<Trigger>,
    ) -> io::Result<Option<ChunkOutcome>> {
        if self.exhausted {
            return Ok(None);
        }

        let carried = match self.odd_byte.take() {
            Some(byte) => {
                self.bytes[0] = byte;
                1
            }
            None => 0,
        };
        let n = read_retrying(&mut self.source, &mut self.bytes[carried..carried + self.chunk_words * 2])?;

        if n == 0 {
            self.exhausted = true;
            if carried == 1 {
                warn!("Dropping trailing odd byte at end of stream");
            }
            debug!("EVT3 payload exhausted after {} bytes", self.bytes_read);
            if self.words.is_empty() {
                return Ok(None);
            }

            let outcome = decode_final_words(&self.words, &mut self.state, events, triggers);
            self.malformed_groups += outcome.malformed_groups as u64;
            self.words.clear();
            return Ok(Some(outcome));
        }
        self.bytes_read += n as u64;

        let total = carried + n;
        let even = total & !1;
        if total > even {
            self.odd_byte = Some(self.bytes[even]);
        }

        let start = self.words.len();
        self.words.resize(start + even / 2, 0);
        LittleEndian::read_u16_into(&self.bytes[..even], &mut self.words[start..]);

        let outcome = decode_words(&self.words, &mut self.state, events, triggers);
        self.malformed_groups += outcome.malformed_groups as u64;

        let unconsumed = self.words.len() - outcome.consumed;
        if unconsumed > 0 {
            debug!("Keeping {} words of a split packet for the next chunk", unconsumed);
        }
        self.words.drain(..outcome.consumed);

        Ok(Some(outcome))
    }

    /// Decodes everything left in the source.
    pub fn decode_to_end(&mut self) -> io::Result<EventBatch> {
        let mut batch = EventBatch::default();
        while self
            .decode_next(&mut batch.events, &mut batch.triggers)?
            .is_some()
        {}
        Ok(batch)
    }
}

fn read_retrying<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{
        addr_x_word, addr_y_word, ext_trigger_word, time_high_word, time_low_word,
        vect_base_x_word, vector_group_words, SystemType,
    };

    fn decode(words: &[u16]) -> (Vec<Event>, Vec<Trigger>, ChunkOutcome, DecodeState) {
        let mut state = DecodeState::default();
        let mut events = Vec::new();
        let mut triggers = Vec::new();
        let outcome = decode_words(words, &mut state, &mut events, &mut triggers);
        (events, triggers, outcome, state)
    }

    fn to_bytes(words: &[u16]) -> Vec<u8> {
        let mut bytes = vec![0u8; words.len() * 2];
        LittleEndian::write_u16_into(words, &mut bytes);
        bytes
    }

    #[test]
    fn test_decoder_initial_state() {
        let state = DecodeState::default();
        assert!(!state.time_base_seen);
        assert_eq!(state.timestamp(), 0);
        assert_eq!(state.last_y, 0);
    }

    #[test]
    fn test_decode_simple_sequence() {
        let words: Vec<u16> = vec![
            0x8000, // TIME_HIGH: type=8, time=0
            0x6064, // TIME_LOW: type=6, time=100
            0x0032, // ADDR_Y: type=0, y=50
            0x2864, // ADDR_X: type=2, pol=1, x=100
        ];

        let (events, triggers, outcome, _) = decode(&words);

        assert_eq!(events, vec![Event::new(100, 100, 50, 1)]);
        assert!(triggers.is_empty());
        assert_eq!(outcome.consumed, 4);
        assert_eq!(outcome.events, 1);
    }

    #[test]
    fn test_words_before_time_base_are_skipped() {
        let words = vec![
            addr_y_word(9, SystemType::Master),
            addr_x_word(1, 1), // no time base yet
            time_high_word(1),
            addr_x_word(2, 0),
        ];
        let (events, _, outcome, state) = decode(&words);
        assert_eq!(events, vec![Event::new(1 << 12, 2, 0, 0)]);
        assert_eq!(outcome.consumed, 4);
        assert!(state.time_base_seen);
    }

    #[test]
    fn test_no_time_base_consumes_everything() {
        let words = vec![addr_x_word(1, 1), addr_x_word(2, 1)];
        let (events, _, outcome, state) = decode(&words);
        assert!(events.is_empty());
        assert_eq!(outcome.consumed, 2);
        assert!(!state.time_base_seen);
    }

    #[test]
    fn test_time_high_wrap_increments_epoch_once() {
        let words = vec![
            time_high_word(0xFFE),
            time_low_word(0x010),
            addr_x_word(1, 0),
            time_high_word(0x001), // went backwards: wrap
            addr_x_word(2, 0),
            time_high_word(0x002),
            addr_x_word(3, 0),
        ];
        let (events, _, _, state) = decode(&words);
        assert_eq!(state.time_high_high, 1);
        let ts: Vec<u64> = events.iter().map(|e| e.t).collect();
        assert_eq!(ts, vec![0xFFE010, 0x1_001_010, 0x1_002_010]);
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_time_low_does_not_wrap() {
        let words = vec![
            time_high_word(1),
            time_low_word(0xFFF),
            addr_x_word(0, 0),
            time_low_word(0x001),
            addr_x_word(0, 0),
        ];
        let (events, _, _, state) = decode(&words);
        assert_eq!(state.time_high_high, 0);
        assert_eq!(events[1].t, 0x1_001);
    }

    #[test]
    fn test_decode_vector_group() {
        let mut words = vec![
            time_high_word(0),
            time_low_word(200),
            addr_y_word(100, SystemType::Master),
        ];
        words.extend_from_slice(&vector_group_words(100, 1, 0b0101));

        let (events, _, outcome, _) = decode(&words);

        assert_eq!(
            events,
            vec![Event::new(200, 100, 100, 1), Event::new(200, 102, 100, 1)]
        );
        assert_eq!(outcome.consumed, words.len());
    }

    #[test]
    fn test_vector_group_spans_all_32_positions() {
        let mut words = vec![time_high_word(0)];
        words.extend_from_slice(&vector_group_words(10, 0, 0x8000_1001));
        let (events, _, _, _) = decode(&words);
        let xs: Vec<u16> = events.iter().map(|e| e.x).collect();
        assert_eq!(xs, vec![10, 22, 41]);
    }

    #[test]
    fn test_malformed_vector_group_is_dropped() {
        let mut words = vec![time_high_word(0), addr_y_word(3, SystemType::Master)];
        let mut group = vector_group_words(0, 1, 0xFFFF_FFFF);
        group[2] = addr_x_word(7, 0); // should have been VECT_12
        words.extend_from_slice(&group);
        words.push(addr_x_word(8, 1));

        let (events, _, outcome, _) = decode(&words);

        assert_eq!(outcome.malformed_groups, 1);
        assert_eq!(outcome.consumed, words.len());
        // only the single events survive, never a partial group
        let xs: Vec<u16> = events.iter().map(|e| e.x).collect();
        assert_eq!(xs, vec![7, 8]);
    }

    #[test]
    fn test_incomplete_vector_group_is_not_consumed() {
        let mut words = vec![time_high_word(0), addr_x_word(1, 0)];
        let group = vector_group_words(0, 0, 0b1);
        words.extend_from_slice(&group[..2]);

        let (events, _, outcome, _) = decode(&words);

        assert_eq!(events.len(), 1);
        assert_eq!(outcome.consumed, 2);
    }

    #[test]
    fn test_short_group_with_wrong_continuation_is_dropped_at_once() {
        let words = vec![
            time_high_word(0),
            addr_x_word(1, 0),
            vect_base_x_word(100, 1),
            addr_x_word(5, 0),
        ];

        let (events, _, outcome, _) = decode(&words);

        assert_eq!(events, vec![Event::new(0, 1, 0, 0), Event::new(0, 5, 0, 0)]);
        assert_eq!(outcome.consumed, words.len());
        assert_eq!(outcome.malformed_groups, 1);
    }

    #[test]
    fn test_final_words_skip_cut_group() {
        let mut words = vec![time_high_word(0), addr_x_word(1, 0)];
        words.extend_from_slice(&vector_group_words(0, 0, 0b1)[..3]);

        let mut state = DecodeState::default();
        let mut events = Vec::new();
        let outcome = decode_final_words(&words, &mut state, &mut events, &mut Vec::new());

        assert_eq!(events, vec![Event::new(0, 1, 0, 0)]);
        assert_eq!(outcome.consumed, words.len());
        assert_eq!(outcome.malformed_groups, 1);
    }

    #[test]
    fn test_chunk_decoder_keeps_events_after_base_word_at_end() {
        let words = vec![
            time_high_word(0),
            addr_x_word(1, 0),
            vect_base_x_word(100, 1),
            addr_x_word(5, 0),
        ];
        let bytes = to_bytes(&words);

        for chunk_words in [4, 16] {
            let mut decoder = ChunkDecoder::with_chunk_words(bytes.as_slice(), chunk_words);
            let batch = decoder.decode_to_end().unwrap();
            assert_eq!(
                batch.events,
                vec![Event::new(0, 1, 0, 0), Event::new(0, 5, 0, 0)],
                "chunk size {}",
                chunk_words
            );
            assert_eq!(decoder.malformed_groups(), 1);
        }
    }

    #[test]
    fn test_decode_triggers() {
        let words = vec![
            time_high_word(0),
            time_low_word(42),
            ext_trigger_word(3, 1),
            ext_trigger_word(15, 0),
        ];
        let (events, triggers, _, _) = decode(&words);
        assert!(events.is_empty());
        assert_eq!(triggers, vec![Trigger::new(42, 1, 3), Trigger::new(42, 0, 15)]);
    }

    #[test]
    fn test_ignored_packet_types() {
        let words = vec![
            time_high_word(0),
            0x7123, // CONTINUED_4
            0xE456, // OTHERS
            0xF789, // CONTINUED_12
            0x1000, // reserved
            0x4FFF, // stray VECT_12
            addr_x_word(5, 1),
        ];
        let (events, triggers, outcome, _) = decode(&words);
        assert_eq!(events, vec![Event::new(0, 5, 0, 1)]);
        assert!(triggers.is_empty());
        assert_eq!(outcome.consumed, words.len());
    }

    #[test]
    fn test_chunk_decoder_carries_split_vector_group() {
        let mut words = vec![time_high_word(0), time_low_word(5)];
        words.extend_from_slice(&vector_group_words(4, 1, 0b11));
        words.push(addr_x_word(9, 0));
        let bytes = to_bytes(&words);

        // chunk boundary falls inside the vector group
        let mut decoder = ChunkDecoder::with_chunk_words(bytes.as_slice(), 4);
        let batch = decoder.decode_to_end().unwrap();

        assert_eq!(
            batch.events,
            vec![
                Event::new(5, 4, 0, 1),
                Event::new(5, 5, 0, 1),
                Event::new(5, 9, 0, 0)
            ]
        );
        assert!(decoder.is_exhausted());
        assert_eq!(decoder.bytes_read(), bytes.len() as u64);
    }

    #[test]
    fn test_chunk_decoder_handles_odd_reads() {
        struct Trickle<'a>(&'a [u8]);
        impl Read for Trickle<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                // hand out at most three bytes per call
                let n = self.0.len().min(buf.len()).min(3);
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }

        let words = vec![
            time_high_word(2),
            time_low_word(7),
            addr_y_word(11, SystemType::Master),
            addr_x_word(1, 1),
            addr_x_word(2, 0),
        ];
        let bytes = to_bytes(&words);
        let mut decoder = ChunkDecoder::with_chunk_words(Trickle(&bytes), 16);
        let batch = decoder.decode_to_end().unwrap();

        let t = (2 << 12) | 7;
        assert_eq!(
            batch.events,
            vec![Event::new(t, 1, 11, 1), Event::new(t, 2, 11, 0)]
        );
    }

    #[test]
    fn test_chunk_decoder_drops_truncated_tail() {
        let mut words = vec![time_high_word(0), addr_x_word(1, 0)];
        words.extend_from_slice(&vector_group_words(0, 0, 0b1)[..3]);
        let mut bytes = to_bytes(&words);
        bytes.push(0xAB);

        let mut decoder = ChunkDecoder::new(bytes.as_slice());
        let batch = decoder.decode_to_end().unwrap();

        assert_eq!(batch.events, vec![Event::new(0, 1, 0, 0)]);
        assert!(decoder.is_exhausted());
        assert_eq!(decoder.malformed_groups(), 1);
        let mut events = Vec::new();
        let mut triggers = Vec::new();
        assert!(decoder.decode_next(&mut events, &mut triggers).unwrap().is_none());
    }
}
