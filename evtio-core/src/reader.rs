//! Windowed RAW stream reader.
//!
//! [`RawReader`] parses the header, then pulls chunks through a
//! [`ChunkDecoder`] until the configured window is full and hands the window
//! out. Events decoded past the window stay in a carry buffer for the next
//! [`RawReader::read`] call.

use crate::decoder::{ChunkDecoder, DEFAULT_CHUNK_WORDS};
use crate::header::Header;
use crate::types::{Event, EventBatch, RawFormat, Trigger};
use crate::window::{ConfigError, ReadMode, WindowConfig, WindowExit, MAX_DELTA_T, MAX_EVENTS};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while reading a RAW stream.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Decoding {0} is not implemented")]
    NotImplemented(RawFormat),
}

/// Options for opening a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderOptions {
    pub mode: ReadMode,
    /// Time span of a window in microseconds.
    pub delta_t: Option<u64>,
    /// Event count of a window.
    pub n_events: Option<u64>,
    /// Event cap for windows not bounded by count.
    pub max_events: u64,
    /// Time cap for windows not bounded by time.
    pub max_delta_t: u64,
    /// Words pulled from the file per chunk.
    pub chunk_words: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            mode: ReadMode::Auto,
            delta_t: None,
            n_events: None,
            max_events: MAX_EVENTS,
            max_delta_t: MAX_DELTA_T,
            chunk_words: DEFAULT_CHUNK_WORDS,
        }
    }
}

impl ReaderOptions {
    /// Windows of `delta_t` microseconds.
    pub fn delta_t(delta_t: u64) -> Self {
        Self {
            delta_t: Some(delta_t),
            ..Self::default()
        }
    }

    /// Windows of `n_events` events.
    pub fn n_events(n_events: u64) -> Self {
        Self {
            n_events: Some(n_events),
            ..Self::default()
        }
    }

    /// Resolves the window these options describe.
    pub fn window(&self) -> Result<WindowConfig, ConfigError> {
        WindowConfig::resolve_with_limits(
            self.mode,
            self.delta_t,
            self.n_events,
            self.max_delta_t,
            self.max_events,
        )
    }
}

/// A pull-based source of event windows.
pub trait EventStreamReader {
    /// Reads the next window. Empty once the stream is exhausted.
    fn read(&mut self) -> Result<EventBatch, ReadError>;

    /// True once the source is exhausted and nothing is left to hand out.
    fn is_end_of_stream(&self) -> bool;

    /// The parsed file header.
    fn header(&self) -> &Header;
}

/// Payload codec selected from the header.
#[derive(Debug)]
enum Payload<R> {
    Evt3(ChunkDecoder<R>),
    Unsupported(RawFormat),
}

/// Reader for RAW files.
#[derive(Debug)]
pub struct RawReader<R> {
    header: Header,
    header_len: u64,
    window: WindowConfig,
    payload: Payload<R>,
    events: Vec<Event>,
    triggers: Vec<Trigger>,
    n_read_events: u64,
    done: bool,
}

/// A [`RawReader`] over a file.
pub type FileReader = RawReader<BufReader<File>>;

impl RawReader<BufReader<File>> {
    /// Opens a RAW file.
    ///
    /// The window is validated before the file is touched.
    pub fn open<P: AsRef<Path>>(path: P, options: &ReaderOptions) -> Result<Self, ReadError> {
        let window = options.window()?;
        let file = File::open(path.as_ref())?;
        debug!("Opened {:?} for reading", path.as_ref());
        Self::with_window(BufReader::new(file), window, options.chunk_words)
    }
}

impl<R: BufRead> RawReader<R> {
    /// Reads the header from `source` and prepares the payload decoder.
    pub fn from_reader(source: R, options: &ReaderOptions) -> Result<Self, ReadError> {
        let window = options.window()?;
        Self::with_window(source, window, options.chunk_words)
    }

    fn with_window(mut source: R, window: WindowConfig, chunk_words: usize) -> Result<Self, ReadError> {
        let (header, header_len) = Header::read_from(&mut source)?;
        debug!(
            "Header: {} {}x{}, {} bytes; window {:?}",
            header.format_name, header.width, header.height, header_len, window
        );

        let payload = if header.format_name.is_implemented() {
            Payload::Evt3(ChunkDecoder::with_chunk_words(source, chunk_words))
        } else {
            Payload::Unsupported(header.format_name)
        };

        Ok(Self {
            header,
            header_len,
            window,
            payload,
            events: Vec::new(),
            triggers: Vec::new(),
            n_read_events: 0,
            done: false,
        })
    }

    /// The resolved window.
    pub fn window(&self) -> &WindowConfig {
        &self.window
    }

    /// Sensor `(width, height)` from the header.
    pub fn shape(&self) -> (u32, u32) {
        (self.header.width, self.header.height)
    }

    /// Events handed out so far.
    pub fn n_read_events(&self) -> u64 {
        self.n_read_events
    }

    /// Bytes consumed from the underlying source, header included.
    pub fn position(&self) -> u64 {
        match &self.payload {
            Payload::Evt3(decoder) => self.header_len + decoder.bytes_read(),
            Payload::Unsupported(_) => self.header_len,
        }
    }

    /// Vector groups dropped as malformed so far.
    pub fn malformed_groups(&self) -> u64 {
        match &self.payload {
            Payload::Evt3(decoder) => decoder.malformed_groups(),
            Payload::Unsupported(_) => 0,
        }
    }

    /// Reads the next window.
    ///
    /// Chunks are decoded until the event cap is reached, the events span
    /// more than `delta_t`, or the source runs dry. Only in the second case is
    /// the window cut at `first.t + delta_t`; otherwise everything up to the
    /// event cap is returned. The triggers that precede the first event kept
    /// back go along; everything else is carried over to the next call.
    pub fn read(&mut self) -> Result<EventBatch, ReadError> {
        let decoder = match &mut self.payload {
            Payload::Evt3(decoder) => decoder,
            Payload::Unsupported(format) => return Err(ReadError::NotImplemented(*format)),
        };

        let exit = loop {
            if let Some(exit) = self.window.exit_reason(&self.events) {
                break exit;
            }
            if decoder
                .decode_next(&mut self.events, &mut self.triggers)?
                .is_none()
            {
                break WindowExit::EndOfStream;
            }
        };

        let cut = self.window.split_index(&self.events, exit);
        let events: Vec<Event> = self.events.drain(..cut).collect();
        let triggers: Vec<Trigger> = match self.events.first() {
            Some(next) => {
                let pending = self.triggers.partition_point(|trigger| trigger.t < next.t);
                self.triggers.drain(..pending).collect()
            }
            None => std::mem::take(&mut self.triggers),
        };

        self.n_read_events += events.len() as u64;
        Ok(EventBatch { events, triggers })
    }

    /// True once the source is exhausted and no events or triggers are
    /// carried.
    pub fn is_end_of_stream(&self) -> bool {
        match &self.payload {
            Payload::Evt3(decoder) => {
                decoder.is_exhausted() && self.events.is_empty() && self.triggers.is_empty()
            }
            Payload::Unsupported(_) => false,
        }
    }

    /// The parsed file header.
    pub fn header(&self) -> &Header {
        &self.header
    }
}

impl<R: BufRead> EventStreamReader for RawReader<R> {
    fn read(&mut self) -> Result<EventBatch, ReadError> {
        RawReader::read(self)
    }

    fn is_end_of_stream(&self) -> bool {
        RawReader::is_end_of_stream(self)
    }

    fn header(&self) -> &Header {
        RawReader::header(self)
    }
}

impl<R: BufRead> Iterator for RawReader<R> {
    type Item = Result<EventBatch, ReadError>;

    /// Yields windows until the stream is exhausted; stops after an error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read() {
            Ok(batch) if batch.is_empty() && self.is_end_of_stream() => {
                self.done = true;
                None
            }
            Ok(batch) => Some(Ok(batch)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Everything decoded from a RAW file.
#[derive(Debug)]
pub struct DecodeResult {
    pub header: Header,
    pub events: Vec<Event>,
    pub triggers: Vec<Trigger>,
}

/// Decodes a whole RAW file.
pub fn decode_file<P: AsRef<Path>>(path: P) -> Result<DecodeResult, ReadError> {
    let options = ReaderOptions {
        mode: ReadMode::All,
        ..ReaderOptions::default()
    };
    let mut reader = RawReader::open(path, &options)?;

    let mut events = Vec::new();
    let mut triggers = Vec::new();
    for batch in reader.by_ref() {
        let batch = batch?;
        events.extend_from_slice(&batch.events);
        triggers.extend_from_slice(&batch.triggers);
    }

    Ok(DecodeResult {
        header: reader.header().clone(),
        events,
        triggers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Evt3Encoder;
    use crate::packet::{ext_trigger_word, time_high_word, time_low_word};
    use byteorder::{ByteOrder, LittleEndian};

    fn raw_stream(events: &[Event]) -> Vec<u8> {
        let mut data = Header::for_recording(640, 480, RawFormat::Evt3, None, "00000000")
            .to_text()
            .into_bytes();
        Evt3Encoder::new().encode(events, &mut data);
        data
    }

    fn evenly_spaced(n: u64) -> Vec<Event> {
        (0..n).map(|i| Event::new(i * 10, (i % 640) as u16, (i % 480) as u16, (i % 2) as u8)).collect()
    }

    #[test]
    fn test_n_events_windows() {
        let events = evenly_spaced(250);
        let data = raw_stream(&events);
        let mut reader = RawReader::from_reader(data.as_slice(), &ReaderOptions::n_events(100)).unwrap();
        assert_eq!(reader.window().mode, ReadMode::NEvents);

        let sizes: Vec<usize> = (0..3).map(|_| reader.read().unwrap().events.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        assert!(reader.read().unwrap().is_empty());
        assert!(reader.is_end_of_stream());
        assert_eq!(reader.n_read_events(), 250);
        assert_eq!(reader.position(), data.len() as u64);
    }

    #[test]
    fn test_delta_t_windows() {
        let events: Vec<Event> = [0, 500, 999, 1001, 1500]
            .iter()
            .map(|&t| Event::new(t, 1, 2, 1))
            .collect();
        let data = raw_stream(&events);
        let mut reader = RawReader::from_reader(data.as_slice(), &ReaderOptions::delta_t(1000)).unwrap();

        assert_eq!(reader.read().unwrap().events, events[..3].to_vec());
        assert!(!reader.is_end_of_stream());
        assert_eq!(reader.read().unwrap().events, events[3..].to_vec());
        assert!(reader.read().unwrap().is_empty());
        assert!(reader.is_end_of_stream());
    }

    #[test]
    fn test_mixed_window_stops_at_event_cap_first() {
        let events: Vec<Event> = [0, 10, 200, 210, 220]
            .iter()
            .map(|&t| Event::new(t, 3, 4, 0))
            .collect();
        let data = raw_stream(&events);
        let options = ReaderOptions {
            mode: ReadMode::Mixed,
            delta_t: Some(100),
            n_events: Some(3),
            ..ReaderOptions::default()
        };
        let reader = RawReader::from_reader(data.as_slice(), &options).unwrap();

        let windows: Vec<Vec<Event>> = reader.map(|batch| batch.unwrap().events).collect();
        assert_eq!(windows, vec![events[..3].to_vec(), events[3..].to_vec()]);
    }

    #[test]
    fn test_carry_survives_small_chunks() {
        let events = evenly_spaced(1_000);
        let data = raw_stream(&events);
        let options = ReaderOptions {
            mode: ReadMode::Mixed,
            delta_t: Some(777),
            n_events: Some(60),
            chunk_words: 16,
            ..ReaderOptions::default()
        };
        let reader = RawReader::from_reader(data.as_slice(), &options).unwrap();

        let batches: Vec<EventBatch> = reader.map(Result::unwrap).collect();
        assert!(batches.iter().all(|b| b.events.len() <= 60));
        for batch in &batches {
            let span = batch.events.last().unwrap().t - batch.events[0].t;
            assert!(span <= 777);
        }
        let all: Vec<Event> = batches.into_iter().flat_map(|b| b.events).collect();
        assert_eq!(all, events);
    }

    #[test]
    fn test_triggers_follow_their_window() {
        let header = Header::for_recording(64, 64, RawFormat::Evt3, None, "1");
        let mut data = header.to_text().into_bytes();
        let mut encoder = Evt3Encoder::new();
        encoder.encode(&[Event::new(10, 0, 0, 0)], &mut data);

        let words = [time_low_word(20), ext_trigger_word(1, 1)];
        let mut bytes = [0u8; 4];
        LittleEndian::write_u16_into(&words, &mut bytes);
        data.extend_from_slice(&bytes);

        encoder.encode(&[Event::new(5_000, 1, 1, 1)], &mut data);

        let mut reader = RawReader::from_reader(data.as_slice(), &ReaderOptions::delta_t(100)).unwrap();
        let first = reader.read().unwrap();
        assert_eq!(first.events.len(), 1);
        assert_eq!(first.triggers, vec![Trigger::new(20, 1, 1)]);

        let second = reader.read().unwrap();
        assert_eq!(second.events, vec![Event::new(5_000, 1, 1, 1)]);
        assert!(second.triggers.is_empty());
    }

    #[test]
    fn test_unsupported_format_is_rejected() {
        let header = Header::for_recording(64, 64, RawFormat::Evt21, None, "1");
        let mut data = header.to_text().into_bytes();
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, time_high_word(0));
        data.extend_from_slice(&bytes);

        let mut reader = RawReader::from_reader(data.as_slice(), &ReaderOptions::default()).unwrap();
        assert_eq!(reader.header().format_name, RawFormat::Evt21);
        assert!(matches!(reader.read(), Err(ReadError::NotImplemented(RawFormat::Evt21))));

        let reader = RawReader::from_reader(data.as_slice(), &ReaderOptions::default()).unwrap();
        let items: Vec<_> = reader.collect();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[test]
    fn test_invalid_options_fail_before_reading() {
        let options = ReaderOptions {
            mode: ReadMode::DeltaT,
            ..ReaderOptions::default()
        };
        assert!(matches!(
            RawReader::from_reader(&b""[..], &options),
            Err(ReadError::Config(ConfigError::MissingDeltaT))
        ));
        assert!(matches!(
            RawReader::open("/definitely/not/here.raw", &ReaderOptions::n_events(0)),
            Err(ReadError::Config(ConfigError::NotPositive("n_events")))
        ));
        assert!(matches!(
            RawReader::open("/definitely/not/here.raw", &ReaderOptions::default()),
            Err(ReadError::Io(_))
        ));
    }

    #[test]
    fn test_empty_payload() {
        let data = raw_stream(&[]);
        let mut reader = RawReader::from_reader(data.as_slice(), &ReaderOptions::default()).unwrap();
        assert!(reader.read().unwrap().is_empty());
        assert!(reader.is_end_of_stream());
    }
}
