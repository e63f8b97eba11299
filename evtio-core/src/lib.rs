//! Streaming EVT 3.0 codec for event camera RAW files.
//!
//! This crate reads and writes the RAW container used by Prophesee event
//! cameras: a `% key value` text header followed by an EVT 3.0 payload of
//! differentially encoded 16-bit words. Reading is incremental and windowed;
//! writing is incremental and lossless.
//!
//! # Example
//!
//! ```no_run
//! use evtio_core::{RawReader, RawWriter, ReaderOptions, WriterOptions};
//!
//! let mut reader = RawReader::open("recording.raw", &ReaderOptions::delta_t(10_000)).unwrap();
//! let (width, height) = reader.shape();
//! let mut writer = RawWriter::create("copy.raw", &WriterOptions::with_geometry(width, height)).unwrap();
//!
//! for batch in reader.by_ref() {
//!     let batch = batch.unwrap();
//!     println!("{} events, {} triggers", batch.events.len(), batch.triggers.len());
//!     writer.write(&batch.events).unwrap();
//! }
//! writer.close().unwrap();
//! ```
//!
//! # Features
//!
//! - EVT 3.0 decoding including vectorized events and external triggers
//! - Timestamp reconstruction across wraps of the 24-bit time base
//! - Chunked decoding that never splits a packet across chunks
//! - Windows by event count, time span, both, or the whole file
//! - Lossless differential encoding
//! - RAW header parsing and emission
//! - CSV interchange with customizable field ordering

pub mod csv;
pub mod decoder;
pub mod encoder;
pub mod header;
pub mod packet;
pub mod random;
pub mod reader;
pub mod types;
pub mod window;
pub mod writer;

// Re-export commonly used types
pub use csv::{CsvReader, CsvWriter, FieldOrder, OutputError, TriggerCsvWriter};
pub use decoder::{ChunkDecoder, DecodeState};
pub use encoder::Evt3Encoder;
pub use header::Header;
pub use reader::{
    decode_file, DecodeResult, EventStreamReader, FileReader, RawReader, ReadError, ReaderOptions,
};
pub use types::{Event, EventBatch, RawFormat, Trigger};
pub use window::{ConfigError, ReadMode, WindowConfig, WindowExit};
pub use writer::{EventStreamWriter, FileWriter, RawWriter, WriteError, WriterOptions};
