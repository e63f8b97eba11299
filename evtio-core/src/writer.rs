//! RAW stream writer.
//!
//! [`RawWriter`] emits the header on the first write (or on close, for an
//! empty recording) and appends differentially encoded EVT 3.0 words for
//! every batch it is given.

use crate::encoder::Evt3Encoder;
use crate::header::{Header, MAX_DIMENSION};
use crate::packet::SystemType;
use crate::types::{Event, RawFormat, MAX_COORDINATE};
use crate::window::ConfigError;
use chrono::NaiveDateTime;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while writing a RAW stream.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Encoding {0} is not implemented")]
    NotImplemented(RawFormat),
}

/// Options for creating a writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    pub width: u32,
    pub height: u32,
    /// Recording date for the header; the current local time if `None`.
    pub date: Option<NaiveDateTime>,
    pub serial_number: String,
    pub format: RawFormat,
    pub system_type: SystemType,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            date: None,
            serial_number: "00000000".to_string(),
            format: RawFormat::Evt3,
            system_type: SystemType::Master,
        }
    }
}

impl WriterOptions {
    /// Options for a sensor of the given size.
    pub fn with_geometry(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let valid = |v: u32| v > 0 && v <= MAX_DIMENSION;
        if !valid(self.width) || !valid(self.height) {
            return Err(ConfigError::InvalidGeometry {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// A sink for event batches.
pub trait EventStreamWriter {
    /// Appends `events`, which must be sorted by timestamp.
    fn write(&mut self, events: &[Event]) -> Result<(), WriteError>;

    /// Flushes everything and releases the sink.
    fn close(self) -> Result<(), WriteError>
    where
        Self: Sized;
}

/// Payload codec selected from the options.
#[derive(Debug)]
enum Payload {
    Evt3(Evt3Encoder),
    Unsupported(RawFormat),
}

/// Writer for RAW files.
#[derive(Debug)]
pub struct RawWriter<W: Write> {
    sink: BufWriter<W>,
    header: Header,
    payload: Payload,
    header_written: bool,
    buffer: Vec<u8>,
    n_written_events: u64,
    bytes_written: u64,
}

/// A [`RawWriter`] over a file.
pub type FileWriter = RawWriter<File>;

impl RawWriter<File> {
    /// Creates (or truncates) a RAW file.
    ///
    /// Options are validated before the file is created.
    pub fn create<P: AsRef<Path>>(path: P, options: &WriterOptions) -> Result<Self, WriteError> {
        options.validate()?;
        let file = File::create(path.as_ref())?;
        debug!("Created {:?} for writing", path.as_ref());
        Self::new(file, options)
    }
}

impl<W: Write> RawWriter<W> {
    /// Wraps `sink`. Nothing is written until the first batch.
    pub fn new(sink: W, options: &WriterOptions) -> Result<Self, WriteError> {
        options.validate()?;
        let header = Header::for_recording(
            options.width,
            options.height,
            options.format,
            options.date,
            &options.serial_number,
        );
        let payload = match options.format {
            RawFormat::Evt3 => Payload::Evt3(Evt3Encoder::with_system_type(options.system_type)),
            other => Payload::Unsupported(other),
        };

        Ok(Self {
            sink: BufWriter::new(sink),
            header,
            payload,
            header_written: false,
            buffer: Vec::new(),
            n_written_events: 0,
            bytes_written: 0,
        })
    }

    /// The header this writer emits.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Events written so far.
    pub fn n_written_events(&self) -> u64 {
        self.n_written_events
    }

    /// Bytes written so far, header included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Writes the header if that has not happened yet.
    ///
    /// Fails without writing anything when the format cannot be encoded.
    pub fn init(&mut self) -> Result<(), WriteError> {
        if let Payload::Unsupported(format) = self.payload {
            return Err(WriteError::NotImplemented(format));
        }
        if !self.header_written {
            self.bytes_written += self.header.write_to(&mut self.sink)?;
            self.header_written = true;
        }
        Ok(())
    }

    /// Encodes and appends `events`.
    ///
    /// Timestamps are relative to the start of the recording. Every wrap of
    /// the 24-bit time base that the stream skips costs 4 bytes, so absolute
    /// clock times (e.g. Unix microseconds) produce a huge file; a warning is
    /// logged when that happens.
    pub fn write(&mut self, events: &[Event]) -> Result<(), WriteError> {
        self.init()?;
        let encoder = match &mut self.payload {
            Payload::Evt3(encoder) => encoder,
            Payload::Unsupported(format) => return Err(WriteError::NotImplemented(*format)),
        };

        if events
            .iter()
            .any(|e| e.x > MAX_COORDINATE || e.y > MAX_COORDINATE)
        {
            warn!("Coordinates above {} are truncated to 11 bits", MAX_COORDINATE);
        }
        if events.iter().any(|e| e.p > 1) {
            warn!("Polarities above 1 are truncated to their lowest bit");
        }

        self.buffer.clear();
        let out_of_order = encoder.encode(events, &mut self.buffer);
        if out_of_order > 0 {
            warn!(
                "{} events are out of timestamp order and will not decode to the same time",
                out_of_order
            );
        }

        self.sink.write_all(&self.buffer)?;
        self.bytes_written += self.buffer.len() as u64;
        self.n_written_events += events.len() as u64;
        Ok(())
    }

    /// Flushes and returns the underlying sink.
    ///
    /// An EVT 3.0 writer that never received a batch still writes its header,
    /// so the result is a valid, empty recording.
    pub fn finish(mut self) -> Result<W, WriteError> {
        if let Payload::Evt3(_) = self.payload {
            self.init()?;
        }
        self.sink.flush()?;
        debug!(
            "Wrote {} events in {} bytes",
            self.n_written_events, self.bytes_written
        );
        self.sink
            .into_inner()
            .map_err(|e| WriteError::Io(e.into_error()))
    }

    /// Flushes and releases the underlying sink.
    pub fn close(self) -> Result<(), WriteError> {
        self.finish().map(|_| ())
    }
}

impl<W: Write> EventStreamWriter for RawWriter<W> {
    fn write(&mut self, events: &[Event]) -> Result<(), WriteError> {
        RawWriter::write(self, events)
    }

    fn close(self) -> Result<(), WriteError> {
        RawWriter::close(self)
    }
}
