//! CSV interchange for events and triggers.
//!
//! Plain text on the other side of the RAW codec: the CLI decodes RAW files
//! into CSV and encodes CSV back into RAW.

use crate::types::{Event, Trigger};
use std::io::{BufRead, BufWriter, Write};
use thiserror::Error;

/// Errors that can occur while reading or writing CSV.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Line {line}: {message}")]
    InvalidRecord { line: u64, message: String },
}

/// Field ordering for CSV columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldOrder {
    /// t, x, y, p (default)
    #[default]
    TXYP,
    /// x, y, p, t
    XYPT,
    /// x, y, t, p
    XYTP,
    /// Custom order specified by indices (x=0, y=1, p=2, t=3)
    Custom([usize; 4]),
}

impl std::str::FromStr for FieldOrder {
    type Err = OutputError;

    /// Parses a field order from a format string like "t,x,y,p" or "x,y,p,t".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<String> = s.split(',').map(|p| p.trim().to_lowercase()).collect();

        if parts.len() != 4 {
            return Err(OutputError::InvalidFormat(
                "Format must have exactly 4 fields: t, x, y, p".to_string(),
            ));
        }

        // Map field names to indices: x=0, y=1, p=2, t=3
        let mut indices = [0usize; 4];
        let mut used = [false; 4];

        for (i, part) in parts.iter().enumerate() {
            let field_idx = match part.as_str() {
                "x" => 0,
                "y" => 1,
                "p" | "pol" | "polarity" => 2,
                "t" | "time" | "timestamp" => 3,
                _ => {
                    return Err(OutputError::InvalidFormat(format!(
                        "Unknown field: {}. Use t, x, y, p",
                        part
                    )))
                }
            };

            if used[field_idx] {
                return Err(OutputError::InvalidFormat(format!(
                    "Duplicate field: {}",
                    part
                )));
            }

            indices[i] = field_idx;
            used[field_idx] = true;
        }

        Ok(Self::from_indices(indices))
    }
}

impl FieldOrder {
    fn from_indices(indices: [usize; 4]) -> Self {
        match indices {
            [3, 0, 1, 2] => Self::TXYP,
            [0, 1, 2, 3] => Self::XYPT,
            [0, 1, 3, 2] => Self::XYTP,
            other => Self::Custom(other),
        }
    }

    /// Field shown in each column (x=0, y=1, p=2, t=3).
    pub fn indices(&self) -> [usize; 4] {
        match self {
            Self::TXYP => [3, 0, 1, 2],
            Self::XYPT => [0, 1, 2, 3],
            Self::XYTP => [0, 1, 3, 2],
            Self::Custom(indices) => *indices,
        }
    }

    /// Returns the column header line for this field order.
    pub fn header(&self) -> String {
        const NAMES: [&str; 4] = ["x", "y", "p", "t"];
        self.indices()
            .iter()
            .map(|&i| NAMES[i])
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// CSV output writer for events.
pub struct CsvWriter<W: Write> {
    writer: BufWriter<W>,
    field_order: FieldOrder,
}

impl<W: Write> CsvWriter<W> {
    /// Creates a new CSV writer.
    pub fn new(writer: W, field_order: FieldOrder) -> Self {
        Self {
            writer: BufWriter::new(writer),
            field_order,
        }
    }

    /// Writes an optional geometry comment and the column header.
    pub fn write_header(&mut self, geometry: Option<(u32, u32)>) -> Result<(), OutputError> {
        if let Some((width, height)) = geometry {
            writeln!(self.writer, "%geometry:{},{}", width, height)?;
        }
        writeln!(self.writer, "{}", self.field_order.header())?;
        Ok(())
    }

    /// Writes a batch of events.
    pub fn write_events(&mut self, events: &[Event]) -> Result<(), OutputError> {
        for event in events {
            self.write_event(event)?;
        }
        Ok(())
    }

    /// Writes a single event.
    #[inline]
    fn write_event(&mut self, event: &Event) -> Result<(), OutputError> {
        match self.field_order {
            FieldOrder::TXYP => {
                writeln!(self.writer, "{},{},{},{}", event.t, event.x, event.y, event.p)?;
            }
            FieldOrder::XYPT => {
                writeln!(self.writer, "{},{},{},{}", event.x, event.y, event.p, event.t)?;
            }
            FieldOrder::XYTP => {
                writeln!(self.writer, "{},{},{},{}", event.x, event.y, event.t, event.p)?;
            }
            FieldOrder::Custom(indices) => {
                let values = [event.x as u64, event.y as u64, event.p as u64, event.t];
                writeln!(
                    self.writer,
                    "{},{},{},{}",
                    values[indices[0]], values[indices[1]], values[indices[2]], values[indices[3]]
                )?;
            }
        }
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// CSV writer for trigger events, columns `t,p,id`.
pub struct TriggerCsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> TriggerCsvWriter<W> {
    /// Creates a new trigger CSV writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes the column header.
    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "t,p,id")?;
        Ok(())
    }

    /// Writes a batch of trigger events.
    pub fn write_events(&mut self, triggers: &[Trigger]) -> Result<(), OutputError> {
        for trigger in triggers {
            writeln!(self.writer, "{},{},{}", trigger.t, trigger.p, trigger.id)?;
        }
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// CSV reader for events.
///
/// Lines starting with `%` are comments (a `%geometry:W,H` comment is picked
/// up), a line starting with a letter is the column header and is skipped.
pub struct CsvReader<R: BufRead> {
    reader: R,
    field_order: FieldOrder,
    geometry: Option<(u32, u32)>,
    line: String,
    line_number: u64,
    eof: bool,
}

impl<R: BufRead> CsvReader<R> {
    /// Creates a new CSV reader.
    pub fn new(reader: R, field_order: FieldOrder) -> Self {
        Self {
            reader,
            field_order,
            geometry: None,
            line: String::new(),
            line_number: 0,
            eof: false,
        }
    }

    /// Geometry from a `%geometry:W,H` comment, once it has been read.
    pub fn geometry(&self) -> Option<(u32, u32)> {
        self.geometry
    }

    /// True once the input is exhausted.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Reads up to `max_events` events. Returns an empty vector at the end.
    pub fn read_events(&mut self, max_events: usize) -> Result<Vec<Event>, OutputError> {
        let mut events = Vec::new();
        while events.len() < max_events && !self.eof {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                self.eof = true;
                break;
            }
            self.line_number += 1;

            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(comment) = line.strip_prefix('%') {
                if let Some(geometry) = comment.trim().strip_prefix("geometry:") {
                    self.geometry = parse_geometry_comment(geometry);
                }
                continue;
            }
            if line.starts_with(|c: char| c.is_ascii_alphabetic()) {
                continue;
            }

            events.push(parse_record(line, self.field_order).map_err(|message| {
                OutputError::InvalidRecord {
                    line: self.line_number,
                    message,
                }
            })?);
        }
        Ok(events)
    }
}

fn parse_geometry_comment(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once(',')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn parse_record(line: &str, order: FieldOrder) -> Result<Event, String> {
    let columns: Vec<&str> = line.split(',').map(str::trim).collect();
    if columns.len() != 4 {
        return Err(format!("expected 4 columns, got {}", columns.len()));
    }

    // values[field] with field x=0, y=1, p=2, t=3
    let mut values = [0u64; 4];
    for (column, &field) in columns.iter().zip(order.indices().iter()) {
        values[field] = column
            .parse()
            .map_err(|e| format!("invalid value {:?}: {}", column, e))?;
    }

    let narrow = |value: u64, name: &str| {
        u16::try_from(value).map_err(|_| format!("{} {} out of range", name, value))
    };
    let x = narrow(values[0], "x")?;
    let y = narrow(values[1], "y")?;
    if values[2] > 1 {
        return Err(format!("polarity {} is not 0 or 1", values[2]));
    }
    Ok(Event::new(values[3], x, y, values[2] as u8))
}
