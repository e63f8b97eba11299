//! Core types for event streams.
//!
//! This module defines the decoded event records, the EVT 3.0 packet tags and
//! the RAW payload formats a file header can declare.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest coordinate representable on the wire (11 bits).
pub const MAX_COORDINATE: u16 = 0x07FF;

/// A decoded Change Detection (CD) event.
///
/// Events represent brightness changes detected by the sensor. Each event
/// carries its timestamp in microseconds, the pixel coordinates and the
/// polarity (increase/decrease in brightness).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Event {
    /// Timestamp in microseconds
    pub t: u64,
    /// X coordinate of the pixel (0-2047)
    pub x: u16,
    /// Y coordinate of the pixel (0-2047)
    pub y: u16,
    /// Event polarity: 0 = OFF (decrease), 1 = ON (increase in brightness)
    pub p: u8,
}

impl Event {
    /// Creates a new event.
    #[inline]
    pub fn new(t: u64, x: u16, y: u16, p: u8) -> Self {
        Self { t, x, y, p }
    }
}

/// An external trigger event.
///
/// Trigger events indicate that an edge was detected on an external trigger
/// channel. They are decoded from the same stream as CD events but delivered
/// separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct Trigger {
    /// Timestamp in microseconds
    pub t: u64,
    /// Edge polarity: 0 = falling edge, 1 = rising edge
    pub p: u8,
    /// Trigger channel ID (0-15)
    pub id: u8,
}

impl Trigger {
    /// Creates a new trigger event.
    #[inline]
    pub fn new(t: u64, p: u8, id: u8) -> Self {
        Self { t, p, id }
    }
}

/// One window of decoded data handed out by a reader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBatch {
    pub events: Vec<Event>,
    pub triggers: Vec<Trigger>,
}

impl EventBatch {
    /// True when the batch holds neither events nor triggers.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.triggers.is_empty()
    }
}

/// EVT 3.0 packet types.
///
/// Each 16-bit word in the EVT 3.0 format has a 4-bit type field in the MSB
/// that identifies the packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Y coordinate and system type (0x0)
    AddrY = 0x0,
    /// Single valid event with X coordinate and polarity (0x2)
    AddrX = 0x2,
    /// Base X coordinate of a vector group (0x3)
    VectBaseX = 0x3,
    /// Vector continuation with 12 validity bits (0x4)
    Vect12 = 0x4,
    /// Vector continuation with 8 validity bits (0x5)
    Vect8 = 0x5,
    /// Lower 12 bits of timestamp (0x6)
    TimeLow = 0x6,
    /// Continued event with 4 bits of data (0x7)
    Continued4 = 0x7,
    /// Upper 12 bits of timestamp (0x8)
    TimeHigh = 0x8,
    /// External trigger event (0xA)
    ExtTrigger = 0xA,
    /// Extension event type (0xE)
    Others = 0xE,
    /// Continued event with 12 bits of data (0xF)
    Continued12 = 0xF,
}

impl PacketType {
    /// Attempts to parse a packet type from a 4-bit value.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::AddrY),
            0x2 => Some(Self::AddrX),
            0x3 => Some(Self::VectBaseX),
            0x4 => Some(Self::Vect12),
            0x5 => Some(Self::Vect8),
            0x6 => Some(Self::TimeLow),
            0x7 => Some(Self::Continued4),
            0x8 => Some(Self::TimeHigh),
            0xA => Some(Self::ExtTrigger),
            0xE => Some(Self::Others),
            0xF => Some(Self::Continued12),
            _ => None,
        }
    }

    /// The tag shifted into the top nibble of a word.
    #[inline]
    pub fn tag(self) -> u16 {
        (self as u16) << 12
    }
}

/// Payload formats a RAW file header can declare.
///
/// Only EVT 3.0 is implemented; the EVT 2 variants are recognized so that
/// they can be rejected explicitly instead of being misread as EVT 3.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RawFormat {
    #[default]
    Evt3,
    Evt2,
    Evt21,
}

/// Error for format names that are not one of `EVT3`, `EVT2`, `EVT2.1`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown format {0}. Supported formats are EVT3, EVT2.1, EVT2")]
pub struct UnknownFormat(pub String);

impl RawFormat {
    /// Name as it appears in the `format` header line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Evt3 => "EVT3",
            Self::Evt2 => "EVT2",
            Self::Evt21 => "EVT2.1",
        }
    }

    /// Version string used by the `evt` header line.
    pub fn evt_version(self) -> &'static str {
        match self {
            Self::Evt3 => "3.0",
            Self::Evt2 => "2.0",
            Self::Evt21 => "2.1",
        }
    }

    /// Maps an `evt` header version back to its format.
    pub fn from_evt_version(version: &str) -> Option<Self> {
        match version {
            "3.0" => Some(Self::Evt3),
            "2.1" => Some(Self::Evt21),
            "2.0" => Some(Self::Evt2),
            _ => None,
        }
    }

    /// Whether payloads in this format can actually be decoded and encoded.
    pub fn is_implemented(self) -> bool {
        matches!(self, Self::Evt3)
    }
}

impl fmt::Display for RawFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RawFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "EVT3" | "EVT3.0" => Ok(Self::Evt3),
            "EVT2" | "EVT2.0" => Ok(Self::Evt2),
            "EVT2.1" => Ok(Self::Evt21),
            other => Err(UnknownFormat(other.to_string())),
        }
    }
}

/// Returns true if event timestamps never decrease.
pub fn is_monotonic(events: &[Event]) -> bool {
    events.windows(2).all(|w| w[0].t <= w[1].t)
}
