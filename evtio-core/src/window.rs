//! Read windows.
//!
//! A reader hands out decoded events in windows bounded by an event count, a
//! time span, both, or neither. The window is resolved once when the stream
//! is opened; [`WindowConfig`] then answers two questions for the read loop:
//! "is the accumulated buffer full?" and "how much of it goes out now?".

use crate::types::{Event, UnknownFormat};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Default time span of a window in microseconds.
pub const DEFAULT_DELTA_T: u64 = 10_000;
/// Default event count of a window.
pub const DEFAULT_N_EVENTS: u64 = 10_000;
/// Event cap used when a window is bounded by time only.
pub const MAX_EVENTS: u64 = 10_000_000;
/// Time cap used when a window is bounded by count only.
pub const MAX_DELTA_T: u64 = 1_000_000_000_000;

/// Errors in reader or writer configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Mode {0} not supported. Supported modes are: delta_t, n_events, mixed, all, auto")]
    InvalidMode(String),

    #[error("delta_t must be specified in delta_t mode")]
    MissingDeltaT,

    #[error("n_events must be specified in n_events mode")]
    MissingNEvents,

    #[error("{0} must be positive")]
    NotPositive(&'static str),

    #[error("Invalid geometry {width}x{height}: dimensions must be in 1..=2048")]
    InvalidGeometry { width: u32, height: u32 },

    #[error(transparent)]
    UnknownFormat(#[from] UnknownFormat),
}

/// How a reader bounds its windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Infer the mode from which of `delta_t` / `n_events` were given.
    #[default]
    Auto,
    DeltaT,
    NEvents,
    Mixed,
    /// Everything up to the configured maxima.
    All,
}

impl ReadMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::DeltaT => "delta_t",
            Self::NEvents => "n_events",
            Self::Mixed => "mixed",
            Self::All => "all",
        }
    }
}

impl fmt::Display for ReadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReadMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "delta_t" => Ok(Self::DeltaT),
            "n_events" => Ok(Self::NEvents),
            "mixed" => Ok(Self::Mixed),
            "all" => Ok(Self::All),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

/// Why a window stopped growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowExit {
    /// The event cap was reached.
    EventCap,
    /// The events span more than `delta_t`.
    TimeCap,
    /// The source ran dry first.
    EndOfStream,
}

/// A resolved read window. `mode` is never [`ReadMode::Auto`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub mode: ReadMode,
    /// Longest time span a window may cover, in microseconds.
    pub delta_t: u64,
    /// Most events a window may hold.
    pub max_events: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            mode: ReadMode::Mixed,
            delta_t: DEFAULT_DELTA_T,
            max_events: DEFAULT_N_EVENTS,
        }
    }
}

impl WindowConfig {
    /// Resolves a window with the default maxima.
    pub fn resolve(
        mode: ReadMode,
        delta_t: Option<u64>,
        n_events: Option<u64>,
    ) -> Result<Self, ConfigError> {
        Self::resolve_with_limits(mode, delta_t, n_events, MAX_DELTA_T, MAX_EVENTS)
    }

    /// Resolves a window.
    ///
    /// In `Auto` mode the mode follows from the given values: only `delta_t`
    /// gives `DeltaT` (event cap `max_events`), only `n_events` gives
    /// `NEvents` (time cap `max_delta_t`), both or neither give `Mixed`, the
    /// latter with the defaults.
    pub fn resolve_with_limits(
        mode: ReadMode,
        delta_t: Option<u64>,
        n_events: Option<u64>,
        max_delta_t: u64,
        max_events: u64,
    ) -> Result<Self, ConfigError> {
        let (mode, delta_t, n_events) = match (mode, delta_t, n_events) {
            (ReadMode::Auto, Some(dt), Some(n)) => (ReadMode::Mixed, dt, n),
            (ReadMode::Auto, Some(dt), None) => (ReadMode::DeltaT, dt, max_events),
            (ReadMode::Auto, None, Some(n)) => (ReadMode::NEvents, max_delta_t, n),
            (ReadMode::Auto, None, None) => (ReadMode::Mixed, DEFAULT_DELTA_T, DEFAULT_N_EVENTS),
            (ReadMode::DeltaT, Some(dt), _) => (ReadMode::DeltaT, dt, max_events),
            (ReadMode::DeltaT, None, _) => return Err(ConfigError::MissingDeltaT),
            (ReadMode::NEvents, _, Some(n)) => (ReadMode::NEvents, max_delta_t, n),
            (ReadMode::NEvents, _, None) => return Err(ConfigError::MissingNEvents),
            (ReadMode::Mixed, dt, n) => (
                ReadMode::Mixed,
                dt.unwrap_or(DEFAULT_DELTA_T),
                n.unwrap_or(DEFAULT_N_EVENTS),
            ),
            (ReadMode::All, _, _) => (ReadMode::All, max_delta_t, max_events),
        };

        if delta_t == 0 {
            return Err(ConfigError::NotPositive("delta_t"));
        }
        if n_events == 0 {
            return Err(ConfigError::NotPositive("n_events"));
        }

        Ok(Self {
            mode,
            delta_t,
            max_events: n_events,
        })
    }

    /// Whether the time span bounds this window.
    pub fn is_time_bounded(&self) -> bool {
        matches!(self.mode, ReadMode::DeltaT | ReadMode::Mixed)
    }

    fn event_cap(&self) -> usize {
        usize::try_from(self.max_events).unwrap_or(usize::MAX)
    }

    /// Why `events` already fills a window, or `None` while more data is
    /// needed. The event cap is checked before the time span.
    pub fn exit_reason(&self, events: &[Event]) -> Option<WindowExit> {
        if events.len() >= self.event_cap() {
            return Some(WindowExit::EventCap);
        }
        match (self.is_time_bounded(), events.first(), events.last()) {
            (true, Some(first), Some(last)) if last.t.saturating_sub(first.t) > self.delta_t => {
                Some(WindowExit::TimeCap)
            }
            _ => None,
        }
    }

    /// Number of leading events of `events` released for a window that
    /// stopped growing because of `exit`.
    ///
    /// A time-cap exit releases the events with `t <= first.t + delta_t`.
    /// Any other exit releases everything, up to `max_events`.
    pub fn split_index(&self, events: &[Event], exit: WindowExit) -> usize {
        let cut = events.len().min(self.event_cap());
        match (exit, events.first()) {
            (WindowExit::TimeCap, Some(first)) => {
                let limit = first.t.saturating_add(self.delta_t);
                cut.min(events.partition_point(|e| e.t <= limit))
            }
            _ => cut,
        }
    }
}
