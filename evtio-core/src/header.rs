//! RAW file header codec.
//!
//! A RAW file starts with ASCII lines of the form `% key value`, terminated by
//! `% end`, followed by the binary payload. Header problems are never fatal:
//! bad values and unknown keys are logged and skipped, and sensor geometry
//! falls back to 2048x2048 when it cannot be resolved.

use crate::types::RawFormat;
use chrono::{Local, NaiveDateTime};
use std::io::{self, BufRead, Write};
use tracing::warn;

/// Largest sensor dimension the EVT 3.0 coordinate fields can address.
pub const MAX_DIMENSION: u32 = 2048;

/// Layout of the `date` header value.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DEFAULT_GENERATION: &str = "4.2";
const DEFAULT_PLUGIN_NAME: &str = "hal_plugin_prophesee";
const DEFAULT_INTEGRATOR: &str = "Prophesee";

const END_LINE: &str = "% end";

/// Geometry of sensors that can be identified by name alone.
const KNOWN_SENSORS: &[(&str, u32, u32)] = &[
    ("IMX636", 1280, 720),
    ("GenX320", 320, 320),
    ("Gen3.1", 640, 480),
];

/// Parsed RAW header.
///
/// The raw `evt`, `format` and `geometry` strings are kept as read; `width`,
/// `height` and `format_name` hold the values resolved from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub date: Option<NaiveDateTime>,
    pub evt: Option<String>,
    pub format: Option<String>,
    pub generation: Option<String>,
    pub serial_number: String,
    pub system_id: u32,
    pub camera_integrator_name: String,
    pub integrator_name: String,
    pub sensor_name: Option<String>,
    pub sensor_generation: Option<String>,
    pub geometry: Option<String>,
    pub plugin_name: Option<String>,
    pub plugin_integrator_name: Option<String>,

    /// Resolved sensor width in pixels, in `1..=2048`.
    pub width: u32,
    /// Resolved sensor height in pixels, in `1..=2048`.
    pub height: u32,
    /// Resolved payload format.
    pub format_name: RawFormat,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            date: None,
            evt: None,
            format: None,
            generation: None,
            serial_number: "00000000".to_string(),
            system_id: 49,
            camera_integrator_name: DEFAULT_INTEGRATOR.to_string(),
            integrator_name: DEFAULT_INTEGRATOR.to_string(),
            sensor_name: None,
            sensor_generation: None,
            geometry: None,
            plugin_name: None,
            plugin_integrator_name: None,
            width: MAX_DIMENSION,
            height: MAX_DIMENSION,
            format_name: RawFormat::Evt3,
        }
    }
}

impl Header {
    /// Builds the header a writer emits for a new recording.
    pub fn for_recording(
        width: u32,
        height: u32,
        format: RawFormat,
        date: Option<NaiveDateTime>,
        serial_number: &str,
    ) -> Self {
        Self {
            date: Some(date.unwrap_or_else(|| Local::now().naive_local())),
            evt: Some(format.evt_version().to_string()),
            format: Some(format_line(format, width, height)),
            generation: Some(DEFAULT_GENERATION.to_string()),
            serial_number: serial_number.to_string(),
            sensor_generation: Some(DEFAULT_GENERATION.to_string()),
            geometry: Some(format!("{}x{}", width, height)),
            plugin_name: Some(DEFAULT_PLUGIN_NAME.to_string()),
            plugin_integrator_name: Some(DEFAULT_INTEGRATOR.to_string()),
            width,
            height,
            format_name: format,
            ..Self::default()
        }
    }

    /// Reads header lines from `reader` and resolves geometry and format.
    ///
    /// Stops after the `% end` line, or in front of the first line that does
    /// not start with `%` (that line is left unread). Returns the header and
    /// the number of bytes consumed.
    pub fn read_from<R: BufRead>(reader: &mut R) -> io::Result<(Self, u64)> {
        let mut header = Self::default();
        let mut consumed = 0u64;
        let mut line = Vec::new();

        loop {
            let peeked = reader.fill_buf()?;
            if peeked.first() != Some(&b'%') {
                break;
            }

            line.clear();
            consumed += reader.read_until(b'\n', &mut line)? as u64;
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end();

            if text == END_LINE {
                break;
            }
            header.apply_line(text);
        }

        header.resolve();
        Ok((header, consumed))
    }

    /// Applies one `% key value` line.
    fn apply_line(&mut self, line: &str) {
        let body = line.trim_start_matches('%').trim();
        let (key, value) = match body.split_once(' ') {
            Some((key, value)) => (key.to_lowercase(), value.trim().to_string()),
            None => (body.to_lowercase(), String::new()),
        };

        match key.as_str() {
            "date" => match NaiveDateTime::parse_from_str(&value, DATE_FORMAT) {
                Ok(date) => self.date = Some(date),
                Err(e) => warn!("Error parsing header line {:?}: {}", line, e),
            },
            "system_id" => match value.parse() {
                Ok(id) => self.system_id = id,
                Err(e) => warn!("Error parsing header line {:?}: {}", line, e),
            },
            "evt" => self.evt = Some(value),
            "format" => self.format = Some(value),
            "generation" => self.generation = Some(value),
            "serial_number" => self.serial_number = value,
            "camera_integrator_name" => self.camera_integrator_name = value,
            "integrator_name" => self.integrator_name = value,
            "sensor_name" => self.sensor_name = Some(value),
            "sensor_generation" => self.sensor_generation = Some(value),
            "geometry" => self.geometry = Some(value),
            "plugin_name" => self.plugin_name = Some(value),
            "plugin_integrator_name" => self.plugin_integrator_name = Some(value),
            _ => warn!("Unknown key {:?} in header line {:?}", key, line),
        }
    }

    /// Resolves `width`, `height` and `format_name` from the raw lines.
    ///
    /// `geometry` wins over the dimensions embedded in `format`, and `evt`
    /// wins over the format name; every disagreement is logged.
    fn resolve(&mut self) {
        let mut width: Option<u32> = None;
        let mut height: Option<u32> = None;
        let mut format_name: Option<RawFormat> = None;

        if let Some(format) = &self.format {
            for part in format.split(';').map(str::trim) {
                if let Some(value) = part.strip_prefix("height=") {
                    height = parse_dimension("height", value);
                } else if let Some(value) = part.strip_prefix("width=") {
                    width = parse_dimension("width", value);
                } else if !part.is_empty() {
                    match part.parse::<RawFormat>() {
                        Ok(name) => format_name = Some(name),
                        Err(e) => warn!("{}", e),
                    }
                }
            }
        }

        if let Some(geometry) = &self.geometry {
            match parse_geometry(geometry) {
                Some((w, h)) => {
                    if let (Some(fw), Some(fh)) = (width, height) {
                        if (fw, fh) != (w, h) {
                            warn!(
                                "Geometry {} does not match format dimensions {}x{}, using {}x{}",
                                geometry, fw, fh, w, h
                            );
                        }
                    }
                    width = Some(w);
                    height = Some(h);
                }
                None => warn!("Invalid geometry {:?} in header", geometry),
            }
        }

        if let Some(evt) = &self.evt {
            match RawFormat::from_evt_version(evt) {
                Some(name) => {
                    if let Some(previous) = format_name {
                        if previous != name {
                            warn!(
                                "evt {} does not match format {}, using {}",
                                evt, previous, name
                            );
                        }
                    }
                    format_name = Some(name);
                }
                None => warn!(
                    "Unknown evt version {:?}, supported versions are 3.0, 2.1, 2.0",
                    evt
                ),
            }
        }

        self.format_name = format_name.unwrap_or_else(|| {
            warn!("Format not found in header, assuming EVT3");
            RawFormat::Evt3
        });

        if width.is_none() || height.is_none() {
            if let Some((w, h)) = self.sensor_name.as_deref().and_then(sensor_geometry) {
                width = Some(w);
                height = Some(h);
            }
        }

        self.width = checked_dimension("width", width);
        self.height = checked_dimension("height", height);
    }

    /// Writes the header, `% end` line included. Returns the bytes written.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<u64> {
        let text = self.to_text();
        writer.write_all(text.as_bytes())?;
        Ok(text.len() as u64)
    }

    /// Renders the header text, `% end` line included.
    ///
    /// Every known key is written. `evt`, `format` and `geometry` come from
    /// the resolved values so the written header is always self-consistent;
    /// other keys that were never set get the writer defaults (the current
    /// local time for `date`). `sensor_name` is only written when known.
    pub fn to_text(&self) -> String {
        let or_default = |value: &Option<String>, default: &str| {
            value.clone().unwrap_or_else(|| default.to_string())
        };
        let date = self.date.unwrap_or_else(|| Local::now().naive_local());

        let mut lines = vec![
            format!("% camera_integrator_name {}", self.camera_integrator_name),
            format!("% date {}", date.format(DATE_FORMAT)),
            format!("% evt {}", self.format_name.evt_version()),
            format!(
                "% format {}",
                format_line(self.format_name, self.width, self.height)
            ),
            format!("% generation {}", or_default(&self.generation, DEFAULT_GENERATION)),
            format!("% geometry {}x{}", self.width, self.height),
            format!("% integrator_name {}", self.integrator_name),
            format!(
                "% plugin_integrator_name {}",
                or_default(&self.plugin_integrator_name, DEFAULT_INTEGRATOR)
            ),
            format!("% plugin_name {}", or_default(&self.plugin_name, DEFAULT_PLUGIN_NAME)),
            format!(
                "% sensor_generation {}",
                or_default(&self.sensor_generation, DEFAULT_GENERATION)
            ),
        ];
        if let Some(name) = &self.sensor_name {
            lines.push(format!("% sensor_name {}", name));
        }
        lines.push(format!("% serial_number {}", self.serial_number));
        lines.push(format!("% system_ID {}", self.system_id));
        lines.push(END_LINE.to_string());

        let mut text = lines.join("\n");
        text.push('\n');
        text
    }
}

fn format_line(format: RawFormat, width: u32, height: u32) -> String {
    format!("{};height={};width={}", format.name(), height, width)
}

fn parse_dimension(name: &str, value: &str) -> Option<u32> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Invalid {} {:?} in header format line", name, value);
            None
        }
    }
}

/// Parses a `WxH` geometry string.
pub fn parse_geometry(geometry: &str) -> Option<(u32, u32)> {
    let (w, h) = geometry.trim().split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Geometry of a sensor known by name.
pub fn sensor_geometry(sensor_name: &str) -> Option<(u32, u32)> {
    KNOWN_SENSORS
        .iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(sensor_name.trim()))
        .map(|&(_, w, h)| (w, h))
}

fn checked_dimension(name: &str, value: Option<u32>) -> u32 {
    match value {
        Some(v) if v > 0 && v <= MAX_DIMENSION => v,
        Some(v) => {
            warn!("Invalid {} {} in header, setting to {}", name, v, MAX_DIMENSION);
            MAX_DIMENSION
        }
        None => {
            warn!("No valid {} found in header, setting to {}", name, MAX_DIMENSION);
            MAX_DIMENSION
        }
    }
}
