use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Controller identifier (1-based)
pub type ControllerId = u8;

/// Zone identifier, scoped within a controller (1-based)
pub type ZoneId = u8;

/// Source identifier, global across controllers (1-based)
pub type SourceId = u8;

/// Attribute name to value, as reported by the controller
pub type Attributes = BTreeMap<String, String>;

/// Zone attributes keyed by controller, then zone
pub type ZoneMap = BTreeMap<ControllerId, BTreeMap<ZoneId, Attributes>>;

/// Timestamp format used in every rendered view
pub const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// System-wide power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    On,
    Off,
}

impl DeviceStatus {
    /// Parse the controller's `ON`/`OFF` literal
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ON" => Some(DeviceStatus::On),
            "OFF" => Some(DeviceStatus::Off),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::On => "ON",
            DeviceStatus::Off => "OFF",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source attributes plus the derived count of zones playing it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceState {
    #[serde(flatten)]
    pub attributes: Attributes,

    /// Zones that are ON and have this source selected
    #[serde(rename = "activeZones")]
    pub active_zones: usize,
}

/// Link diagnostics, updated monotonically for the process lifetime
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    /// When the last bootstrap completed
    pub last_connect: Option<DateTime<Local>>,

    /// When the last read returned data
    pub last_read_at: DateTime<Local>,

    /// Gap between the two most recent reads
    pub time_between_reads: Duration,

    /// Largest gap ever observed between reads
    pub max_read_gap: Duration,

    /// When the largest gap was observed
    pub max_read_gap_at: DateTime<Local>,

    /// Last line received from the controller
    pub last_line: String,

    /// Lossy decode of the last line that failed to decode cleanly
    pub decode_error_text: String,

    /// Hex dump of the raw bytes of that line
    pub decode_error_hex: String,

    /// When the last decode error occurred
    pub decode_error_at: Option<DateTime<Local>>,

    /// When the link last dropped unexpectedly
    pub last_disconnect: Option<DateTime<Local>>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        let now = Local::now();
        Self {
            last_connect: None,
            last_read_at: now,
            time_between_reads: Duration::ZERO,
            max_read_gap: Duration::ZERO,
            max_read_gap_at: now,
            last_line: String::new(),
            decode_error_text: String::new(),
            decode_error_hex: String::new(),
            decode_error_at: None,
            last_disconnect: None,
        }
    }
}

impl ConnectionHealth {
    /// Account for a read that just returned data
    pub fn record_read(&mut self, at: DateTime<Local>) {
        let gap = (at - self.last_read_at).to_std().unwrap_or(Duration::ZERO);
        self.time_between_reads = gap;
        if gap > self.max_read_gap {
            self.max_read_gap = gap;
            self.max_read_gap_at = at;
        }
        self.last_read_at = at;
    }
}

/// Channel aliases and the favourite channel, served alongside the state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelCatalog {
    /// Channel name to frequency (e.g. `"ndr2" -> "87.6"`)
    pub channels: BTreeMap<String, String>,

    /// Default favourite channel
    pub default_channel: String,
}

impl ChannelCatalog {
    /// Resolve a channel alias case-insensitively, falling back to the input
    pub fn resolve<'a>(&'a self, channel: &'a str) -> &'a str {
        self.channels
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(channel))
            .map(|(_, freq)| freq.as_str())
            .unwrap_or(channel)
    }
}

/// Render an optional timestamp the way every view does
pub fn format_timestamp(at: Option<&DateTime<Local>>) -> String {
    match at {
        Some(at) => at.format(TIMESTAMP_FORMAT).to_string(),
        None => "01.01.1970 00:00:00".to_string(),
    }
}

/// Render a duration as `H:MM:SS.ffffff`
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!(
        "{}:{:02}:{:02}.{:06}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        d.subsec_micros()
    )
}
