//! RIO line protocol: notification parsing and command rendering.
//!
//! Every line the controller sends starts with a class marker: `S` for a
//! successful response, `E` for an error, `N` for an asynchronous
//! notification. Commands are terminated with a bare `\r`.

use crate::types::{ControllerId, DeviceStatus, SourceId, ZoneId};
use std::fmt;

/// Command terminator on the wire
pub const TERMINATOR: char = '\r';

/// Marker of a successful response
pub const SUCCESS_MARKER: char = 'S';

/// Marker of an asynchronous notification
pub const NOTIFY_MARKER: char = 'N';

/// A notification parsed into a state mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `N System.status="ON"`
    SystemStatus(DeviceStatus),

    /// `N C[1].Z[2].volume="20"`
    ZoneAttribute {
        controller: ControllerId,
        zone: ZoneId,
        attribute: String,
        value: String,
    },

    /// `N S[3].name="Tuner"`
    SourceAttribute {
        source: SourceId,
        attribute: String,
        value: String,
    },

    /// A notification matching none of the known shapes
    Unrecognized(String),
}

/// Parse one decoded line.
///
/// Returns `None` for lines that are not notifications (responses to
/// synchronous requests). Shapes are tried in order, first match wins.
pub fn parse_line(line: &str) -> Option<Event> {
    let body = line.strip_prefix(NOTIFY_MARKER)?;

    let event = body
        .strip_prefix(' ')
        .and_then(|rest| {
            parse_system(rest)
                .or_else(|| parse_zone(rest))
                .or_else(|| parse_source(rest))
        })
        .unwrap_or_else(|| Event::Unrecognized(line.to_string()));

    Some(event)
}

fn parse_system(rest: &str) -> Option<Event> {
    let (path, value) = split_assignment(rest)?;
    if path != "System.status" {
        return None;
    }
    DeviceStatus::parse(value).map(Event::SystemStatus)
}

fn parse_zone(rest: &str) -> Option<Event> {
    let (path, value) = split_assignment(rest)?;
    let (controller, path) = indexed(path, "C[")?;
    let path = path.strip_prefix('.')?;
    let (zone, path) = indexed(path, "Z[")?;
    let attribute = word(path.strip_prefix('.')?)?;

    Some(Event::ZoneAttribute {
        controller,
        zone,
        attribute: attribute.to_string(),
        value: value.to_string(),
    })
}

fn parse_source(rest: &str) -> Option<Event> {
    let (path, value) = split_assignment(rest)?;
    let (source, path) = indexed(path, "S[")?;
    let attribute = word(path.strip_prefix('.')?)?;

    Some(Event::SourceAttribute {
        source,
        attribute: attribute.to_string(),
        value: value.to_string(),
    })
}

/// Split `path="value"` at the first `="`; the value runs to the final quote
fn split_assignment(s: &str) -> Option<(&str, &str)> {
    let idx = s.find("=\"")?;
    let value = s[idx + 2..].strip_suffix('"')?;
    Some((&s[..idx], value))
}

/// Parse `<prefix><digit>]`, returning the digit and the remainder
fn indexed<'a>(s: &'a str, prefix: &str) -> Option<(u8, &'a str)> {
    let rest = s.strip_prefix(prefix)?;
    let mut chars = rest.chars();
    let id = chars.next()?.to_digit(10)? as u8;
    let rest = chars.as_str().strip_prefix(']')?;
    Some((id, rest))
}

fn word(s: &str) -> Option<&str> {
    let valid = !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then_some(s)
}

/// Whether a response line reports success
pub fn is_success(response: &str) -> bool {
    response.starts_with(SUCCESS_MARKER)
}

/// Extract the first quoted value from a response such as `S VERSION="1.02"`
pub fn quoted_value(response: &str) -> Option<&str> {
    response.split('"').nth(1)
}

/// A raw controller request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Version,
    Get(String),
    Set { path: String, value: String },
    Watch(String),
    Event { path: String, action: String },
}

impl Request {
    /// `GET C[1].type`
    pub fn get(path: impl Into<String>) -> Self {
        Request::Get(path.into())
    }

    /// `WATCH C[1].Z[2] ON`
    pub fn watch(path: impl Into<String>) -> Self {
        Request::Watch(path.into())
    }

    /// Render to the exact wire syntax, terminator included
    pub fn to_wire(&self) -> String {
        match self {
            Request::Version => format!("VERSION{TERMINATOR}"),
            Request::Get(path) => format!("GET {path}{TERMINATOR}"),
            Request::Set { path, value } => format!("SET {path}=\"{value}\"{TERMINATOR}"),
            Request::Watch(path) => format!("WATCH {path} ON{TERMINATOR}"),
            Request::Event { path, action } => format!("EVENT {path}!{action}{TERMINATOR}"),
        }
    }
}

/// `C[c]`
pub fn controller_path(controller: ControllerId) -> String {
    format!("C[{controller}]")
}

/// `C[c].Z[z]`
pub fn zone_path(controller: ControllerId, zone: ZoneId) -> String {
    format!("C[{controller}].Z[{zone}]")
}

/// `S[s]`
pub fn source_path(source: SourceId) -> String {
    format!("S[{source}]")
}

/// Zone attributes that can be set directly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneSetting {
    TurnOnVolume,
    Bass,
    Balance,
    Treble,
}

impl ZoneSetting {
    /// Attribute name as the controller spells it
    pub fn attribute(&self) -> &'static str {
        match self {
            ZoneSetting::TurnOnVolume => "turnOnVolume",
            ZoneSetting::Bass => "bass",
            ZoneSetting::Balance => "balance",
            ZoneSetting::Treble => "treble",
        }
    }
}

/// What to do to a zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneAction {
    On,
    Off,
    SelectSource(String),
    Digit(u8),
    Enter,
    Volume(String),
    VolumeUp,
    VolumeDown,
    Set(ZoneSetting, String),
}

const DIGITS: [&str; 10] = [
    "DigitZero",
    "DigitOne",
    "DigitTwo",
    "DigitThree",
    "DigitFour",
    "DigitFive",
    "DigitSix",
    "DigitSeven",
    "DigitEight",
    "DigitNine",
];

/// A single wire command addressed to one zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneCommand {
    pub controller: ControllerId,
    pub zone: ZoneId,
    pub action: ZoneAction,
}

impl ZoneCommand {
    pub fn new(controller: ControllerId, zone: ZoneId, action: ZoneAction) -> Self {
        Self {
            controller,
            zone,
            action,
        }
    }

    /// The raw request this command is sent as
    pub fn to_request(&self) -> Request {
        let path = zone_path(self.controller, self.zone);
        let action = match &self.action {
            ZoneAction::On => "ZoneOn".to_string(),
            ZoneAction::Off => "ZoneOff".to_string(),
            ZoneAction::SelectSource(source) => format!("KeyRelease SelectSource {source}"),
            ZoneAction::Digit(d) => format!("KeyRelease {}", DIGITS[usize::from(*d % 10)]),
            ZoneAction::Enter => "KeyRelease Enter".to_string(),
            ZoneAction::Volume(level) => format!("KeyPress Volume {level}"),
            ZoneAction::VolumeUp => "KeyPress VolumeUp".to_string(),
            ZoneAction::VolumeDown => "KeyPress VolumeDown".to_string(),
            ZoneAction::Set(setting, value) => {
                return Request::Set {
                    path: format!("{path}.{}", setting.attribute()),
                    value: value.clone(),
                };
            }
        };
        Request::Event { path, action }
    }

    pub fn to_wire(&self) -> String {
        self.to_request().to_wire()
    }
}

impl fmt::Display for ZoneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_wire().trim_end_matches(TERMINATOR))
    }
}
