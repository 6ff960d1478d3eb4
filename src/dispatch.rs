//! Translation of flat key/value command requests into controller commands.

use crate::error::{BridgeError, Result};
use crate::protocol::{ZoneAction, ZoneCommand, ZoneSetting};
use crate::store::StateStore;
use crate::types::{ChannelCatalog, ControllerId, ZoneId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Status reported when the link is down (EPIPE)
pub const BROKEN_PIPE_STATUS: u16 = 32;

/// Most relative volume steps one request may ask for
pub const MAX_VOLUME_STEPS: usize = 50;

/// Destination for rendered wire commands
#[async_trait]
pub trait CommandWriter: Send + Sync {
    /// Write `wires` back to back; no other write lands between them
    async fn write_commands(&self, wires: &[String]) -> Result<()>;
}

/// Keys whose values may carry a sign
const SIGNED_KEYS: [&str; 5] = ["volume", "turnonvolume", "bass", "balance", "treble"];

fn is_value_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// A command description such as `zone=3&action=on&source=2`.
///
/// Keys and values are lowercased on parse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandRequest {
    fields: BTreeMap<String, String>,
}

impl CommandRequest {
    /// Parse an `&`-joined list of `key=value` pairs
    pub fn parse(query: &str) -> Self {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .filter(|(k, _)| !k.is_empty())
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Reject any value outside `[\w.]+`; signed values may lead with `+` or `-`
    fn validate(&self) -> Result<()> {
        for (key, value) in &self.fields {
            let value = value.as_str();
            let unsigned = if SIGNED_KEYS.contains(&key.as_str()) {
                value.strip_prefix(['+', '-']).unwrap_or(value)
            } else {
                value
            };
            if unsigned.is_empty() || !unsigned.chars().all(is_value_char) {
                return Err(BridgeError::BadRequest(format!("invalid {key} '{value}'")));
            }
        }
        Ok(())
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| BridgeError::BadRequest(format!("missing '{key}'")))
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for CommandRequest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_lowercase(), v.as_ref().to_lowercase()))
                .collect(),
        }
    }
}

/// Outcome of a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Ok,
    BadRequest,
    LinkDown,
}

impl DispatchStatus {
    pub fn code(&self) -> u16 {
        match self {
            DispatchStatus::Ok => 200,
            DispatchStatus::BadRequest => 401,
            DispatchStatus::LinkDown => BROKEN_PIPE_STATUS,
        }
    }
}

/// Validates command requests and writes them to the controller
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<StateStore>,
    writer: Arc<dyn CommandWriter>,
    catalog: Arc<ChannelCatalog>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<StateStore>,
        writer: Arc<dyn CommandWriter>,
        catalog: Arc<ChannelCatalog>,
    ) -> Self {
        Self {
            store,
            writer,
            catalog,
        }
    }

    /// Translate a request into the commands it sends, in order
    pub fn translate(&self, request: &CommandRequest) -> Result<Vec<ZoneCommand>> {
        request.validate()?;

        let action = request.require("action")?;
        let zone: ZoneId = parse_id(request.require("zone")?, "zone")?;
        let controller: ControllerId = match request.get("controller") {
            Some(c) => parse_id(c, "controller")?,
            None => 1,
        };

        let single = |action: ZoneAction| -> Result<Vec<ZoneCommand>> {
            Ok(vec![ZoneCommand::new(controller, zone, action)])
        };
        let power_on = || match request.get("source") {
            Some(source) => ZoneAction::SelectSource(source.to_string()),
            None => ZoneAction::On,
        };

        match action {
            "on" | "1" => single(power_on()),
            "off" | "0" => single(ZoneAction::Off),
            "toggle" => {
                let status = self.store.zone_attribute(controller, zone, "status");
                if status.as_deref() == Some("ON") {
                    single(ZoneAction::Off)
                } else {
                    single(power_on())
                }
            }
            "source" => single(ZoneAction::SelectSource(
                request.require("source")?.to_string(),
            )),
            "play" => {
                request.require("source")?;
                let channel = self.catalog.resolve(request.require("channel")?);
                let digits = tuning_digits(channel)?;

                let mut commands: Vec<ZoneCommand> = digits
                    .into_iter()
                    .map(|d| ZoneCommand::new(controller, zone, ZoneAction::Digit(d)))
                    .collect();
                commands.push(ZoneCommand::new(controller, zone, ZoneAction::Enter));
                Ok(commands)
            }
            "volumeup" | "volup" => single(ZoneAction::VolumeUp),
            "volumedown" | "voldown" => single(ZoneAction::VolumeDown),
            "volume" => volume_commands(controller, zone, request.require("volume")?),
            "turnonvolume" => {
                let value = request
                    .get("turnonvolume")
                    .or_else(|| request.get("volume"))
                    .ok_or_else(|| BridgeError::BadRequest("missing 'volume'".to_string()))?;
                single(ZoneAction::Set(ZoneSetting::TurnOnVolume, value.to_string()))
            }
            "bass" => single(ZoneAction::Set(ZoneSetting::Bass, request.require("bass")?.to_string())),
            "balance" => single(ZoneAction::Set(
                ZoneSetting::Balance,
                request.require("balance")?.to_string(),
            )),
            "treble" => single(ZoneAction::Set(
                ZoneSetting::Treble,
                request.require("treble")?.to_string(),
            )),
            other => Err(BridgeError::BadRequest(format!("unsupported action '{other}'"))),
        }
    }

    /// Validate and send a request.
    ///
    /// Nothing is written unless the whole request translates.
    pub async fn dispatch(&self, request: &CommandRequest) -> DispatchStatus {
        let commands = match self.translate(request) {
            Ok(commands) => commands,
            Err(e) => {
                tracing::warn!("Rejected command {:?}: {}", request, e);
                return DispatchStatus::BadRequest;
            }
        };

        let wires: Vec<String> = commands.iter().map(ZoneCommand::to_wire).collect();
        if let Err(e) = self.writer.write_commands(&wires).await {
            tracing::error!("Failed to send {:?}: {}", request, e);
            return if e.is_link_down() {
                DispatchStatus::LinkDown
            } else {
                DispatchStatus::BadRequest
            };
        }

        for command in &commands {
            tracing::info!("Sent command: {}", command);
        }
        DispatchStatus::Ok
    }

    /// Parse a query string and dispatch it
    pub async fn dispatch_query(&self, query: &str) -> DispatchStatus {
        self.dispatch(&CommandRequest::parse(query)).await
    }
}

fn parse_id(value: &str, key: &str) -> Result<u8> {
    match value.parse::<u8>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(BridgeError::BadRequest(format!("invalid {key} '{value}'"))),
    }
}

/// Digits to key in for a frequency such as `87.6`
fn tuning_digits(channel: &str) -> Result<Vec<u8>> {
    channel
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .map(|c| {
            c.to_digit(10)
                .map(|d| d as u8)
                .ok_or_else(|| BridgeError::BadRequest(format!("invalid channel '{channel}'")))
        })
        .collect()
}

/// Absolute level, or `+N`/`-N` as N-1 single steps
fn volume_commands(controller: ControllerId, zone: ZoneId, value: &str) -> Result<Vec<ZoneCommand>> {
    let invalid = || BridgeError::BadRequest(format!("invalid volume '{value}'"));

    let (step, amount) = match value.as_bytes().first() {
        Some(b'+') => (Some(ZoneAction::VolumeUp), &value[1..]),
        Some(b'-') => (Some(ZoneAction::VolumeDown), &value[1..]),
        _ => (None, value),
    };
    if amount.is_empty() || !amount.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    match step {
        None => Ok(vec![ZoneCommand::new(
            controller,
            zone,
            ZoneAction::Volume(amount.to_string()),
        )]),
        Some(step) => {
            let count = amount
                .parse::<usize>()
                .ok()
                .filter(|&count| count <= MAX_VOLUME_STEPS)
                .ok_or_else(invalid)?;
            // Steps from 1 while below count: one fewer press than requested
            Ok((1..count)
                .map(|_| ZoneCommand::new(controller, zone, step.clone()))
                .collect())
        }
    }
}
