//! Shared model of the controller's zones, sources and link health.
//!
//! All mutation funnels through [`StateStore::apply_event`] from the single
//! reader task. Each event is applied, side effects included, under one write
//! lock, so [`StateStore::snapshot`] observes either all of an event or none
//! of it.

use crate::charset::DecodeError;
use crate::protocol::Event;
use crate::subscription::{StateReceiver, StateUpdate};
use crate::types::{
    Attributes, ConnectionHealth, ControllerId, DeviceStatus, SourceId, SourceState, ZoneId,
    ZoneMap,
};
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

const STATUS: &str = "status";
const CURRENT_SOURCE: &str = "currentSource";
const VOLUME: &str = "volume";
const TURN_ON_VOLUME: &str = "turnOnVolume";

/// Controller facts learned during bootstrap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapInfo {
    pub device_version: String,
    pub controller_types: BTreeMap<ControllerId, String>,
    pub zone_counts: BTreeMap<ControllerId, usize>,
    pub source_count: usize,
}

/// Point-in-time copy of the whole model
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub zones: ZoneMap,
    pub sources: BTreeMap<SourceId, SourceState>,
    pub device_status: Option<DeviceStatus>,
    pub device_version: Option<String>,
    pub controller_types: BTreeMap<ControllerId, String>,
    pub zone_counts: BTreeMap<ControllerId, usize>,
    pub source_count: usize,
    pub health: ConnectionHealth,
}

impl Snapshot {
    pub fn zone(&self, controller: ControllerId, zone: ZoneId) -> Option<&Attributes> {
        self.zones.get(&controller).and_then(|zones| zones.get(&zone))
    }

    pub fn source(&self, source: SourceId) -> Option<&SourceState> {
        self.sources.get(&source)
    }
}

/// The concurrently readable state model
pub struct StateStore {
    state: RwLock<Snapshot>,
    updates: broadcast::Sender<StateUpdate>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(Snapshot::default()),
            updates,
        }
    }

    /// Subscribe to applied state changes
    pub fn subscribe(&self) -> StateReceiver {
        StateReceiver::new(self.updates.subscribe())
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> Snapshot {
        self.state.read().clone()
    }

    /// Current value of one zone attribute
    pub fn zone_attribute(
        &self,
        controller: ControllerId,
        zone: ZoneId,
        attribute: &str,
    ) -> Option<String> {
        self.state
            .read()
            .zone(controller, zone)
            .and_then(|attrs| attrs.get(attribute).cloned())
    }

    /// Apply one parsed notification.
    ///
    /// Returns the update that was published, if the event changed anything.
    pub fn apply_event(&self, event: &Event) -> Option<StateUpdate> {
        let update = {
            let mut state = self.state.write();
            apply(&mut state, event)?
        };

        // No receivers is fine: nobody is listening for pushes
        let _ = self.updates.send(update.clone());
        Some(update)
    }

    /// Record the outcome of a completed bootstrap
    pub fn record_bootstrap(&self, info: BootstrapInfo, at: DateTime<Local>) {
        let mut state = self.state.write();
        state.device_version = Some(info.device_version);
        state.controller_types = info.controller_types;
        state.zone_counts = info.zone_counts;
        state.source_count = info.source_count;
        state.health.last_connect = Some(at);
    }

    /// Account for a socket read that returned data
    pub fn record_read(&self, at: DateTime<Local>) {
        self.state.write().health.record_read(at);
    }

    /// Remember the most recent line received
    pub fn record_line(&self, line: &str) {
        self.state.write().health.last_line = line.to_string();
    }

    /// Remember a line that did not decode cleanly
    pub fn record_decode_error(&self, error: &DecodeError, at: DateTime<Local>) {
        let mut state = self.state.write();
        state.health.decode_error_hex = error.hex.clone();
        state.health.decode_error_text = error.text.clone();
        state.health.decode_error_at = Some(at);
    }

    /// Remember when the link last dropped
    pub fn record_disconnect(&self, at: DateTime<Local>) {
        self.state.write().health.last_disconnect = Some(at);
    }
}

fn apply(state: &mut Snapshot, event: &Event) -> Option<StateUpdate> {
    match event {
        Event::SystemStatus(status) => {
            state.device_status = Some(*status);
            tracing::info!("System status: {}", status);
            Some(StateUpdate::System(*status))
        }
        Event::ZoneAttribute {
            controller,
            zone,
            attribute,
            value,
        } => {
            let attrs = state
                .zones
                .entry(*controller)
                .or_default()
                .entry(*zone)
                .or_default();
            attrs.insert(attribute.clone(), value.clone());

            // Powering off restores the volume the zone will come back on with
            if attribute == STATUS && value == "OFF" {
                if let Some(turn_on) = attrs.get(TURN_ON_VOLUME).cloned() {
                    tracing::debug!("Zone {}: volume reset to {}", zone, turn_on);
                    attrs.insert(VOLUME.to_string(), turn_on);
                }
            }

            if attribute == STATUS || attribute == CURRENT_SOURCE {
                recompute_active_zones(state);
            }

            Some(StateUpdate::Zone {
                controller: *controller,
                zone: *zone,
                attribute: attribute.clone(),
                value: value.clone(),
            })
        }
        Event::SourceAttribute {
            source,
            attribute,
            value,
        } => {
            state
                .sources
                .entry(*source)
                .or_default()
                .attributes
                .insert(attribute.clone(), value.clone());

            Some(StateUpdate::Source {
                source: *source,
                attribute: attribute.clone(),
                value: value.clone(),
            })
        }
        Event::Unrecognized(line) => {
            tracing::error!("Unrecognized notification: {}", line);
            None
        }
    }
}

/// Rebuild every source's `activeZones` from the full zone set
fn recompute_active_zones(state: &mut Snapshot) {
    for source in state.sources.values_mut() {
        source.active_zones = 0;
    }

    let playing: Vec<SourceId> = state
        .zones
        .values()
        .flat_map(|zones| zones.values())
        .filter(|attrs| attrs.get(STATUS).map(String::as_str) == Some("ON"))
        .filter_map(|attrs| attrs.get(CURRENT_SOURCE)?.parse().ok())
        .collect();

    for source in playing {
        state.sources.entry(source).or_default().active_zones += 1;
    }
}
