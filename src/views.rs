//! JSON views of the store, selected by keyword.

use crate::connection::LinkState;
use crate::error::Result;
use crate::store::Snapshot;
use crate::types::{format_duration, format_timestamp, ChannelCatalog};
use chrono::{DateTime, Local};
use serde_json::{json, Value};

/// Which part of the state to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    ZoneConfig,
    SourceConfig,
    Channels,
    DefaultChannels,
    Status,
    Full,
}

impl View {
    /// Map a request keyword to a view; unknown keywords get the full bundle
    pub fn from_keyword(keyword: &str) -> Self {
        let keyword = keyword.trim().to_lowercase();
        match keyword.as_str() {
            "zoneconfig" => View::ZoneConfig,
            "sourceconfig" => View::SourceConfig,
            "channels" => View::Channels,
            "defaultchannels" => View::DefaultChannels,
            k if k.starts_with("status") => View::Status,
            _ => View::Full,
        }
    }
}

/// Everything a view may draw from
pub struct ViewContext<'a> {
    pub snapshot: &'a Snapshot,
    pub catalog: &'a ChannelCatalog,
    pub started_at: DateTime<Local>,
    pub link_state: LinkState,
}

impl ViewContext<'_> {
    pub fn render(&self, view: View) -> Result<Value> {
        let snapshot = self.snapshot;
        let health = &snapshot.health;
        let device_status = snapshot.device_status.map(|s| s.as_str()).unwrap_or("");
        let device_version = snapshot.device_version.as_deref().unwrap_or("");

        let value = match view {
            View::ZoneConfig => serde_json::to_value(&snapshot.zones)?,
            View::SourceConfig => serde_json::to_value(&snapshot.sources)?,
            View::Channels => serde_json::to_value(&self.catalog.channels)?,
            View::DefaultChannels => Value::String(self.catalog.default_channel.clone()),
            View::Status => json!({
                "Web-Service (Re)StartDate": format_timestamp(Some(&self.started_at)),
                "LastReconnect": format_timestamp(health.last_connect.as_ref()),
                "ConnectErrorDate": format_timestamp(health.last_disconnect.as_ref()),
                "DeviceVersion": device_version,
                "DeviceStatus": device_status,
                "ZoneCount": serde_json::to_value(&snapshot.zone_counts)?,
                "ControllerType": serde_json::to_value(&snapshot.controller_types)?,
                "CountSource": snapshot.source_count,
                "ConvertErrorStr": health.decode_error_text,
                "ConvertErrorHex": health.decode_error_hex,
                "ConvertErrorDateTime": format_timestamp(health.decode_error_at.as_ref()),
                "MaxDiffDate": format_timestamp(Some(&health.max_read_gap_at)),
                "TimebetweenRead": format_duration(health.time_between_reads),
                "MaxDiffTimebetweenRead": format_duration(health.max_read_gap),
                "LastRead": health.last_line,
                "LastReadDateTime": format_timestamp(Some(&health.last_read_at)),
                "LinkState": self.link_state.as_str(),
            }),
            View::Full => json!({
                "ZoneConfig": serde_json::to_value(&snapshot.zones)?,
                "SourceConfig": serde_json::to_value(&snapshot.sources)?,
                "Channels": serde_json::to_value(&self.catalog.channels)?,
                "DefaultChannel": self.catalog.default_channel,
                "Web-StartDate": format_timestamp(Some(&self.started_at)),
                "LastReconnect": format_timestamp(health.last_connect.as_ref()),
                "DeviceVersion": device_version,
                "DeviceStatus": device_status,
                "CountSource": snapshot.source_count,
            }),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Event;
    use crate::store::StateStore;

    #[test]
    fn keywords() {
        assert_eq!(View::from_keyword("ZoneConfig"), View::ZoneConfig);
        assert_eq!(View::from_keyword("sourceconfig"), View::SourceConfig);
        assert_eq!(View::from_keyword("defaultchannels"), View::DefaultChannels);
        assert_eq!(View::from_keyword("status2"), View::Status);
        assert_eq!(View::from_keyword(""), View::Full);
        assert_eq!(View::from_keyword("whatever"), View::Full);
    }

    #[test]
    fn full_bundle_shape() {
        let store = StateStore::new();
        store.apply_event(&Event::SourceAttribute {
            source: 1,
            attribute: "name".to_string(),
            value: "Tuner".to_string(),
        });
        store.apply_event(&Event::ZoneAttribute {
            controller: 1,
            zone: 2,
            attribute: "currentSource".to_string(),
            value: "1".to_string(),
        });
        store.apply_event(&Event::ZoneAttribute {
            controller: 1,
            zone: 2,
            attribute: "status".to_string(),
            value: "ON".to_string(),
        });

        let snapshot = store.snapshot();
        let catalog = ChannelCatalog {
            default_channel: "87.6".to_string(),
            ..ChannelCatalog::default()
        };
        let ctx = ViewContext {
            snapshot: &snapshot,
            catalog: &catalog,
            started_at: Local::now(),
            link_state: LinkState::Watching,
        };

        let full = ctx.render(View::Full).unwrap();
        assert_eq!(full["ZoneConfig"]["1"]["2"]["status"], "ON");
        assert_eq!(full["SourceConfig"]["1"]["name"], "Tuner");
        assert_eq!(full["SourceConfig"]["1"]["activeZones"], 1);
        assert_eq!(full["DefaultChannel"], "87.6");

        let status = ctx.render(View::Status).unwrap();
        assert_eq!(status["LinkState"], "Watching");
        assert_eq!(status["ConnectErrorDate"], "01.01.1970 00:00:00");
    }
}
