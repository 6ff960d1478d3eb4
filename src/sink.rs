//! Push of state changes to configured network sinks.
//!
//! Routing keys are `ZoneConfig` (whole zone map on any zone change),
//! `SourceConfig` (whole source map on any source change) or a source
//! attribute name (just the new value).

use crate::error::{BridgeError, Result};
use crate::store::{Snapshot, StateStore};
use crate::subscription::{StateReceiver, StateUpdate};
use std::collections::BTreeMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::broadcast;

/// Routing key for the full zone map
pub const ZONE_CONFIG: &str = "ZoneConfig";

/// Routing key for the full source map
pub const SOURCE_CONFIG: &str = "SourceConfig";

/// Where a push goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    Udp { host: String, port: u16 },
    Tcp { host: String, port: u16 },
    Mqtt { topic: String },
}

impl FromStr for Sink {
    type Err = BridgeError;

    /// `udp:host:port`, `tcp:host:port` or `mqtt:topic`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BridgeError::InvalidSink(s.to_string());
        let (protocol, rest) = s.split_once(':').ok_or_else(invalid)?;

        match protocol.to_lowercase().as_str() {
            "mqtt" if !rest.is_empty() => Ok(Sink::Mqtt {
                topic: rest.to_string(),
            }),
            proto @ ("udp" | "tcp") => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
                let port = port.parse().map_err(|_| invalid())?;
                if host.is_empty() {
                    return Err(invalid());
                }
                let host = host.to_string();
                Ok(if proto == "udp" {
                    Sink::Udp { host, port }
                } else {
                    Sink::Tcp { host, port }
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sink::Udp { host, port } => write!(f, "udp:{host}:{port}"),
            Sink::Tcp { host, port } => write!(f, "tcp:{host}:{port}"),
            Sink::Mqtt { topic } => write!(f, "mqtt:{topic}"),
        }
    }
}

/// A message for the publish/subscribe transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub topic: String,
    pub payload: String,
}

/// Forwards store updates to the configured sinks
pub struct PushRelay {
    targets: BTreeMap<String, Sink>,
    store: Arc<StateStore>,
    publications: broadcast::Sender<Publication>,
}

impl PushRelay {
    /// Parse every target descriptor up front
    pub fn new(
        targets: &BTreeMap<String, String>,
        store: Arc<StateStore>,
        publications: broadcast::Sender<Publication>,
    ) -> Result<Self> {
        let targets = targets
            .iter()
            .map(|(key, sink)| Ok((key.clone(), sink.parse::<Sink>()?)))
            .collect::<Result<_>>()?;

        Ok(Self {
            targets,
            store,
            publications,
        })
    }

    /// Payloads one update produces, per sink
    pub fn route(&self, update: &StateUpdate, snapshot: &Snapshot) -> Result<Vec<(Sink, String)>> {
        let mut out = Vec::new();

        match update {
            StateUpdate::Zone { .. } => {
                if let Some(sink) = self.targets.get(ZONE_CONFIG) {
                    out.push((sink.clone(), serde_json::to_string(&snapshot.zones)?));
                }
            }
            StateUpdate::Source {
                attribute, value, ..
            } => {
                if let Some(sink) = self.targets.get(SOURCE_CONFIG) {
                    out.push((sink.clone(), serde_json::to_string(&snapshot.sources)?));
                }
                if let Some(sink) = self.targets.get(attribute) {
                    out.push((sink.clone(), value.clone()));
                }
            }
            StateUpdate::System(_) => {}
        }

        Ok(out)
    }

    /// Relay until the store goes away
    pub async fn run(self, mut updates: StateReceiver) {
        if self.targets.is_empty() {
            return;
        }

        loop {
            let update = match updates.recv().await {
                Ok(update) => update,
                Err(BridgeError::ConnectionClosed) => break,
                Err(e) => {
                    tracing::warn!("Push relay: {}", e);
                    continue;
                }
            };

            let routed = match self.route(&update, &self.store.snapshot()) {
                Ok(routed) => routed,
                Err(e) => {
                    tracing::error!("Push relay: {}", e);
                    continue;
                }
            };

            for (sink, payload) in routed {
                if let Err(e) = self.deliver(&sink, &payload).await {
                    tracing::error!("Failed to push to {}: {}", sink, e);
                }
            }
        }
    }

    async fn deliver(&self, sink: &Sink, payload: &str) -> Result<()> {
        let payload = payload.trim();
        if payload.is_empty() {
            tracing::debug!("Not pushing empty payload to {}", sink);
            return Ok(());
        }
        tracing::debug!("Pushing {} bytes to {}", payload.len(), sink);

        match sink {
            Sink::Udp { host, port } => {
                let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
                socket.send_to(payload.as_bytes(), (host.as_str(), *port)).await?;
            }
            Sink::Tcp { host, port } => {
                let mut stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.write_all(payload.as_bytes()).await?;
                stream.shutdown().await?;
            }
            Sink::Mqtt { topic } => {
                let publication = Publication {
                    topic: topic.clone(),
                    payload: payload.to_string(),
                };
                if self.publications.send(publication).is_err() {
                    tracing::debug!("No publisher attached for {}", topic);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Event;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn parses_descriptors() {
        assert_eq!(
            "udp:127.0.0.1:5001".parse::<Sink>().unwrap(),
            Sink::Udp {
                host: "127.0.0.1".to_string(),
                port: 5001
            }
        );
        assert_eq!(
            "TCP:loghost:7000".parse::<Sink>().unwrap(),
            Sink::Tcp {
                host: "loghost".to_string(),
                port: 7000
            }
        );
        assert_eq!(
            "mqtt:home/audio/tuner".parse::<Sink>().unwrap(),
            Sink::Mqtt {
                topic: "home/audio/tuner".to_string()
            }
        );
        assert!("smtp:host:25".parse::<Sink>().is_err());
        assert!("udp:host".parse::<Sink>().is_err());
        assert!("udp:host:port".parse::<Sink>().is_err());
    }

    fn make_relay(targets: &[(&str, &str)]) -> (Arc<StateStore>, PushRelay, broadcast::Receiver<Publication>) {
        let store = Arc::new(StateStore::new());
        let (tx, rx) = broadcast::channel(16);
        let targets = targets
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let relay = PushRelay::new(&targets, store.clone(), tx).unwrap();
        (store, relay, rx)
    }

    #[test]
    fn routes_by_update_kind() {
        let (store, relay, _rx) = make_relay(&[
            ("ZoneConfig", "udp:127.0.0.1:5001"),
            ("SourceConfig", "mqtt:audio/sources"),
            ("programServiceName", "mqtt:audio/rds"),
        ]);

        let update = store
            .apply_event(&Event::SourceAttribute {
                source: 2,
                attribute: "programServiceName".to_string(),
                value: "NDR 2".to_string(),
            })
            .unwrap();
        let routed = relay.route(&update, &store.snapshot()).unwrap();
        assert_eq!(routed.len(), 2);
        assert_eq!(
            routed[1],
            (
                Sink::Mqtt {
                    topic: "audio/rds".to_string()
                },
                "NDR 2".to_string()
            )
        );
        assert!(routed[0].1.contains("\"programServiceName\":\"NDR 2\""));

        let update = store
            .apply_event(&Event::ZoneAttribute {
                controller: 1,
                zone: 1,
                attribute: "volume".to_string(),
                value: "20".to_string(),
            })
            .unwrap();
        let routed = relay.route(&update, &store.snapshot()).unwrap();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].1, r#"{"1":{"1":{"volume":"20"}}}"#);
    }

    #[tokio::test]
    async fn mqtt_sink_publishes() {
        let (store, relay, mut rx) = make_relay(&[("name", "mqtt:audio/name")]);
        let updates = store.subscribe();
        let task = tokio::spawn(relay.run(updates));

        store.apply_event(&Event::SourceAttribute {
            source: 1,
            attribute: "name".to_string(),
            value: "Streamer".to_string(),
        });

        let publication = rx.recv().await.unwrap();
        assert_eq!(publication.topic, "audio/name");
        assert_eq!(publication.payload, "Streamer");
        task.abort();
    }

    #[tokio::test]
    async fn tcp_sink_delivers_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = format!("tcp:127.0.0.1:{port}");
        let (_store, relay, _rx) = make_relay(&[("name", target.as_str())]);

        let sink: Sink = target.parse().unwrap();
        relay.deliver(&sink, "Tuner\n").await.unwrap();

        let (mut conn, _) = listener.accept().await.unwrap();
        let mut received = String::new();
        conn.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "Tuner");
    }
}
