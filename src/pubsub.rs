//! Publish/subscribe control topics.
//!
//! Under a configured root, `/Get` selects a view (answered on `/Data`),
//! `/Cmd` carries a command query (answered on `/Ack`) and `/Set` tunes
//! diagnostics. The router is broker-agnostic: a client feeds it incoming
//! messages and publishes whatever it returns.

use crate::client::Bridge;
use crate::dispatch::{CommandRequest, DispatchStatus};
use crate::sink::Publication;
use crate::views::View;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Topic {
    Get,
    Set,
    Cmd,
}

/// Routes control messages to the bridge
pub struct PubSubRouter {
    root: String,
    bridge: Bridge,
}

impl PubSubRouter {
    pub fn new(root: impl Into<String>, bridge: Bridge) -> Self {
        let root = root.into().trim_end_matches('/').to_string();
        Self { root, bridge }
    }

    fn topic(&self, leaf: &str) -> String {
        format!("{}/{}", self.root, leaf)
    }

    /// Topics a client must subscribe to
    pub fn subscriptions(&self) -> Vec<String> {
        ["Get", "Set", "Cmd"].iter().map(|t| self.topic(t)).collect()
    }

    fn classify(&self, topic: &str) -> Option<Topic> {
        match topic.strip_prefix(&self.root)?.strip_prefix('/')? {
            "Get" => Some(Topic::Get),
            "Set" => Some(Topic::Set),
            "Cmd" => Some(Topic::Cmd),
            _ => None,
        }
    }

    /// Handle one incoming message, returning the reply to publish
    pub async fn handle(&self, topic: &str, payload: &str) -> Option<Publication> {
        let payload = payload.trim();

        match self.classify(topic)? {
            Topic::Get => match self.bridge.render(View::from_keyword(payload)) {
                Ok(value) => Some(Publication {
                    topic: self.topic("Data"),
                    payload: value.to_string(),
                }),
                Err(e) => {
                    tracing::error!("Failed to render '{}': {}", payload, e);
                    None
                }
            },
            Topic::Cmd => {
                let status = self.bridge.dispatch_query(payload).await;
                let ack = match status {
                    DispatchStatus::Ok => "Ok".to_string(),
                    _ => format!("{} {}", status.code(), payload),
                };
                Some(Publication {
                    topic: self.topic("Ack"),
                    payload: ack,
                })
            }
            Topic::Set => {
                self.apply_settings(payload);
                None
            }
        }
    }

    fn apply_settings(&self, payload: &str) {
        let settings = CommandRequest::parse(payload);

        if let Some(value) = settings.get("hexdump") {
            let enabled = matches!(value, "1" | "on" | "true");
            self.bridge.link().set_hexdump(enabled);
            tracing::info!("Hex dump {}", if enabled { "enabled" } else { "disabled" });
        }
        if let Some(level) = settings.get("loglevel") {
            tracing::warn!("Log level '{}' can only be set at startup", level);
        }
    }
}
