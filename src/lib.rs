//! Bridge between a whole-house audio controller and the network
//!
//! This library keeps a persistent connection to a controller speaking the
//! line-oriented RIO text protocol over TCP, mirrors its zones, sources and
//! system status into an in-memory model, and republishes that model. It
//! supports:
//!
//! - Connection with wake-on-LAN retry and automatic reconnect
//! - Bootstrap of controller types, zone and source counts, and watches
//! - Live state from asynchronous notifications
//! - Command injection (power, sources, tuning, volume, tone)
//! - JSON views over HTTP (optionally HTTPS) and an MQTT control topic router
//! - Push of state changes to UDP, TCP and pub/sub sinks
//!
//! # Quick Start
//!
//! ```no_run
//! use rio_bridge::{Bridge, ChannelCatalog, LinkConfig, View};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LinkConfig {
//!         host: "192.168.1.50".to_string(),
//!         ..LinkConfig::default()
//!     };
//!     let bridge = Bridge::new(config, ChannelCatalog::default());
//!     bridge.start();
//!
//!     // Watch state changes as the controller reports them
//!     let mut updates = bridge.subscribe_state();
//!     while let Ok(update) = updates.recv().await {
//!         println!("State update: {:?}", update);
//!         break;
//!     }
//!
//!     println!("{}", bridge.render(View::ZoneConfig)?);
//!     bridge.dispatch_query("zone=3&action=on&source=2").await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Connection**: socket lifecycle, bootstrap and the watch loop
//! - **Charset** / **Protocol**: byte recoding, line parsing, command rendering
//! - **Store**: the concurrently readable model, single writer
//! - **Dispatch**: command requests to wire commands
//! - **Views**, **HTTP**, **PubSub**, **MQTT**, **Sink**: outward transports

mod charset;
mod client;
mod config;
mod connection;
mod dispatch;
mod error;
pub mod http;
pub mod mqtt;
mod protocol;
mod pubsub;
mod sink;
mod store;
mod subscription;
mod types;
mod views;
mod wol;

// Public exports
pub use charset::{recode, substitute, DecodeError, Recoded};
pub use client::Bridge;
pub use config::{Config, TlsSection};
pub use connection::{ControllerLink, Keepalive, LinkConfig, LinkState};
pub use dispatch::{
    CommandRequest, CommandWriter, DispatchStatus, Dispatcher, BROKEN_PIPE_STATUS, MAX_VOLUME_STEPS,
};
pub use error::{BridgeError, Result};
pub use protocol::{parse_line, Event, Request, ZoneAction, ZoneCommand, ZoneSetting};
pub use pubsub::PubSubRouter;
pub use sink::{Publication, PushRelay, Sink};
pub use store::{BootstrapInfo, Snapshot, StateStore};
pub use subscription::{StateReceiver, StateUpdate};
pub use types::{
    Attributes, ChannelCatalog, ConnectionHealth, ControllerId, DeviceStatus, SourceId,
    SourceState, ZoneId, ZoneMap,
};
pub use views::{View, ViewContext};
pub use wol::{magic_packet, parse_mac};
