//! Daemon configuration.
//!
//! Loaded from TOML. Without an explicit path the first of `./riod.toml`,
//! `/etc/riod.toml` and `/usr/local/etc/riod.toml` that exists is used;
//! with none present every section takes its defaults.
//!
//! ```toml
//! [controller]
//! host = "192.168.1.50"
//! port = 9621
//! controllers = [1]
//! ignore_zones = [6]
//! mac = "00:21:c7:00:12:34"
//!
//! [http]
//! port = 8080
//!
//! [http.tls]
//! cert = "/etc/riod/cert.pem"
//! key = "/etc/riod/key.pem"
//! port = 8443
//!
//! [pubsub]
//! root = "riod"
//! broker = "127.0.0.1"
//!
//! [channels]
//! NDR2 = "87.6"
//!
//! [favourites]
//! fav1 = "87.6"
//!
//! [remote_targets]
//! ZoneConfig = "udp:127.0.0.1:5001"
//! programServiceName = "mqtt:audio/rds"
//! ```

use crate::connection::{Keepalive, LinkConfig};
use crate::error::{BridgeError, Result};
use crate::mqtt::BrokerConfig;
use crate::types::{ChannelCatalog, ControllerId, SourceId, ZoneId};
use crate::wol;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Locations searched when no config path is given
pub const SEARCH_PATHS: [&str; 3] = ["riod.toml", "/etc/riod.toml", "/usr/local/etc/riod.toml"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerSection,
    pub http: HttpSection,
    pub pubsub: PubSubSection,
    /// Channel name to frequency
    pub channels: BTreeMap<String, String>,
    pub favourites: Favourites,
    /// Attribute (or `ZoneConfig`/`SourceConfig`) to sink descriptor
    pub remote_targets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub host: Option<String>,
    pub port: u16,
    pub controllers: Vec<ControllerId>,
    pub ignore_zones: Vec<ZoneId>,
    pub ignore_sources: Vec<SourceId>,
    pub mac: Option<String>,
    pub wake_target: SocketAddr,
    pub reconnect_delay_secs: u64,
    pub request_timeout_secs: u64,
    pub keepalive: KeepaliveSection,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            host: None,
            port: 9621,
            controllers: vec![1],
            ignore_zones: Vec::new(),
            ignore_sources: Vec::new(),
            mac: None,
            wake_target: wol::DEFAULT_WAKE_TARGET,
            reconnect_delay_secs: 60,
            request_timeout_secs: 10,
            keepalive: KeepaliveSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeepaliveSection {
    pub idle_secs: u64,
    pub interval_secs: u64,
    pub retries: u32,
}

impl Default for KeepaliveSection {
    fn default() -> Self {
        Self {
            idle_secs: 10,
            interval_secs: 3,
            retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub enabled: bool,
    pub bind: IpAddr,
    pub port: u16,
    /// Extra HTTPS listener, off unless configured
    pub tls: Option<TlsSection>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            tls: None,
        }
    }
}

/// PEM certificate chain and key for the HTTPS listener
#[derive(Debug, Clone, Deserialize)]
pub struct TlsSection {
    pub cert: PathBuf,
    pub key: PathBuf,
    #[serde(default = "default_tls_port")]
    pub port: u16,
}

fn default_tls_port() -> u16 {
    8443
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PubSubSection {
    pub root: String,
    /// MQTT broker host; the pub/sub transport stays off without one
    pub broker: Option<String>,
    pub broker_port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub retry_delay_secs: u64,
}

impl Default for PubSubSection {
    fn default() -> Self {
        Self {
            root: "riod".to_string(),
            broker: None,
            broker_port: 1883,
            client_id: "riod".to_string(),
            keep_alive_secs: 30,
            retry_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Favourites {
    pub fav1: Option<String>,
}

impl Config {
    /// Load from `path`, or from the first search path that exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => SEARCH_PATHS.iter().map(PathBuf::from).find(|p| p.exists()),
        };

        let Some(path) = path else {
            tracing::info!("No config file found, using defaults");
            return Ok(Self::default());
        };

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            BridgeError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        tracing::info!("Loaded config from {}", path.display());
        Self::parse(&contents)
    }

    /// Parse TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Link settings; fails without a controller host or with a bad MAC
    pub fn link_config(&self) -> Result<LinkConfig> {
        let c = &self.controller;
        let host = c
            .host
            .clone()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| BridgeError::Config("controller host not given".to_string()))?;

        if let Some(mac) = &c.mac {
            wol::parse_mac(mac)?;
        }

        let controllers = if c.controllers.is_empty() {
            vec![1]
        } else {
            c.controllers.clone()
        };

        Ok(LinkConfig {
            host,
            port: c.port,
            controllers,
            ignore_zones: c.ignore_zones.clone(),
            ignore_sources: c.ignore_sources.clone(),
            mac: c.mac.clone(),
            wake_target: c.wake_target,
            reconnect_delay: Duration::from_secs(c.reconnect_delay_secs),
            request_timeout: Duration::from_secs(c.request_timeout_secs),
            keepalive: Keepalive {
                idle: Duration::from_secs(c.keepalive.idle_secs),
                interval: Duration::from_secs(c.keepalive.interval_secs),
                retries: c.keepalive.retries,
            },
        })
    }

    pub fn catalog(&self) -> ChannelCatalog {
        ChannelCatalog {
            channels: self.channels.clone(),
            default_channel: self.favourites.fav1.clone().unwrap_or_default(),
        }
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.bind, self.http.port)
    }

    /// HTTPS address with its certificate, when configured
    pub fn https(&self) -> Option<(SocketAddr, &TlsSection)> {
        let tls = self.http.tls.as_ref()?;
        Some((SocketAddr::new(self.http.bind, tls.port), tls))
    }

    /// Broker connection settings, when a broker is configured
    pub fn broker(&self) -> Option<BrokerConfig> {
        let p = &self.pubsub;
        let host = p.broker.clone().filter(|h| !h.is_empty())?;
        Some(BrokerConfig {
            host,
            port: p.broker_port,
            client_id: p.client_id.clone(),
            keep_alive: Duration::from_secs(p.keep_alive_secs),
            retry_delay: Duration::from_secs(p.retry_delay_secs),
        })
    }
}
