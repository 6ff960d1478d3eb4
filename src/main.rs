//! riod - keeps the controller link up and serves its state.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rio_bridge::{http, mqtt, Bridge, Config, PubSubRouter};
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// Mirror a whole-house audio controller's state to HTTP and push sinks.
#[derive(Parser, Debug)]
#[command(name = "riod")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (TOML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Controller address (overrides config file).
    #[arg(short = 'r', long, env = "RIOD_HOST")]
    host: Option<String>,

    /// Controller port (overrides config file).
    #[arg(short, long)]
    port: Option<u16>,

    /// HTTP port (overrides config file).
    #[arg(short = 'w', long)]
    http_port: Option<u16>,

    /// Controller MAC address for wake-on-LAN (overrides config file).
    #[arg(short, long)]
    mac: Option<String>,

    /// Log filter (error, warn, info, debug, trace or a full directive).
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).context("Invalid log filter")?)
        .init();

    tracing::info!("riod v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.controller.host = Some(host);
    }
    if let Some(port) = args.port {
        config.controller.port = port;
    }
    if let Some(port) = args.http_port {
        config.http.port = port;
    }
    if let Some(mac) = args.mac {
        config.controller.mac = Some(mac);
    }

    let link_config = config.link_config().context("Invalid controller configuration")?;
    tracing::info!(
        "Controller {}:{}, controllers {:?}, ignored zones {:?}, ignored sources {:?}",
        link_config.host,
        link_config.port,
        link_config.controllers,
        link_config.ignore_zones,
        link_config.ignore_sources
    );

    let bridge = Bridge::new(link_config, config.catalog());
    let relay = bridge
        .push_relay(&config.remote_targets)
        .context("Invalid remote target")?;

    let link_handle = bridge.start();
    let relay_handle = tokio::spawn(relay.run(bridge.subscribe_state()));

    let mut handles = vec![link_handle, relay_handle];

    match config.broker() {
        Some(broker) => {
            let router = PubSubRouter::new(config.pubsub.root.clone(), bridge.clone());
            tracing::info!("Pub/sub topics: {:?}", router.subscriptions());
            handles.push(tokio::spawn(mqtt::run(
                router,
                bridge.publications().clone(),
                broker,
            )));
        }
        None => tracing::info!("No MQTT broker configured, pub/sub disabled"),
    }

    if config.http.enabled {
        let listener_bridge = bridge.clone();
        let addr = config.http_addr();
        handles.push(tokio::spawn(async move {
            if let Err(e) = http::serve(listener_bridge, addr).await {
                tracing::error!("HTTP server on {} failed: {}", addr, e);
            }
        }));
    }

    if let Some((addr, tls)) = config.https() {
        let tls_config = http::load_tls(&tls.cert, &tls.key)
            .await
            .with_context(|| {
                format!(
                    "Failed to load TLS certificate {} and key {}",
                    tls.cert.display(),
                    tls.key.display()
                )
            })?;
        let listener_bridge = bridge.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = http::serve_tls(listener_bridge, addr, tls_config).await {
                tracing::error!("HTTPS server on {} failed: {}", addr, e);
            }
        }));
    }

    signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    for handle in handles {
        handle.abort();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_port_flag_overrides() {
        let args = Args::try_parse_from(["riod", "--host", "10.0.0.5", "--http-port", "8081"]).unwrap();
        assert_eq!(args.http_port, Some(8081));
        assert_eq!(args.host.as_deref(), Some("10.0.0.5"));

        assert!(Args::try_parse_from(["riod", "--web-port", "8081"]).is_err());
    }
}
