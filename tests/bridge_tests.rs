//! End-to-end tests against a fake controller on loopback.

use std::time::Duration;

use rio_bridge::{http, Bridge, ChannelCatalog, DeviceStatus, DispatchStatus, LinkConfig, LinkState};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

const ZONES: usize = 3;
const SOURCES: usize = 2;
/// SYSTEM + every zone + every source
const WATCHES: usize = 1 + ZONES + SOURCES;

async fn read_command(reader: &mut BufReader<OwnedReadHalf>) -> Option<String> {
    let mut raw = Vec::new();
    let n = reader.read_until(b'\r', &mut raw).await.ok()?;
    if n == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&raw).trim().to_string())
}

fn reply_to(cmd: &str) -> Option<String> {
    if cmd == "VERSION" {
        return Some("S VERSION=\"1.02.08\"".to_string());
    }
    if cmd == "GET C[1].type" {
        return Some("S C[1].type=\"MCA-C5\"".to_string());
    }
    if let Some(n) = cmd.strip_prefix("GET C[1].Z[").and_then(|r| r.strip_suffix("].name")) {
        let n: usize = n.parse().ok()?;
        return Some(if n <= ZONES {
            format!("S C[1].Z[{n}].name=\"Zone {n}\"")
        } else {
            "E Invalid zone".to_string()
        });
    }
    if let Some(n) = cmd.strip_prefix("GET S[").and_then(|r| r.strip_suffix("].name")) {
        let n: usize = n.parse().ok()?;
        return Some(if n <= SOURCES {
            format!("S S[{n}].name=\"Source {n}\"")
        } else {
            "E Invalid source".to_string()
        });
    }
    None
}

/// Accept one connection and answer bootstrap until every watch arrived
async fn accept_and_bootstrap(
    listener: &TcpListener,
) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf, Vec<String>) {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("link did not connect")
        .unwrap();
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut watches = Vec::new();

    while watches.len() < WATCHES {
        let cmd = read_command(&mut reader).await.expect("link hung up during bootstrap");
        match reply_to(&cmd) {
            Some(reply) => write.write_all(format!("{reply}\r\n").as_bytes()).await.unwrap(),
            None => {
                assert!(cmd.starts_with("WATCH"), "unexpected command {cmd}");
                watches.push(cmd);
            }
        }
    }

    (reader, write, watches)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn start_bridge() -> (TcpListener, Bridge) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = LinkConfig {
        host: "127.0.0.1".to_string(),
        port: listener.local_addr().unwrap().port(),
        reconnect_delay: Duration::from_millis(50),
        request_timeout: Duration::from_secs(5),
        ..LinkConfig::default()
    };
    let bridge = Bridge::new(config, ChannelCatalog::default());
    bridge.start();
    (listener, bridge)
}

#[tokio::test]
async fn bootstrap_watch_and_command() {
    let (listener, bridge) = start_bridge().await;
    let (mut reader, mut write, watches) = accept_and_bootstrap(&listener).await;

    assert_eq!(
        watches,
        vec![
            "WATCH SYSTEM ON",
            "WATCH C[1].Z[1] ON",
            "WATCH C[1].Z[2] ON",
            "WATCH C[1].Z[3] ON",
            "WATCH S[1] ON",
            "WATCH S[2] ON",
        ]
    );

    let mut state = bridge.link().subscribe_state();
    timeout(Duration::from_secs(5), state.wait_for(|s| *s == LinkState::Watching))
        .await
        .expect("link never reached Watching")
        .unwrap();

    let snapshot = bridge.snapshot();
    assert_eq!(snapshot.zone_counts.get(&1), Some(&3));
    assert_eq!(snapshot.source_count, 2);
    assert_eq!(snapshot.device_version.as_deref(), Some("1.02.08"));
    assert!(snapshot.health.last_connect.is_some());

    // Two notifications in one write, the third split across writes
    write
        .write_all(b"N System.status=\"ON\"\r\nN S[1].name=\"Tuner\"\r\nN C[1].Z[2].curr")
        .await
        .unwrap();
    write.write_all(b"entSource=\"1\"\r\nN C[1].Z[2].status=\"ON\"\r\n").await.unwrap();

    eventually(|| bridge.snapshot().source(1).map(|s| s.active_zones) == Some(1)).await;
    assert_eq!(bridge.snapshot().device_status, Some(DeviceStatus::On));

    // Power-off restores the turn-on volume; 0x97 is the controller's ö
    write
        .write_all(b"N C[1].Z[3].turnOnVolume=\"30\"\r\nN C[1].Z[3].volume=\"55\"\r\n")
        .await
        .unwrap();
    write.write_all(b"N C[1].Z[3].status=\"OFF\"\r\nN S[2].name=\"K\x97ln\"\r\n").await.unwrap();

    eventually(|| bridge.snapshot().source(2).and_then(|s| s.attributes.get("name").cloned()).is_some()).await;
    let snapshot = bridge.snapshot();
    assert_eq!(
        snapshot.zone(1, 3).and_then(|z| z.get("volume")).map(String::as_str),
        Some("30")
    );
    assert_eq!(snapshot.source(2).unwrap().attributes["name"], "Köln");

    let status = bridge.dispatch_query("zone=3&action=on&source=2").await;
    assert_eq!(status, DispatchStatus::Ok);
    let cmd = timeout(Duration::from_secs(5), read_command(&mut reader))
        .await
        .unwrap();
    assert_eq!(cmd.as_deref(), Some("EVENT C[1].Z[3]!KeyRelease SelectSource 2"));

    let status = bridge.dispatch_query("action=frobnicate&zone=1").await;
    assert_eq!(status, DispatchStatus::BadRequest);
}

#[tokio::test]
async fn reconnects_and_keeps_state() {
    let (listener, bridge) = start_bridge().await;
    let (_reader, mut write, _) = accept_and_bootstrap(&listener).await;

    write.write_all(b"N C[1].Z[1].name=\"Kitchen\"\r\n").await.unwrap();
    eventually(|| bridge.store().zone_attribute(1, 1, "name").is_some()).await;

    // Controller drops the link
    drop(write);
    drop(_reader);

    let (_reader, _write, watches) = accept_and_bootstrap(&listener).await;
    assert_eq!(watches.len(), WATCHES);

    let snapshot = bridge.snapshot();
    assert!(snapshot.health.last_disconnect.is_some());
    // Attribute state survives a reconnect until re-announced
    assert_eq!(
        snapshot.zone(1, 1).and_then(|z| z.get("name")).map(String::as_str),
        Some("Kitchen")
    );
}

#[tokio::test]
async fn command_while_disconnected_reports_link_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = LinkConfig {
        host: "127.0.0.1".to_string(),
        port: listener.local_addr().unwrap().port(),
        ..LinkConfig::default()
    };
    // Never started: no socket is installed
    let bridge = Bridge::new(config, ChannelCatalog::default());

    let status = bridge.dispatch_query("zone=1&action=off").await;
    assert_eq!(status, DispatchStatus::LinkDown);
    assert_eq!(status.code(), 32);
}

async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn http_views_and_commands() {
    let bridge = Bridge::new(LinkConfig::default(), ChannelCatalog::default());
    bridge.store().apply_event(&rio_bridge::Event::SourceAttribute {
        source: 1,
        attribute: "name".to_string(),
        value: "Tuner".to_string(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, http::router(bridge)).await.unwrap();
    });

    let response = http_get(addr, "/SourceConfig").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("access-control-allow-origin: *"));
    assert!(response.ends_with(r#"{"1":{"activeZones":0,"name":"Tuner"}}"#));

    let response = http_get(addr, "/").await;
    assert!(response.contains("\"ZoneConfig\""));
    assert!(response.contains("\"DefaultChannel\""));

    let response = http_get(addr, "/status").await;
    assert!(response.contains("\"LinkState\":\"Disconnected\""));

    let response = http_get(addr, "/cmd?action=frobnicate&zone=1").await;
    assert!(response.starts_with("HTTP/1.1 401"));

    let response = http_get(addr, "/cmd?action=source&zone=1&source=2%0DWATCH%20SYSTEM%20OFF").await;
    assert!(response.starts_with("HTTP/1.1 401"));

    let response = http_get(addr, "/cmd?action=on&zone=1").await;
    assert!(response.starts_with("HTTP/1.1 503"));
    assert!(response.ends_with(r#"{"status":32}"#));
}
