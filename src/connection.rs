use crate::charset;
use crate::dispatch::CommandWriter;
use crate::error::{BridgeError, Result};
use crate::protocol::{self, Request};
use crate::store::{BootstrapInfo, StateStore};
use crate::types::{ControllerId, SourceId, ZoneId};
use crate::wol;
use async_trait::async_trait;
use chrono::Local;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep, timeout};

const READ_BUFFER_SIZE: usize = 1024;

/// Where the link is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Bootstrapping,
    Watching,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "Disconnected",
            LinkState::Connecting => "Connecting",
            LinkState::Bootstrapping => "Bootstrapping",
            LinkState::Watching => "Watching",
        }
    }
}

/// TCP keepalive probing used to notice a dead controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub idle: Duration,
    pub interval: Duration,
    pub retries: u32,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(10),
            interval: Duration::from_secs(3),
            retries: 3,
        }
    }
}

/// Everything the link needs to reach and bootstrap the controller
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    pub controllers: Vec<ControllerId>,
    pub ignore_zones: Vec<ZoneId>,
    pub ignore_sources: Vec<SourceId>,
    /// Hardware address to wake when the controller does not answer
    pub mac: Option<String>,
    /// Where magic packets go
    pub wake_target: SocketAddr,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    pub keepalive: Keepalive,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 9621,
            controllers: vec![1],
            ignore_zones: Vec::new(),
            ignore_sources: Vec::new(),
            mac: None,
            wake_target: wol::DEFAULT_WAKE_TARGET,
            reconnect_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            keepalive: Keepalive::default(),
        }
    }
}

/// Owner of the controller socket.
///
/// [`ControllerLink::run`] connects, bootstraps and watches for the process
/// lifetime. Commands share the socket's write half; a command issued while
/// the socket is being replaced fails with [`BridgeError::NotConnected`].
pub struct ControllerLink {
    config: LinkConfig,
    writer: Mutex<Option<OwnedWriteHalf>>,
    state_tx: watch::Sender<LinkState>,
    hexdump: AtomicBool,
}

impl ControllerLink {
    pub fn new(config: LinkConfig) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Disconnected);
        Self {
            config,
            writer: Mutex::new(None),
            state_tx,
            hexdump: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Current lifecycle position
    pub fn state(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    /// Observe lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state_tx.subscribe()
    }

    /// Log every raw read as hex
    pub fn set_hexdump(&self, enabled: bool) {
        self.hexdump.store(enabled, Ordering::Relaxed);
    }

    pub fn hexdump(&self) -> bool {
        self.hexdump.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: LinkState) {
        tracing::debug!("Link state: {}", state.as_str());
        self.state_tx.send_replace(state);
    }

    /// Write one command to the controller
    pub async fn send(&self, wire: &str) -> Result<()> {
        self.send_all(&[wire]).await
    }

    /// Write a command sequence while holding the socket, so sequences
    /// from concurrent callers never interleave
    pub async fn send_all<S: AsRef<str>>(&self, wires: &[S]) -> Result<()> {
        if wires.is_empty() {
            return Ok(());
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(BridgeError::NotConnected)?;

        for wire in wires {
            let wire = wire.as_ref();
            tracing::debug!("Sending: {}", wire.trim_end());
            writer.write_all(wire.as_bytes()).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::BrokenPipe {
                    BridgeError::BrokenPipe
                } else {
                    BridgeError::Io(e)
                }
            })?;
        }
        Ok(())
    }

    /// Connect, bootstrap and watch forever, reconnecting on any failure
    pub async fn run(self: Arc<Self>, store: Arc<StateStore>) {
        loop {
            let stream = self.connect().await;

            match self.serve(stream, &store).await {
                Ok(()) => tracing::info!("Controller link closed"),
                Err(e) => tracing::error!("Controller link failed: {}", e),
            }

            self.writer.lock().await.take();
            store.record_disconnect(Local::now());
            self.set_state(LinkState::Disconnected);
        }
    }

    /// Open the socket, waking the controller between attempts
    async fn connect(&self) -> TcpStream {
        let (host, port) = (self.config.host.as_str(), self.config.port);

        loop {
            self.set_state(LinkState::Connecting);
            tracing::info!("Connecting to {}:{}", host, port);

            match TcpStream::connect((host, port)).await {
                Ok(stream) => {
                    tracing::info!("Connected to {}:{}", host, port);
                    return stream;
                }
                Err(e) => {
                    tracing::warn!("Failed to connect to {}:{}: {}", host, port, e);
                    if let Some(mac) = &self.config.mac {
                        if let Err(e) = wol::wake(mac, self.config.wake_target).await {
                            tracing::warn!("Wake-on-LAN failed: {}", e);
                        }
                    }
                    tracing::info!("Retrying in {:?}", self.config.reconnect_delay);
                    sleep(self.config.reconnect_delay).await;
                }
            }
        }
    }

    async fn serve(&self, stream: TcpStream, store: &StateStore) -> Result<()> {
        self.set_state(LinkState::Bootstrapping);

        let (reader, writer) = stream.into_split();
        let mut session = Session::new(reader, writer, self.config.request_timeout);

        let info = match bootstrap(&mut session, &self.config).await {
            Ok(info) => info,
            Err(e) => {
                // Back off so a controller that rejects bootstrap is not hammered
                sleep(self.config.reconnect_delay).await;
                return Err(e);
            }
        };
        store.record_bootstrap(info, Local::now());

        let Session { reader, writer, .. } = session;
        if let Err(e) = apply_keepalive(reader.get_ref().as_ref(), &self.config.keepalive) {
            tracing::warn!("Failed to set TCP keepalive: {}", e);
        }

        *self.writer.lock().await = Some(writer);
        self.set_state(LinkState::Watching);

        self.watch(reader, store).await
    }

    async fn watch<R: AsyncRead + Unpin>(&self, mut reader: R, store: &StateStore) -> Result<()> {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        let mut pending = Vec::new();

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Err(BridgeError::ConnectionClosed);
            }

            store.record_read(Local::now());
            if self.hexdump() {
                tracing::debug!("Read: {}", charset::hex_dump(&buf[..n]));
            }

            pending.extend_from_slice(&buf[..n]);
            for line in drain_lines(&mut pending) {
                ingest_line(&line, store);
            }
        }
    }
}

#[async_trait]
impl CommandWriter for ControllerLink {
    async fn write_commands(&self, wires: &[String]) -> Result<()> {
        self.send_all(wires).await
    }
}

fn apply_keepalive(stream: &TcpStream, keepalive: &Keepalive) -> std::io::Result<()> {
    let params = TcpKeepalive::new()
        .with_time(keepalive.idle)
        .with_interval(keepalive.interval);
    #[cfg(not(windows))]
    let params = params.with_retries(keepalive.retries);

    SockRef::from(stream).set_tcp_keepalive(&params)?;
    tracing::info!(
        "TCP keepalive: idle={:?}, interval={:?}, retries={}",
        keepalive.idle,
        keepalive.interval,
        keepalive.retries
    );
    Ok(())
}

/// Take every complete `\n`-terminated line out of `pending`.
///
/// A trailing `\r` is stripped and empty lines are dropped. Bytes after the
/// last terminator stay in `pending` for the next read.
pub(crate) fn drain_lines(pending: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let Some(last) = pending.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };

    let rest = pending.split_off(last + 1);
    let complete = std::mem::replace(pending, rest);

    complete
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(<[u8]>::to_vec)
        .collect()
}

/// Decode one raw line and apply it to the store
pub(crate) fn ingest_line(raw: &[u8], store: &StateStore) {
    let recoded = charset::recode(raw);
    if let Some(error) = &recoded.error {
        tracing::warn!("Convert error: {} ({})", error.text, error.hex);
        store.record_decode_error(error, Local::now());
    }

    let line = recoded.text;
    store.record_line(&line);

    match protocol::parse_line(&line) {
        Some(event) => {
            tracing::debug!("Notification: {}", line);
            store.apply_event(&event);
        }
        None => tracing::debug!("Response: {}", line),
    }
}

/// Synchronous request/response exchanges over a fresh socket
pub(crate) struct Session<R, W> {
    reader: BufReader<R>,
    writer: W,
    timeout: Duration,
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, timeout: Duration) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            timeout,
        }
    }

    /// Send a request without waiting for its response
    pub async fn send(&mut self, request: &Request) -> Result<()> {
        let wire = request.to_wire();
        tracing::debug!("Sending: {}", wire.trim_end());
        self.writer.write_all(wire.as_bytes()).await?;
        Ok(())
    }

    /// Send a request and wait for the next non-empty line
    pub async fn request(&mut self, request: &Request) -> Result<String> {
        self.send(request).await?;

        loop {
            let mut raw = Vec::new();
            let n = timeout(self.timeout, self.reader.read_until(b'\n', &mut raw))
                .await
                .map_err(|_| BridgeError::Timeout)??;
            if n == 0 {
                return Err(BridgeError::ConnectionClosed);
            }

            let text = charset::recode(&raw).text;
            let line = text.trim_end_matches(['\r', '\n']);
            if !line.is_empty() {
                tracing::debug!("Received: {}", line);
                return Ok(line.to_string());
            }
        }
    }

    /// Count how many consecutive `GET <path(n)>` succeed, starting at 1
    async fn enumerate(&mut self, path: impl Fn(usize) -> String) -> Result<usize> {
        let mut count = 0;
        loop {
            let response = self.request(&Request::get(path(count + 1))).await?;
            if !protocol::is_success(&response) {
                return Ok(count);
            }
            count += 1;
        }
    }
}

/// Read controller facts and register watches
pub(crate) async fn bootstrap<R, W>(session: &mut Session<R, W>, config: &LinkConfig) -> Result<BootstrapInfo>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut info = BootstrapInfo::default();

    let response = session.request(&Request::Version).await?;
    info.device_version = protocol::quoted_value(&response)
        .ok_or_else(|| BridgeError::InvalidResponse(format!("VERSION answered {:?}", response)))?
        .to_string();
    tracing::info!("Device version: {}", info.device_version);

    for &controller in &config.controllers {
        let path = protocol::controller_path(controller);
        let response = session.request(&Request::get(format!("{path}.type"))).await?;
        let device_type = protocol::quoted_value(&response).unwrap_or_default().to_string();
        tracing::info!("Controller {} type: {}", controller, device_type);
        info.controller_types.insert(controller, device_type);

        let zones = session
            .enumerate(|n| format!("{path}.Z[{n}].name"))
            .await?;
        tracing::info!("Controller {} zones: {}", controller, zones);
        info.zone_counts.insert(controller, zones);
    }

    info.source_count = session.enumerate(|n| format!("S[{n}].name")).await?;
    tracing::info!("Sources: {}", info.source_count);

    session.send(&Request::watch("SYSTEM")).await?;

    for (&controller, &zones) in &info.zone_counts {
        for zone in 1..=zones {
            let Ok(zone) = ZoneId::try_from(zone) else {
                break;
            };
            if config.ignore_zones.contains(&zone) {
                tracing::debug!("Ignoring zone {}", zone);
                continue;
            }
            session
                .send(&Request::watch(protocol::zone_path(controller, zone)))
                .await?;
        }
    }

    for source in 1..=info.source_count {
        let Ok(source) = SourceId::try_from(source) else {
            break;
        };
        if config.ignore_sources.contains(&source) {
            tracing::debug!("Ignoring source {}", source);
            continue;
        }
        session
            .send(&Request::watch(protocol::source_path(source)))
            .await?;
    }

    Ok(info)
}
