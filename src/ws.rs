//! WebSocket implementation of the connection seam.
//!
//! [`WsConnection`] drives one endpoint over tokio-tungstenite:
//!
//! - `connect()` spawns a background I/O task that performs the handshake
//!   (with a connect timeout) and then multiplexes outbound payloads,
//!   inbound frames, and keepalive pings
//! - Inbound text frames carry a [`CommandFrame`] envelope and are routed
//!   to the listener registered for their command id
//! - Transport failures fan out to the error callback of every registered
//!   listener and flip the connected flag, so the registry's
//!   reconnect-in-place path picks the instance back up
//! - `send()` is fire-and-forget; payloads queued before the handshake
//!   completes are flushed once the connection is up

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::Instant as TokioInstant;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use crate::connection::{ConnectionFactory, SocketConnection};
use crate::endpoint::Endpoint;
use crate::error::{RelayLinkError, Result};
use crate::listener::CommandListener;

type WebSocketStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Sleep horizon standing in for "never" when keepalives are disabled.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Connection behavior knobs for [`WsConnection`].
#[derive(Debug, Clone)]
pub struct WsOptions {
    /// Maximum time to wait for the WebSocket handshake. Zero disables
    /// the timeout.
    pub connect_timeout: Duration,
    /// Interval between keepalive pings on an idle connection. Zero
    /// disables keepalives.
    pub keepalive_interval: Duration,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

/// Wire envelope of the WebSocket transport.
///
/// One text frame carries either the result or the error of one command
/// channel; the payload itself stays opaque. Only this transport knows
/// the format — the registry passes payloads through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    /// Command channel this frame belongs to.
    pub cmd: String,
    /// Success payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Error message; when present the frame is an error delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandFrame {
    /// Build a success frame.
    pub fn result(cmd: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            data: Some(data.into()),
            error: None,
        }
    }

    /// Build an error frame.
    pub fn error(cmd: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            data: None,
            error: Some(message.into()),
        }
    }

    /// Serialize to the JSON text form sent on the wire.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| RelayLinkError::ConnectionError(format!("Failed to serialize frame: {}", e)))
    }

    /// Parse a frame from its JSON text form.
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| RelayLinkError::ConnectionError(format!("Failed to parse frame: {}", e)))
    }
}

/// Check that a connection target is a WebSocket URL.
fn validate_ws_url(url: &str) -> Result<()> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(RelayLinkError::ConfigurationError(format!(
            "endpoint must use ws:// or wss:// (found '{}')",
            url
        )))
    }
}

/// A [`SocketConnection`] over one WebSocket.
///
/// The same instance survives reconnects: listeners registered before a
/// drop remain registered, and a later `connect()` spawns a fresh I/O task
/// against the same outbound queue.
pub struct WsConnection {
    url: String,
    options: WsOptions,
    runtime: Handle,
    listeners: Arc<DashMap<String, Arc<dyn CommandListener>>>,
    outbound_tx: UnboundedSender<String>,
    /// Held by the I/O task while it is alive; reclaimed on reconnect.
    outbound_rx: Arc<tokio::sync::Mutex<UnboundedReceiver<String>>>,
    connected: Arc<AtomicBool>,
    connecting: Arc<AtomicBool>,
    /// Signals the current I/O task to close. Replaced on every connect.
    close_tx: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
}

impl WsConnection {
    /// Create an unconnected instance. `runtime` is the handle the I/O
    /// task is spawned on.
    pub fn new(url: impl Into<String>, options: WsOptions, runtime: Handle) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            options,
            runtime,
            listeners: Arc::new(DashMap::new()),
            outbound_tx,
            outbound_rx: Arc::new(tokio::sync::Mutex::new(outbound_rx)),
            connected: Arc::new(AtomicBool::new(false)),
            connecting: Arc::new(AtomicBool::new(false)),
            close_tx: parking_lot::Mutex::new(None),
        }
    }

    /// The connection target.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl SocketConnection for WsConnection {
    fn connect(&self) {
        if self.connected.load(Ordering::SeqCst) {
            return;
        }
        if self.connecting.swap(true, Ordering::SeqCst) {
            // A connect attempt is already in flight.
            return;
        }
        let (close_tx, close_rx) = oneshot::channel();
        *self.close_tx.lock() = Some(close_tx);

        let url = self.url.clone();
        let options = self.options.clone();
        let listeners = Arc::clone(&self.listeners);
        let outbound = Arc::clone(&self.outbound_rx);
        let connected = Arc::clone(&self.connected);
        let connecting = Arc::clone(&self.connecting);
        self.runtime.spawn(async move {
            connection_task(
                url, options, listeners, outbound, connected, connecting, close_rx,
            )
            .await;
        });
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(tx) = self.close_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, payload: &str) {
        // Queued until the I/O task picks it up; never blocks.
        let _ = self.outbound_tx.send(payload.to_string());
    }

    fn on(&self, command_id: &str, listener: Arc<dyn CommandListener>) {
        self.listeners.insert(command_id.to_string(), listener);
    }

    fn off(&self, command_id: &str) {
        self.listeners.remove(command_id);
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Production [`ConnectionFactory`] wiring [`WsConnection`]s into a
/// registry.
pub struct WsConnectionFactory {
    options: WsOptions,
    runtime: Handle,
}

impl WsConnectionFactory {
    /// Capture the current Tokio runtime for spawned I/O tasks.
    ///
    /// Fails with [`RelayLinkError::ConfigurationError`] when called
    /// outside a runtime; use
    /// [`with_runtime`](WsConnectionFactory::with_runtime) there.
    pub fn new(options: WsOptions) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            RelayLinkError::ConfigurationError(
                "WsConnectionFactory requires a running Tokio runtime".to_string(),
            )
        })?;
        Ok(Self { options, runtime })
    }

    /// Use an explicit runtime handle.
    pub fn with_runtime(options: WsOptions, runtime: Handle) -> Self {
        Self { options, runtime }
    }
}

impl ConnectionFactory for WsConnectionFactory {
    fn create(&self, endpoint: &Endpoint) -> Arc<dyn SocketConnection> {
        Arc::new(WsConnection::new(
            endpoint.as_str(),
            self.options.clone(),
            self.runtime.clone(),
        ))
    }
}

/// Perform the handshake, with the configured timeout.
async fn establish(url: &str, options: &WsOptions) -> Result<WebSocketStream> {
    validate_ws_url(url)?;
    let result = if options.connect_timeout.is_zero() {
        connect_async(url).await
    } else {
        match tokio::time::timeout(options.connect_timeout, connect_async(url)).await {
            Ok(result) => result,
            Err(_) => {
                return Err(RelayLinkError::TimeoutError(format!(
                    "Connection timeout ({:?})",
                    options.connect_timeout
                )));
            }
        }
    };
    match result {
        Ok((stream, _response)) => Ok(stream),
        Err(e) => Err(RelayLinkError::ConnectionError(format!(
            "Connection failed: {}",
            e
        ))),
    }
}

/// The background I/O task for one connect cycle.
///
/// Lifecycle:
/// 1. Handshake (with timeout); a failure fans out to every listener
/// 2. Event loop: outbound payloads + inbound frames + keepalive pings
/// 3. On exit: flip the connected flag and, unless closed on purpose,
///    fan the failure out to every listener
async fn connection_task(
    url: String,
    options: WsOptions,
    listeners: Arc<DashMap<String, Arc<dyn CommandListener>>>,
    outbound: Arc<tokio::sync::Mutex<UnboundedReceiver<String>>>,
    connected: Arc<AtomicBool>,
    connecting: Arc<AtomicBool>,
    close_rx: oneshot::Receiver<()>,
) {
    let mut ws = match establish(&url, &options).await {
        Ok(ws) => ws,
        Err(e) => {
            connecting.store(false, Ordering::SeqCst);
            log::warn!("[relay-link] {}: {}", url, e);
            fan_error(&listeners, &e.to_string());
            return;
        }
    };
    connected.store(true, Ordering::SeqCst);
    connecting.store(false, Ordering::SeqCst);
    log::info!("[relay-link] connected to {}", url);

    let mut outbound = outbound.lock().await;
    tokio::pin!(close_rx);

    let has_keepalive = !options.keepalive_interval.is_zero();
    let keepalive_dur = if has_keepalive {
        options.keepalive_interval
    } else {
        FAR_FUTURE
    };
    let mut idle_deadline = TokioInstant::now() + keepalive_dur;

    let failure = loop {
        let idle_sleep = tokio::time::sleep_until(idle_deadline);
        tokio::pin!(idle_sleep);

        tokio::select! {
            biased;

            // Highest priority: close requested by disconnect() or Drop.
            _ = &mut close_rx => {
                let _ = ws.close(None).await;
                break None;
            }

            _ = &mut idle_sleep, if has_keepalive => {
                if let Err(e) = ws.send(Message::Ping(Bytes::new())).await {
                    break Some(format!("Keepalive ping failed: {}", e));
                }
                idle_deadline = TokioInstant::now() + keepalive_dur;
            }

            payload = outbound.recv() => {
                match payload {
                    Some(payload) => {
                        if let Err(e) = ws.send(Message::Text(payload.into())).await {
                            break Some(format!("Send failed: {}", e));
                        }
                        idle_deadline = TokioInstant::now() + keepalive_dur;
                    }
                    // All senders dropped: the owning handle is gone.
                    None => {
                        let _ = ws.close(None).await;
                        break None;
                    }
                }
            }

            frame = ws.next() => {
                idle_deadline = TokioInstant::now() + keepalive_dur;
                match frame {
                    Some(Ok(Message::Text(text))) => route_frame(&listeners, text.as_str()),
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_)))
                    | Some(Ok(Message::Binary(_)))
                    | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) => break Some("Server closed connection".to_string()),
                    Some(Err(e)) => break Some(format!("WebSocket error: {}", e)),
                    None => break Some("Connection closed".to_string()),
                }
            }
        }
    };

    connected.store(false, Ordering::SeqCst);
    if let Some(message) = failure {
        log::warn!("[relay-link] {}: {}", url, message);
        fan_error(&listeners, &message);
    } else {
        log::debug!("[relay-link] {}: closed by client", url);
    }
}

/// Route one inbound frame to the listener registered for its command.
fn route_frame(listeners: &DashMap<String, Arc<dyn CommandListener>>, raw: &str) {
    let frame = match CommandFrame::decode(raw) {
        Ok(frame) => frame,
        Err(e) => {
            log::debug!("[relay-link] dropping unparseable frame: {}", e);
            return;
        }
    };
    let listener = match listeners.get(&frame.cmd) {
        Some(entry) => entry.value().clone(),
        None => {
            log::debug!("[relay-link] no listener for command: {}", frame.cmd);
            return;
        }
    };
    let delivery = match frame.error {
        Some(error) => listener.on_error(&error),
        None => listener.on_result(frame.data.as_deref().unwrap_or_default()),
    };
    if let Err(e) = delivery {
        log::warn!(
            "[relay-link] listener for command {} rejected delivery: {}",
            frame.cmd,
            e
        );
    }
}

/// Deliver a transport-level failure to every registered listener.
fn fan_error(listeners: &DashMap<String, Arc<dyn CommandListener>>, message: &str) {
    for entry in listeners.iter() {
        if let Err(e) = entry.value().on_error(message) {
            log::warn!(
                "[relay-link] error delivery for command {} failed: {}",
                entry.key(),
                e
            );
        }
    }
}
