//! WebSocket transport for the event channel
//!
//! A `SocketTransport` is a handle to a background driver task that owns the
//! socket. The driver delivers inbound events to the channel's listeners,
//! writes queued outbound frames, heartbeats, and reconnects on its own with
//! exponential backoff when the socket drops.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::frame::{self, Frame};
use super::session::{self, Handshake};
use super::{ConnectionState, Connector, Listeners, Transport};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How long to wait for the server's `1::` connect frame.
const CONNECT_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff cap between reconnect attempts.
const MAX_BACKOFF_SECS: u64 = 64;

/// A session that lasted this long resets the backoff.
const STABILITY_THRESHOLD: Duration = Duration::from_secs(60);

pub struct EventSocket {
    stream: WsStream,
}

impl EventSocket {
    /// Connect to the socket.io WebSocket endpoint.
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::info!("Connecting WebSocket to {}", url);

        let (stream, response) = connect_async(url)
            .await
            .context("WebSocket connection failed")?;

        tracing::info!("WebSocket connected (status={})", response.status());

        Ok(Self { stream })
    }

    /// Send a text frame.
    pub async fn send_text(&mut self, msg: &str) -> Result<()> {
        tracing::debug!("WS send: {}", msg);
        self.stream
            .send(Message::Text(msg.to_string()))
            .await
            .context("Failed to send WebSocket message")
    }

    /// Receive the next text frame, answering pings along the way.
    ///
    /// Returns `Ok(None)` once the server closes the socket.
    pub async fn recv_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    return Ok(Some(text));
                }
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!("WebSocket closed: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => {
                    return Err(e).context("WebSocket receive error");
                }
                None => {
                    return Ok(None);
                }
            }
        }
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close failed: {}", e);
        }
    }
}

/// Handshake, connect, and wait for the server's connect frame.
async fn open_socket(
    http: &reqwest::Client,
    base_url: &str,
    user_id: &str,
) -> Result<(EventSocket, Handshake)> {
    let handshake = session::handshake(http, base_url, user_id).await?;
    let mut socket = EventSocket::connect(&handshake.ws_url(base_url, user_id)).await?;

    let first = time::timeout(CONNECT_FRAME_TIMEOUT, socket.recv_frame())
        .await
        .context("Timed out waiting for connect frame")??
        .context("Connection closed before connect frame")?;

    match frame::parse(&first) {
        Some(Frame::Connect) => tracing::info!("Received connect frame"),
        Some(Frame::Error(reason)) => anyhow::bail!("Server refused connection: {}", reason),
        _ => tracing::warn!("Expected 1:: connect frame, got: {}", first),
    }

    Ok((socket, handshake))
}

/// Opens `SocketTransport`s against a socket.io v1 server.
pub struct SocketConnector {
    http: reqwest::Client,
    base_url: String,
}

impl SocketConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Connector for SocketConnector {
    fn open<'a>(
        &'a self,
        user_id: &'a str,
        inbound: Listeners,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>>> {
        Box::pin(async move {
            // The first attempt is made here so the caller sees its error.
            let (socket, handshake) = open_socket(&self.http, &self.base_url, user_id).await?;

            let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            let driver = Driver {
                http: self.http.clone(),
                base_url: self.base_url.clone(),
                user_id: user_id.to_string(),
                inbound,
                outbound: outbound_rx,
                shutdown: shutdown_rx,
                state: state_tx,
            };
            tokio::spawn(driver.run(socket, handshake));

            Ok(Arc::new(SocketTransport {
                state: state_rx,
                outbound: outbound_tx,
                shutdown: shutdown_tx,
            }) as Arc<dyn Transport>)
        })
    }
}

/// Handle to a running socket driver.
pub struct SocketTransport {
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: watch::Sender<bool>,
}

impl Transport for SocketTransport {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Frames emitted while reconnecting are sent once the socket is back.
    fn emit(&self, event: &str, payload: &Value) -> Result<()> {
        anyhow::ensure!(
            self.state() != ConnectionState::Disconnected,
            "Event channel is disconnected"
        );
        self.outbound
            .send(frame::encode_event(event, payload))
            .map_err(|_| anyhow::anyhow!("Event channel driver has stopped"))
    }

    fn disconnect(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Why a session ended.
enum SessionEnd {
    /// `disconnect()` was called or the transport handle was dropped.
    Shutdown,
    /// Socket error or server-initiated close. Reconnect.
    Lost(anyhow::Error),
}

struct Driver {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
    inbound: Listeners,
    outbound: mpsc::UnboundedReceiver<String>,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<ConnectionState>,
}

impl Driver {
    async fn run(mut self, mut socket: EventSocket, mut handshake: Handshake) {
        let mut backoff = 1u64;

        loop {
            self.state.send_replace(ConnectionState::Connected);
            let connected_at = Instant::now();

            match self.run_session(&mut socket, &handshake).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(e) => {
                    if connected_at.elapsed() >= STABILITY_THRESHOLD {
                        backoff = 1;
                    }
                    tracing::warn!("Event channel lost: {:#}", e);
                }
            }

            self.state.send_replace(ConnectionState::Connecting);
            match self.reconnect(&mut backoff).await {
                Some((s, h)) => {
                    socket = s;
                    handshake = h;
                }
                None => break,
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        tracing::info!("Event channel for {} closed", self.user_id);
    }

    /// Retry until a socket opens or shutdown is requested.
    async fn reconnect(&mut self, backoff: &mut u64) -> Option<(EventSocket, Handshake)> {
        loop {
            tracing::info!("Reconnecting event channel in {}s...", backoff);
            tokio::select! {
                _ = time::sleep(Duration::from_secs(*backoff)) => {}
                _ = self.shutdown.changed() => return None,
            }
            if *self.shutdown.borrow() {
                return None;
            }
            *backoff = (*backoff * 2).min(MAX_BACKOFF_SECS);

            match open_socket(&self.http, &self.base_url, &self.user_id).await {
                Ok(opened) => return Some(opened),
                Err(e) => tracing::warn!("Event channel reconnect failed: {:#}", e),
            }
        }
    }

    async fn run_session(&mut self, socket: &mut EventSocket, handshake: &Handshake) -> SessionEnd {
        if *self.shutdown.borrow() {
            socket.close().await;
            return SessionEnd::Shutdown;
        }

        let mut heartbeat = time::interval(handshake.heartbeat_interval());
        heartbeat.tick().await; // skip first immediate tick

        loop {
            tokio::select! {
                frame = socket.recv_frame() => {
                    match frame {
                        Ok(Some(text)) => {
                            if let Some(end) = self.handle_frame(socket, &text).await {
                                return end;
                            }
                        }
                        Ok(None) => {
                            return SessionEnd::Lost(anyhow::anyhow!("WebSocket closed by server"));
                        }
                        Err(e) => return SessionEnd::Lost(e),
                    }
                }
                Some(out) = self.outbound.recv() => {
                    if let Err(e) = socket.send_text(&out).await {
                        return SessionEnd::Lost(e.context("Emit failed"));
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = socket.send_text(frame::HEARTBEAT).await {
                        return SessionEnd::Lost(e.context("Heartbeat send failed"));
                    }
                }
                _ = self.shutdown.changed() => {
                    // Frames queued before the shutdown still go out.
                    while let Ok(out) = self.outbound.try_recv() {
                        if socket.send_text(&out).await.is_err() {
                            break;
                        }
                    }
                    socket.close().await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    async fn handle_frame(&mut self, socket: &mut EventSocket, text: &str) -> Option<SessionEnd> {
        match frame::parse(text) {
            Some(Frame::Event { ack_id, name, args }) => {
                // Unacknowledged events are redelivered by the server.
                if let Some(id) = ack_id {
                    if let Err(e) = socket.send_text(&frame::encode_ack(id)).await {
                        tracing::warn!("Failed to ack event {}: {:#}", id, e);
                    }
                }
                let delivered = self.inbound.dispatch(&name, Frame::event_payload(args));
                tracing::debug!("Event {} delivered to {} listener(s)", name, delivered);
            }
            Some(Frame::Heartbeat) => {
                tracing::debug!("Heartbeat ping from server");
                if let Err(e) = socket.send_text(frame::HEARTBEAT).await {
                    return Some(SessionEnd::Lost(e.context("Heartbeat reply failed")));
                }
            }
            Some(Frame::Disconnect) => {
                return Some(SessionEnd::Lost(anyhow::anyhow!(
                    "Server ended the session"
                )));
            }
            Some(Frame::Error(reason)) => {
                tracing::warn!("Event channel error frame: {}", reason);
            }
            Some(other) => {
                tracing::debug!("Ignoring frame: {:?}", other);
            }
            None => {
                tracing::debug!("Unrecognised frame: {}", text);
            }
        }
        None
    }
}
