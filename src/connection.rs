//! Connection lifecycle for the chat backend WebSocket.
//!
//! One [`Connection`] owns one logical channel to the backend. A background
//! task holds the socket, the bound session id, and the single reconnect
//! timer; callers talk to it through a command channel and observe it
//! through a shared state handle plus a typed event stream.
//!
//! # Architecture
//!
//! ```text
//!   Connection (handle)            background task
//!        │                               │
//!        │  connect(session_id)          │  dial → emit Connected → open_session
//!        │  send(frame)                  │  write frame (drop when no socket)
//!        │  disconnect()                 │  close, cancel timer, clear session
//!        │ ────── command channel ─────► │
//!        │                               │  read loop: decode frames,
//!        │ ◄────── event channel ─────── │  swallow malformed payloads,
//!        ▼                               │  schedule one reconnect on close
//!   ConnectionState (shared)             ▼
//! ```
//!
//! Reconnection is a single constant-delay timer: an unexpected close while
//! a session id is bound schedules exactly one attempt after
//! [`RECONNECT_DELAY`]; an explicit `connect` or `disconnect` cancels it.

// Rust guideline compliant 2026-02

use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use crate::constants::{CHAT_ENDPOINT_PATH, RECONNECT_DELAY};
use crate::protocol::{self, Inbound, Outbound};

/// Concrete WebSocket stream type.
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;
type WsWriter = SplitSink<WsStream, tungstenite::Message>;
type WsReader = SplitStream<WsStream>;

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport; the quiescent rest state.
    #[default]
    Disconnected,
    /// Transport handshake in flight.
    Connecting,
    /// Transport open and frames flowing.
    Connected,
    /// A transport error was observed; the close that follows drives the
    /// transition back to `Disconnected`.
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Event emitted by the connection's background task.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Transport opened for `session_id`; `open_session` is sent right after.
    Connected {
        /// Session the connection is bound to.
        session_id: String,
    },
    /// Transport closed (server close, network failure, or explicit
    /// disconnect of an open transport).
    Disconnected,
    /// Transport-level error. Does not itself trigger reconnection; the
    /// close that follows does.
    TransportError(String),
    /// One decoded inbound frame, in arrival order.
    Frame(Inbound),
}

/// Why a frame could not be handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// Not connected: the frame was dropped, not queued.
    NotConnected,
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected; frame dropped"),
        }
    }
}

impl std::error::Error for SendError {}

/// Command from the handle to the background task.
#[derive(Debug)]
enum Command {
    Connect { session_id: String },
    Send { frame: Outbound },
    Disconnect,
    Shutdown,
}

/// Handle to one logical backend connection.
#[derive(Debug)]
pub struct Connection {
    command_tx: mpsc::UnboundedSender<Command>,
    state: Arc<Mutex<ConnectionState>>,
}

impl Connection {
    /// Spawn the background task for `server_url`, delivering events on
    /// `events`.
    pub fn new(server_url: String, events: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(ConnectionState::Disconnected));

        let ctx = LoopCtx {
            server_url,
            state: Arc::clone(&state),
            events,
        };
        tokio::spawn(run_connection_loop(ctx, command_rx));

        Self { command_tx, state }
    }

    /// Bind to `session_id` and open a transport.
    ///
    /// Any existing transport is torn down first and any pending reconnect
    /// timer is cancelled. On transport-open the task emits
    /// [`ConnectionEvent::Connected`] and immediately sends an
    /// `open_session` frame.
    pub fn connect(&self, session_id: &str) {
        self.set_state(ConnectionState::Connecting);
        let _ = self.command_tx.send(Command::Connect {
            session_id: session_id.to_string(),
        });
    }

    /// Encode and transmit a frame.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotConnected`] when no transport is open; the
    /// frame is dropped, never queued.
    pub fn send(&self, frame: Outbound) -> Result<(), SendError> {
        if self.state() != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }
        let _ = self.command_tx.send(Command::Send { frame });
        Ok(())
    }

    /// Close the transport, cancel any pending reconnect, unbind the
    /// session. Idempotent.
    pub fn disconnect(&self) {
        let _ = self.command_tx.send(Command::Disconnect);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("connection state poisoned")
    }

    /// Stop the background task. Called automatically on drop.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("connection state poisoned") = state;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Convert an HTTP(S) URL to WS(S) scheme; `ws://`/`wss://` pass through.
fn ws_scheme(url: &str) -> String {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{url}")
    }
}

/// Build the chat endpoint URL with the session id as a query attribute.
fn build_chat_url(server_url: &str, session_id: &str) -> String {
    let base = ws_scheme(server_url.trim_end_matches('/'));
    format!("{base}{CHAT_ENDPOINT_PATH}?session_id={session_id}")
}

/// Shared context for the background task.
struct LoopCtx {
    server_url: String,
    state: Arc<Mutex<ConnectionState>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl LoopCtx {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("connection state poisoned") = state;
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }
}

/// Socket halves plus the reconnect timer, owned by the task.
struct Link {
    writer: Option<WsWriter>,
    reader: Option<WsReader>,
    session: Option<String>,
    reconnect: Option<Pin<Box<tokio::time::Sleep>>>,
}

impl Link {
    fn idle() -> Self {
        Self {
            writer: None,
            reader: None,
            session: None,
            reconnect: None,
        }
    }
}

/// Next inbound transport message; pends forever while no socket is open
/// (a command or timer arm will wake the loop instead).
async fn next_message(
    reader: &mut Option<WsReader>,
) -> Option<Result<tungstenite::Message, tungstenite::Error>> {
    match reader.as_mut() {
        Some(reader) => reader.next().await,
        None => std::future::pending().await,
    }
}

/// Pends until the reconnect deadline, forever if none is scheduled.
async fn reconnect_elapsed(reconnect: &mut Option<Pin<Box<tokio::time::Sleep>>>) {
    match reconnect.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Main task: owns the socket and serializes all lifecycle transitions.
async fn run_connection_loop(ctx: LoopCtx, mut command_rx: mpsc::UnboundedReceiver<Command>) {
    let mut link = Link::idle();

    loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                match cmd {
                    Some(Command::Connect { session_id }) => {
                        link.reconnect = None;
                        close_transport(&ctx, &mut link).await;
                        link.session = Some(session_id.clone());
                        open_transport(&ctx, &mut link, &session_id).await;
                    }
                    Some(Command::Send { frame }) => {
                        send_frame(&ctx, &mut link, &frame).await;
                    }
                    Some(Command::Disconnect) => {
                        link.reconnect = None;
                        link.session = None;
                        close_transport(&ctx, &mut link).await;
                        ctx.set_state(ConnectionState::Disconnected);
                    }
                    Some(Command::Shutdown) | None => {
                        close_transport(&ctx, &mut link).await;
                        ctx.set_state(ConnectionState::Disconnected);
                        log::debug!("connection task exiting");
                        return;
                    }
                }
            }

            msg = next_message(&mut link.reader) => {
                handle_transport_message(&ctx, &mut link, msg).await;
            }

            () = reconnect_elapsed(&mut link.reconnect) => {
                link.reconnect = None;
                if let Some(session_id) = link.session.clone() {
                    log::info!("reconnecting to session {session_id}");
                    open_transport(&ctx, &mut link, &session_id).await;
                }
            }
        }
    }
}

/// Dial the backend and, on success, emit `Connected` and send
/// `open_session`. On failure, fall straight into the close path so the
/// reconnect timer covers refused dials too.
async fn open_transport(ctx: &LoopCtx, link: &mut Link, session_id: &str) {
    ctx.set_state(ConnectionState::Connecting);
    let url = build_chat_url(&ctx.server_url, session_id);
    log::info!("connecting to {url}");

    match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((stream, _response)) => {
            let (writer, reader) = stream.split();
            link.writer = Some(writer);
            link.reader = Some(reader);
            ctx.set_state(ConnectionState::Connected);
            ctx.emit(ConnectionEvent::Connected {
                session_id: session_id.to_string(),
            });

            let open = Outbound::OpenSession {
                session_id: session_id.to_string(),
            };
            send_frame(ctx, link, &open).await;
        }
        Err(e) => {
            log::warn!("connect failed: {e}");
            ctx.emit(ConnectionEvent::TransportError(e.to_string()));
            handle_closed(ctx, link);
        }
    }
}

/// Write one encoded frame; a write failure is a transport error followed
/// by the close path.
async fn send_frame(ctx: &LoopCtx, link: &mut Link, frame: &Outbound) {
    let Some(writer) = link.writer.as_mut() else {
        log::debug!("no transport open, dropping outbound frame");
        return;
    };
    let payload = protocol::encode_outbound(frame);
    if let Err(e) = writer.send(tungstenite::Message::Text(payload)).await {
        log::warn!("frame write failed: {e}");
        ctx.set_state(ConnectionState::Error);
        ctx.emit(ConnectionEvent::TransportError(e.to_string()));
        handle_closed(ctx, link);
    }
}

/// React to one transport-level message (or stream end).
async fn handle_transport_message(
    ctx: &LoopCtx,
    link: &mut Link,
    msg: Option<Result<tungstenite::Message, tungstenite::Error>>,
) {
    match msg {
        Some(Ok(tungstenite::Message::Text(text))) => {
            match protocol::decode_inbound(&text) {
                Ok(frame) => ctx.emit(ConnectionEvent::Frame(frame)),
                // One bad frame must not crash the channel
                Err(e) => log::warn!("swallowing inbound payload: {e}"),
            }
        }
        Some(Ok(tungstenite::Message::Ping(data))) => {
            if let Some(writer) = link.writer.as_mut() {
                let _ = writer.send(tungstenite::Message::Pong(data)).await;
            }
        }
        Some(Ok(tungstenite::Message::Close(_))) | None => {
            log::info!("transport closed by peer");
            handle_closed(ctx, link);
        }
        Some(Err(e)) => {
            log::warn!("transport error: {e}");
            ctx.set_state(ConnectionState::Error);
            ctx.emit(ConnectionEvent::TransportError(e.to_string()));
            handle_closed(ctx, link);
        }
        Some(Ok(_)) => {
            // Binary/pong/raw frames carry nothing at this layer
        }
    }
}

/// Drop the socket, emit `Disconnected`, and schedule the single reconnect
/// attempt when a session id is still bound and no timer is outstanding.
fn handle_closed(ctx: &LoopCtx, link: &mut Link) {
    link.writer = None;
    link.reader = None;
    ctx.set_state(ConnectionState::Disconnected);
    ctx.emit(ConnectionEvent::Disconnected);

    if link.session.is_some() && link.reconnect.is_none() {
        log::info!("scheduling reconnect in {}s", RECONNECT_DELAY.as_secs());
        link.reconnect = Some(Box::pin(tokio::time::sleep(RECONNECT_DELAY)));
    }
}

/// Close an open transport quietly (explicit teardown, not a failure).
async fn close_transport(ctx: &LoopCtx, link: &mut Link) {
    link.reader = None;
    if let Some(mut writer) = link.writer.take() {
        let _ = writer.send(tungstenite::Message::Close(None)).await;
        let _ = writer.close().await;
        ctx.emit(ConnectionEvent::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_scheme_conversions() {
        assert_eq!(ws_scheme("https://chat.example.com"), "wss://chat.example.com");
        assert_eq!(ws_scheme("http://localhost:8787"), "ws://localhost:8787");
        assert_eq!(ws_scheme("ws://localhost:8787"), "ws://localhost:8787");
        assert_eq!(ws_scheme("wss://chat.example.com"), "wss://chat.example.com");
    }

    #[test]
    fn test_build_chat_url() {
        assert_eq!(
            build_chat_url("http://localhost:8787", "s-123"),
            "ws://localhost:8787/ws/chat?session_id=s-123"
        );
        assert_eq!(
            build_chat_url("https://chat.example.com/", "abc"),
            "wss://chat.example.com/ws/chat?session_id=abc"
        );
    }

    #[tokio::test]
    async fn test_initial_state_is_disconnected() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let connection = Connection::new("http://127.0.0.1:1".to_string(), events_tx);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_reports_delivery_failure() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let connection = Connection::new("http://127.0.0.1:1".to_string(), events_tx);

        let result = connection.send(Outbound::UserMessage {
            session_id: "s".to_string(),
            message_id: "u-1".to_string(),
            text: "dropped".to_string(),
            client_style: None,
        });
        assert_eq!(result, Err(SendError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let connection = Connection::new("http://127.0.0.1:1".to_string(), events_tx);

        connection.disconnect();
        connection.disconnect();
        tokio::task::yield_now().await;

        assert_eq!(connection.state(), ConnectionState::Disconnected);
        // No transport was ever open, so no Disconnected events either
        assert!(events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dial_failure_emits_error_then_disconnect() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        // Port 1 refuses immediately
        let connection = Connection::new("http://127.0.0.1:1".to_string(), events_tx);
        connection.connect("s-1");

        let first = tokio::time::timeout(std::time::Duration::from_secs(5), events_rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        assert!(matches!(first, ConnectionEvent::TransportError(_)));

        let second = tokio::time::timeout(std::time::Duration::from_secs(5), events_rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        assert!(matches!(second, ConnectionEvent::Disconnected));

        // Quiesce so the scheduled retry does not outlive the test
        connection.disconnect();
    }
}
