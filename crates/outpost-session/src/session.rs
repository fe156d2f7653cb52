//! Async WebSocket session for the bridge connection.
//!
//! The [`Session`] owns the single persistent connection to the bridge,
//! sends named request frames, routes `{name}:success` / `{name}:error`
//! replies back to callers via oneshot channels, and fans unsolicited push
//! events out through the [`EventRouter`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Session                              │
//! │                                                              │
//! │  ┌──────────────┐        ┌──────────────────────────────┐   │
//! │  │  Public API  │        │   Background Task             │   │
//! │  │              │        │                                │   │
//! │  │  request() ──┼──cmd──▶│  WebSocket read/write loop    │   │
//! │  │              │  chan   │                                │   │
//! │  │  subscribe() │        │  Route: reply → tracker        │   │
//! │  │      │       │        │         push  → router         │   │
//! │  └──────┼───────┘        └──────────────┬───────────────┘   │
//! │         ▼                               ▼                    │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │  EventRouter (router.rs) — per-kind fan-out           │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use outpost_core::prelude::*;
use outpost_core::EventKind;
use outpost_core::PushEvent;

use crate::protocol::{parse_wire_message, Frame, ReplyTracker, RequestKind, WireMessage};
use crate::router::{EventRouter, Subscription};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fixed delay between reconnection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Maximum number of consecutive reconnection attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Capacity of the command channel (bounded, to apply backpressure).
const CMD_CHANNEL_CAPACITY: usize = 32;

/// How often to run stale reply-slot cleanup in the I/O loop.
const STALE_REPLY_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Backstop after which an unanswered reply slot is reclaimed. Longer than
/// every per-kind request deadline, so callers always time out first.
const STALE_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Current connection state of a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not attempting to connect.
    Disconnected,
    /// Initial connection attempt in progress.
    Connecting,
    /// Connected and ready to exchange messages.
    Connected,
    /// Connection lost; background task is retrying.
    Reconnecting {
        /// The current reconnection attempt number (1-indexed).
        attempt: u32,
    },
}

impl ConnectionState {
    /// `true` only for the fully-established state.
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }

    /// Short human-readable label for status output.
    pub fn label(&self) -> String {
        match self {
            ConnectionState::Disconnected => "Disconnected".to_string(),
            ConnectionState::Connecting => "Connecting".to_string(),
            ConnectionState::Connected => "Connected".to_string(),
            ConnectionState::Reconnecting { attempt } => {
                format!("Reconnecting ({attempt}/{MAX_RECONNECT_ATTEMPTS})")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Internal command type
// ---------------------------------------------------------------------------

/// Internal messages sent from the public API to the background task.
enum ClientCommand {
    /// Send a request frame and deliver the reply to `response_tx`.
    SendRequest {
        kind: RequestKind,
        payload: serde_json::Value,
        response_tx: oneshot::Sender<Result<serde_json::Value>>,
    },
    /// Gracefully close the WebSocket and stop the background task.
    Disconnect,
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The one persistent bridge connection for this process.
///
/// Cheap to clone; every clone shares the connection, the subscriber
/// registry, and the connection state. Constructed disconnected with
/// [`Session::new`]; [`Session::connect`] is idempotent and spawns the
/// background Tokio task that owns the socket. The task exits when
/// [`Session::disconnect`] is called or every clone is dropped (the
/// command channel closes, which signals the task to stop).
#[derive(Clone)]
pub struct Session {
    url: String,
    router: Arc<EventRouter>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    cmd_slot: Arc<StdMutex<Option<mpsc::Sender<ClientCommand>>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.url)
            .field("connection_state", &self.state())
            .finish()
    }
}

impl Session {
    /// Create a disconnected session for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            url: url.into(),
            router: Arc::new(EventRouter::new()),
            state_tx: Arc::new(state_tx),
            cmd_slot: Arc::new(StdMutex::new(None)),
        }
    }

    /// Establish the connection and spawn the background I/O task.
    ///
    /// Idempotent: if the session is already connected (or a connect or
    /// reconnect is in progress) this is a no-op. Automatic reconnection
    /// is enabled; the retry policy (bounded attempts, fixed delay) is a
    /// transport concern that consumers must not depend on.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial connection cannot be established.
    pub async fn connect(&self) -> Result<()> {
        // Atomic Disconnected → Connecting transition doubles as the
        // re-entry latch.
        let started = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            debug!("session: connect() while {:?} — no-op", self.state());
            return Ok(());
        }

        info!("session: connecting to {}", self.url);
        let ws_stream = match connect_ws(&self.url).await {
            Ok(ws) => ws,
            Err(err) => {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::channel::<ClientCommand>(CMD_CHANNEL_CAPACITY);
        {
            let mut slot = self.cmd_slot.lock().unwrap_or_else(|e| e.into_inner());
            *slot = Some(cmd_tx);
        }
        self.state_tx.send_replace(ConnectionState::Connected);

        tokio::spawn(run_client_task(
            self.url.clone(),
            ws_stream,
            cmd_rx,
            Arc::clone(&self.router),
            Arc::clone(&self.state_tx),
        ));

        Ok(())
    }

    /// Gracefully close the connection and release all subscriptions.
    ///
    /// Safe to call when already disconnected.
    pub async fn disconnect(&self) {
        let cmd_tx = {
            let mut slot = self.cmd_slot.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(tx) = cmd_tx {
            // Ignore the send error — if the channel is already closed the
            // task has already exited.
            let _ = tx.send(ClientCommand::Disconnect).await;
        }
        self.router.clear();
    }

    /// Send a named request and wait for its `:success` / `:error` reply.
    ///
    /// Attempt-once: the session never re-issues a request; retry is the
    /// caller's decision.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] immediately if the connection is not
    ///   established — a request is never queued behind a reconnect.
    /// - [`Error::Remote`] if the bridge replied with `{name}:error`.
    /// - [`Error::Timeout`] if no reply arrived within the kind's bound.
    /// - [`Error::ChannelClosed`] if the background task exited mid-call.
    pub async fn request(
        &self,
        kind: RequestKind,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let cmd_tx = {
            let slot = self.cmd_slot.lock().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        }
        .ok_or(Error::NotConnected)?;

        let (response_tx, response_rx) = oneshot::channel();
        cmd_tx
            .send(ClientCommand::SendRequest {
                kind,
                payload,
                response_tx,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;

        match tokio::time::timeout(kind.timeout(), response_rx).await {
            Err(_elapsed) => Err(Error::timeout(kind.event_name())),
            Ok(Err(_dropped)) => Err(Error::ChannelClosed),
            Ok(Ok(result)) => result,
        }
    }

    /// Register `callback` for every push event of `kind`.
    ///
    /// If the connection is not yet established the subscribe is ignored
    /// with a warning and an inert [`Subscription`] is returned — consumers
    /// frequently mount before the connection completes and must not panic.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        if !self.is_connected() {
            warn!("session: subscribe({kind:?}) while disconnected — ignored");
            return Subscription::inert();
        }
        self.router.subscribe(kind, callback)
    }

    /// Remove one registered callback. Idempotent.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.router.unsubscribe(subscription);
    }

    /// Observe connection-state transitions.
    ///
    /// The receiver fires on every transition, including the first
    /// successful connect and every reconnect.
    pub fn connection_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Return the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Return `true` if the session is currently connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// The fan-out router backing this session's subscriptions.
    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

/// Entry point for the background WebSocket I/O task.
///
/// Accepts an already-open `ws_stream` for the first connection, then
/// manages reconnection on unexpected disconnects.
async fn run_client_task(
    url: String,
    ws_stream: WsStream,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    router: Arc<EventRouter>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
) {
    let mut tracker = ReplyTracker::new();

    // Run the read/write loop with the initial connection.
    let mut reconnect = run_io_loop(ws_stream, &mut cmd_rx, &router, &mut tracker).await;

    'outer: while reconnect {
        // Connection lost unexpectedly. In-flight callers get a prompt
        // failure instead of waiting out their deadline.
        tracker.fail_all("connection lost");

        let mut attempt: u32 = 1;
        loop {
            if attempt > MAX_RECONNECT_ATTEMPTS {
                error!(
                    "session: exceeded {} reconnection attempts, giving up",
                    MAX_RECONNECT_ATTEMPTS
                );
                break 'outer;
            }

            state_tx.send_replace(ConnectionState::Reconnecting { attempt });
            warn!(
                "session: connection lost, retrying in {:?} (attempt {}/{})",
                RECONNECT_DELAY, attempt, MAX_RECONNECT_ATTEMPTS
            );
            tokio::time::sleep(RECONNECT_DELAY).await;

            // The session was dropped or disconnected while we slept — no
            // point reconnecting.
            if cmd_rx.is_closed() {
                break 'outer;
            }

            match connect_ws(&url).await {
                Ok(ws_stream) => {
                    info!("session: reconnected (attempt {})", attempt);
                    state_tx.send_replace(ConnectionState::Connected);
                    reconnect = run_io_loop(ws_stream, &mut cmd_rx, &router, &mut tracker).await;
                    continue 'outer;
                }
                Err(err) => {
                    warn!("session: reconnection attempt {} failed: {}", attempt, err);
                    attempt += 1;
                }
            }
        }
    }

    tracker.fail_all("session closed");
    state_tx.send_replace(ConnectionState::Disconnected);
    debug!("session: background task exiting");
}

/// Run one connection's read/write select loop.
///
/// Returns `true` if the connection was lost unexpectedly (caller should
/// reconnect), or `false` if the task should terminate (Disconnect command
/// or channel closed).
async fn run_io_loop(
    ws_stream: WsStream,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
    router: &EventRouter,
    tracker: &mut ReplyTracker,
) -> bool {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();

    let mut cleanup_interval = tokio::time::interval(STALE_REPLY_CLEANUP_INTERVAL);
    cleanup_interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            // ── Incoming WebSocket message ───────────────────────────────
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_ws_text(text.as_str(), tracker, router);
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!("session: received Close frame");
                        return true; // reconnect
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong/Binary — ignore
                    }
                    Some(Err(err)) => {
                        warn!("session: WebSocket read error: {}", err);
                        return true; // reconnect
                    }
                    None => {
                        debug!("session: WebSocket stream ended");
                        return true; // reconnect
                    }
                }
            }

            // ── Outgoing command from the public API ─────────────────────
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::SendRequest { kind, payload, response_tx }) => {
                        handle_send_request(kind, payload, response_tx, tracker, &mut ws_sink)
                            .await;
                    }
                    Some(ClientCommand::Disconnect) => {
                        send_close(&mut ws_sink).await;
                        return false; // clean shutdown
                    }
                    None => {
                        // Every Session clone was dropped — close gracefully.
                        debug!("session: command channel closed, shutting down");
                        send_close(&mut ws_sink).await;
                        return false;
                    }
                }
            }

            // ── Periodic stale reply-slot cleanup ───────────────────────
            _ = cleanup_interval.tick() => {
                let stale = tracker.cleanup_stale(STALE_REPLY_TIMEOUT);
                if !stale.is_empty() {
                    debug!("session: reclaimed {} stale reply slot(s): {:?}", stale.len(), stale);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Establish a new WebSocket connection to `url`.
async fn connect_ws(url: &str) -> Result<WsStream> {
    let (ws_stream, _response) = connect_async(url)
        .await
        .map_err(|err| Error::transport(format!("failed to connect to bridge: {err}")))?;
    Ok(ws_stream)
}

/// Route an incoming text frame to the tracker or the fan-out router.
fn handle_ws_text(text: &str, tracker: &mut ReplyTracker, router: &EventRouter) {
    match parse_wire_message(text) {
        Some(WireMessage::Reply { request, result }) => {
            if !tracker.complete(&request, result) {
                debug!("session: unsolicited reply for '{}'", request);
            }
        }
        Some(WireMessage::Push(event)) => {
            trace!("session: push event: {}", event.summary());
            router.dispatch(&event);
        }
        None => {
            debug!("session: ignoring unparseable frame: {}", &text[..text.len().min(120)]);
        }
    }
}

/// Register a reply slot, serialize the request frame, and write it to the
/// WebSocket sink. Delivers an error to `response_tx` if serialization or
/// send fails.
async fn handle_send_request(
    kind: RequestKind,
    payload: serde_json::Value,
    response_tx: oneshot::Sender<Result<serde_json::Value>>,
    tracker: &mut ReplyTracker,
    ws_sink: &mut SplitSink<WsStream, WsMessage>,
) {
    // Register the slot before touching the wire so it exists if the reply
    // races the send.
    let reply_rx = tracker.register(kind);
    let frame = Frame::new(kind.event_name(), payload);

    let json = match serde_json::to_string(&frame) {
        Ok(j) => j,
        Err(err) => {
            let e = Error::protocol(format!("failed to serialize request frame: {err}"));
            let _ = response_tx.send(Err(e));
            return;
        }
    };

    if let Err(err) = ws_sink.send(WsMessage::Text(json.into())).await {
        let e = Error::transport(format!("failed to send request: {err}"));
        let _ = response_tx.send(Err(e));
        return;
    }

    // Forward the tracker's reply to the caller.
    tokio::spawn(async move {
        match reply_rx.await {
            Ok(result) => {
                let _ = response_tx.send(result);
            }
            Err(_) => {
                // The slot was reclaimed (stale cleanup or task exit).
                let _ = response_tx.send(Err(Error::ChannelClosed));
            }
        }
    });
}

/// Send a WebSocket Close frame, ignoring any write errors.
async fn send_close(ws_sink: &mut SplitSink<WsStream, WsMessage>) {
    let _ = ws_sink.send(WsMessage::Close(None)).await;
    let _ = ws_sink.close().await;
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// In-process stand-in for the bridge, used by unit tests across the
/// workspace. Receives the session's outgoing requests and lets the test
/// reply (or refuse to), and can inject push events into the fan-out
/// router.
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_support {
    use super::*;

    /// One request captured from a [`Session`] under test.
    pub struct CapturedRequest {
        pub kind: RequestKind,
        pub payload: serde_json::Value,
        responder: oneshot::Sender<Result<serde_json::Value>>,
    }

    impl CapturedRequest {
        /// Reply with `{name}:success`.
        pub fn success(self, payload: serde_json::Value) {
            let _ = self.responder.send(Ok(payload));
        }

        /// Reply with `{name}:error`.
        pub fn error(self, message: impl Into<String>) {
            let _ = self.responder.send(Err(Error::remote(message)));
        }

        /// Leave the request unanswered so the caller runs into its
        /// per-kind deadline. The reply slot is intentionally leaked; a
        /// dropped sender would surface as [`Error::ChannelClosed`]
        /// instead of a timeout.
        pub fn ignore(self) {
            std::mem::forget(self.responder);
        }
    }

    /// The far side of a [`Session::new_for_test`] pair.
    pub struct BridgeStub {
        cmd_rx: mpsc::Receiver<ClientCommand>,
        router: Arc<EventRouter>,
    }

    impl BridgeStub {
        /// Wait for the next request issued through the session.
        ///
        /// Returns `None` once the session has been dropped or
        /// disconnected.
        pub async fn next_request(&mut self) -> Option<CapturedRequest> {
            loop {
                match self.cmd_rx.recv().await? {
                    ClientCommand::SendRequest {
                        kind,
                        payload,
                        response_tx,
                    } => {
                        return Some(CapturedRequest {
                            kind,
                            payload,
                            responder: response_tx,
                        });
                    }
                    ClientCommand::Disconnect => return None,
                }
            }
        }

        /// Inject a push event as if it had arrived on the wire.
        pub fn push(&self, event: &PushEvent) {
            self.router.dispatch(event);
        }
    }

    impl Session {
        /// Create a connected [`Session`] backed by an in-process
        /// [`BridgeStub`] instead of a real socket. Requests flow to the
        /// stub; per-kind deadlines still apply.
        pub fn new_for_test() -> (Session, BridgeStub) {
            let (state_tx, _state_rx) = watch::channel(ConnectionState::Connected);
            let (cmd_tx, cmd_rx) = mpsc::channel(CMD_CHANNEL_CAPACITY);
            let router = Arc::new(EventRouter::new());
            let session = Session {
                url: "ws://test.invalid".to_string(),
                router: Arc::clone(&router),
                state_tx: Arc::new(state_tx),
                cmd_slot: Arc::new(StdMutex::new(Some(cmd_tx))),
            };
            (session, BridgeStub { cmd_rx, router })
        }

        /// Flip the test session's connection state, firing the watch.
        pub fn set_state_for_test(&self, state: ConnectionState) {
            self.state_tx.send_replace(state);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
