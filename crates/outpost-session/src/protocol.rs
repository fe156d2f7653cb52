//! Wire protocol for the bridge connection
//!
//! Frames are JSON text messages of the shape
//! `{"event": "<name>", "payload": {...}}`. A frame is either an
//! unsolicited push event or the reply to a request this client sent.
//! Replies carry no correlation id: the request named `x` is answered by
//! exactly one `x:success` or `x:error` frame, so correlation is by reply
//! event name with FIFO slots per name.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use outpost_core::prelude::*;
use outpost_core::{parse_push_event, PushEvent};

/// Reply deadline for metadata-sized requests.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Reply deadline for requests with large payloads (map images).
pub const PAYLOAD_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// RequestKind
// ---------------------------------------------------------------------------

/// Every request this client can issue, with its wire name, reply names,
/// and per-kind timeout pinned in one place.
///
/// The registry exists so the string-keyed correlation is enforced at the
/// call site instead of being re-derived ad hoc per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    ServerConnect,
    ServerDisconnect,
    ServerInfo,
    MessageSend,
    DeviceControl,
    DeviceInfo,
    TeamInfo,
    MapInfo,
    MapGet,
    TimeGet,
}

impl RequestKind {
    pub const ALL: &'static [RequestKind] = &[
        RequestKind::ServerConnect,
        RequestKind::ServerDisconnect,
        RequestKind::ServerInfo,
        RequestKind::MessageSend,
        RequestKind::DeviceControl,
        RequestKind::DeviceInfo,
        RequestKind::TeamInfo,
        RequestKind::MapInfo,
        RequestKind::MapGet,
        RequestKind::TimeGet,
    ];

    /// The request's wire event name.
    pub fn event_name(self) -> &'static str {
        match self {
            RequestKind::ServerConnect => "server:connect",
            RequestKind::ServerDisconnect => "server:disconnect",
            RequestKind::ServerInfo => "server:info",
            RequestKind::MessageSend => "message:send",
            RequestKind::DeviceControl => "device:control",
            RequestKind::DeviceInfo => "device:info",
            RequestKind::TeamInfo => "team:info",
            RequestKind::MapInfo => "map:info",
            RequestKind::MapGet => "map:get",
            RequestKind::TimeGet => "time:get",
        }
    }

    /// Reply deadline for this kind. `map:get` carries image bytes and
    /// gets the larger bound; everything else is metadata-sized.
    pub fn timeout(self) -> Duration {
        match self {
            RequestKind::MapGet => PAYLOAD_TIMEOUT,
            _ => METADATA_TIMEOUT,
        }
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// One JSON text frame on the wire, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Error payload carried by `{name}:error` replies.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// An incoming frame, classified.
#[derive(Debug)]
pub enum WireMessage {
    /// Reply to a request this client sent. `request` is the request's
    /// event name (the `:success`/`:error` suffix already stripped).
    Reply {
        request: String,
        result: Result<serde_json::Value>,
    },
    /// Unsolicited push event.
    Push(PushEvent),
}

/// Parse a raw text frame into a classified [`WireMessage`].
///
/// Returns `None` when the text is not a valid frame at all; the caller
/// logs and drops it.
pub fn parse_wire_message(text: &str) -> Option<WireMessage> {
    let frame: Frame = serde_json::from_str(text).ok()?;

    if let Some(request) = frame.event.strip_suffix(":success") {
        return Some(WireMessage::Reply {
            request: request.to_string(),
            result: Ok(frame.payload),
        });
    }

    if let Some(request) = frame.event.strip_suffix(":error") {
        let message = serde_json::from_value::<ErrorPayload>(frame.payload.clone())
            .map(|e| e.message)
            .unwrap_or_else(|_| format!("request '{request}' failed"));
        return Some(WireMessage::Reply {
            request: request.to_string(),
            result: Err(Error::remote(message)),
        });
    }

    Some(WireMessage::Push(parse_push_event(
        &frame.event,
        frame.payload,
    )))
}

// ---------------------------------------------------------------------------
// ReplyTracker
// ---------------------------------------------------------------------------

/// A response slot registered before its request touches the wire.
struct PendingReply {
    response_tx: oneshot::Sender<Result<serde_json::Value>>,
    created_at: Instant,
}

/// Correlates replies with waiting callers by request event name.
///
/// Each name holds a FIFO queue of slots: a reply pops the front slot for
/// its name, so every slot fires at most once and repeated requests to the
/// same name never leak handlers. Callers enforce their own per-kind
/// deadline; [`ReplyTracker::cleanup_stale`] is the backstop that reclaims
/// slots whose reply never arrived at all.
pub struct ReplyTracker {
    pending: HashMap<String, VecDeque<PendingReply>>,
}

impl ReplyTracker {
    /// Create a new, empty tracker.
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register a response slot for `kind` and return the receiver that
    /// will yield the reply when it arrives.
    pub fn register(&mut self, kind: RequestKind) -> oneshot::Receiver<Result<serde_json::Value>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .entry(kind.event_name().to_string())
            .or_default()
            .push_back(PendingReply {
                response_tx: tx,
                created_at: Instant::now(),
            });
        rx
    }

    /// Deliver a reply to the oldest waiter for `request`.
    ///
    /// Returns `true` if a slot existed (reply routed), `false` for an
    /// unsolicited reply.
    pub fn complete(&mut self, request: &str, result: Result<serde_json::Value>) -> bool {
        let Some(queue) = self.pending.get_mut(request) else {
            return false;
        };
        let Some(slot) = queue.pop_front() else {
            return false;
        };
        if queue.is_empty() {
            self.pending.remove(request);
        }
        // The receiver may have given up (per-kind deadline); ignore.
        let _ = slot.response_tx.send(result);
        true
    }

    /// Fail every pending slot with a transport error.
    ///
    /// Called when the connection is lost so in-flight callers see a
    /// prompt failure instead of waiting out their deadline.
    pub fn fail_all(&mut self, message: &str) {
        for (_, mut queue) in self.pending.drain() {
            while let Some(slot) = queue.pop_front() {
                let _ = slot.response_tx.send(Err(Error::transport(message)));
            }
        }
    }

    /// Remove slots that have been pending longer than `timeout`.
    ///
    /// Returns the request names of the slots that were removed.
    pub fn cleanup_stale(&mut self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut removed = Vec::new();

        self.pending.retain(|request, queue| {
            let before = queue.len();
            queue.retain(|slot| now.duration_since(slot.created_at) <= timeout);
            for _ in queue.len()..before {
                removed.push(request.clone());
            }
            !queue.is_empty()
        });

        if !removed.is_empty() {
            debug!("reply tracker: reclaimed {} stale slot(s)", removed.len());
        }
        removed
    }

    /// Return the number of currently pending slots.
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }
}

impl Default for ReplyTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
