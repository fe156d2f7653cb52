//! Push-event definitions for the bridge connection
//!
//! Every unsolicited event the bridge can emit has a typed payload struct
//! here, plus the [`PushEvent`] wrapper enum and the [`EventKind`]
//! discriminant used by the fan-out router's subscriber registry.

use serde::{Deserialize, Serialize};

use crate::time::normalize_epoch_ms;

// ─────────────────────────────────────────────────────────
// Event Payload Structs
// ─────────────────────────────────────────────────────────

/// A managed server's bridge connection came up.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConnected {
    pub server_id: String,
}

/// A managed server's bridge connection went down.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDisconnected {
    pub server_id: String,
}

/// A new server became available through the pairing flow.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPaired {
    pub name: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub player_token: Option<String>,
}

/// Live team chat push.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMessage {
    pub server_id: String,
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub steam_id: Option<String>,
    /// Origin timestamp as sent by the server. May be epoch seconds or
    /// milliseconds; use [`TeamMessage::time_ms`] for the normalized value.
    pub time: u64,
}

impl TeamMessage {
    /// Origin timestamp normalized to epoch milliseconds.
    pub fn time_ms(&self) -> u64 {
        normalize_epoch_ms(self.time)
    }
}

/// A smart device's state changed server-side.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityChanged {
    pub server_id: String,
    pub entity_id: u32,
    pub value: bool,
}

/// What happened to a team member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerEventKind {
    Died,
    Spawned,
    Online,
    Offline,
}

/// Ephemeral team-member event (death, spawn, connectivity).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEvent {
    pub server_id: String,
    pub name: String,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(skip)]
    pub kind: Option<PlayerEventKind>,
}

/// Proxy-node runtime status.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    pub is_running: bool,
    #[serde(default)]
    pub node: Option<String>,
}

/// The active proxy node was switched.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyNodeChanged {
    pub node_name: String,
    pub node_type: String,
}

// ─────────────────────────────────────────────────────────
// PushEvent Enum
// ─────────────────────────────────────────────────────────

/// Fully typed unsolicited event from the bridge.
#[derive(Debug, Clone)]
pub enum PushEvent {
    // Server lifecycle
    ServerConnected(ServerConnected),
    ServerDisconnected(ServerDisconnected),
    ServerPaired(ServerPaired),

    // Team
    TeamMessage(TeamMessage),
    Player(PlayerEvent),

    // Devices
    EntityChanged(EntityChanged),

    // Proxy
    ProxyStatus(ProxyStatus),
    ProxyNodeChanged(ProxyNodeChanged),

    // Fallback for events this client does not understand
    Unknown {
        event: String,
        payload: serde_json::Value,
    },
}

/// Discriminant for [`PushEvent`], used as the key in the fan-out
/// subscriber registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ServerConnected,
    ServerDisconnected,
    ServerPaired,
    TeamMessage,
    Player,
    EntityChanged,
    ProxyStatus,
    ProxyNodeChanged,
    Unknown,
}

impl PushEvent {
    /// The registry key this event dispatches under.
    pub fn kind(&self) -> EventKind {
        match self {
            PushEvent::ServerConnected(_) => EventKind::ServerConnected,
            PushEvent::ServerDisconnected(_) => EventKind::ServerDisconnected,
            PushEvent::ServerPaired(_) => EventKind::ServerPaired,
            PushEvent::TeamMessage(_) => EventKind::TeamMessage,
            PushEvent::Player(_) => EventKind::Player,
            PushEvent::EntityChanged(_) => EventKind::EntityChanged,
            PushEvent::ProxyStatus(_) => EventKind::ProxyStatus,
            PushEvent::ProxyNodeChanged(_) => EventKind::ProxyNodeChanged,
            PushEvent::Unknown { .. } => EventKind::Unknown,
        }
    }

    /// Get the server ID if this event is scoped to one target.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            PushEvent::ServerConnected(e) => Some(&e.server_id),
            PushEvent::ServerDisconnected(e) => Some(&e.server_id),
            PushEvent::TeamMessage(e) => Some(&e.server_id),
            PushEvent::Player(e) => Some(&e.server_id),
            PushEvent::EntityChanged(e) => Some(&e.server_id),
            _ => None,
        }
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match self {
            PushEvent::ServerConnected(e) => format!("server {} connected", e.server_id),
            PushEvent::ServerDisconnected(e) => format!("server {} disconnected", e.server_id),
            PushEvent::ServerPaired(e) => format!("paired: {} ({}:{})", e.name, e.ip, e.port),
            PushEvent::TeamMessage(e) => format!("[{}] {}: {}", e.server_id, e.name, e.message),
            PushEvent::Player(e) => {
                let what = match e.kind {
                    Some(PlayerEventKind::Died) => "died",
                    Some(PlayerEventKind::Spawned) => "spawned",
                    Some(PlayerEventKind::Online) => "online",
                    Some(PlayerEventKind::Offline) => "offline",
                    None => "event",
                };
                format!("{} {}", e.name, what)
            }
            PushEvent::EntityChanged(e) => {
                format!("entity {} -> {}", e.entity_id, e.value)
            }
            PushEvent::ProxyStatus(e) => format!(
                "proxy {}",
                if e.is_running { "running" } else { "stopped" }
            ),
            PushEvent::ProxyNodeChanged(e) => {
                format!("proxy node -> {} ({})", e.node_name, e.node_type)
            }
            PushEvent::Unknown { event, .. } => format!("unknown event: {}", event),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Event Name Dispatch
// ─────────────────────────────────────────────────────────

/// Parse an event by wire name and payload.
///
/// Names this client does not understand (and names whose payload fails to
/// deserialize) fall back to [`PushEvent::Unknown`] rather than being
/// dropped, so the router can still surface them for debugging.
pub fn parse_push_event(event: &str, payload: serde_json::Value) -> PushEvent {
    match event {
        "server:connected" => serde_json::from_value(payload.clone())
            .map(PushEvent::ServerConnected)
            .unwrap_or_else(|_| unknown_event(event, payload)),
        "server:disconnected" => serde_json::from_value(payload.clone())
            .map(PushEvent::ServerDisconnected)
            .unwrap_or_else(|_| unknown_event(event, payload)),
        "server:paired" => serde_json::from_value(payload.clone())
            .map(PushEvent::ServerPaired)
            .unwrap_or_else(|_| unknown_event(event, payload)),
        "team:message" => serde_json::from_value(payload.clone())
            .map(PushEvent::TeamMessage)
            .unwrap_or_else(|_| unknown_event(event, payload)),
        "entity:changed" => serde_json::from_value(payload.clone())
            .map(PushEvent::EntityChanged)
            .unwrap_or_else(|_| unknown_event(event, payload)),
        "proxy:status" => serde_json::from_value(payload.clone())
            .map(PushEvent::ProxyStatus)
            .unwrap_or_else(|_| unknown_event(event, payload)),
        "proxy:node:changed" => serde_json::from_value(payload.clone())
            .map(PushEvent::ProxyNodeChanged)
            .unwrap_or_else(|_| unknown_event(event, payload)),
        "player:died" => player_event(PlayerEventKind::Died, event, payload),
        "player:spawned" => player_event(PlayerEventKind::Spawned, event, payload),
        "player:online" => player_event(PlayerEventKind::Online, event, payload),
        "player:offline" => player_event(PlayerEventKind::Offline, event, payload),
        _ => unknown_event(event, payload),
    }
}

fn player_event(kind: PlayerEventKind, event: &str, payload: serde_json::Value) -> PushEvent {
    match serde_json::from_value::<PlayerEvent>(payload.clone()) {
        Ok(mut e) => {
            e.kind = Some(kind);
            PushEvent::Player(e)
        }
        Err(_) => unknown_event(event, payload),
    }
}

fn unknown_event(event: &str, payload: serde_json::Value) -> PushEvent {
    PushEvent::Unknown {
        event: event.to_string(),
        payload,
    }
}
