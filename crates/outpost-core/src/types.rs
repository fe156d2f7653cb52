//! Core domain types shared across all Outpost crates

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────
// RemoteTarget
// ─────────────────────────────────────────────────────────

/// One managed remote game-server session.
///
/// The credential pair (`player_id`, `player_token`) must never appear in
/// logs or rendered output in full; the manual `Debug` impl redacts both.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTarget {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub player_token: Option<String>,
    #[serde(default)]
    pub connected: bool,
}

impl std::fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("player_id", &self.player_id.as_ref().map(redact))
            .field("player_token", &self.player_token.as_ref().map(redact))
            .field("connected", &self.connected)
            .finish()
    }
}

/// Keep the first two characters, mask the rest.
fn redact(secret: &String) -> String {
    let visible: String = secret.chars().take(2).collect();
    format!("{visible}…")
}

// ─────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────

/// Category of a paired smart device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Switch,
    Alarm,
    StorageMonitor,
    #[serde(untagged)]
    Other(String),
}

/// A paired smart device on a remote target.
///
/// `value` has two writers: authoritative refreshes (REST / `device:info`)
/// and the optimistic controller. Server confirmation always wins over a
/// stale optimistic write.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub entity_id: u32,
    pub name: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub value: bool,
    #[serde(default)]
    pub auto_mode: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

// ─────────────────────────────────────────────────────────
// ChatMessage
// ─────────────────────────────────────────────────────────

/// A single entry in a target's reconciled chat log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Synthetic identifier, unique across history- and live-sourced
    /// entries even when origin timestamps collide.
    pub id: String,
    pub sender: String,
    pub body: String,
    /// Origin timestamp, normalized to epoch milliseconds.
    pub time_ms: u64,
    pub steam_id: Option<String>,
    /// Entry represents a message this client sent.
    pub self_sent: bool,
    /// Entry came from the one-time history page, not the live stream.
    pub from_history: bool,
}

impl ChatMessage {
    /// The dedup identity used when merging a history page into the live
    /// log: two entries with the same body and sender are one message.
    pub fn dedup_key(&self) -> (&str, &str) {
        (self.body.as_str(), self.sender.as_str())
    }

    /// Origin timestamp as a UTC datetime, for display.
    ///
    /// `None` only for timestamps outside chrono's representable range.
    pub fn timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.time_ms as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_with_token(token: &str) -> RemoteTarget {
        RemoteTarget {
            id: "s1".to_string(),
            name: "Main".to_string(),
            address: "203.0.113.7".to_string(),
            port: 28082,
            player_id: Some("76561198000000000".to_string()),
            player_token: Some(token.to_string()),
            connected: false,
        }
    }

    #[test]
    fn test_debug_redacts_credential_pair() {
        let target = target_with_token("-123456789");
        let rendered = format!("{:?}", target);
        assert!(!rendered.contains("-123456789"));
        assert!(!rendered.contains("76561198000000000"));
        assert!(rendered.contains("…"));
    }

    #[test]
    fn test_remote_target_deserializes_camel_case() {
        let json = r#"{
            "id": "s1",
            "name": "Main",
            "address": "203.0.113.7",
            "port": 28082,
            "playerId": "7656",
            "playerToken": "-99",
            "connected": true
        }"#;
        let target: RemoteTarget = serde_json::from_str(json).unwrap();
        assert_eq!(target.player_id.as_deref(), Some("7656"));
        assert!(target.connected);
    }

    #[test]
    fn test_device_kind_other_round_trip() {
        let kind: DeviceKind = serde_json::from_str("\"switch\"").unwrap();
        assert_eq!(kind, DeviceKind::Switch);

        let kind: DeviceKind = serde_json::from_str("\"samsite\"").unwrap();
        assert_eq!(kind, DeviceKind::Other("samsite".to_string()));
    }

    #[test]
    fn test_chat_message_dedup_key() {
        let msg = ChatMessage {
            id: "h-0".to_string(),
            sender: "A".to_string(),
            body: "hi".to_string(),
            time_ms: 1_000_000,
            steam_id: None,
            self_sent: false,
            from_history: true,
        };
        assert_eq!(msg.dedup_key(), ("hi", "A"));
    }

    #[test]
    fn test_chat_message_timestamp() {
        let msg = ChatMessage {
            id: "l-0".to_string(),
            sender: "A".to_string(),
            body: "hi".to_string(),
            time_ms: 1_700_000_000_000,
            steam_id: None,
            self_sent: false,
            from_history: false,
        };
        let ts = msg.timestamp().unwrap();
        assert_eq!(ts.timestamp_millis(), 1_700_000_000_000);
    }
}
