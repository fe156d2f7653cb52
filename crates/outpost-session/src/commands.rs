//! Typed request wrappers over [`Session::request`]
//!
//! Each request pair on the wire gets one method here that builds the
//! payload, issues the request through the session, and parses the
//! `{...Info}` reply wrapper into a typed struct.

use serde::Deserialize;
use serde_json::json;

use outpost_core::prelude::*;
use outpost_core::RemoteTarget;

use crate::protocol::RequestKind;
use crate::session::Session;

// ---------------------------------------------------------------------------
// Reply payloads
// ---------------------------------------------------------------------------

/// Reply to `server:info`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub players: u32,
    #[serde(default)]
    pub max_players: u32,
    #[serde(default)]
    pub queued_players: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub map_size: Option<u32>,
    #[serde(default)]
    pub wipe_time: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoReply {
    server_info: ServerInfo,
}

/// One member in a `team:info` reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub steam_id: String,
    pub name: String,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub is_alive: bool,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
}

/// One chat entry in a `team:info` history page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamChatEntry {
    pub name: String,
    pub message: String,
    #[serde(default)]
    pub steam_id: Option<String>,
    pub time: u64,
}

/// Reply to `team:info`: the member roster plus a bounded page of recent
/// chat history.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamInfo {
    #[serde(default)]
    pub leader_steam_id: Option<String>,
    #[serde(default)]
    pub members: Vec<TeamMember>,
    #[serde(default)]
    pub messages: Vec<TeamChatEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeamInfoReply {
    team_info: TeamInfo,
}

/// Reply to `device:info`: the authoritative device state.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub value: bool,
    #[serde(default)]
    pub capacity: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceInfoReply {
    device_info: DeviceInfo,
}

/// A monument marker in a `map:info` reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monument {
    pub token: String,
    pub x: f64,
    pub y: f64,
}

/// Reply to `map:info`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapInfo {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub ocean_margin: Option<u32>,
    #[serde(default)]
    pub monuments: Vec<Monument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapInfoReply {
    map_info: MapInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapImageReply {
    map_image: MapImagePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapImagePayload {
    /// Base64-encoded JPEG bytes.
    jpg: String,
}

/// Reply to `time:get`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameTime {
    /// In-game time of day as a fractional hour (0.0–24.0).
    pub time: f64,
    #[serde(default)]
    pub sunrise: Option<f64>,
    #[serde(default)]
    pub sunset: Option<f64>,
    #[serde(default)]
    pub day_length_minutes: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameTimeReply {
    time_info: GameTime,
}

fn parse_reply<T: serde::de::DeserializeOwned>(
    kind: RequestKind,
    value: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::protocol(format!("parse {} reply: {e}", kind.event_name())))
}

// ---------------------------------------------------------------------------
// Typed request methods
// ---------------------------------------------------------------------------

impl Session {
    /// Ask the bridge to bring up its connection to `target`.
    ///
    /// The credential pair travels in the payload; it is never logged.
    pub async fn server_connect(&self, target: &RemoteTarget) -> Result<()> {
        let payload = json!({
            "serverId": target.id,
            "address": target.address,
            "port": target.port,
            "playerId": target.player_id,
            "playerToken": target.player_token,
        });
        self.request(RequestKind::ServerConnect, payload).await?;
        Ok(())
    }

    /// Ask the bridge to drop its connection to a target.
    pub async fn server_disconnect(&self, server_id: &str) -> Result<()> {
        self.request(RequestKind::ServerDisconnect, json!({ "serverId": server_id }))
            .await?;
        Ok(())
    }

    /// Fetch server metadata (name, population, wipe info).
    pub async fn server_info(&self, server_id: &str) -> Result<ServerInfo> {
        let value = self
            .request(RequestKind::ServerInfo, json!({ "serverId": server_id }))
            .await?;
        let reply: ServerInfoReply = parse_reply(RequestKind::ServerInfo, value)?;
        Ok(reply.server_info)
    }

    /// Send one outgoing chat fragment.
    ///
    /// Fragmentation of long bodies is the chat engine's concern; this
    /// dispatches exactly what it is given.
    pub async fn send_team_message(&self, server_id: &str, message: &str) -> Result<()> {
        let payload = json!({ "serverId": server_id, "message": message });
        self.request(RequestKind::MessageSend, payload).await?;
        Ok(())
    }

    /// Set a smart device's value.
    pub async fn device_control(&self, server_id: &str, entity_id: u32, value: bool) -> Result<()> {
        let payload = json!({
            "serverId": server_id,
            "entityId": entity_id,
            "value": value,
        });
        self.request(RequestKind::DeviceControl, payload).await?;
        Ok(())
    }

    /// Read a smart device's authoritative state.
    pub async fn device_info(&self, server_id: &str, entity_id: u32) -> Result<DeviceInfo> {
        let payload = json!({ "serverId": server_id, "entityId": entity_id });
        let value = self.request(RequestKind::DeviceInfo, payload).await?;
        let reply: DeviceInfoReply = parse_reply(RequestKind::DeviceInfo, value)?;
        Ok(reply.device_info)
    }

    /// Fetch the team roster and the recent chat history page.
    pub async fn team_info(&self, server_id: &str) -> Result<TeamInfo> {
        let value = self
            .request(RequestKind::TeamInfo, json!({ "serverId": server_id }))
            .await?;
        let reply: TeamInfoReply = parse_reply(RequestKind::TeamInfo, value)?;
        Ok(reply.team_info)
    }

    /// Fetch map dimensions and monument markers.
    pub async fn map_info(&self, server_id: &str) -> Result<MapInfo> {
        let value = self
            .request(RequestKind::MapInfo, json!({ "serverId": server_id }))
            .await?;
        let reply: MapInfoReply = parse_reply(RequestKind::MapInfo, value)?;
        Ok(reply.map_info)
    }

    /// Fetch the rendered map image as raw JPEG bytes.
    ///
    /// This is the one large-payload request; it runs under the 15 s
    /// deadline instead of the 10 s metadata deadline.
    pub async fn map_image(&self, server_id: &str) -> Result<Vec<u8>> {
        use base64::Engine as _;

        let value = self
            .request(RequestKind::MapGet, json!({ "serverId": server_id }))
            .await?;
        let reply: MapImageReply = parse_reply(RequestKind::MapGet, value)?;
        base64::engine::general_purpose::STANDARD
            .decode(reply.map_image.jpg.as_bytes())
            .map_err(|e| Error::protocol(format!("map image is not valid base64: {e}")))
    }

    /// Fetch the in-game clock.
    pub async fn game_time(&self, server_id: &str) -> Result<GameTime> {
        let value = self
            .request(RequestKind::TimeGet, json!({ "serverId": server_id }))
            .await?;
        let reply: GameTimeReply = parse_reply(RequestKind::TimeGet, value)?;
        Ok(reply.time_info)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_info_reply_parses_wrapper() {
        let value = json!({
            "serverInfo": {
                "name": "Main",
                "players": 93,
                "maxPlayers": 200,
                "queuedPlayers": 4,
                "seed": 1337,
                "mapSize": 4500
            }
        });
        let reply: ServerInfoReply = parse_reply(RequestKind::ServerInfo, value).unwrap();
        assert_eq!(reply.server_info.name, "Main");
        assert_eq!(reply.server_info.max_players, 200);
        assert_eq!(reply.server_info.seed, Some(1337));
        assert_eq!(reply.server_info.wipe_time, None);
    }

    #[test]
    fn test_team_info_reply_parses_members_and_history() {
        let value = json!({
            "teamInfo": {
                "leaderSteamId": "7656",
                "members": [
                    {"steamId": "7656", "name": "A", "isOnline": true, "isAlive": true},
                    {"steamId": "7657", "name": "B"}
                ],
                "messages": [
                    {"name": "A", "message": "hi", "time": 1700000000u64}
                ]
            }
        });
        let reply: TeamInfoReply = parse_reply(RequestKind::TeamInfo, value).unwrap();
        assert_eq!(reply.team_info.members.len(), 2);
        assert!(!reply.team_info.members[1].is_online);
        assert_eq!(reply.team_info.messages[0].message, "hi");
    }

    #[test]
    fn test_malformed_reply_is_a_protocol_error() {
        let value = json!({ "unexpected": true });
        let err = parse_reply::<ServerInfoReply>(RequestKind::ServerInfo, value).unwrap_err();
        assert!(err.to_string().contains("server:info"));
    }

    #[tokio::test]
    async fn test_device_control_round_trip_through_stub() {
        let (session, mut stub) = Session::new_for_test();

        let call = tokio::spawn({
            let session = session.clone();
            async move { session.device_control("s1", 42, true).await }
        });

        let request = stub.next_request().await.unwrap();
        assert_eq!(request.kind, RequestKind::DeviceControl);
        assert_eq!(request.payload["entityId"], 42);
        assert_eq!(request.payload["value"], true);
        request.success(json!({}));

        call.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_map_image_decodes_base64() {
        use base64::Engine as _;

        let (session, mut stub) = Session::new_for_test();
        let bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

        let call = tokio::spawn({
            let session = session.clone();
            async move { session.map_image("s1").await }
        });

        let request = stub.next_request().await.unwrap();
        assert_eq!(request.kind, RequestKind::MapGet);
        request.success(json!({ "mapImage": { "jpg": encoded } }));

        assert_eq!(call.await.unwrap().unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_map_image_rejects_bad_base64() {
        let (session, mut stub) = Session::new_for_test();

        let call = tokio::spawn({
            let session = session.clone();
            async move { session.map_image("s1").await }
        });

        let request = stub.next_request().await.unwrap();
        request.success(json!({ "mapImage": { "jpg": "!!not base64!!" } }));

        let err = call.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("base64"));
    }
}
