//! REST control plane client
//!
//! The bridge exposes a plain JSON request/response API for resource CRUD
//! and the pairing/proxy workflows. Every response uses the same envelope:
//! `{"success": bool, "data": ..., "error": "..."}`. This client is a thin
//! consumer; none of the synchronization logic lives here.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use outpost_core::prelude::*;
use outpost_core::{Device, RemoteTarget};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The JSON envelope every REST endpoint replies with.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the envelope: `data` on success, [`Error::Rest`] carrying
    /// the server's message otherwise.
    pub fn into_result(self) -> Result<T> {
        if self.success {
            self.data
                .ok_or_else(|| Error::rest("success response carried no data"))
        } else {
            Err(Error::rest(
                self.error.unwrap_or_else(|| "request failed".to_string()),
            ))
        }
    }

    /// Like [`ApiEnvelope::into_result`] for endpoints whose success
    /// responses carry no body.
    pub fn into_unit_result(self) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(Error::rest(
                self.error.unwrap_or_else(|| "request failed".to_string()),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Resource payloads
// ---------------------------------------------------------------------------

/// Body for creating a server entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewServer {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub player_id: String,
    pub player_token: String,
}

/// Body for creating a device entry under a server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDevice {
    pub entity_id: u32,
    pub name: String,
    pub kind: String,
}

/// Pairing workflow status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingStatus {
    pub listening: bool,
    #[serde(default)]
    pub has_credentials: bool,
}

/// FCM credential summary exposed by the pairing flow. Tokens are
/// truncated server-side; this client never receives them in full.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCredentials {
    #[serde(default)]
    pub registered_at: Option<String>,
    #[serde(default)]
    pub expo_token_preview: Option<String>,
}

/// One configurable proxy node.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyNode {
    pub name: String,
    #[serde(default)]
    pub node_type: Option<String>,
}

/// Proxy runtime status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatusInfo {
    pub is_running: bool,
    #[serde(default)]
    pub node: Option<String>,
}

/// Per-category notification toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettings {
    #[serde(default = "enabled")]
    pub player_events: bool,
    #[serde(default = "enabled")]
    pub chat_messages: bool,
    #[serde(default = "enabled")]
    pub device_changes: bool,
}

fn enabled() -> bool {
    true
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            player_events: true,
            chat_messages: true,
            device_changes: true,
        }
    }
}

// ---------------------------------------------------------------------------
// RestClient
// ---------------------------------------------------------------------------

/// Thin JSON client for the bridge's REST API.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    /// Create a client rooted at `base_url` (e.g. `http://127.0.0.1:8080`).
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::config(format!("invalid API base url '{base_url}': {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::rest(format!("invalid endpoint path '{path}': {e}")))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiEnvelope<T>> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::rest(e.to_string()))?;
        response
            .json::<ApiEnvelope<T>>()
            .await
            .map_err(|e| Error::rest(format!("malformed response from {path}: {e}")))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<ApiEnvelope<T>> {
        let url = self.endpoint(path)?;
        let mut request = self.http.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::rest(e.to_string()))?;
        response
            .json::<ApiEnvelope<T>>()
            .await
            .map_err(|e| Error::rest(format!("malformed response from {path}: {e}")))
    }

    async fn delete(&self, path: &str) -> Result<ApiEnvelope<serde_json::Value>> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|e| Error::rest(e.to_string()))?;
        response
            .json()
            .await
            .map_err(|e| Error::rest(format!("malformed response from {path}: {e}")))
    }

    // ── Servers ──────────────────────────────────────────────────────────

    pub async fn list_servers(&self) -> Result<Vec<RemoteTarget>> {
        self.get("/api/servers").await?.into_result()
    }

    pub async fn create_server(&self, server: &NewServer) -> Result<RemoteTarget> {
        self.post("/api/servers", Some(server)).await?.into_result()
    }

    pub async fn update_server(&self, server: &RemoteTarget) -> Result<RemoteTarget> {
        self.post(&format!("/api/servers/{}", server.id), Some(server))
            .await?
            .into_result()
    }

    pub async fn delete_server(&self, server_id: &str) -> Result<()> {
        self.delete(&format!("/api/servers/{server_id}"))
            .await?
            .into_unit_result()
    }

    // ── Devices ──────────────────────────────────────────────────────────

    pub async fn list_devices(&self, server_id: &str) -> Result<Vec<Device>> {
        self.get(&format!("/api/servers/{server_id}/devices"))
            .await?
            .into_result()
    }

    pub async fn create_device(&self, server_id: &str, device: &NewDevice) -> Result<Device> {
        self.post(&format!("/api/servers/{server_id}/devices"), Some(device))
            .await?
            .into_result()
    }

    pub async fn delete_device(&self, server_id: &str, entity_id: u32) -> Result<()> {
        self.delete(&format!("/api/servers/{server_id}/devices/{entity_id}"))
            .await?
            .into_unit_result()
    }

    // ── Pairing ──────────────────────────────────────────────────────────

    pub async fn pairing_status(&self) -> Result<PairingStatus> {
        self.get("/api/pairing/status").await?.into_result()
    }

    pub async fn pairing_start(&self) -> Result<()> {
        self.post::<(), serde_json::Value>("/api/pairing/start", None)
            .await?
            .into_unit_result()
    }

    pub async fn pairing_stop(&self) -> Result<()> {
        self.post::<(), serde_json::Value>("/api/pairing/stop", None)
            .await?
            .into_unit_result()
    }

    pub async fn pairing_reset(&self) -> Result<()> {
        self.post::<(), serde_json::Value>("/api/pairing/reset", None)
            .await?
            .into_unit_result()
    }

    pub async fn pairing_credentials(&self) -> Result<PairingCredentials> {
        self.get("/api/pairing/credentials").await?.into_result()
    }

    // ── Proxy ────────────────────────────────────────────────────────────

    pub async fn proxy_status(&self) -> Result<ProxyStatusInfo> {
        self.get("/api/proxy/status").await?.into_result()
    }

    pub async fn proxy_nodes(&self) -> Result<Vec<ProxyNode>> {
        self.get("/api/proxy/nodes").await?.into_result()
    }

    pub async fn proxy_config(&self) -> Result<serde_json::Value> {
        self.get("/api/proxy/config").await?.into_result()
    }

    pub async fn proxy_start(&self) -> Result<()> {
        self.post::<(), serde_json::Value>("/api/proxy/start", None)
            .await?
            .into_unit_result()
    }

    pub async fn proxy_stop(&self) -> Result<()> {
        self.post::<(), serde_json::Value>("/api/proxy/stop", None)
            .await?
            .into_unit_result()
    }

    pub async fn proxy_switch(&self, node_name: &str) -> Result<()> {
        let body = serde_json::json!({ "node": node_name });
        self.post::<_, serde_json::Value>("/api/proxy/switch", Some(&body))
            .await?
            .into_unit_result()
    }

    pub async fn proxy_refresh(&self) -> Result<()> {
        self.post::<(), serde_json::Value>("/api/proxy/refresh", None)
            .await?
            .into_unit_result()
    }

    // ── Notification settings ────────────────────────────────────────────

    pub async fn notification_settings(&self) -> Result<NotificationSettings> {
        self.get("/api/settings/notifications").await?.into_result()
    }

    pub async fn set_notification_settings(
        &self,
        settings: &NotificationSettings,
    ) -> Result<NotificationSettings> {
        self.post("/api/settings/notifications", Some(settings))
            .await?
            .into_result()
    }

    pub async fn reset_notification_settings(&self) -> Result<NotificationSettings> {
        self.post::<(), NotificationSettings>("/api/settings/notifications/reset", None)
            .await?
            .into_result()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_success_with_data() {
        let envelope: ApiEnvelope<Vec<u32>> =
            serde_json::from_str(r#"{"success": true, "data": [1, 2, 3]}"#).unwrap();
        assert_eq!(envelope.into_result().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_envelope_failure_keeps_error_message() {
        let envelope: ApiEnvelope<Vec<u32>> =
            serde_json::from_str(r#"{"success": false, "error": "server not found"}"#).unwrap();
        let err = envelope.into_result().unwrap_err();
        assert!(err.to_string().contains("server not found"));
    }

    #[test]
    fn test_envelope_success_without_data_is_an_error_for_typed_reads() {
        let envelope: ApiEnvelope<Vec<u32>> =
            serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(envelope.into_result().is_err());
    }

    #[test]
    fn test_envelope_unit_result_ignores_missing_data() {
        let envelope: ApiEnvelope<serde_json::Value> =
            serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(envelope.into_unit_result().is_ok());
    }

    #[test]
    fn test_rest_client_rejects_invalid_base_url() {
        let err = RestClient::new("not a url").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_notification_settings_default_all_enabled() {
        let settings = NotificationSettings::default();
        assert!(settings.player_events && settings.chat_messages && settings.device_changes);
    }

    #[test]
    fn test_notification_settings_partial_json_fills_defaults() {
        let settings: NotificationSettings =
            serde_json::from_str(r#"{"playerEvents": false}"#).unwrap();
        assert!(!settings.player_events);
        assert!(settings.chat_messages);
    }
}
