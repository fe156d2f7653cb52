//! Optimistic device control
//!
//! A toggle writes the negated value into local state immediately, then
//! issues the remote command. Success leaves the optimistic value in place
//! (now confirmed); failure or timeout reverts to the value captured at
//! invocation and surfaces the error.
//!
//! Concurrent toggles on the same device are deliberately not coalesced:
//! each call captures its own original, so two rapid toggles race and the
//! last response to resolve determines the displayed value. That matches
//! the shipped behavior and is pinned by tests rather than sequenced away.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use outpost_core::prelude::*;
use outpost_core::{Device, EntityChanged};
use outpost_session::Session;

/// Local device state for one target, shared between the controller and
/// the fan-out subscription that applies server-side changes.
#[derive(Debug, Default, Clone)]
pub struct DeviceStore {
    inner: Arc<Mutex<HashMap<u32, Device>>>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole collection (REST refresh).
    pub fn replace_all(&self, devices: Vec<Device>) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.clear();
        for device in devices {
            inner.insert(device.entity_id, device);
        }
    }

    pub fn insert(&self, device: Device) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(device.entity_id, device);
    }

    /// Value copy of one device.
    pub fn get(&self, entity_id: u32) -> Option<Device> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(&entity_id).cloned()
    }

    pub fn value_of(&self, entity_id: u32) -> Option<bool> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.get(&entity_id).map(|d| d.value)
    }

    /// Write `value` for `entity_id`. Returns `false` if the device is
    /// unknown (e.g. removed by a refresh while a command was in flight).
    pub fn set_value(&self, entity_id: u32, value: bool) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get_mut(&entity_id) {
            Some(device) => {
                device.value = value;
                true
            }
            None => false,
        }
    }

    /// Apply an unsolicited `entity:changed` push. Server state always
    /// wins over a stale optimistic write.
    pub fn apply_entity_changed(&self, event: &EntityChanged) {
        if !self.set_value(event.entity_id, event.value) {
            debug!(
                "device store: entity:changed for unknown entity {}",
                event.entity_id
            );
        }
    }

    pub fn all(&self) -> Vec<Device> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut devices: Vec<Device> = inner.values().cloned().collect();
        devices.sort_by_key(|d| d.entity_id);
        devices
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Issues device commands with optimistic local application.
#[derive(Clone)]
pub struct DeviceController {
    session: Session,
    store: DeviceStore,
}

impl DeviceController {
    pub fn new(session: Session, store: DeviceStore) -> Self {
        Self { session, store }
    }

    pub fn store(&self) -> &DeviceStore {
        &self.store
    }

    /// Toggle a device: apply the negated value locally, confirm remotely,
    /// roll back on failure or timeout.
    ///
    /// Returns the confirmed value on success.
    ///
    /// # Errors
    ///
    /// Any request error ([`Error::Remote`], [`Error::Timeout`],
    /// [`Error::NotConnected`], …) after the local state has been reverted
    /// to the captured original.
    pub async fn toggle(&self, server_id: &str, entity_id: u32) -> Result<bool> {
        // Capture this call's own original at invocation time.
        let original = self
            .store
            .value_of(entity_id)
            .ok_or(Error::UnknownDevice { entity_id })?;
        let target = !original;

        // Optimistic apply: visible instantly.
        self.store.set_value(entity_id, target);

        match self.session.device_control(server_id, entity_id, target).await {
            Ok(()) => {
                // Confirmed; the optimistic value stands.
                Ok(target)
            }
            Err(err) => {
                // Deterministic rollback to this call's captured original.
                // With two toggles in flight the later resolution wins.
                warn!(
                    "device {}: control failed ({}), rolling back to {}",
                    entity_id, err, original
                );
                self.store.set_value(entity_id, original);
                Err(err)
            }
        }
    }

    /// Re-read authoritative state and overwrite local state
    /// unconditionally. Used to reconcile after suspected desync.
    pub async fn refresh(&self, server_id: &str, entity_id: u32) -> Result<bool> {
        let info = self.session.device_info(server_id, entity_id).await?;
        self.store.set_value(entity_id, info.value);
        Ok(info.value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::DeviceKind;
    use serde_json::json;

    fn switch(entity_id: u32, value: bool) -> Device {
        Device {
            entity_id,
            name: format!("switch {entity_id}"),
            kind: DeviceKind::Switch,
            value,
            auto_mode: None,
            command: None,
        }
    }

    fn controller_with(devices: Vec<Device>) -> (DeviceController, outpost_session::BridgeStub) {
        let (session, stub) = Session::new_for_test();
        let store = DeviceStore::new();
        store.replace_all(devices);
        (DeviceController::new(session, store), stub)
    }

    // -- store ----------------------------------------------------------------

    #[test]
    fn test_store_replace_all_overwrites() {
        let store = DeviceStore::new();
        store.replace_all(vec![switch(1, true)]);
        store.replace_all(vec![switch(2, false)]);
        assert_eq!(store.len(), 1);
        assert!(store.get(1).is_none());
        assert_eq!(store.value_of(2), Some(false));
    }

    #[test]
    fn test_entity_changed_overwrites_optimistic_value() {
        let store = DeviceStore::new();
        store.replace_all(vec![switch(7, false)]);
        // A stale optimistic write…
        store.set_value(7, true);
        // …is overwritten, not merged, by the server's confirmation.
        let event: EntityChanged = serde_json::from_value(
            json!({"serverId": "s1", "entityId": 7, "value": false}),
        )
        .unwrap();
        store.apply_entity_changed(&event);
        assert_eq!(store.value_of(7), Some(false));
    }

    #[test]
    fn test_entity_changed_for_unknown_entity_is_ignored() {
        let store = DeviceStore::new();
        let event: EntityChanged = serde_json::from_value(
            json!({"serverId": "s1", "entityId": 99, "value": true}),
        )
        .unwrap();
        store.apply_entity_changed(&event);
        assert!(store.is_empty());
    }

    // -- toggle ---------------------------------------------------------------

    #[tokio::test]
    async fn test_toggle_applies_optimistically_then_confirms() {
        let (controller, mut stub) = controller_with(vec![switch(7, false)]);

        let call = tokio::spawn({
            let controller = controller.clone();
            async move { controller.toggle("s1", 7).await }
        });

        let request = stub.next_request().await.unwrap();
        // The optimistic value is already visible before the reply.
        assert_eq!(controller.store().value_of(7), Some(true));
        assert_eq!(request.payload["value"], true);
        request.success(json!({}));

        assert!(call.await.unwrap().unwrap());
        assert_eq!(controller.store().value_of(7), Some(true));
    }

    #[tokio::test]
    async fn test_toggle_rolls_back_on_remote_error() {
        let (controller, mut stub) = controller_with(vec![switch(7, false)]);

        let call = tokio::spawn({
            let controller = controller.clone();
            async move { controller.toggle("s1", 7).await }
        });

        let request = stub.next_request().await.unwrap();
        request.error("switch is jammed");

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "switch is jammed");
        // Rolled back to the pre-toggle value.
        assert_eq!(controller.store().value_of(7), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_rolls_back_on_timeout() {
        let (controller, mut stub) = controller_with(vec![switch(7, true)]);

        let call = tokio::spawn({
            let controller = controller.clone();
            async move { controller.toggle("s1", 7).await }
        });

        let request = stub.next_request().await.unwrap();
        request.ignore();

        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_timeout());
        // Displayed value equals the pre-toggle value.
        assert_eq!(controller.store().value_of(7), Some(true));
    }

    #[tokio::test]
    async fn test_toggle_unknown_device_fails_without_request() {
        let (controller, _stub) = controller_with(vec![]);
        let err = controller.toggle("s1", 404).await.unwrap_err();
        assert!(matches!(err, Error::UnknownDevice { entity_id: 404 }));
    }

    #[tokio::test]
    async fn test_racing_toggles_last_resolution_wins() {
        // Documented last-write-wins: each toggle captures its own
        // original; the response that resolves last determines the final
        // displayed value. Bounded, never a crash.
        let (controller, mut stub) = controller_with(vec![switch(7, false)]);

        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.toggle("s1", 7).await }
        });
        let request_first = stub.next_request().await.unwrap();
        // first: captured false, optimistic true.
        assert_eq!(controller.store().value_of(7), Some(true));

        let second = tokio::spawn({
            let controller = controller.clone();
            async move { controller.toggle("s1", 7).await }
        });
        let request_second = stub.next_request().await.unwrap();
        // second: captured true, optimistic false.
        assert_eq!(controller.store().value_of(7), Some(false));

        // First confirms, then second fails: its rollback resolves last
        // and restores its own captured original (true).
        request_first.success(json!({}));
        first.await.unwrap().unwrap();
        request_second.error("rate limited");
        assert!(second.await.unwrap().is_err());

        assert_eq!(controller.store().value_of(7), Some(true));
    }

    // -- refresh --------------------------------------------------------------

    #[tokio::test]
    async fn test_refresh_overwrites_unconditionally() {
        let (controller, mut stub) = controller_with(vec![switch(7, true)]);

        let call = tokio::spawn({
            let controller = controller.clone();
            async move { controller.refresh("s1", 7).await }
        });

        let request = stub.next_request().await.unwrap();
        assert_eq!(request.kind, outpost_session::RequestKind::DeviceInfo);
        request.success(json!({ "deviceInfo": { "value": false } }));

        assert!(!call.await.unwrap().unwrap());
        assert_eq!(controller.store().value_of(7), Some(false));
    }
}
