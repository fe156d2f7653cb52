//! Resource snapshot store
//!
//! Holds the managed-target collection and the active selection. The
//! active target is only ever handed out as a value copy; asynchronous
//! callbacks that need "the current selection" at resolution time read
//! through the shared [`ActiveTargetCell`], which is replaced (never
//! mutated in place) on every selection change and connected-flag patch.

use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use outpost_core::prelude::*;
use outpost_core::{RemoteTarget, ServerPaired};

/// Shared, always-current copy of the active selection.
///
/// Cloning the cell is cheap; every clone observes the same value. Async
/// callbacks hold one of these instead of closing over a captured target,
/// so a read after the selection changed sees the new selection.
#[derive(Debug, Clone, Default)]
pub struct ActiveTargetCell {
    inner: Arc<RwLock<Option<RemoteTarget>>>,
}

impl ActiveTargetCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value copy of the current selection.
    pub fn get(&self) -> Option<RemoteTarget> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Identifier of the current selection.
    pub fn id(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|t| t.id.clone())
    }

    /// `true` when `server_id` is the current selection. The guard check
    /// consumers use against late-arriving resolutions.
    pub fn is_active(&self, server_id: &str) -> bool {
        self.id().as_deref() == Some(server_id)
    }

    fn set(&self, value: Option<RemoteTarget>) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = value;
    }
}

/// The managed-target collection and active selection.
#[derive(Debug, Default)]
pub struct ServerStore {
    servers: Vec<RemoteTarget>,
    active_id: Option<String>,
    active_cell: ActiveTargetCell,
    /// Initial auto-selection happens at most once per process, so an
    /// explicit deselection is never overridden by a background refresh.
    auto_selected_once: bool,
}

impl ServerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared cell async consumers read the current selection from.
    pub fn active_cell(&self) -> ActiveTargetCell {
        self.active_cell.clone()
    }

    /// Value copies of all known targets.
    pub fn servers(&self) -> &[RemoteTarget] {
        &self.servers
    }

    /// Value copy of the active selection.
    pub fn active(&self) -> Option<RemoteTarget> {
        self.active_cell.get()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    /// Replace the collection from an authoritative REST refresh.
    ///
    /// The active selection survives the refresh when its id is still
    /// present (the cell gets the refreshed copy); a selection whose
    /// target disappeared is cleared. First-time auto-selection runs at
    /// most once per process.
    pub fn replace_all(&mut self, servers: Vec<RemoteTarget>) {
        self.servers = servers;

        if let Some(active_id) = self.active_id.clone() {
            match self.find(&active_id) {
                Some(updated) => self.active_cell.set(Some(updated.clone())),
                None => {
                    info!("server store: active target '{active_id}' disappeared on refresh");
                    self.active_id = None;
                    self.active_cell.set(None);
                }
            }
        }

        self.maybe_auto_select();
    }

    /// Select `server_id` as the active target.
    pub fn select(&mut self, server_id: &str) -> Result<()> {
        let target = self
            .find(server_id)
            .cloned()
            .ok_or_else(|| Error::unknown_server(server_id))?;
        debug!("server store: active target -> {}", server_id);
        self.active_id = Some(server_id.to_string());
        self.active_cell.set(Some(target));
        Ok(())
    }

    /// Clear the active selection. Explicit: a later refresh will not
    /// re-select automatically.
    pub fn deselect(&mut self) {
        self.active_id = None;
        self.active_cell.set(None);
    }

    /// Patch only the `connected` flag on the matching entry.
    ///
    /// If the patched entry is the active selection, the cell is replaced
    /// with the patched copy so holders observe the update on their next
    /// read rather than a stale snapshot.
    pub fn set_connected(&mut self, server_id: &str, connected: bool) {
        let Some(entry) = self.servers.iter_mut().find(|s| s.id == server_id) else {
            debug!("server store: connection patch for unknown target '{server_id}'");
            return;
        };
        entry.connected = connected;
        let patched = entry.clone();

        if self.active_id.as_deref() == Some(server_id) {
            self.active_cell.set(Some(patched));
        }
    }

    /// Add a target that just completed pairing. The synthetic id is its
    /// endpoint, which is what the bridge keys the new entry by until the
    /// next REST refresh assigns a durable one.
    pub fn add_paired(&mut self, event: &ServerPaired) {
        let id = format!("{}:{}", event.ip, event.port);
        if self.find(&id).is_some() {
            debug!("server store: paired target '{id}' already known");
            return;
        }
        self.servers.push(RemoteTarget {
            id,
            name: event.name.clone(),
            address: event.ip.clone(),
            port: event.port,
            player_id: event.player_id.clone(),
            player_token: event.player_token.clone(),
            connected: false,
        });
        self.maybe_auto_select();
    }

    fn find(&self, server_id: &str) -> Option<&RemoteTarget> {
        self.servers.iter().find(|s| s.id == server_id)
    }

    fn maybe_auto_select(&mut self) {
        if self.auto_selected_once || self.active_id.is_some() {
            return;
        }
        let Some(first) = self.servers.first().cloned() else {
            return;
        };
        info!("server store: auto-selecting first target '{}'", first.id);
        self.auto_selected_once = true;
        self.active_id = Some(first.id.clone());
        self.active_cell.set(Some(first));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
