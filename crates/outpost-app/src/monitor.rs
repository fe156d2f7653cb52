//! Connection health monitor
//!
//! The single home for reconnect-driven refresh: watches the session's
//! connection state and triggers one resync per transition into
//! `Connected` (including the very first connect). Individual consumers
//! must not re-fetch on reconnect themselves; they subscribe to data, the
//! monitor owns the refresh.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use outpost_session::ConnectionState;

/// Watches connection transitions and drives resyncs.
pub struct ConnectionMonitor {
    handle: JoinHandle<()>,
}

impl ConnectionMonitor {
    /// Spawn the monitor over `states` (from
    /// [`outpost_session::Session::connection_watch`]).
    ///
    /// `resync` runs once per transition into `Connected` — exactly once
    /// per reconnect, regardless of how many consumers depend on the
    /// refreshed data. If the watch already reports `Connected` at spawn
    /// time that counts as the first transition.
    pub fn spawn<F, Fut>(mut states: watch::Receiver<ConnectionState>, mut resync: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut was_connected = states.borrow().is_connected();
            if was_connected {
                info!("connection monitor: connected at startup, initial resync");
                resync().await;
            }

            loop {
                if states.changed().await.is_err() {
                    debug!("connection monitor: session gone, stopping");
                    break;
                }
                let state = states.borrow_and_update().clone();
                let now_connected = state.is_connected();
                if now_connected && !was_connected {
                    info!("connection monitor: {} — resync", state.label());
                    resync().await;
                }
                was_connected = now_connected;
            }
        });
        Self { handle }
    }

    /// Stop watching. The monitor also stops on its own when the session
    /// (the watch sender) is dropped.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
