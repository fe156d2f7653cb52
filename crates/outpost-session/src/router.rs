//! Per-event-kind subscriber registry (event fan-out)
//!
//! One incoming push event is delivered to every callback currently
//! registered for its kind. Subscriptions are identified by token:
//! removing one never disturbs the others, and dropping every token on
//! teardown leaves no dangling callbacks behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use outpost_core::{EventKind, PushEvent};

/// Callback invoked with every event of the subscribed kind.
pub type EventCallback = Arc<dyn Fn(&PushEvent) + Send + Sync + 'static>;

/// Handle to one registered callback. Pass it back to
/// [`EventRouter::unsubscribe`] for symmetric cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    kind: EventKind,
    token: u64,
}

impl Subscription {
    /// An inert subscription: unsubscribing it is a no-op. Returned when
    /// a subscribe is attempted while the session is disconnected, so
    /// consumers that mount early do not have to special-case it.
    pub fn inert() -> Self {
        Self {
            kind: EventKind::Unknown,
            token: 0,
        }
    }

    /// `true` if this subscription was never actually registered.
    pub fn is_inert(&self) -> bool {
        self.token == 0
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

struct RouterInner {
    next_token: u64,
    subscribers: HashMap<EventKind, Vec<(u64, EventCallback)>>,
}

/// The subscriber registry shared between session handles and the
/// background I/O task.
///
/// Subscribe/unsubscribe are synchronous; dispatch collects the current
/// callbacks under the lock and invokes them outside it, so a callback may
/// itself subscribe or unsubscribe without deadlocking.
pub struct EventRouter {
    inner: Mutex<RouterInner>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RouterInner {
                next_token: 1,
                subscribers: HashMap::new(),
            }),
        }
    }

    /// Register `callback` for every event of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&PushEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let token = inner.next_token;
        inner.next_token += 1;
        inner
            .subscribers
            .entry(kind)
            .or_default()
            .push((token, Arc::new(callback)));
        Subscription { kind, token }
    }

    /// Remove one registered callback. Idempotent: unsubscribing an
    /// already-removed or inert subscription is a no-op.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        if subscription.is_inert() {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = inner.subscribers.get_mut(&subscription.kind) {
            list.retain(|(token, _)| *token != subscription.token);
            if list.is_empty() {
                inner.subscribers.remove(&subscription.kind);
            }
        }
    }

    /// Deliver `event` to every callback registered for its kind.
    pub fn dispatch(&self, event: &PushEvent) {
        let callbacks: Vec<EventCallback> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            match inner.subscribers.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return,
            }
        };
        for callback in callbacks {
            callback(event);
        }
    }

    /// Drop every registered callback. Used by session teardown.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let dropped: usize = inner.subscribers.values().map(Vec::len).sum();
        if dropped > 0 {
            warn!("event router: clearing {dropped} live subscription(s) on teardown");
        }
        inner.subscribers.clear();
    }

    /// Number of callbacks currently registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.subscribers.get(&kind).map_or(0, Vec::len)
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use outpost_core::parse_push_event;
    use serde_json::json;

    fn team_message() -> PushEvent {
        parse_push_event(
            "team:message",
            json!({"serverId": "s1", "name": "A", "message": "hi", "time": 1}),
        )
    }

    fn entity_changed() -> PushEvent {
        parse_push_event(
            "entity:changed",
            json!({"serverId": "s1", "entityId": 7, "value": true}),
        )
    }

    #[test]
    fn test_dispatch_reaches_all_subscribers_of_kind() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            router.subscribe(EventKind::TeamMessage, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        router.dispatch(&team_message());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_dispatch_respects_kind_boundaries() {
        let router = EventRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        router.subscribe(EventKind::EntityChanged, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        router.dispatch(&team_message());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        router.dispatch(&entity_changed());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_one_leaves_the_rest_delivering() {
        // Subscriber independence: removing one callback must not prevent
        // delivery to the remaining callbacks of the same kind.
        let router = EventRouter::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let first_clone = Arc::clone(&first);
        let sub_first = router.subscribe(EventKind::TeamMessage, move |_| {
            first_clone.fetch_add(1, Ordering::SeqCst);
        });
        let second_clone = Arc::clone(&second);
        let _sub_second = router.subscribe(EventKind::TeamMessage, move |_| {
            second_clone.fetch_add(1, Ordering::SeqCst);
        });

        router.unsubscribe(&sub_first);
        router.dispatch(&team_message());

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let router = EventRouter::new();
        let sub = router.subscribe(EventKind::TeamMessage, |_| {});

        router.unsubscribe(&sub);
        router.unsubscribe(&sub);
        assert_eq!(router.subscriber_count(EventKind::TeamMessage), 0);
    }

    #[test]
    fn test_inert_subscription_is_a_noop() {
        let router = EventRouter::new();
        let sub = Subscription::inert();
        assert!(sub.is_inert());
        router.unsubscribe(&sub);
    }

    #[test]
    fn test_clear_drops_everything() {
        let router = EventRouter::new();
        router.subscribe(EventKind::TeamMessage, |_| {});
        router.subscribe(EventKind::EntityChanged, |_| {});

        router.clear();
        assert_eq!(router.subscriber_count(EventKind::TeamMessage), 0);
        assert_eq!(router.subscriber_count(EventKind::EntityChanged), 0);
    }

    #[test]
    fn test_callback_may_unsubscribe_during_dispatch() {
        // Dispatch invokes callbacks outside the registry lock.
        let router = Arc::new(EventRouter::new());
        let router_clone = Arc::clone(&router);
        let sub_holder: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let holder_clone = Arc::clone(&sub_holder);

        let sub = router.subscribe(EventKind::TeamMessage, move |_| {
            if let Some(sub) = holder_clone.lock().unwrap().take() {
                router_clone.unsubscribe(&sub);
            }
        });
        *sub_holder.lock().unwrap() = Some(sub);

        router.dispatch(&team_message());
        assert_eq!(router.subscriber_count(EventKind::TeamMessage), 0);
    }
}
