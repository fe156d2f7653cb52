//! Notification aggregator
//!
//! A pure consumer of fan-out events producing ephemeral, self-expiring
//! notices. User-initiated failures become Error notices carrying the
//! underlying message; passive background failures never reach here (they
//! are logged only).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use outpost_core::{Error, PlayerEventKind, PushEvent};

/// How long a notice stays visible unless dismissed.
pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_secs(8);

/// Upper bound on retained notices; oldest evicted first.
const MAX_NOTICES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// One ephemeral, dismissable notice.
#[derive(Debug, Clone)]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub text: String,
    created_at: Instant,
    ttl: Duration,
}

impl Notice {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

/// Bounded feed of active notices.
#[derive(Debug, Default)]
pub struct NoticeFeed {
    notices: VecDeque<Notice>,
    next_id: u64,
}

impl NoticeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a notice with the default TTL. Returns its id.
    pub fn push(&mut self, level: NoticeLevel, text: impl Into<String>) -> u64 {
        self.push_at(level, text, Instant::now())
    }

    /// [`NoticeFeed::push`] with an explicit clock.
    pub fn push_at(&mut self, level: NoticeLevel, text: impl Into<String>, now: Instant) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.notices.push_back(Notice {
            id,
            level,
            text: text.into(),
            created_at: now,
            ttl: DEFAULT_NOTICE_TTL,
        });
        while self.notices.len() > MAX_NOTICES {
            self.notices.pop_front();
        }
        id
    }

    /// Turn a push event into a notice, if it is notice-worthy.
    pub fn observe(&mut self, event: &PushEvent) -> Option<u64> {
        self.observe_at(event, Instant::now())
    }

    /// [`NoticeFeed::observe`] with an explicit clock.
    pub fn observe_at(&mut self, event: &PushEvent, now: Instant) -> Option<u64> {
        let (level, text) = match event {
            PushEvent::Player(e) => match e.kind? {
                PlayerEventKind::Died => (NoticeLevel::Warning, format!("{} died", e.name)),
                PlayerEventKind::Spawned => (NoticeLevel::Info, format!("{} spawned", e.name)),
                PlayerEventKind::Online => (NoticeLevel::Info, format!("{} is online", e.name)),
                PlayerEventKind::Offline => {
                    (NoticeLevel::Info, format!("{} went offline", e.name))
                }
            },
            PushEvent::ServerPaired(e) => (
                NoticeLevel::Info,
                format!("paired with {} ({}:{})", e.name, e.ip, e.port),
            ),
            PushEvent::ProxyStatus(e) if !e.is_running => {
                (NoticeLevel::Warning, "proxy stopped".to_string())
            }
            _ => return None,
        };
        Some(self.push_at(level, text, now))
    }

    /// Record a failed user-initiated action. The underlying message is
    /// kept intact so the user sees what the server (or transport) said.
    pub fn report_failure(&mut self, action: &str, err: &Error) -> u64 {
        self.push(NoticeLevel::Error, format!("{action}: {err}"))
    }

    /// Explicitly dismiss one notice.
    pub fn dismiss(&mut self, id: u64) {
        self.notices.retain(|n| n.id != id);
    }

    /// Currently visible notices, pruning anything expired.
    pub fn active(&mut self) -> Vec<Notice> {
        self.active_at(Instant::now())
    }

    /// [`NoticeFeed::active`] with an explicit clock.
    pub fn active_at(&mut self, now: Instant) -> Vec<Notice> {
        self.notices.retain(|n| !n.is_expired_at(now));
        self.notices.iter().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::parse_push_event;
    use serde_json::json;

    #[test]
    fn test_player_death_becomes_warning_notice() {
        let mut feed = NoticeFeed::new();
        let event = parse_push_event("player:died", json!({"serverId": "s1", "name": "Bob"}));
        feed.observe(&event).unwrap();

        let active = feed.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].level, NoticeLevel::Warning);
        assert!(active[0].text.contains("Bob"));
    }

    #[test]
    fn test_chat_pushes_are_not_notices() {
        let mut feed = NoticeFeed::new();
        let event = parse_push_event(
            "team:message",
            json!({"serverId": "s1", "name": "A", "message": "hi", "time": 1}),
        );
        assert!(feed.observe(&event).is_none());
    }

    #[test]
    fn test_proxy_stop_is_noticed_but_running_is_not() {
        let mut feed = NoticeFeed::new();
        let running = parse_push_event("proxy:status", json!({"isRunning": true}));
        assert!(feed.observe(&running).is_none());

        let stopped = parse_push_event("proxy:status", json!({"isRunning": false}));
        assert!(feed.observe(&stopped).is_some());
    }

    #[test]
    fn test_notices_expire_on_their_own() {
        let mut feed = NoticeFeed::new();
        let now = Instant::now();
        feed.push_at(NoticeLevel::Info, "short lived", now);

        assert_eq!(feed.active_at(now + Duration::from_secs(1)).len(), 1);
        assert!(feed
            .active_at(now + DEFAULT_NOTICE_TTL + Duration::from_secs(1))
            .is_empty());
    }

    #[test]
    fn test_dismiss_removes_one_notice() {
        let mut feed = NoticeFeed::new();
        let now = Instant::now();
        let first = feed.push_at(NoticeLevel::Info, "one", now);
        feed.push_at(NoticeLevel::Info, "two", now);

        feed.dismiss(first);
        let active = feed.active_at(now);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].text, "two");
    }

    #[test]
    fn test_failure_notice_keeps_underlying_message() {
        let mut feed = NoticeFeed::new();
        let err = Error::remote("entity not found");
        feed.report_failure("toggle switch", &err);

        let active = feed.active();
        assert_eq!(active[0].level, NoticeLevel::Error);
        assert!(active[0].text.contains("toggle switch"));
        assert!(active[0].text.contains("entity not found"));
    }

    #[test]
    fn test_feed_is_bounded() {
        let mut feed = NoticeFeed::new();
        let now = Instant::now();
        for i in 0..(MAX_NOTICES + 10) {
            feed.push_at(NoticeLevel::Info, format!("n{i}"), now);
        }
        assert_eq!(feed.active_at(now).len(), MAX_NOTICES);
        assert_eq!(feed.active_at(now)[0].text, "n10");
    }
}
