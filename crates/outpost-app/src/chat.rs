//! Team-chat reconciliation engine
//!
//! Merges three sources into one ordered, deduplicated, bounded log per
//! target: the one-time history page, live pushes, and locally-originated
//! sends. The engine is synchronous state; callers drive the async fetch
//! and dispatch around it (`begin_history_load` / `complete_history_load`
//! / `fail_history_load`, and `send` returning the fragments to dispatch).
//!
//! Time-sensitive rules (echo window, pending-send purge) take their
//! clock as a parameter in the `*_at` variants so tests never sleep.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::debug;

use outpost_core::{normalize_epoch_ms, ChatMessage, TeamMessage};
use outpost_session::TeamChatEntry;

/// Maximum entries kept per target; oldest evicted first.
pub const RETENTION_BOUND: usize = 500;

/// Maximum length of one outgoing chat fragment, in characters.
pub const MAX_FRAGMENT_LEN: usize = 128;

/// A live push matching a pending fragment within this window is the echo
/// of a local send and is discarded.
pub const ECHO_WINDOW: Duration = Duration::from_secs(5);

/// Pending-send entries older than this are purged on every send.
pub const PENDING_SEND_TTL: Duration = Duration::from_secs(10);

/// Distance from the bottom (in entries) still counted as "at the bottom"
/// for auto-scroll purposes.
pub const BOTTOM_THRESHOLD: usize = 3;

/// History-load state machine per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Empty,
    HistoryLoading,
    Live,
}

/// What happened to a live push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended to the log as a remote message.
    Appended,
    /// Recognized as the echo of a local send and discarded.
    SuppressedEcho,
}

/// A locally-sent fragment awaiting its network echo.
#[derive(Debug, Clone)]
struct PendingSend {
    body: String,
    sent_at: Instant,
}

/// Scroll-position tracking for one log's consumer.
#[derive(Debug, Clone)]
struct ScrollState {
    at_bottom: bool,
    unread: u32,
}

impl Default for ScrollState {
    fn default() -> Self {
        Self {
            at_bottom: true,
            unread: 0,
        }
    }
}

/// The reconciled chat log for one target.
#[derive(Debug)]
pub struct ChatLog {
    server_id: String,
    /// Display name used for locally-rendered self entries.
    self_name: String,
    messages: VecDeque<ChatMessage>,
    load_state: LoadState,
    pending_sends: Vec<PendingSend>,
    /// Monotonic discriminator so synthetic ids stay unique even when
    /// origin timestamps collide.
    next_seq: u64,
    scroll: ScrollState,
}

impl ChatLog {
    pub fn new(server_id: impl Into<String>, self_name: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            self_name: self_name.into(),
            messages: VecDeque::new(),
            load_state: LoadState::default(),
            pending_sends: Vec::new(),
            next_seq: 0,
            scroll: ScrollState::default(),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn load_state(&self) -> LoadState {
        self.load_state
    }

    /// Entries in display order (oldest first).
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    // ── History load ─────────────────────────────────────────────────────

    /// Mark a history load as in flight.
    ///
    /// Returns `false` (no-op) when a load is already in flight, so a
    /// second activation cannot double-fetch.
    pub fn begin_history_load(&mut self) -> bool {
        if self.load_state == LoadState::HistoryLoading {
            debug!("chat[{}]: history load already in flight", self.server_id);
            return false;
        }
        self.load_state = LoadState::HistoryLoading;
        true
    }

    /// Merge a fetched history page and go live.
    ///
    /// History entries whose `(body, sender)` key already exists in the
    /// log are discarded — the live entry's data wins. Survivors are
    /// prepended (history is chronologically earlier) and the combined
    /// log is truncated to [`RETENTION_BOUND`], keeping the most recent.
    /// Already-present live entries are never reordered relative to each
    /// other. Merging the same page twice is a no-op.
    pub fn complete_history_load(&mut self, page: &[TeamChatEntry]) {
        let existing: HashSet<(String, String)> = self
            .messages
            .iter()
            .map(|m| (m.body.clone(), m.sender.clone()))
            .collect();

        let mut merged: VecDeque<ChatMessage> = page
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                !existing.contains(&(entry.message.clone(), entry.name.clone()))
            })
            .map(|(position, entry)| {
                let time_ms = normalize_epoch_ms(entry.time);
                ChatMessage {
                    // Position in the page keeps ids unique when origin
                    // timestamps collide.
                    id: format!("h-{time_ms}-{position}"),
                    sender: entry.name.clone(),
                    body: entry.message.clone(),
                    time_ms,
                    steam_id: entry.steam_id.clone(),
                    self_sent: false,
                    from_history: true,
                }
            })
            .collect();

        let discarded = page.len() - merged.len();
        if discarded > 0 {
            debug!(
                "chat[{}]: discarded {} history duplicate(s)",
                self.server_id, discarded
            );
        }

        merged.extend(self.messages.drain(..));
        self.messages = merged;
        self.evict_oldest();
        self.load_state = LoadState::Live;
    }

    /// A history fetch failed; allow a retry.
    pub fn fail_history_load(&mut self) {
        if self.load_state == LoadState::HistoryLoading {
            self.load_state = LoadState::Empty;
        }
    }

    // ── Live pushes ──────────────────────────────────────────────────────

    /// Reconcile a live push scoped to this target.
    pub fn push_live(&mut self, msg: &TeamMessage) -> PushOutcome {
        self.push_live_at(msg, Instant::now())
    }

    /// [`ChatLog::push_live`] with an explicit clock.
    pub fn push_live_at(&mut self, msg: &TeamMessage, now: Instant) -> PushOutcome {
        // A push whose body exactly matches a fragment sent within the
        // echo window is the round-trip of a local send: the optimistic
        // entry already represents it.
        if let Some(index) = self.pending_sends.iter().position(|pending| {
            pending.body == msg.message
                && now.duration_since(pending.sent_at) <= ECHO_WINDOW
        }) {
            self.pending_sends.remove(index);
            return PushOutcome::SuppressedEcho;
        }

        let time_ms = msg.time_ms();
        let seq = self.bump_seq();
        self.append(ChatMessage {
            id: format!("l-{time_ms}-{seq}"),
            sender: msg.name.clone(),
            body: msg.message.clone(),
            time_ms,
            steam_id: msg.steam_id.clone(),
            self_sent: false,
            from_history: false,
        });
        PushOutcome::Appended
    }

    // ── Local sends ──────────────────────────────────────────────────────

    /// Record a local send and return the fragments to dispatch.
    ///
    /// Bodies longer than [`MAX_FRAGMENT_LEN`] are split; the remote side
    /// delivers and echoes fragments independently, so each is tracked
    /// individually for echo suppression. Exactly one locally-rendered
    /// entry represents the full original body, whether or not splitting
    /// occurred.
    pub fn send(&mut self, body: &str) -> Vec<String> {
        let time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.send_at(body, Instant::now(), time_ms)
    }

    /// [`ChatLog::send`] with explicit clocks.
    pub fn send_at(&mut self, body: &str, now: Instant, time_ms: u64) -> Vec<String> {
        // Bound pending-send memory regardless of traffic patterns.
        self.pending_sends
            .retain(|pending| now.duration_since(pending.sent_at) <= PENDING_SEND_TTL);

        let fragments = split_fragments(body);
        for fragment in &fragments {
            self.pending_sends.push(PendingSend {
                body: fragment.clone(),
                sent_at: now,
            });
        }

        let seq = self.bump_seq();
        let sender = self.self_name.clone();
        self.append(ChatMessage {
            id: format!("s-{time_ms}-{seq}"),
            sender,
            body: body.to_string(),
            time_ms,
            steam_id: None,
            self_sent: true,
            from_history: false,
        });

        fragments
    }

    /// Number of fragments currently awaiting their echo.
    pub fn pending_send_count(&self) -> usize {
        self.pending_sends.len()
    }

    // ── Scroll tracking ──────────────────────────────────────────────────

    /// Report the consumer's distance from the bottom of the log, in
    /// entries. Returning to the bottom clears the unread counter.
    pub fn set_scroll_distance(&mut self, distance_from_bottom: usize) {
        self.scroll.at_bottom = distance_from_bottom <= BOTTOM_THRESHOLD;
        if self.scroll.at_bottom {
            self.scroll.unread = 0;
        }
    }

    /// `true` when new arrivals should auto-scroll the consumer.
    pub fn is_at_bottom(&self) -> bool {
        self.scroll.at_bottom
    }

    pub fn unread_count(&self) -> u32 {
        self.scroll.unread
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn append(&mut self, message: ChatMessage) {
        if !self.scroll.at_bottom && !message.self_sent {
            self.scroll.unread += 1;
        }
        self.messages.push_back(message);
        self.evict_oldest();
    }

    fn evict_oldest(&mut self) {
        while self.messages.len() > RETENTION_BOUND {
            self.messages.pop_front();
        }
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Split an outgoing body into fragments of at most
/// [`MAX_FRAGMENT_LEN`] characters.
fn split_fragments(body: &str) -> Vec<String> {
    let chars: Vec<char> = body.chars().collect();
    if chars.len() <= MAX_FRAGMENT_LEN {
        return vec![body.to_string()];
    }
    chars
        .chunks(MAX_FRAGMENT_LEN)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, message: &str, time: u64) -> TeamChatEntry {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "message": message,
            "time": time,
        }))
        .unwrap()
    }

    fn live(name: &str, message: &str, time: u64) -> TeamMessage {
        serde_json::from_value(serde_json::json!({
            "serverId": "s1",
            "name": name,
            "message": message,
            "time": time,
        }))
        .unwrap()
    }

    fn log() -> ChatLog {
        ChatLog::new("s1", "Me")
    }

    // -- history load state machine ------------------------------------------

    #[test]
    fn test_history_load_is_reentrant_guarded() {
        let mut log = log();
        assert!(log.begin_history_load());
        // Second invocation while in flight is a no-op.
        assert!(!log.begin_history_load());

        log.complete_history_load(&[entry("A", "hi", 1000)]);
        assert_eq!(log.load_state(), LoadState::Live);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_failed_history_load_allows_retry() {
        let mut log = log();
        assert!(log.begin_history_load());
        log.fail_history_load();
        assert_eq!(log.load_state(), LoadState::Empty);
        assert!(log.begin_history_load());
    }

    // -- merge dedup ---------------------------------------------------------

    #[test]
    fn test_merge_discards_history_entries_already_live() {
        let mut log = log();
        // A live message arrives before the history page lands.
        log.push_live(&live("A", "hi", 1001));
        assert!(log.begin_history_load());

        log.complete_history_load(&[entry("A", "hi", 1000), entry("B", "other", 999)]);

        // The (body, sender) duplicate was discarded; the live entry's
        // data is preserved.
        assert_eq!(log.len(), 2);
        let bodies: Vec<_> = log.messages().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["other", "hi"]);
        let duplicate = log.messages().find(|m| m.body == "hi").unwrap();
        assert!(!duplicate.from_history);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut log = log();
        let page = [entry("A", "one", 1000), entry("B", "two", 1001)];
        log.begin_history_load();
        log.complete_history_load(&page);
        assert_eq!(log.len(), 2);

        // Merging the same page again changes nothing.
        log.begin_history_load();
        log.complete_history_load(&page);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_merge_never_reorders_live_messages() {
        let mut log = log();
        log.push_live(&live("A", "first", 2000));
        log.push_live(&live("B", "second", 2001));

        log.begin_history_load();
        log.complete_history_load(&[entry("C", "older", 1000)]);

        let bodies: Vec<_> = log.messages().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["older", "first", "second"]);
    }

    #[test]
    fn test_live_push_after_merge_is_not_deduplicated() {
        // The discard rule applies only when merging history into the
        // existing live log, not live into history: a later push with a
        // matching key is a genuine repeat and must append.
        let mut log = log();
        log.begin_history_load();
        log.complete_history_load(&[entry("A", "hi", 1000)]);
        assert_eq!(log.len(), 1);

        assert_eq!(log.push_live(&live("A", "hi", 1001)), PushOutcome::Appended);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_colliding_history_timestamps_get_unique_ids() {
        let mut log = log();
        log.begin_history_load();
        log.complete_history_load(&[entry("A", "one", 1000), entry("A", "two", 1000)]);

        let ids: HashSet<_> = log.messages().map(|m| m.id.clone()).collect();
        assert_eq!(ids.len(), 2);
    }

    // -- retention -----------------------------------------------------------

    #[test]
    fn test_retention_bound_evicts_oldest_first() {
        let mut log = log();
        for i in 0..(RETENTION_BOUND + 25) {
            log.push_live(&live("A", &format!("msg {i}"), 1000 + i as u64));
        }
        assert_eq!(log.len(), RETENTION_BOUND);
        assert_eq!(log.messages().next().unwrap().body, "msg 25");
    }

    #[test]
    fn test_merge_truncates_keeping_most_recent() {
        let mut log = log();
        for i in 0..RETENTION_BOUND {
            log.push_live(&live("A", &format!("live {i}"), 2000 + i as u64));
        }
        log.begin_history_load();
        log.complete_history_load(&[entry("B", "ancient", 1000)]);

        // The prepended history entry is the oldest and falls out.
        assert_eq!(log.len(), RETENTION_BOUND);
        assert!(log.messages().all(|m| m.body != "ancient"));
    }

    // -- fragmentation -------------------------------------------------------

    #[test]
    fn test_short_send_is_one_fragment() {
        let mut log = log();
        let fragments = log.send("hello");
        assert_eq!(fragments, vec!["hello".to_string()]);
        assert_eq!(log.len(), 1);
        assert!(log.messages().next().unwrap().self_sent);
    }

    #[test]
    fn test_long_send_splits_at_fragment_boundary() {
        let mut log = log();
        let body = "A".repeat(130);
        let fragments = log.send(&body);

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].chars().count(), 128);
        assert_eq!(fragments[1].chars().count(), 2);
        assert_eq!(log.pending_send_count(), 2);

        // Exactly one locally-rendered entry for the full original body.
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages().next().unwrap().body, body);
    }

    #[test]
    fn test_fragment_count_is_ceil_of_length() {
        let mut log = log();
        assert_eq!(log.send(&"x".repeat(128)).len(), 1);
        assert_eq!(log.send(&"x".repeat(129)).len(), 2);
        assert_eq!(log.send(&"x".repeat(256)).len(), 2);
        assert_eq!(log.send(&"x".repeat(257)).len(), 3);
    }

    // -- echo suppression ----------------------------------------------------

    #[test]
    fn test_echo_within_window_is_suppressed() {
        let mut log = log();
        let now = Instant::now();
        log.send_at("hello team", now, 5_000);
        assert_eq!(log.len(), 1);

        let outcome = log.push_live_at(&live("Me", "hello team", 5), now + Duration::from_secs(2));
        assert_eq!(outcome, PushOutcome::SuppressedEcho);
        assert_eq!(log.len(), 1);
        // The match is consumed: a second identical push appends.
        let outcome = log.push_live_at(&live("Me", "hello team", 6), now + Duration::from_secs(3));
        assert_eq!(outcome, PushOutcome::Appended);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_echo_after_window_is_appended() {
        let mut log = log();
        let now = Instant::now();
        log.send_at("hello", now, 5_000);

        let outcome = log.push_live_at(&live("Me", "hello", 6), now + Duration::from_secs(6));
        assert_eq!(outcome, PushOutcome::Appended);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_echo_of_either_fragment_is_suppressed() {
        let mut log = log();
        let now = Instant::now();
        let body = "A".repeat(130);
        let fragments = log.send_at(&body, now, 5_000);

        for fragment in &fragments {
            let outcome =
                log.push_live_at(&live("Me", fragment, 6), now + Duration::from_secs(1));
            assert_eq!(outcome, PushOutcome::SuppressedEcho);
        }
        assert_eq!(log.pending_send_count(), 0);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_stale_pending_sends_are_purged_on_send() {
        let mut log = log();
        let now = Instant::now();
        log.send_at("old", now, 1_000);
        assert_eq!(log.pending_send_count(), 1);

        log.send_at("new", now + Duration::from_secs(11), 2_000);
        // The stale entry is gone; only "new" remains pending.
        assert_eq!(log.pending_send_count(), 1);
    }

    // -- scroll tracking -----------------------------------------------------

    #[test]
    fn test_arrivals_at_bottom_do_not_count_unread() {
        let mut log = log();
        log.push_live(&live("A", "hi", 1000));
        assert!(log.is_at_bottom());
        assert_eq!(log.unread_count(), 0);
    }

    #[test]
    fn test_arrivals_away_from_bottom_increment_unread() {
        let mut log = log();
        log.set_scroll_distance(40);
        assert!(!log.is_at_bottom());

        log.push_live(&live("A", "one", 1000));
        log.push_live(&live("A", "two", 1001));
        assert_eq!(log.unread_count(), 2);

        // Returning to the bottom clears the counter.
        log.set_scroll_distance(0);
        assert_eq!(log.unread_count(), 0);
    }

    #[test]
    fn test_within_threshold_counts_as_bottom() {
        let mut log = log();
        log.set_scroll_distance(BOTTOM_THRESHOLD);
        assert!(log.is_at_bottom());
        log.set_scroll_distance(BOTTOM_THRESHOLD + 1);
        assert!(!log.is_at_bottom());
    }
}
