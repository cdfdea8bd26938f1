//! The per-room message log.
//!
//! A single lock covers both the ordered entries and the identity index, so
//! readers never see an entry without its index (or the reverse) and an
//! append is observed all at once.

use parley_protocol::{ChatMessage, MessageKey};
use std::collections::HashSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Log {
    entries: Vec<ChatMessage>,
    keys: HashSet<MessageKey>,
}

impl Log {
    fn insert(&mut self, message: ChatMessage) -> bool {
        if !self.keys.insert(message.key()) {
            return false;
        }

        let in_order = self
            .entries
            .last()
            .map_or(true, |last| last.timestamp <= message.timestamp);

        if in_order {
            self.entries.push(message);
        } else {
            let at = self
                .entries
                .partition_point(|existing| existing.timestamp <= message.timestamp);
            debug!(
                sender = %message.sender,
                timestamp = %message.timestamp,
                position = at,
                "Placing late message"
            );
            self.entries.insert(at, message);
        }
        true
    }
}

/// Ordered, de-duplicated log of one room's messages.
#[derive(Debug, Default)]
pub struct MessageStore {
    log: RwLock<Log>,
}

impl MessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the log with a history page delivered newest first.
    ///
    /// The page is reversed into chronological order; entries repeated
    /// within the page are kept once.
    pub fn load_history(&self, page: Vec<ChatMessage>) {
        let received = page.len();
        let mut log = Log::default();
        for message in page.into_iter().rev() {
            if log.keys.insert(message.key()) {
                log.entries.push(message);
            }
        }
        // Pages are expected newest first; a stable sort repairs any stragglers
        // without disturbing equal timestamps.
        log.entries.sort_by_key(|message| message.timestamp);

        debug!(received, kept = log.entries.len(), "History loaded");
        *self.write() = log;
    }

    /// Add a live message unless an entry with the same identity exists.
    ///
    /// Returns whether the message was inserted.
    pub fn append(&self, message: ChatMessage) -> bool {
        let inserted = self.write().insert(message);
        if !inserted {
            trace!("Duplicate message ignored");
        }
        inserted
    }

    /// Snapshot of the current log, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<ChatMessage> {
        self.read().entries.clone()
    }

    /// The newest message, if any.
    #[must_use]
    pub fn last(&self) -> Option<ChatMessage> {
        self.read().entries.last().cloned()
    }

    /// Whether a message with this identity is in the log.
    #[must_use]
    pub fn contains(&self, key: &MessageKey) -> bool {
        self.read().keys.contains(key)
    }

    /// Number of messages in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Check if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Log> {
        self.log.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Log> {
        self.log.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::Timestamp;
    use std::sync::Arc;

    fn msg(sender: &str, content: &str, t: i64) -> ChatMessage {
        ChatMessage::new(sender, content, Timestamp::from_millis(t))
    }

    fn is_chronological(messages: &[ChatMessage]) -> bool {
        messages
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    }

    #[test]
    fn test_history_is_reversed_into_chronological_order() {
        let store = MessageStore::new();
        store.load_history(vec![msg("A", "hi", 3), msg("A", "yo", 1)]);
        assert_eq!(store.all(), vec![msg("A", "yo", 1), msg("A", "hi", 3)]);

        assert!(store.append(msg("B", "hey", 5)));
        assert_eq!(
            store.all(),
            vec![msg("A", "yo", 1), msg("A", "hi", 3), msg("B", "hey", 5)]
        );
    }

    #[test]
    fn test_append_is_idempotent() {
        let store = MessageStore::new();
        assert!(store.append(msg("A", "hi", 1)));
        assert!(!store.append(msg("A", "hi", 1)));
        assert_eq!(store.len(), 1);

        // Same text at another time is a different message.
        assert!(store.append(msg("A", "hi", 2)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_server_id_wins_over_content() {
        let store = MessageStore::new();
        assert!(store.append(msg("A", "hi", 1).with_id("m1")));
        assert!(!store.append(msg("A", "edited", 1).with_id("m1")));
        assert!(store.contains(&MessageKey::Id("m1".into())));
    }

    #[test]
    fn test_history_duplicates_collapse() {
        let store = MessageStore::new();
        store.load_history(vec![msg("A", "b", 2), msg("A", "a", 1), msg("A", "a", 1)]);
        assert_eq!(store.all(), vec![msg("A", "a", 1), msg("A", "b", 2)]);
        assert!(!store.append(msg("A", "b", 2)));
    }

    #[test]
    fn test_load_history_replaces_log() {
        let store = MessageStore::new();
        store.append(msg("A", "old", 1));
        store.load_history(vec![msg("B", "new", 9)]);
        assert_eq!(store.all(), vec![msg("B", "new", 9)]);
        assert!(store.append(msg("A", "old", 1)));
    }

    #[test]
    fn test_late_message_keeps_log_ordered() {
        let store = MessageStore::new();
        store.load_history(vec![msg("A", "c", 30), msg("A", "b", 20), msg("A", "a", 10)]);

        assert!(store.append(msg("B", "late", 20)));
        let contents: Vec<_> = store.all().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, ["a", "b", "late", "c"]);
        assert!(is_chronological(&store.all()));
    }

    #[test]
    fn test_log_stays_chronological_for_arbitrary_appends() {
        let store = MessageStore::new();
        store.load_history((0..20).rev().map(|t| msg("H", "h", t * 10)).collect());

        // Deterministic scramble of live timestamps, some overlapping history.
        for i in 0..200_i64 {
            let t = (i * 37) % 250;
            store.append(msg("L", &format!("m{}", i % 50), t));
            assert!(is_chronological(&store.all()));
        }
    }

    #[test]
    fn test_readers_never_see_partial_appends() {
        let store = Arc::new(MessageStore::new());
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for t in 0..2000 {
                    store.append(msg("W", "x", t));
                }
            })
        };

        for _ in 0..200 {
            let snapshot = store.all();
            assert!(is_chronological(&snapshot));
            let keys: HashSet<_> = snapshot.iter().map(ChatMessage::key).collect();
            assert_eq!(keys.len(), snapshot.len());
        }

        writer.join().unwrap();
        assert_eq!(store.len(), 2000);
        assert_eq!(store.last(), Some(msg("W", "x", 1999)));
    }
}
