//! Conversation-context window for text translation. Supplements
//! spec.md §4.1's `translate_text(..., context?)` parameter: a short
//! rolling history of recent (source, translated) pairs per
//! room+user, fed back into later calls so recurring terminology
//! (names, technical terms) stays consistent across an utterance
//! sequence. Grounded on `app/translate/routes.py`'s
//! `_get_context`/`_add_context`: last 5 items kept, last 3 surfaced,
//! 30-minute TTL — this is a hint for the model, not a durable record,
//! so an in-process store with no persistence is sufficient.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lams_ai::ContextItem;

const MAX_ITEMS: usize = 5;
const SURFACED_ITEMS: usize = 3;
const CONTEXT_TTL: Duration = Duration::from_secs(1800);

fn context_key(room_id: Option<&str>, user_id: &str) -> String {
    match room_id {
        Some(room_id) => format!("{room_id}:{user_id}"),
        None => format!("global:{user_id}"),
    }
}

/// Per (room, user) rolling window of recent translations, used to
/// prime later `translate_text` calls for the same speaker.
pub struct TranslationContextStore {
    entries: DashMap<String, (VecDeque<ContextItem>, Instant)>,
}

impl TranslationContextStore {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// The most recent items to surface in a translation prompt,
    /// oldest first (spec supplement: last 3 of the last 5 kept).
    /// Returns an empty window once the entry's TTL has lapsed.
    pub fn recent(&self, room_id: Option<&str>, user_id: &str) -> Vec<ContextItem> {
        let key = context_key(room_id, user_id);
        match self.entries.get(&key) {
            Some(entry) if entry.1.elapsed() < CONTEXT_TTL => {
                entry.0.iter().rev().take(SURFACED_ITEMS).rev().cloned().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Appends a freshly completed translation, evicting the oldest
    /// entry past `MAX_ITEMS` and refreshing the TTL.
    pub fn record(&self, room_id: Option<&str>, user_id: &str, source_text: &str, translated_text: &str) {
        let key = context_key(room_id, user_id);
        let mut entry = self.entries.entry(key).or_insert_with(|| (VecDeque::new(), Instant::now()));
        entry.0.push_back(ContextItem {
            source_text: source_text.to_string(),
            translated_text: translated_text.to_string(),
        });
        while entry.0.len() > MAX_ITEMS {
            entry.0.pop_front();
        }
        entry.1 = Instant::now();
    }
}

impl Default for TranslationContextStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_last_n_surfaced_in_recency_order() {
        let store = TranslationContextStore::new();
        for i in 0..MAX_ITEMS + 2 {
            store.record(Some("room1"), "user1", &format!("src{i}"), &format!("tgt{i}"));
        }
        let recent = store.recent(Some("room1"), "user1");
        assert_eq!(recent.len(), SURFACED_ITEMS);
        assert_eq!(recent.last().unwrap().source_text, format!("src{}", MAX_ITEMS + 1));
    }

    #[test]
    fn distinct_rooms_for_the_same_user_are_isolated() {
        let store = TranslationContextStore::new();
        store.record(Some("room1"), "user1", "hello", "bonjour");
        assert!(store.recent(Some("room2"), "user1").is_empty());
        assert_eq!(store.recent(Some("room1"), "user1").len(), 1);
    }

    #[test]
    fn unknown_key_returns_empty_window() {
        let store = TranslationContextStore::new();
        assert!(store.recent(None, "nobody").is_empty());
    }
}
