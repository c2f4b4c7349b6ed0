//! Per-user sliding-window conversation history.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chatbot::database::Database;

/// Default number of turns kept per user.
pub const MAX_HISTORY_LENGTH: usize = 10;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One message in a conversation. Serializes to the chat-completions shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Bounded history per user id, optionally written through to SQLite.
///
/// Appending past the limit evicts from the head, so the store always holds
/// the most recent `max_len` turns in the order they were appended.
pub struct ConversationStore {
    max_len: usize,
    histories: Mutex<HashMap<i64, VecDeque<ConversationTurn>>>,
    database: Option<Database>,
}

impl ConversationStore {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            histories: Mutex::new(HashMap::new()),
            database: None,
        }
    }

    /// Create a store backed by `database`, preloading what it holds.
    pub fn with_database(max_len: usize, database: Database) -> Self {
        let max_len = max_len.max(1);
        let histories = match database.load_histories(max_len) {
            Ok(loaded) => {
                info!("Restored history for {} user(s)", loaded.len());
                loaded
                    .into_iter()
                    .map(|(user_id, turns)| (user_id, VecDeque::from(turns)))
                    .collect()
            }
            Err(e) => {
                warn!("Failed to restore history: {e}");
                HashMap::new()
            }
        };

        Self {
            max_len,
            histories: Mutex::new(histories),
            database: Some(database),
        }
    }

    /// History for a user, oldest first. Empty for unknown users.
    pub fn get_history(&self, user_id: i64) -> Vec<ConversationTurn> {
        let histories = self.histories.lock().unwrap_or_else(PoisonError::into_inner);
        histories
            .get(&user_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Push a turn to the tail, evicting from the head past the limit.
    pub fn append(&self, user_id: i64, turn: ConversationTurn) {
        if let Some(ref db) = self.database
            && let Err(e) = db.append_turn(user_id, &turn, self.max_len)
        {
            warn!("Failed to persist turn for user {}: {}", user_id, e);
        }

        let mut histories = self.histories.lock().unwrap_or_else(PoisonError::into_inner);
        let turns = histories.entry(user_id).or_default();
        turns.push_back(turn);
        while turns.len() > self.max_len {
            turns.pop_front();
        }
    }

    /// Record a completed user/assistant exchange.
    pub fn append_exchange(&self, user_id: i64, user_text: &str, reply: &str) {
        self.append(user_id, ConversationTurn::user(user_text));
        self.append(user_id, ConversationTurn::assistant(reply));
    }

    /// Drop all history for a user. No-op for unknown users.
    pub fn clear(&self, user_id: i64) {
        if let Some(ref db) = self.database
            && let Err(e) = db.clear_user(user_id)
        {
            warn!("Failed to clear persisted history for user {}: {}", user_id, e);
        }

        let mut histories = self.histories.lock().unwrap_or_else(PoisonError::into_inner);
        histories.remove(&user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_user_is_empty() {
        let store = ConversationStore::new(MAX_HISTORY_LENGTH);
        assert!(store.get_history(42).is_empty());
    }

    #[test]
    fn test_length_never_exceeds_limit() {
        let store = ConversationStore::new(MAX_HISTORY_LENGTH);
        for i in 0..25 {
            store.append(1, ConversationTurn::user(format!("msg {i}")));
            assert!(store.get_history(1).len() <= MAX_HISTORY_LENGTH);
        }
    }

    #[test]
    fn test_twelve_messages_keep_last_ten() {
        let store = ConversationStore::new(MAX_HISTORY_LENGTH);
        for i in 1..=12 {
            let turn = if i % 2 == 1 {
                ConversationTurn::user(format!("message #{i}"))
            } else {
                ConversationTurn::assistant(format!("message #{i}"))
            };
            store.append(7, turn);
        }

        let history = store.get_history(7);
        assert_eq!(history.len(), 10);
        let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
        assert!(!contents.contains(&"message #1"));
        assert!(!contents.contains(&"message #2"));
        assert!(contents.contains(&"message #11"));
        assert!(contents.contains(&"message #12"));
        let expected: Vec<String> = (3..=12).map(|i| format!("message #{i}")).collect();
        assert_eq!(contents, expected);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[9].role, Role::Assistant);
    }

    #[test]
    fn test_clear_is_isolated() {
        let store = ConversationStore::new(MAX_HISTORY_LENGTH);
        store.append_exchange(1, "hi", "hello");
        store.append_exchange(2, "hey", "hey there");

        store.clear(1);
        assert!(store.get_history(1).is_empty());
        assert_eq!(store.get_history(2).len(), 2);

        // idempotent on unknown users
        store.clear(999);
        store.clear(1);
    }

    #[test]
    fn test_write_through_and_restore() {
        let db = Database::in_memory().unwrap();
        let store = ConversationStore::with_database(3, db);
        for i in 0..5 {
            store.append(5, ConversationTurn::user(format!("turn {i}")));
        }
        assert_eq!(store.get_history(5).len(), 3);

        let db = store.database.unwrap();
        let restored = ConversationStore::with_database(3, db);
        let contents: Vec<String> = restored.get_history(5).into_iter().map(|t| t.content).collect();
        assert_eq!(contents, vec!["turn 2", "turn 3", "turn 4"]);
    }

    #[test]
    fn test_role_round_trip_names() {
        for role in [Role::System, Role::User, Role::Assistant] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("tool"), None);
    }
}
