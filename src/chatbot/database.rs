//! SQLite write-through cache for conversation history.
//!
//! The in-memory store stays the system of record; this only lets recent
//! turns survive a restart.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::{Connection, params};
use tracing::info;

use crate::chatbot::history::{ConversationTurn, Role};

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self, String> {
        let conn = Connection::open(path)
            .map_err(|e| format!("Failed to open database {:?}: {e}", path))?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;

        let (users, turns) = db.counts()?;
        info!("Loaded history database from {:?} ({} users, {} turns)", path, users, turns);
        Ok(db)
    }

    /// Create a throwaway in-memory database.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory()
            .map_err(|e| format!("Failed to create in-memory database: {e}"))?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), String> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_turns_user_id ON turns(user_id);
            "#,
        )
        .map_err(|e| format!("Failed to init schema: {e}"))
    }

    /// Insert a turn and drop everything older than the newest `keep` for that user.
    pub fn append_turn(&self, user_id: i64, turn: &ConversationTurn, keep: usize) -> Result<(), String> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let created_at = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        conn.execute(
            "INSERT INTO turns (user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, turn.role.as_str(), turn.content, created_at],
        )
        .map_err(|e| format!("Failed to insert turn: {e}"))?;

        conn.execute(
            "DELETE FROM turns WHERE user_id = ?1 AND id NOT IN (
                SELECT id FROM turns WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2
            )",
            params![user_id, keep as i64],
        )
        .map_err(|e| format!("Failed to trim turns: {e}"))?;

        Ok(())
    }

    pub fn clear_user(&self, user_id: i64) -> Result<(), String> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute("DELETE FROM turns WHERE user_id = ?1", params![user_id])
            .map_err(|e| format!("Failed to clear turns: {e}"))?;
        Ok(())
    }

    /// Load the newest `keep` turns per user, oldest first.
    pub fn load_histories(&self, keep: usize) -> Result<HashMap<i64, Vec<ConversationTurn>>, String> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn
            .prepare("SELECT user_id, role, content FROM turns ORDER BY id")
            .map_err(|e| format!("Failed to prepare query: {e}"))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| format!("Failed to query turns: {e}"))?;

        let mut histories: HashMap<i64, Vec<ConversationTurn>> = HashMap::new();
        for row in rows {
            let (user_id, role, content) = row.map_err(|e| format!("Failed to read row: {e}"))?;
            // Rows with an unknown role are skipped rather than failing the load.
            let Some(role) = Role::parse(&role) else {
                continue;
            };
            histories
                .entry(user_id)
                .or_default()
                .push(ConversationTurn::new(role, content));
        }

        for turns in histories.values_mut() {
            if turns.len() > keep {
                turns.drain(..turns.len() - keep);
            }
        }

        Ok(histories)
    }

    /// (distinct users, total turns)
    pub fn counts(&self) -> Result<(i64, i64), String> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.query_row(
            "SELECT COUNT(DISTINCT user_id), COUNT(*) FROM turns",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|e| format!("Failed to count turns: {e}"))
    }
}
