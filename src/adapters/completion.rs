//! Completion record in a relational database.
//!
//! Marks an episode's captions as available with a single update keyed by
//! episode id. Applying it twice leaves the row unchanged.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::config::DatabaseSettings;

use super::CompletionRecorder;

pub struct SqliteRecorder {
    conn: Arc<Mutex<Connection>>,
    statement: String,
}

impl SqliteRecorder {
    /// Open the database file named in the settings
    pub fn open(settings: &DatabaseSettings) -> Result<Self> {
        let conn = Connection::open(&settings.path)
            .with_context(|| format!("Failed to open database {}", settings.path.display()))?;
        Self::with_connection(conn, &settings.table, &settings.column)
    }

    /// Wrap an existing connection
    pub fn with_connection(conn: Connection, table: &str, column: &str) -> Result<Self> {
        for ident in [table, column] {
            if ident.is_empty() || !ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                anyhow::bail!("Invalid SQL identifier '{}'", ident);
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            statement: format!("UPDATE {} SET {} = 1 WHERE id = ?1", table, column),
        })
    }

    /// Path-less constructor for an in-memory database
    pub fn in_memory(table: &str, column: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, table, column)
    }

    /// Run a closure against the underlying connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database connection lock poisoned"))?;
        Ok(f(&conn)?)
    }
}

#[async_trait]
impl CompletionRecorder for SqliteRecorder {
    async fn mark_captions_available(&self, episode_id: &str) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let statement = self.statement.clone();
        let episode = episode_id.to_string();

        let updated = tokio::task::spawn_blocking(move || -> Result<usize> {
            let conn = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("Database connection lock poisoned"))?;
            Ok(conn.execute(&statement, params![episode])?)
        })
        .await
        .context("Completion record task panicked")?
        .with_context(|| format!("Failed to record completion for episode {}", episode_id))?;

        if updated == 0 {
            warn!(episode = episode_id, "No episode row matched the completion record");
        } else {
            info!(episode = episode_id, "Captions marked available");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> SqliteRecorder {
        let recorder = SqliteRecorder::in_memory("episodes", "captions").unwrap();
        recorder
            .with_conn(|c| {
                c.execute_batch(
                    "CREATE TABLE episodes (id TEXT PRIMARY KEY, captions INTEGER NOT NULL DEFAULT 0);
                     INSERT INTO episodes (id) VALUES ('ep42');",
                )
            })
            .unwrap();
        recorder
    }

    fn captions(recorder: &SqliteRecorder, id: &str) -> i64 {
        recorder
            .with_conn(|c| {
                c.query_row("SELECT captions FROM episodes WHERE id = ?1", [id], |r| r.get(0))
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_mark_is_idempotent() {
        let recorder = recorder();

        recorder.mark_captions_available("ep42").await.unwrap();
        recorder.mark_captions_available("ep42").await.unwrap();
        assert_eq!(captions(&recorder, "ep42"), 1);
    }

    #[tokio::test]
    async fn test_unknown_episode_is_not_an_error() {
        let recorder = recorder();
        recorder.mark_captions_available("missing").await.unwrap();
        assert_eq!(captions(&recorder, "ep42"), 0);
    }

    #[tokio::test]
    async fn test_missing_table_fails() {
        let recorder = SqliteRecorder::in_memory("episodes", "captions").unwrap();
        assert!(recorder.mark_captions_available("ep42").await.is_err());
    }

    #[test]
    fn test_rejects_bad_identifiers() {
        assert!(SqliteRecorder::in_memory("episodes; DROP", "captions").is_err());
        assert!(SqliteRecorder::in_memory("episodes", "").is_err());
    }
}
