//! # Sync State Repository
//!
//! Key/value storage for engine bookkeeping. Today that is only the last
//! sync cursor; an unknown cursor is stored as the absence of the row.

use sqlx::SqlitePool;
use tracing::debug;

use mirror_core::SyncCursor;

use crate::error::DbResult;

const CURSOR_KEY: &str = "cursor";

/// Repository for the `sync_state` table.
#[derive(Debug, Clone)]
pub struct SyncStateRepository {
    pool: SqlitePool,
}

impl SyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncStateRepository { pool }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.flatten())
    }

    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn remove(&self, key: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM sync_state WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Returns the persisted cursor, `Unknown` if none was saved.
    pub async fn cursor(&self) -> DbResult<SyncCursor> {
        Ok(self.get(CURSOR_KEY).await?.into())
    }

    pub async fn set_cursor(&self, cursor: &SyncCursor) -> DbResult<()> {
        debug!(%cursor, "Persisting sync cursor");

        match cursor.as_str() {
            Some(token) => self.set(CURSOR_KEY, token).await,
            None => self.remove(CURSOR_KEY).await,
        }
    }
}
