//! # Change Repository
//!
//! Durable copy of the pending queue and the confirmed log.
//!
//! ## Tables
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  pending_changes (FIFO by seq)                                         │
//! │  seq | id  | payload | enqueued_at | attempts | last_error             │
//! │  ────┼─────┼─────────┼─────────────┼──────────┼───────────             │
//! │  1   │ c-1 │ {...}   │ 10:00:00    │ 2        │ not connected          │
//! │  2   │ c-2 │ {...}   │ 10:00:01    │ 0        │ NULL                   │
//! │                                                                         │
//! │  confirmed_changes (unique by id)                                      │
//! │  id  | payload | timestamp | confirmed_at                              │
//! │                                                                         │
//! │  confirm(change) runs in ONE transaction:                              │
//! │    1. DELETE FROM pending_changes WHERE id = ?                         │
//! │    2. INSERT OR IGNORE INTO confirmed_changes ...                      │
//! │  so a crash never leaves an id in both tables or in neither.           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use mirror_core::{Change, PendingChange};

use crate::error::{DbError, DbResult};

/// Repository for pending and confirmed changes.
#[derive(Debug, Clone)]
pub struct ChangeRepository {
    pool: SqlitePool,
}

impl ChangeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ChangeRepository { pool }
    }

    // =========================================================================
    // Pending Queue
    // =========================================================================

    /// Appends an entry to the durable pending queue.
    pub async fn enqueue_pending(&self, entry: &PendingChange) -> DbResult<()> {
        let payload = encode(&entry.change)?;

        debug!(id = %entry.change.id, "Persisting pending change");

        sqlx::query(
            r#"
            INSERT INTO pending_changes (id, payload, enqueued_at, attempts, last_error)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&entry.change.id)
        .bind(payload)
        .bind(entry.enqueued_at)
        .bind(entry.attempts as i64)
        .bind(&entry.last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns every pending entry, oldest first.
    pub async fn pending(&self) -> DbResult<Vec<PendingChange>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload, enqueued_at, attempts, last_error
            FROM pending_changes
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> DbResult<PendingChange> {
                let id: String = row.try_get("id")?;
                let payload: String = row.try_get("payload")?;
                let attempts: i64 = row.try_get("attempts")?;

                Ok(PendingChange {
                    change: decode(&id, &payload)?,
                    enqueued_at: row.try_get::<DateTime<Utc>, _>("enqueued_at")?,
                    attempts: attempts.max(0) as u32,
                    last_error: row.try_get("last_error")?,
                })
            })
            .collect()
    }

    /// Records a failed delivery attempt.
    pub async fn record_failure(&self, id: &str, error: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE pending_changes SET
                attempts = attempts + 1,
                last_error = ?2,
                attempted_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn count_pending(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_changes")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Confirmed Log
    // =========================================================================

    /// Moves a change into the confirmed log.
    ///
    /// Used both for acknowledged local changes and for server changes; an
    /// id already confirmed is left untouched.
    pub async fn confirm(&self, change: &Change) -> DbResult<()> {
        let payload = encode(change)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM pending_changes WHERE id = ?1")
            .bind(&change.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO confirmed_changes (id, payload, timestamp, confirmed_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&change.id)
        .bind(payload)
        .bind(change.timestamp)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(id = %change.id, "Persisted confirmed change");
        Ok(())
    }

    /// Returns the confirmed log, newest first.
    pub async fn confirmed(&self) -> DbResult<Vec<Change>> {
        let rows = sqlx::query(
            r#"
            SELECT id, payload
            FROM confirmed_changes
            ORDER BY timestamp DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> DbResult<Change> {
                let id: String = row.try_get("id")?;
                let payload: String = row.try_get("payload")?;
                decode(&id, &payload)
            })
            .collect()
    }

    pub async fn count_confirmed(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM confirmed_changes")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

fn encode(change: &Change) -> DbResult<String> {
    serde_json::to_string(change).map_err(|e| DbError::corrupt(&change.id, e))
}

fn decode(id: &str, payload: &str) -> DbResult<Change> {
    serde_json::from_str(payload).map_err(|e| DbError::corrupt(id, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use mirror_core::{ChangeDraft, ChangeKind};

    async fn repo() -> ChangeRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().changes()
    }

    fn change(id: &str, ts: &str) -> Change {
        ChangeDraft::new(ChangeKind::Update, "task", "t-1")
            .field("title")
            .new_value(serde_json::json!({"text": id}))
            .into_change_with(id, ts.parse().unwrap())
    }

    #[tokio::test]
    async fn test_pending_round_trip_keeps_fifo() {
        let repo = repo().await;
        for (id, ts) in [("b", "2024-01-01T00:00:09Z"), ("a", "2024-01-01T00:00:01Z")] {
            repo.enqueue_pending(&PendingChange::new(change(id, ts), Utc::now()))
                .await
                .unwrap();
        }

        let ids: Vec<_> = repo
            .pending()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.change.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_duplicate_pending_rejected() {
        let repo = repo().await;
        let entry = PendingChange::new(change("a", "2024-01-01T00:00:00Z"), Utc::now());
        repo.enqueue_pending(&entry).await.unwrap();

        assert!(matches!(
            repo.enqueue_pending(&entry).await,
            Err(DbError::UniqueViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_record_failure_increments() {
        let repo = repo().await;
        let entry = PendingChange::new(change("a", "2024-01-01T00:00:00Z"), Utc::now());
        repo.enqueue_pending(&entry).await.unwrap();

        repo.record_failure("a", "not connected").await.unwrap();
        repo.record_failure("a", "timeout").await.unwrap();

        let pending = repo.pending().await.unwrap();
        assert_eq!(pending[0].attempts, 2);
        assert_eq!(pending[0].last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_confirm_moves_once() {
        let repo = repo().await;
        let c = change("a", "2024-01-01T00:00:00Z");
        repo.enqueue_pending(&PendingChange::new(c.clone(), Utc::now()))
            .await
            .unwrap();

        repo.confirm(&c).await.unwrap();
        repo.confirm(&c).await.unwrap();

        assert_eq!(repo.count_pending().await.unwrap(), 0);
        assert_eq!(repo.count_confirmed().await.unwrap(), 1);
        assert_eq!(repo.confirmed().await.unwrap(), vec![c]);
    }

    #[tokio::test]
    async fn test_confirmed_newest_first() {
        let repo = repo().await;
        repo.confirm(&change("old", "2024-01-01T00:00:01Z")).await.unwrap();
        repo.confirm(&change("new", "2024-01-01T00:00:09Z")).await.unwrap();

        let ids: Vec<_> = repo
            .confirmed()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }
}
