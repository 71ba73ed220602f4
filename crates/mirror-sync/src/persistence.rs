//! # Persistence Hooks
//!
//! The synchronizer mirrors every store mutation into a [`SyncPersistence`]
//! so a restart resumes with the same pending queue, confirmed log and
//! cursor. [`Volatile`] keeps nothing; [`mirror_db::Database`] keeps it in
//! SQLite.
//!
//! ```text
//! ChangeStore mutation        Persistence call
//! ────────────────────        ─────────────────────────────
//! enqueue_pending         ──► save_pending
//! record_failure          ──► record_failure
//! confirm / apply_incoming──► save_confirmed  (drops any pending row)
//! set_cursor              ──► save_cursor
//! clear                   ──► clear
//! ```
//!
//! Persistence failures are logged by the caller and never undo the
//! in-memory mutation.

use async_trait::async_trait;

use mirror_core::{Change, PendingChange, StoreState, SyncCursor};
use mirror_db::Database;

use crate::error::SyncResult;

#[async_trait]
pub trait SyncPersistence: Send + Sync {
    /// State to restore on startup.
    async fn load(&self) -> SyncResult<StoreState>;

    async fn save_pending(&self, entry: &PendingChange) -> SyncResult<()>;

    async fn record_failure(&self, id: &str, error: &str) -> SyncResult<()>;

    /// Stores a confirmed change, removing it from the pending set.
    async fn save_confirmed(&self, change: &Change) -> SyncResult<()>;

    async fn save_cursor(&self, cursor: &SyncCursor) -> SyncResult<()>;

    async fn clear(&self) -> SyncResult<()>;
}

/// Keeps nothing. Every start is a fresh store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Volatile;

#[async_trait]
impl SyncPersistence for Volatile {
    async fn load(&self) -> SyncResult<StoreState> {
        Ok(StoreState::default())
    }

    async fn save_pending(&self, _entry: &PendingChange) -> SyncResult<()> {
        Ok(())
    }

    async fn record_failure(&self, _id: &str, _error: &str) -> SyncResult<()> {
        Ok(())
    }

    async fn save_confirmed(&self, _change: &Change) -> SyncResult<()> {
        Ok(())
    }

    async fn save_cursor(&self, _cursor: &SyncCursor) -> SyncResult<()> {
        Ok(())
    }

    async fn clear(&self) -> SyncResult<()> {
        Ok(())
    }
}

#[async_trait]
impl SyncPersistence for Database {
    async fn load(&self) -> SyncResult<StoreState> {
        Ok(self.load_state().await?)
    }

    async fn save_pending(&self, entry: &PendingChange) -> SyncResult<()> {
        Ok(self.changes().enqueue_pending(entry).await?)
    }

    async fn record_failure(&self, id: &str, error: &str) -> SyncResult<()> {
        Ok(self.changes().record_failure(id, error).await?)
    }

    async fn save_confirmed(&self, change: &Change) -> SyncResult<()> {
        Ok(self.changes().confirm(change).await?)
    }

    async fn save_cursor(&self, cursor: &SyncCursor) -> SyncResult<()> {
        Ok(self.sync_state().set_cursor(cursor).await?)
    }

    async fn clear(&self) -> SyncResult<()> {
        Ok(self.clear_all().await?)
    }
}
