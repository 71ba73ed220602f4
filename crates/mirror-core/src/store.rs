//! # Change Store
//!
//! In-memory home of every change the engine knows about.
//!
//! ## Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ChangeStore                                   │
//! │                                                                         │
//! │  pending (FIFO)                     confirmed (timestamp desc)          │
//! │  ┌────┬────┬────┐                   ┌────────┬────────┬────────┐        │
//! │  │ c1 │ c2 │ c3 │ ── confirm(c1) ──►│ newest │  ...   │ oldest │        │
//! │  └────┴────┴────┘                   └────────┴────────┴────────┘        │
//! │        ▲                                     ▲                          │
//! │  enqueue_pending()                    apply_incoming()                  │
//! │                                       (server changes, dedup by id)     │
//! │                                                                         │
//! │  cursor: Unknown | At(token)        clear() empties both + cursor       │
//! │                                                                         │
//! │  INVARIANT: an id lives in at most one of {pending, confirmed},         │
//! │             and never twice in confirmed.                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All operations are synchronous. The store has exactly one owner; it is
//! not shared behind a lock.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashSet, VecDeque};

use crate::error::{CoreError, CoreResult};
use crate::types::{Change, ChangeSnapshot, PendingChange, StoreState, SyncCursor};

/// Ordered, deduplicated change log plus the optimistic pending queue.
#[derive(Debug, Default)]
pub struct ChangeStore {
    confirmed: Vec<Change>,
    confirmed_ids: HashSet<String>,
    pending: VecDeque<PendingChange>,
    cursor: SyncCursor,
}

impl ChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted state.
    ///
    /// Duplicate confirmed entries collapse to one. A pending entry whose id
    /// is already confirmed is dropped, since its confirmation was recorded.
    pub fn restore(state: StoreState) -> Self {
        let mut store = ChangeStore {
            cursor: state.cursor,
            ..Self::default()
        };

        for change in state.confirmed {
            store.insert_confirmed(change);
        }

        for entry in state.pending {
            if !store.contains(entry.id()) {
                store.pending.push_back(entry);
            }
        }

        store
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Appends a locally created change to the pending queue.
    pub fn enqueue_pending(&mut self, change: Change) -> CoreResult<()> {
        if self.contains(&change.id) {
            return Err(CoreError::DuplicateChange(change.id));
        }

        self.pending.push_back(PendingChange::new(change, Utc::now()));
        Ok(())
    }

    /// Moves a pending change into the confirmed log.
    ///
    /// Returns the confirmed change, or `None` when `id` is not pending
    /// (already confirmed, cleared, or never tracked).
    pub fn confirm(&mut self, id: &str) -> Option<Change> {
        let index = self.pending.iter().position(|p| p.id() == id)?;
        let entry = self.pending.remove(index)?;
        let change = entry.change;
        self.insert_confirmed(change.clone());
        Some(change)
    }

    /// Records a change that originated on the server.
    ///
    /// Returns `true` when the store changed. A change whose id is already
    /// confirmed is ignored. A change whose id is still pending is our own
    /// change echoed back, so the pending entry is promoted.
    pub fn apply_incoming(&mut self, change: Change) -> bool {
        if self.confirmed_ids.contains(&change.id) {
            return false;
        }

        if let Some(index) = self.pending.iter().position(|p| p.id() == change.id) {
            self.pending.remove(index);
        }

        self.insert_confirmed(change)
    }

    /// Increments the attempt counter of a pending change.
    pub fn record_failure(&mut self, id: &str, error: impl Into<String>) -> bool {
        match self.pending.iter_mut().find(|p| p.id() == id) {
            Some(entry) => {
                entry.attempts += 1;
                entry.last_error = Some(error.into());
                true
            }
            None => false,
        }
    }

    /// Empties both logs and forgets the sync cursor.
    pub fn clear(&mut self) {
        self.confirmed.clear();
        self.confirmed_ids.clear();
        self.pending.clear();
        self.cursor = SyncCursor::Unknown;
    }

    pub fn set_cursor(&mut self, cursor: SyncCursor) {
        self.cursor = cursor;
    }

    fn insert_confirmed(&mut self, change: Change) -> bool {
        if !self.confirmed_ids.insert(change.id.clone()) {
            return false;
        }

        let at = self
            .confirmed
            .partition_point(|c| c.timestamp >= change.timestamp);
        self.confirmed.insert(at, change);
        true
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn snapshot(&self) -> ChangeSnapshot {
        ChangeSnapshot {
            confirmed: self.confirmed.clone(),
            pending: self.pending.iter().map(|p| p.change.clone()).collect(),
        }
    }

    pub fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    /// Newest first.
    pub fn confirmed(&self) -> &[Change] {
        &self.confirmed
    }

    /// Pending entries in FIFO order.
    pub fn pending(&self) -> impl Iterator<Item = &PendingChange> {
        self.pending.iter()
    }

    pub fn pending_entry(&self, id: &str) -> Option<&PendingChange> {
        self.pending.iter().find(|p| p.id() == id)
    }

    /// Pending entries that have waited at least `threshold`.
    pub fn stale_pending(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> impl Iterator<Item = &PendingChange> {
        self.pending
            .iter()
            .filter(move |p| now.signed_duration_since(p.enqueued_at) >= threshold)
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.iter().any(|p| p.id() == id)
    }

    pub fn is_confirmed(&self, id: &str) -> bool {
        self.confirmed_ids.contains(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.is_confirmed(id) || self.is_pending(id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn confirmed_len(&self) -> usize {
        self.confirmed.len()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
