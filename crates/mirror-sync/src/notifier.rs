//! # Notifier
//!
//! Outward-facing hooks for the synchronizer. A UI, a CLI or a test plugs
//! in here to observe the store without owning it.
//!
//! ```text
//! Synchronizer ──► on_snapshot(confirmed, pending)   after every store change
//!              ──► on_status(state)                  transport transitions
//!              ──► on_stuck(change)                  pending past the threshold
//!              ──► on_error(error)                   failed sync cycles, server errors
//! ```
//!
//! Hooks run on the synchronizer task and must not block.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use mirror_core::{ChangeSnapshot, PendingChange};

use crate::error::SyncError;
use crate::transport::ConnectionState;

// =============================================================================
// Stuck Change Report
// =============================================================================

/// A pending change that has waited longer than the staleness threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct StuckChange {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub enqueued_at: DateTime<Utc>,
    pub pending_for: Duration,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl StuckChange {
    pub fn from_pending(entry: &PendingChange, now: DateTime<Utc>) -> Self {
        let pending_for = now
            .signed_duration_since(entry.enqueued_at)
            .to_std()
            .unwrap_or_default();

        StuckChange {
            id: entry.change.id.clone(),
            entity_type: entry.change.entity_type.clone(),
            entity_id: entry.change.entity_id.clone(),
            enqueued_at: entry.enqueued_at,
            pending_for,
            attempts: entry.attempts,
            last_error: entry.last_error.clone(),
        }
    }

    pub fn to_error(&self) -> SyncError {
        SyncError::StuckChange {
            id: self.id.clone(),
            pending_secs: self.pending_for.as_secs() as i64,
            attempts: self.attempts,
        }
    }
}

// =============================================================================
// Notifier Trait
// =============================================================================

/// Trait for surfacing synchronizer events.
pub trait Notifier: Send + Sync {
    /// The confirmed or pending set changed.
    fn on_snapshot(&self, _snapshot: &ChangeSnapshot) {}

    /// The transport changed state.
    fn on_status(&self, _state: ConnectionState) {}

    /// A change crossed the staleness threshold. Reported once per change.
    fn on_stuck(&self, _stuck: &StuckChange) {}

    /// Something failed that the caller may want to show.
    fn on_error(&self, _error: &SyncError) {}
}

/// Ignores everything.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {}

/// Writes every event to the log.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn on_snapshot(&self, snapshot: &ChangeSnapshot) {
        debug!(
            confirmed = snapshot.confirmed.len(),
            pending = snapshot.pending.len(),
            "Change set updated"
        );
    }

    fn on_status(&self, state: ConnectionState) {
        info!(%state, "Sync connection");
    }

    fn on_stuck(&self, stuck: &StuckChange) {
        warn!(
            id = %stuck.id,
            entity = %format!("{}/{}", stuck.entity_type, stuck.entity_id),
            pending_secs = stuck.pending_for.as_secs(),
            attempts = stuck.attempts,
            last_error = stuck.last_error.as_deref().unwrap_or("-"),
            "Change stuck in pending queue"
        );
    }

    fn on_error(&self, err: &SyncError) {
        if err.is_retryable() {
            warn!(error = %err, "Sync error (will retry)");
        } else {
            error!(error = %err, "Sync error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::{ChangeDraft, ChangeKind};

    #[test]
    fn test_stuck_change_from_pending() {
        let enqueued: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let change = ChangeDraft::new(ChangeKind::Update, "task", "t-9")
            .into_change_with("c-9", enqueued);
        let mut entry = PendingChange::new(change, enqueued);
        entry.attempts = 3;
        entry.last_error = Some("Not connected to sync server".into());

        let now: DateTime<Utc> = "2024-05-01T10:06:00Z".parse().unwrap();
        let stuck = StuckChange::from_pending(&entry, now);

        assert_eq!(stuck.pending_for, Duration::from_secs(360));
        assert_eq!(stuck.entity_id, "t-9");
        assert_eq!(
            stuck.to_error().to_string(),
            "Change c-9 pending for 360s after 3 failed attempts"
        );
    }

    #[test]
    fn test_clock_skew_clamps_to_zero() {
        let enqueued: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let change = ChangeDraft::new(ChangeKind::Delete, "task", "t-1")
            .into_change_with("c-1", enqueued);
        let entry = PendingChange::new(change, enqueued);

        let earlier: DateTime<Utc> = "2024-05-01T09:59:00Z".parse().unwrap();
        assert_eq!(StuckChange::from_pending(&entry, earlier).pending_for, Duration::ZERO);
    }
}
