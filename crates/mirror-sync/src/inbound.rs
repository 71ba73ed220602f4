//! # Inbound Handler
//!
//! Applies server frames to the [`ChangeStore`].
//!
//! ## Processing Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Inbound Processing                                │
//! │                                                                         │
//! │  change { data }                                                       │
//! │     └─► apply_incoming(data)                                           │
//! │           • id already confirmed  → ignored                            │
//! │           • id still pending      → our own echo, promoted             │
//! │           • otherwise             → inserted by timestamp              │
//! │                                                                         │
//! │  sync_response { changes, cursor }                                     │
//! │     └─► apply_incoming(each)  then  cursor replaces the stored one     │
//! │                                                                         │
//! │  pong                → nothing                                         │
//! │  error { code, msg } → reported through the notifier                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tracing::{debug, info, warn};

use mirror_core::{Change, ChangeStore, SyncCursor};

use crate::error::SyncError;
use crate::persistence::SyncPersistence;
use crate::protocol::InboundMessage;

/// What one inbound frame did to the store.
#[derive(Debug, Default)]
pub struct InboundOutcome {
    /// Changes newly recorded as confirmed.
    pub applied: Vec<Change>,

    /// Ids that were pending locally and got confirmed by the echo.
    pub promoted: Vec<String>,

    /// Set when the frame was a `sync_response`.
    pub cursor: Option<SyncCursor>,

    /// Set when the frame was an `error`.
    pub server_error: Option<SyncError>,
}

impl InboundOutcome {
    pub fn changed_store(&self) -> bool {
        !self.applied.is_empty() || self.cursor.is_some()
    }
}

/// Applies inbound frames and mirrors the result into persistence.
pub struct InboundHandler {
    persistence: Arc<dyn SyncPersistence>,
}

impl InboundHandler {
    pub fn new(persistence: Arc<dyn SyncPersistence>) -> Self {
        InboundHandler { persistence }
    }

    pub async fn handle(&self, store: &mut ChangeStore, message: InboundMessage) -> InboundOutcome {
        let mut outcome = InboundOutcome::default();

        match message {
            InboundMessage::Change { data } => {
                self.apply(store, data, &mut outcome).await;
            }

            InboundMessage::SyncResponse { changes, cursor } => {
                let received = changes.len();
                for change in changes {
                    self.apply(store, change, &mut outcome).await;
                }

                store.set_cursor(cursor.clone());
                if let Err(e) = self.persistence.save_cursor(&cursor).await {
                    warn!(error = %e, "Failed to persist sync cursor");
                }

                info!(
                    received,
                    applied = outcome.applied.len(),
                    %cursor,
                    "Sync response applied"
                );
                outcome.cursor = Some(cursor);
            }

            InboundMessage::Pong => {
                debug!("Received pong");
            }

            InboundMessage::Error { code, message } => {
                warn!(%code, %message, "Server reported an error");
                outcome.server_error = Some(SyncError::ServerError { code, message });
            }
        }

        outcome
    }

    async fn apply(&self, store: &mut ChangeStore, change: Change, outcome: &mut InboundOutcome) {
        let was_pending = store.is_pending(&change.id);
        if !store.apply_incoming(change.clone()) {
            debug!(id = %change.id, "Ignoring already confirmed change");
            return;
        }

        if let Err(e) = self.persistence.save_confirmed(&change).await {
            warn!(id = %change.id, error = %e, "Failed to persist incoming change");
        }

        if was_pending {
            outcome.promoted.push(change.id.clone());
        }
        outcome.applied.push(change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::Volatile;
    use mirror_core::{ChangeDraft, ChangeKind};

    fn handler() -> InboundHandler {
        InboundHandler::new(Arc::new(Volatile))
    }

    fn remote(id: &str, at: &str) -> Change {
        ChangeDraft::new(ChangeKind::Update, "task", "t-1")
            .field("title")
            .new_value("remote edit")
            .actor("other-device")
            .into_change_with(id, at.parse().unwrap())
    }

    #[tokio::test]
    async fn test_live_change_is_applied_once() {
        let mut store = ChangeStore::new();
        let change = remote("r-1", "2024-05-01T10:00:00Z");

        let first = handler()
            .handle(&mut store, InboundMessage::change(change.clone()))
            .await;
        let second = handler()
            .handle(&mut store, InboundMessage::change(change))
            .await;

        assert_eq!(first.applied.len(), 1);
        assert!(second.applied.is_empty());
        assert_eq!(store.confirmed_len(), 1);
    }

    #[tokio::test]
    async fn test_echo_promotes_pending() {
        let mut store = ChangeStore::new();
        let ours = remote("c-1", "2024-05-01T10:00:00Z");
        store.enqueue_pending(ours.clone()).unwrap();

        let outcome = handler()
            .handle(&mut store, InboundMessage::change(ours.clone()))
            .await;

        assert_eq!(outcome.promoted, vec![ours.id.clone()]);
        assert!(store.is_confirmed(&ours.id));
        assert!(!store.is_pending(&ours.id));
    }

    #[tokio::test]
    async fn test_sync_response_merges_and_replaces_cursor() {
        let mut store = ChangeStore::new();
        store.set_cursor(SyncCursor::at("3"));
        store.apply_incoming(remote("r-1", "2024-05-01T10:00:00Z"));

        let response = InboundMessage::SyncResponse {
            changes: vec![
                remote("r-1", "2024-05-01T10:00:00Z"),
                remote("r-2", "2024-05-01T11:00:00Z"),
                remote("r-0", "2024-05-01T09:00:00Z"),
            ],
            cursor: SyncCursor::at("9"),
        };
        let outcome = handler().handle(&mut store, response).await;

        assert_eq!(outcome.applied.len(), 2);
        assert_eq!(outcome.cursor, Some(SyncCursor::at("9")));
        assert_eq!(store.cursor(), &SyncCursor::at("9"));

        let ids: Vec<&str> = store.confirmed().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["r-2", "r-1", "r-0"]);
    }

    #[tokio::test]
    async fn test_error_frame_is_reported() {
        let mut store = ChangeStore::new();
        let outcome = handler()
            .handle(&mut store, InboundMessage::error("RATE_LIMIT", "slow down"))
            .await;

        assert!(!outcome.changed_store());
        assert_eq!(
            outcome.server_error.unwrap().to_string(),
            "Server error [RATE_LIMIT]: slow down"
        );
    }
}
