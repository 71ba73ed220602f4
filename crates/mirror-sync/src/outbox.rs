//! # Outbox Processor
//!
//! Delivers the pending queue to the server.
//!
//! ## Drain Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Outbox Drain (FIFO)                               │
//! │                                                                         │
//! │  pending queue:  [ c1 ]──[ c2 ]──[ c3 ]                                 │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │  1. Send: Transport.send(track_change { data: c1 })                    │
//! │                                                                         │
//! │  2. Ok  → ChangeStore.confirm(c1), persist, next entry                 │
//! │                                                                         │
//! │  3. Err → record_failure(c1) and STOP. c2 and c3 are not sent, so      │
//! │           the server never sees them ahead of c1.                      │
//! │                                                                         │
//! │  TRIGGERS:                                                             │
//! │  • track_change (immediate delivery)                                   │
//! │  • drain interval (5s default)                                         │
//! │  • every transition to CONNECTED                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A successful transport write counts as acknowledgement; the protocol has
//! no per-change ack.

use std::sync::Arc;
use tracing::{debug, info, warn};

use mirror_core::{Change, ChangeStore};

use crate::error::SyncError;
use crate::persistence::SyncPersistence;
use crate::protocol::OutboundMessage;
use crate::transport::TransportHandle;

/// Outcome of one drain pass.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Changes confirmed in this pass, in send order.
    pub confirmed: Vec<Change>,

    /// The entry that stopped the pass, with its error.
    pub failure: Option<(String, SyncError)>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failure.is_none()
    }
}

/// Sends pending changes in FIFO order.
pub struct OutboxProcessor {
    transport: TransportHandle,
    persistence: Arc<dyn SyncPersistence>,
}

impl OutboxProcessor {
    pub fn new(transport: TransportHandle, persistence: Arc<dyn SyncPersistence>) -> Self {
        OutboxProcessor {
            transport,
            persistence,
        }
    }

    /// Drains the pending queue until it is empty or a send fails.
    ///
    /// Skips entirely while the transport is not connected; offline time
    /// does not count against a change's attempt counter.
    pub async fn drain(&self, store: &mut ChangeStore) -> DrainReport {
        let mut report = DrainReport::default();

        if store.pending_len() == 0 {
            return report;
        }
        if !self.transport.is_connected() {
            debug!(pending = store.pending_len(), "Not connected, skipping drain");
            return report;
        }

        let queue: Vec<Change> = store.pending().map(|p| p.change.clone()).collect();
        for change in queue {
            let id = change.id.clone();

            match self.transport.send(OutboundMessage::track_change(change)).await {
                Ok(()) => {
                    if let Some(confirmed) = store.confirm(&id) {
                        if let Err(e) = self.persistence.save_confirmed(&confirmed).await {
                            warn!(%id, error = %e, "Failed to persist confirmation");
                        }
                        report.confirmed.push(confirmed);
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    store.record_failure(&id, message.as_str());
                    if let Err(persist_err) = self.persistence.record_failure(&id, &message).await {
                        warn!(%id, error = %persist_err, "Failed to persist attempt");
                    }

                    warn!(%id, error = %e, "Delivery failed, stopping drain");
                    report.failure = Some((id, e));
                    break;
                }
            }
        }

        if !report.confirmed.is_empty() {
            info!(
                confirmed = report.confirmed.len(),
                remaining = store.pending_len(),
                "Delivered pending changes"
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::Volatile;
    use crate::testing::{eventually, MemoryNetwork};
    use crate::transport::{Transport, TransportConfig};
    use mirror_core::{ChangeDraft, ChangeKind};

    fn change(entity_id: &str) -> Change {
        ChangeDraft::new(ChangeKind::Create, "task", entity_id).into_change()
    }

    async fn connected(network: &MemoryNetwork) -> TransportHandle {
        let transport = Transport::spawn(TransportConfig::default(), network.connector());
        transport.open();
        eventually(|| transport.is_connected()).await;
        transport
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_sends_in_fifo_order() {
        let network = MemoryNetwork::new();
        let outbox = OutboxProcessor::new(connected(&network).await, Arc::new(Volatile));

        let mut store = ChangeStore::new();
        let changes = vec![change("a"), change("b"), change("c")];
        for c in &changes {
            store.enqueue_pending(c.clone()).unwrap();
        }

        let report = outbox.drain(&mut store).await;

        assert!(report.is_clean());
        assert_eq!(report.confirmed.len(), 3);
        assert_eq!(store.pending_len(), 0);
        assert_eq!(
            network.sent_change_ids(),
            changes.iter().map(|c| c.id.clone()).collect::<Vec<_>>()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_stops_at_first_failure() {
        let network = MemoryNetwork::new();
        let outbox = OutboxProcessor::new(connected(&network).await, Arc::new(Volatile));

        let mut store = ChangeStore::new();
        let first = change("a");
        store.enqueue_pending(first.clone()).unwrap();
        store.enqueue_pending(change("b")).unwrap();

        network.fail_sends(true);
        let report = outbox.drain(&mut store).await;

        let (failed_id, _) = report.failure.unwrap();
        assert_eq!(failed_id, first.id);
        assert!(report.confirmed.is_empty());
        assert_eq!(store.pending_len(), 2);
        assert_eq!(store.pending_entry(&first.id).unwrap().attempts, 1);
        assert!(network.sent_change_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_skips_while_offline() {
        let network = MemoryNetwork::new();
        let transport = Transport::spawn(TransportConfig::default(), network.connector());
        let outbox = OutboxProcessor::new(transport, Arc::new(Volatile));

        let mut store = ChangeStore::new();
        let pending = change("a");
        store.enqueue_pending(pending.clone()).unwrap();

        let report = outbox.drain(&mut store).await;

        assert!(report.is_clean());
        assert_eq!(store.pending_entry(&pending.id).unwrap().attempts, 0);
    }
}
