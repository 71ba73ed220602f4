//! # Synchronizer
//!
//! Bridges the [`ChangeStore`] and the [`Transport`](crate::transport::Transport)
//! and owns every retry and reconciliation decision.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Synchronizer Actor                             │
//! │                                                                         │
//! │  SynchronizerHandle ──commands──►┌──────────────────────────────┐       │
//! │  (track, sync, retry,            │        Synchronizer          │       │
//! │   clear, status)                 │                              │       │
//! │                                  │   owns ChangeStore           │       │
//! │  Transport ─────events──────────►│   ┌──────────┐ ┌──────────┐  │       │
//! │  (on_message,                    │   │  Outbox  │ │ Inbound  │  │       │
//! │   on_status_change)              │   │Processor │ │ Handler  │  │       │
//! │                                  │   └──────────┘ └──────────┘  │       │
//! │  Timers ────────────────────────►│                              │       │
//! │  drain 5s · resync 60s ·         └──────┬──────────────┬────────┘       │
//! │  stale check 30s                        │              │                │
//! │                                         ▼              ▼                │
//! │                                 SyncPersistence     Notifier            │
//! │                                                                         │
//! │  ON CONNECTED: retry_failed() then sync_changes()                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every store mutation happens on the actor task, so the store needs no
//! locks. Transport failures never surface from `track_change`; they leave
//! the change pending until a later drain succeeds.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use mirror_core::validation::validate_draft;
use mirror_core::{Change, ChangeDraft, ChangeSnapshot, ChangeStore, SyncCursor};

use crate::error::{SyncError, SyncResult};
use crate::inbound::InboundHandler;
use crate::notifier::{Notifier, NoopNotifier, StuckChange};
use crate::outbox::OutboxProcessor;
use crate::persistence::{SyncPersistence, Volatile};
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::transport::{ConnectionState, TransportHandle};

// =============================================================================
// Configuration
// =============================================================================

/// Timing and identity settings for the synchronizer.
#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    /// Stamped on drafts that do not name an actor.
    pub actor_id: Option<String>,

    /// How often the pending queue is drained.
    pub drain_interval: Duration,

    /// How often a pull is issued while connected.
    pub resync_interval: Duration,

    /// Pending age at which a change is reported as stuck.
    pub stale_after: Duration,

    /// How often pending ages are checked.
    pub stale_check_interval: Duration,

    /// How long a pull may wait for its `sync_response`.
    pub sync_timeout: Duration,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        SynchronizerConfig {
            actor_id: None,
            drain_interval: Duration::from_secs(5),
            resync_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(5 * 60),
            stale_check_interval: Duration::from_secs(30),
            sync_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Status & Results
// =============================================================================

/// Current sync status (for UI display).
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub connection_state: ConnectionState,
    pub is_connected: bool,

    /// Consecutive failed connection cycles.
    pub transport_attempts: u32,

    pub pending_count: usize,
    pub confirmed_count: usize,

    /// Pending changes already reported as stuck.
    pub stuck_count: usize,

    pub cursor: SyncCursor,

    /// When the last `sync_response` was applied.
    pub last_sync: Option<DateTime<Utc>>,

    pub last_error: Option<String>,
}

/// Result of a completed pull.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// Changes that were new to the store.
    pub applied: usize,
    /// The cursor now stored.
    pub cursor: SyncCursor,
}

/// Receipt for a tracked change.
///
/// The change is already pending when this is returned; awaiting
/// [`TrackedChange::confirmed`] is optional.
#[derive(Debug)]
pub struct TrackedChange {
    change: Change,
    confirmation: oneshot::Receiver<SyncResult<Change>>,
}

impl TrackedChange {
    pub fn id(&self) -> &str {
        &self.change.id
    }

    pub fn change(&self) -> &Change {
        &self.change
    }

    /// Resolves when the change is confirmed. Fails with
    /// [`SyncError::Discarded`] if it was cleared or the synchronizer
    /// stopped first.
    pub async fn confirmed(self) -> SyncResult<Change> {
        self.confirmation
            .await
            .map_err(|_| SyncError::Discarded(self.change.id))?
    }
}

// =============================================================================
// Synchronizer Handle
// =============================================================================

enum Command {
    Track {
        change: Change,
        reply: oneshot::Sender<SyncResult<()>>,
        confirmation: oneshot::Sender<SyncResult<Change>>,
    },
    Sync {
        reply: oneshot::Sender<SyncResult<SyncOutcome>>,
    },
    RetryFailed {
        reply: oneshot::Sender<usize>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<ChangeSnapshot>,
    },
    Status {
        reply: oneshot::Sender<SyncStatus>,
    },
    Shutdown,
}

enum Event {
    Message(InboundMessage),
    Status(ConnectionState),
}

/// Handle for interacting with the synchronizer.
#[derive(Clone)]
pub struct SynchronizerHandle {
    commands: mpsc::UnboundedSender<Command>,
    actor_id: Option<String>,
}

impl SynchronizerHandle {
    /// Records a local change and tries to deliver it right away.
    ///
    /// Only an invalid draft is an error here. Delivery failures keep the
    /// change pending for the next drain.
    pub async fn track_change(&self, mut draft: ChangeDraft) -> SyncResult<TrackedChange> {
        validate_draft(&draft)?;

        if draft.actor_id.is_none() {
            draft.actor_id = self.actor_id.clone();
        }
        let change = draft.into_change();

        let (reply, reply_rx) = oneshot::channel();
        let (confirmation, confirmation_rx) = oneshot::channel();
        self.send(Command::Track {
            change: change.clone(),
            reply,
            confirmation,
        })?;
        reply_rx.await.map_err(|_| SyncError::ShuttingDown)??;

        Ok(TrackedChange {
            change,
            confirmation: confirmation_rx,
        })
    }

    /// Pulls everything after the stored cursor and waits for the reply.
    pub async fn sync_changes(&self) -> SyncResult<SyncOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Sync { reply })?;
        rx.await.map_err(|_| SyncError::ShuttingDown)?
    }

    /// Re-sends every pending change in FIFO order. Returns how many were
    /// confirmed.
    pub async fn retry_failed(&self) -> SyncResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RetryFailed { reply })?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    /// Empties both logs and forgets the cursor. The next pull is a full
    /// resync.
    pub async fn clear(&self) -> SyncResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Clear { reply })?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    pub async fn snapshot(&self) -> SyncResult<ChangeSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    pub async fn status(&self) -> SyncResult<SyncStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status { reply })?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    /// Stops the actor. Outstanding receipts resolve as discarded.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    fn send(&self, command: Command) -> SyncResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::ShuttingDown)
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for the synchronizer.
pub struct SynchronizerBuilder {
    config: SynchronizerConfig,
    transport: TransportHandle,
    persistence: Option<Arc<dyn SyncPersistence>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl SynchronizerBuilder {
    pub fn new(config: SynchronizerConfig, transport: TransportHandle) -> Self {
        SynchronizerBuilder {
            config,
            transport,
            persistence: None,
            notifier: None,
        }
    }

    /// Sets where store mutations are mirrored. Defaults to [`Volatile`].
    pub fn with_persistence(mut self, persistence: Arc<dyn SyncPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Sets the event sink. Defaults to [`NoopNotifier`].
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Spawns the actor and subscribes it to the transport.
    pub fn spawn(self) -> SynchronizerHandle {
        let persistence = self.persistence.unwrap_or_else(|| Arc::new(Volatile));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier));
        Synchronizer::spawn(self.config, self.transport, persistence, notifier)
    }
}

// =============================================================================
// Synchronizer Actor
// =============================================================================

/// The actor that owns the change store.
pub struct Synchronizer {
    config: SynchronizerConfig,
    store: ChangeStore,
    transport: TransportHandle,
    outbox: OutboxProcessor,
    inbound: InboundHandler,
    persistence: Arc<dyn SyncPersistence>,
    notifier: Arc<dyn Notifier>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<Event>,

    /// Confirmation senders keyed by change id.
    waiters: HashMap<String, oneshot::Sender<SyncResult<Change>>>,

    /// Callers waiting on the in-flight pull.
    sync_waiters: Vec<oneshot::Sender<SyncResult<SyncOutcome>>>,

    /// Set while a pull is in flight.
    sync_deadline: Option<Instant>,

    /// Replies still owed to pulls detached by `clear()`. Their cursor
    /// predates the clear, so they are dropped unread.
    stale_replies: usize,

    reported_stuck: HashSet<String>,
    last_sync: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl Synchronizer {
    pub fn spawn(
        config: SynchronizerConfig,
        transport: TransportHandle,
        persistence: Arc<dyn SyncPersistence>,
        notifier: Arc<dyn Notifier>,
    ) -> SynchronizerHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let messages = events_tx.clone();
        transport.on_message(move |message| {
            let _ = messages.send(Event::Message(message));
        });
        transport.on_status_change(move |state| {
            let _ = events_tx.send(Event::Status(state));
        });

        let handle = SynchronizerHandle {
            commands: commands_tx,
            actor_id: config.actor_id.clone(),
        };

        let synchronizer = Synchronizer {
            store: ChangeStore::new(),
            outbox: OutboxProcessor::new(transport.clone(), Arc::clone(&persistence)),
            inbound: InboundHandler::new(Arc::clone(&persistence)),
            config,
            transport,
            persistence,
            notifier,
            commands: commands_rx,
            events: events_rx,
            waiters: HashMap::new(),
            sync_waiters: Vec::new(),
            sync_deadline: None,
            stale_replies: 0,
            reported_stuck: HashSet::new(),
            last_sync: None,
            last_error: None,
        };

        tokio::spawn(synchronizer.run());

        handle
    }

    /// Main actor loop.
    async fn run(mut self) {
        match self.persistence.load().await {
            Ok(state) => self.store = ChangeStore::restore(state),
            Err(e) => error!(error = %e, "Failed to load persisted state, starting empty"),
        }

        info!(
            pending = self.store.pending_len(),
            confirmed = self.store.confirmed_len(),
            cursor = %self.store.cursor(),
            "Synchronizer starting"
        );
        self.publish_snapshot();

        let mut drain = every(self.config.drain_interval);
        let mut resync = every(self.config.resync_interval);
        let mut stale = every(self.config.stale_check_interval);

        if self.transport.is_connected() {
            self.on_connected().await;
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },

                Some(event) = self.events.recv() => self.handle_event(event).await,

                _ = drain.tick() => {
                    self.drain().await;
                }

                _ = resync.tick() => self.scheduled_sync().await,

                _ = stale.tick() => self.check_stale(),

                _ = sleep_until(self.sync_deadline.unwrap_or_else(Instant::now)),
                    if self.sync_deadline.is_some() =>
                {
                    warn!(timeout = ?self.config.sync_timeout, "Sync response timed out");
                    self.fail_sync("no sync_response before timeout".into());
                }
            }
        }

        for (id, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(SyncError::Discarded(id)));
        }
        for waiter in self.sync_waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::ShuttingDown));
        }
        info!("Synchronizer stopped");
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Track {
                change,
                reply,
                confirmation,
            } => self.track(change, reply, confirmation).await,

            Command::Sync { reply } => {
                self.sync_waiters.push(reply);
                self.request_sync().await;
            }

            Command::RetryFailed { reply } => {
                let confirmed = self.drain().await;
                let _ = reply.send(confirmed);
            }

            Command::Clear { reply } => {
                self.clear().await;
                let _ = reply.send(());
            }

            Command::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
            }

            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }

            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    async fn track(
        &mut self,
        change: Change,
        reply: oneshot::Sender<SyncResult<()>>,
        confirmation: oneshot::Sender<SyncResult<Change>>,
    ) {
        let id = change.id.clone();
        if let Err(e) = self.store.enqueue_pending(change) {
            let _ = reply.send(Err(e.into()));
            return;
        }

        if let Some(entry) = self.store.pending_entry(&id).cloned() {
            if let Err(e) = self.persistence.save_pending(&entry).await {
                error!(%id, error = %e, "Failed to persist pending change");
            }
        }

        self.waiters.insert(id.clone(), confirmation);
        let _ = reply.send(Ok(()));

        debug!(%id, pending = self.store.pending_len(), "Tracked change");
        self.publish_snapshot();

        self.drain().await;
    }

    async fn clear(&mut self) {
        if self.sync_deadline.take().is_some() {
            self.stale_replies += 1;
            for waiter in self.sync_waiters.drain(..) {
                let _ = waiter.send(Err(SyncError::SyncFailed(
                    "local state cleared before sync_response".into(),
                )));
            }
        }

        self.store.clear();
        if let Err(e) = self.persistence.clear().await {
            error!(error = %e, "Failed to clear persisted state");
        }

        for (id, waiter) in self.waiters.drain() {
            let _ = waiter.send(Err(SyncError::Discarded(id)));
        }
        self.reported_stuck.clear();

        info!("Cleared local change logs");
        self.publish_snapshot();
    }

    fn status(&self) -> SyncStatus {
        let connection_state = self.transport.state();
        SyncStatus {
            connection_state,
            is_connected: connection_state.is_connected(),
            transport_attempts: self.transport.attempts(),
            pending_count: self.store.pending_len(),
            confirmed_count: self.store.confirmed_len(),
            stuck_count: self.reported_stuck.len(),
            cursor: self.store.cursor().clone(),
            last_sync: self.last_sync,
            last_error: self.last_error.clone(),
        }
    }

    // =========================================================================
    // Transport Events
    // =========================================================================

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Message(message) => self.handle_message(message).await,
            Event::Status(state) => {
                self.notifier.on_status(state);
                match state {
                    ConnectionState::Connected => self.on_connected().await,
                    ConnectionState::Disconnected | ConnectionState::Closed => {
                        self.stale_replies = 0;
                        if self.sync_deadline.is_some() {
                            self.fail_sync("connection lost before sync_response".into());
                        }
                    }
                    ConnectionState::Connecting => {}
                }
            }
        }
    }

    async fn handle_message(&mut self, message: InboundMessage) {
        if self.stale_replies > 0 && matches!(message, InboundMessage::SyncResponse { .. }) {
            self.stale_replies -= 1;
            debug!("Dropping sync_response to a pull issued before clear");
            return;
        }

        let outcome = self.inbound.handle(&mut self.store, message).await;

        for change in &outcome.applied {
            if outcome.promoted.contains(&change.id) {
                self.resolve(change);
            }
        }

        if let Some(err) = &outcome.server_error {
            self.last_error = Some(err.to_string());
            self.notifier.on_error(err);
        }

        if let Some(cursor) = outcome.cursor.clone() {
            self.sync_deadline = None;
            self.last_sync = Some(Utc::now());
            let applied = outcome.applied.len();
            for waiter in self.sync_waiters.drain(..) {
                let _ = waiter.send(Ok(SyncOutcome {
                    applied,
                    cursor: cursor.clone(),
                }));
            }
        }

        if outcome.changed_store() {
            self.publish_snapshot();
        }
    }

    async fn on_connected(&mut self) {
        info!(pending = self.store.pending_len(), "Connected, reconciling");
        self.drain().await;
        self.request_sync().await;
    }

    // =========================================================================
    // Delivery & Reconciliation
    // =========================================================================

    /// One outbox pass. Returns how many changes were confirmed.
    async fn drain(&mut self) -> usize {
        let report = self.outbox.drain(&mut self.store).await;

        for change in &report.confirmed {
            self.resolve(change);
        }

        if let Some((_, err)) = &report.failure {
            self.last_error = Some(err.to_string());
            self.notifier.on_error(err);
        }

        if !report.confirmed.is_empty() {
            self.publish_snapshot();
        }

        report.confirmed.len()
    }

    async fn scheduled_sync(&mut self) {
        if !self.transport.is_connected() {
            debug!("Not connected, skipping scheduled sync");
            return;
        }
        self.request_sync().await;
    }

    /// Sends a pull unless one is already in flight.
    async fn request_sync(&mut self) {
        if self.sync_deadline.is_some() {
            debug!("Sync already in flight");
            return;
        }

        let cursor = self.store.cursor().clone();
        match self
            .transport
            .send(OutboundMessage::sync_request(cursor.clone()))
            .await
        {
            Ok(()) => {
                debug!(%cursor, "Sync requested");
                self.sync_deadline = Some(Instant::now() + self.config.sync_timeout);
            }
            Err(e) => self.fail_sync(format!("request not sent: {}", e)),
        }
    }

    fn fail_sync(&mut self, reason: String) {
        self.sync_deadline = None;
        // Replies the server has not sent by now never will.
        self.stale_replies = 0;

        let err = SyncError::SyncFailed(reason.clone());
        self.last_error = Some(err.to_string());
        self.notifier.on_error(&err);

        for waiter in self.sync_waiters.drain(..) {
            let _ = waiter.send(Err(SyncError::SyncFailed(reason.clone())));
        }
    }

    /// Reports pending changes older than the threshold, once each.
    fn check_stale(&mut self) {
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::weeks(52));

        let store = &self.store;
        self.reported_stuck.retain(|id| store.is_pending(id));

        let fresh: Vec<StuckChange> = self
            .store
            .stale_pending(now, threshold)
            .filter(|entry| !self.reported_stuck.contains(entry.id()))
            .map(|entry| StuckChange::from_pending(entry, now))
            .collect();

        for stuck in fresh {
            warn!(
                id = %stuck.id,
                pending_secs = stuck.pending_for.as_secs(),
                attempts = stuck.attempts,
                "Change is stuck"
            );
            self.reported_stuck.insert(stuck.id.clone());
            self.notifier.on_stuck(&stuck);
        }
    }

    fn resolve(&mut self, change: &Change) {
        if let Some(waiter) = self.waiters.remove(&change.id) {
            let _ = waiter.send(Ok(change.clone()));
        }
    }

    fn publish_snapshot(&self) {
        self.notifier.on_snapshot(&self.store.snapshot());
    }
}

/// Interval whose first tick is one period from now.
fn every(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eventually, eventually_async, MemoryNetwork, RecordingNotifier};
    use crate::transport::{Transport, TransportConfig};
    use mirror_core::ChangeKind;
    use tokio::time::sleep;

    struct Harness {
        network: MemoryNetwork,
        transport: TransportHandle,
        sync: SynchronizerHandle,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness(config: SynchronizerConfig) -> Harness {
        let network = MemoryNetwork::new();
        let transport = Transport::spawn(TransportConfig::default(), network.connector());
        let notifier = Arc::new(RecordingNotifier::default());
        let sync = SynchronizerBuilder::new(config, transport.clone())
            .with_notifier(notifier.clone())
            .spawn();

        Harness {
            network,
            transport,
            sync,
            notifier,
        }
    }

    fn draft(entity_id: &str) -> ChangeDraft {
        ChangeDraft::new(ChangeKind::Update, "task", entity_id)
            .field("status")
            .new_value("done")
    }

    fn remote(id: &str) -> Change {
        ChangeDraft::new(ChangeKind::Create, "task", "remote")
            .actor("other-device")
            .into_change_with(id, Utc::now())
    }

    /// Answers pulls like a server holding `log`: everything after the
    /// cursor, with the log length as the new cursor.
    fn serve_log(network: &MemoryNetwork, log: Vec<Change>) {
        network.respond_with(move |msg| match msg {
            OutboundMessage::SyncRequest { cursor } => {
                let from = cursor
                    .as_str()
                    .and_then(|c| c.parse::<usize>().ok())
                    .unwrap_or(0)
                    .min(log.len());
                vec![InboundMessage::SyncResponse {
                    changes: log[from..].to_vec(),
                    cursor: SyncCursor::at(log.len().to_string()),
                }]
            }
            _ => Vec::new(),
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_changes_delivered_in_order_on_connect() {
        let h = harness(SynchronizerConfig::default());
        serve_log(&h.network, Vec::new());

        let mut tracked = Vec::new();
        for entity in ["a", "b", "c"] {
            tracked.push(h.sync.track_change(draft(entity)).await.unwrap());
        }

        let snapshot = h.sync.snapshot().await.unwrap();
        assert_eq!(snapshot.pending.len(), 3);
        assert!(snapshot.confirmed.is_empty());
        assert!(h.network.sent_change_ids().is_empty());

        h.transport.open();
        eventually_async(|| async { h.sync.snapshot().await.unwrap().pending.is_empty() }).await;

        let ids: Vec<String> = tracked.iter().map(|t| t.id().to_string()).collect();
        assert_eq!(h.network.sent_change_ids(), ids);

        let snapshot = h.sync.snapshot().await.unwrap();
        assert_eq!(snapshot.confirmed.len(), 3);

        for receipt in tracked {
            let id = receipt.id().to_string();
            assert_eq!(receipt.confirmed().await.unwrap().id, id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_while_connected_confirms_immediately() {
        let config = SynchronizerConfig {
            actor_id: Some("device-1".into()),
            ..Default::default()
        };
        let h = harness(config);
        h.transport.open();
        eventually(|| h.transport.is_connected()).await;

        let receipt = h.sync.track_change(draft("a")).await.unwrap();
        let confirmed = receipt.confirmed().await.unwrap();

        assert_eq!(confirmed.actor_id.as_deref(), Some("device-1"));
        let status = h.sync.status().await.unwrap();
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.confirmed_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_draft_is_rejected() {
        let h = harness(SynchronizerConfig::default());

        let err = h
            .sync
            .track_change(ChangeDraft::new(ChangeKind::Create, "task", " "))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Core(_)));
        assert_eq!(h.sync.status().await.unwrap().pending_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_is_retried_after_reconnect() {
        let h = harness(SynchronizerConfig::default());
        h.transport.open();
        eventually(|| h.transport.is_connected()).await;

        h.network.fail_sends(true);
        let receipt = h.sync.track_change(draft("a")).await.unwrap();

        eventually_async(|| async {
            h.sync.status().await.unwrap().last_error.is_some()
        })
        .await;
        assert_eq!(h.sync.status().await.unwrap().pending_count, 1);

        h.network.fail_sends(false);
        let confirmed = receipt.confirmed().await.unwrap();

        assert_eq!(h.network.sent_change_ids(), vec![confirmed.id]);
        assert!(h.network.connect_attempts() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_changes_are_deduplicated() {
        let h = harness(SynchronizerConfig::default());
        h.transport.open();
        eventually(|| h.transport.is_connected()).await;

        let change = remote("x");
        h.network.push(InboundMessage::change(change.clone()));
        h.network.push(InboundMessage::change(change));

        eventually_async(|| async { h.sync.snapshot().await.unwrap().confirmed.len() == 1 }).await;
        sleep(Duration::from_secs(1)).await;

        let snapshot = h.sync.snapshot().await.unwrap();
        assert_eq!(snapshot.confirmed.len(), 1);
        assert_eq!(snapshot.confirmed[0].id, "x");
        assert!(h
            .notifier
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.confirmed.len() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_uses_and_advances_cursor() {
        let h = harness(SynchronizerConfig::default());
        serve_log(&h.network, vec![remote("r-1"), remote("r-2")]);

        h.transport.open();
        eventually_async(|| async { h.sync.status().await.unwrap().last_sync.is_some() }).await;

        let status = h.sync.status().await.unwrap();
        assert_eq!(status.confirmed_count, 2);
        assert_eq!(status.cursor, SyncCursor::at("2"));

        let outcome = h.sync.sync_changes().await.unwrap();
        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.cursor, SyncCursor::at("2"));
        assert_eq!(
            h.network.sync_requests(),
            vec![SyncCursor::Unknown, SyncCursor::at("2")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_fails_while_disconnected() {
        let h = harness(SynchronizerConfig::default());

        let err = h.sync.sync_changes().await.unwrap_err();
        assert!(matches!(err, SyncError::SyncFailed(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_times_out_without_response() {
        let h = harness(SynchronizerConfig::default());
        h.transport.open();
        eventually(|| h.transport.is_connected()).await;

        let started = Instant::now();
        let err = h.sync.sync_changes().await.unwrap_err();

        assert!(matches!(err, SyncError::SyncFailed(_)));
        assert!(started.elapsed() <= Duration::from_secs(30));
        assert!(!h.notifier.errors.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_forces_full_resync() {
        let h = harness(SynchronizerConfig::default());
        serve_log(&h.network, vec![remote("r-1")]);

        let receipt = h.sync.track_change(draft("a")).await.unwrap();
        h.sync.clear().await.unwrap();
        assert!(matches!(
            receipt.confirmed().await,
            Err(SyncError::Discarded(_))
        ));

        h.transport.open();
        eventually_async(|| async { h.sync.status().await.unwrap().cursor == SyncCursor::at("1") })
            .await;

        h.sync.clear().await.unwrap();
        let status = h.sync.status().await.unwrap();
        assert!(status.cursor.is_unknown());
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.confirmed_count, 0);

        let outcome = h.sync.sync_changes().await.unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(h.network.sync_requests().last(), Some(&SyncCursor::Unknown));
        assert!(h.network.sent_change_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_pull_ignores_its_reply() {
        let h = harness(SynchronizerConfig::default());
        serve_log(&h.network, vec![remote("r-1")]);

        h.transport.open();
        eventually_async(|| async { h.sync.status().await.unwrap().cursor == SyncCursor::at("1") })
            .await;

        // Server goes quiet; replies are pushed by hand below.
        h.network.respond_with(|_| Vec::new());

        let sync = h.sync.clone();
        let before_clear = tokio::spawn(async move { sync.sync_changes().await });
        eventually(|| h.network.sync_requests().len() == 2).await;

        h.sync.clear().await.unwrap();
        assert!(matches!(
            before_clear.await.unwrap(),
            Err(SyncError::SyncFailed(_))
        ));

        let sync = h.sync.clone();
        let after_clear = tokio::spawn(async move { sync.sync_changes().await });
        eventually(|| h.network.sync_requests().len() == 3).await;
        assert_eq!(
            h.network.sync_requests(),
            vec![SyncCursor::Unknown, SyncCursor::at("1"), SyncCursor::Unknown]
        );

        // Reply to the pre-clear pull arrives first and must not land.
        h.network.push(InboundMessage::SyncResponse {
            changes: Vec::new(),
            cursor: SyncCursor::at("1"),
        });
        h.network.push(InboundMessage::SyncResponse {
            changes: vec![remote("r-1")],
            cursor: SyncCursor::at("1"),
        });

        let outcome = after_clear.await.unwrap().unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.cursor, SyncCursor::at("1"));

        let status = h.sync.status().await.unwrap();
        assert_eq!(status.confirmed_count, 1);
        assert_eq!(status.cursor, SyncCursor::at("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_change_reported_once() {
        let config = SynchronizerConfig {
            stale_after: Duration::ZERO,
            ..Default::default()
        };
        let h = harness(config);

        let receipt = h.sync.track_change(draft("a")).await.unwrap();
        sleep(Duration::from_secs(31)).await;

        {
            let stuck = h.notifier.stuck.lock().unwrap();
            assert_eq!(stuck.len(), 1);
            assert_eq!(stuck[0].id, receipt.id());
        }

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.notifier.stuck.lock().unwrap().len(), 1);

        let status = h.sync.status().await.unwrap();
        assert_eq!(status.stuck_count, 1);
        assert_eq!(status.pending_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_is_surfaced() {
        let h = harness(SynchronizerConfig::default());
        h.transport.open();
        eventually(|| h.transport.is_connected()).await;

        h.network.push(InboundMessage::error("FORBIDDEN", "read only"));

        eventually(|| !h.notifier.errors.lock().unwrap().is_empty()).await;
        let status = h.sync.status().await.unwrap();
        assert_eq!(
            status.last_error.as_deref(),
            Some("Server error [FORBIDDEN]: read only")
        );
        assert!(status.is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_changes_reach_notifier() {
        let h = harness(SynchronizerConfig::default());
        h.transport.open();
        eventually(|| h.transport.is_connected()).await;
        h.transport.close();

        eventually(|| {
            h.notifier.statuses.lock().unwrap().last() == Some(&ConnectionState::Closed)
        })
        .await;
        assert_eq!(
            *h.notifier.statuses.lock().unwrap(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Closed
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_receipts() {
        let h = harness(SynchronizerConfig::default());
        let receipt = h.sync.track_change(draft("a")).await.unwrap();

        h.sync.shutdown();

        assert!(matches!(
            receipt.confirmed().await,
            Err(SyncError::Discarded(_))
        ));
        assert!(matches!(
            h.sync.status().await,
            Err(SyncError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_restores_and_persists_with_database() {
        use mirror_core::PendingChange;
        use mirror_db::{Database, DbConfig};

        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let earlier = draft("from-last-run").into_change();
        db.changes()
            .enqueue_pending(&PendingChange::new(earlier.clone(), Utc::now()))
            .await
            .unwrap();

        let network = MemoryNetwork::new();
        let transport = Transport::spawn(TransportConfig::default(), network.connector());
        let sync = SynchronizerBuilder::new(SynchronizerConfig::default(), transport.clone())
            .with_persistence(Arc::new(db.clone()))
            .spawn();

        let snapshot = sync.snapshot().await.unwrap();
        assert_eq!(snapshot.pending, vec![earlier.clone()]);

        transport.open();
        eventually_async(|| async { sync.status().await.unwrap().pending_count == 0 }).await;

        assert_eq!(network.sent_change_ids(), vec![earlier.id.clone()]);
        assert_eq!(db.changes().count_pending().await.unwrap(), 0);
        assert_eq!(db.changes().count_confirmed().await.unwrap(), 1);
    }
}
