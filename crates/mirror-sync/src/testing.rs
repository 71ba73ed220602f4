//! In-memory network and recording helpers for unit tests.

use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use mirror_core::{ChangeSnapshot, SyncCursor};

use crate::error::{SyncError, SyncResult};
use crate::notifier::{Notifier, StuckChange};
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::transport::{Channel, ConnectionState, Connector};

type Responder = Arc<dyn Fn(&OutboundMessage) -> Vec<InboundMessage> + Send + Sync>;

#[derive(Default)]
struct NetworkState {
    unreachable: bool,
    fail_sends: bool,
    connect_attempts: u32,
    next_id: u64,
    live: Option<(u64, mpsc::UnboundedSender<String>)>,
    sent: Vec<OutboundMessage>,
    responder: Option<Responder>,
}

/// A fake server with at most one live connection.
#[derive(Clone, Default)]
pub(crate) struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            state: Arc::clone(&self.state),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().unreachable = !reachable;
    }

    /// Makes every write on the live connection fail.
    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    /// Installs an automatic server reply for each client frame.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&OutboundMessage) -> Vec<InboundMessage> + Send + Sync + 'static,
    {
        self.state.lock().unwrap().responder = Some(Arc::new(responder));
    }

    /// Delivers a frame to the client. False when nobody is connected.
    pub fn push(&self, message: InboundMessage) -> bool {
        self.push_raw(&message.to_json().unwrap())
    }

    pub fn push_raw(&self, frame: &str) -> bool {
        match &self.state.lock().unwrap().live {
            Some((_, tx)) => tx.send(frame.to_string()).is_ok(),
            None => false,
        }
    }

    /// Severs the live connection from the server side.
    pub fn drop_connection(&self) {
        self.state.lock().unwrap().live = None;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().unwrap().connect_attempts
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Ids of every `track_change` frame, in send order.
    pub fn sent_change_ids(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|msg| match msg {
                OutboundMessage::TrackChange { data } => Some(data.id),
                _ => None,
            })
            .collect()
    }

    /// Cursors of every `sync_request` frame, in send order.
    pub fn sync_requests(&self) -> Vec<SyncCursor> {
        self.sent()
            .into_iter()
            .filter_map(|msg| match msg {
                OutboundMessage::SyncRequest { cursor } => Some(cursor),
                _ => None,
            })
            .collect()
    }
}

pub(crate) struct MemoryConnector {
    state: Arc<Mutex<NetworkState>>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _url: &str) -> SyncResult<Box<dyn Channel>> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts += 1;
        if state.unreachable {
            return Err(SyncError::ConnectionFailed("network unreachable".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.next_id += 1;
        let id = state.next_id;
        state.live = Some((id, tx));

        Ok(Box::new(MemoryChannel {
            id,
            inbox: rx,
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryChannel {
    id: u64,
    inbox: mpsc::UnboundedReceiver<String>,
    state: Arc<Mutex<NetworkState>>,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send(&mut self, text: String) -> SyncResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sends {
            return Err(SyncError::ConnectionFailed("write failed".into()));
        }

        let message = OutboundMessage::from_json(&text)?;
        let replies = match &state.responder {
            Some(responder) => responder(&message),
            None => Vec::new(),
        };
        state.sent.push(message);

        if let Some((id, tx)) = &state.live {
            if *id == self.id {
                for reply in replies {
                    let _ = tx.send(reply.to_json()?);
                }
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<SyncResult<String>> {
        self.inbox.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        if matches!(&state.live, Some((id, _)) if *id == self.id) {
            state.live = None;
        }
    }
}

/// Notifier that keeps everything it is told.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub snapshots: Mutex<Vec<ChangeSnapshot>>,
    pub statuses: Mutex<Vec<ConnectionState>>,
    pub stuck: Mutex<Vec<StuckChange>>,
    pub errors: Mutex<Vec<String>>,
}

impl Notifier for RecordingNotifier {
    fn on_snapshot(&self, snapshot: &ChangeSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }

    fn on_status(&self, state: ConnectionState) {
        self.statuses.lock().unwrap().push(state);
    }

    fn on_stuck(&self, stuck: &StuckChange) {
        self.stuck.lock().unwrap().push(stuck.clone());
    }

    fn on_error(&self, error: &SyncError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Polls `condition` every 50ms of (possibly paused) time.
pub(crate) async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met within 100s");
}

pub(crate) async fn eventually_async<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..2_000 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not met within 100s");
}
