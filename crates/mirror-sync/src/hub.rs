//! # Relay Hub
//!
//! A small server-authoritative change log for development and end-to-end
//! tests. Speaks the same JSON frames as the transport.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Relay Hub (Axum)                               │
//! │                                                                         │
//! │  /ws endpoint ──▶ WebSocket upgrade ──▶ per-connection task            │
//! │  /health      ──▶ "OK"                                                 │
//! │                                                                         │
//! │  ┌──────────────────────── ChangeLog ─────────────────────────────┐    │
//! │  │  seq 1    seq 2    seq 3    ...                                │    │
//! │  │  [c-a]    [c-b]    [c-c]         ids deduplicated              │    │
//! │  └────────────────────────────────────────────────────────────────┘    │
//! │                                                                         │
//! │  Message Flow:                                                          │
//! │  ─────────────                                                          │
//! │  track_change { data }   → append if new, broadcast `change` to every  │
//! │                            OTHER connection                             │
//! │  sync_request { cursor } → sync_response { changes after cursor,       │
//! │                            cursor = latest seq }                        │
//! │  ping                    → pong                                        │
//! │  anything else           → error { code: "MALFORMED" }                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use mirror_core::{Change, SyncCursor};

use crate::error::{SyncError, SyncResult};
use crate::protocol::{InboundMessage, OutboundMessage};

// =============================================================================
// Constants
// =============================================================================

/// Default WebSocket port for the hub.
pub const DEFAULT_HUB_PORT: u16 = 8765;

/// Maximum message size (1MB).
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

// =============================================================================
// Hub Configuration
// =============================================================================

/// Configuration for the hub server.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Port to listen on (0 picks a free port).
    pub port: u16,
    /// Bind address.
    pub bind_addr: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            port: DEFAULT_HUB_PORT,
            bind_addr: "127.0.0.1".to_string(),
        }
    }
}

impl HubConfig {
    /// Returns the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// Change Log
// =============================================================================

/// Append-only log. A change's sequence number is its 1-based position.
#[derive(Debug, Default)]
pub struct ChangeLog {
    entries: Vec<Change>,
    ids: HashSet<String>,
}

impl ChangeLog {
    /// Appends unless the id was seen before.
    pub fn append(&mut self, change: Change) -> bool {
        if !self.ids.insert(change.id.clone()) {
            return false;
        }
        self.entries.push(change);
        true
    }

    /// Changes after `cursor` and the cursor for the latest entry. An
    /// unknown or unparsable cursor means everything.
    pub fn since(&self, cursor: &SyncCursor) -> (Vec<Change>, SyncCursor) {
        let from = cursor
            .as_str()
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0)
            .min(self.entries.len());

        (
            self.entries[from..].to_vec(),
            SyncCursor::at(self.entries.len().to_string()),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Hub State
// =============================================================================

/// A connected client.
#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub addr: SocketAddr,
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

/// Shared state for the hub server.
pub struct HubState {
    log: RwLock<ChangeLog>,
    clients: RwLock<HashMap<u64, ConnectedClient>>,
    /// (origin connection, change)
    broadcast_tx: broadcast::Sender<(u64, Change)>,
    next_client: AtomicU64,
}

impl HubState {
    fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(256);
        HubState {
            log: RwLock::new(ChangeLog::default()),
            clients: RwLock::new(HashMap::new()),
            broadcast_tx,
            next_client: AtomicU64::new(1),
        }
    }
}

// =============================================================================
// Hub Server
// =============================================================================

/// The relay server.
pub struct HubServer {
    config: HubConfig,
    state: Arc<HubState>,
}

/// Handle for controlling the hub server.
#[derive(Clone)]
pub struct HubHandle {
    state: Arc<HubState>,
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl HubHandle {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket endpoint clients should dial.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.local_addr)
    }

    pub async fn client_count(&self) -> usize {
        self.state.clients.read().await.len()
    }

    /// Number of distinct changes in the log.
    pub async fn change_count(&self) -> usize {
        self.state.log.read().await.len()
    }

    /// Shuts down the hub server.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Hub shutdown channel closed".into()))
    }
}

impl HubServer {
    pub fn new(config: HubConfig) -> Self {
        HubServer {
            config,
            state: Arc::new(HubState::new()),
        }
    }

    /// Binds and starts serving in the background.
    pub async fn start(self) -> SyncResult<HubHandle> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone());

        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            SyncError::ConnectionFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SyncError::ConnectionFailed(e.to_string()))?;

        info!(addr = %local_addr, "Hub server started");

        tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await;
                info!("Hub server shutting down");
            })
            .await;

            if let Err(e) = served {
                warn!(error = %e, "Hub server exited with error");
            }
        });

        Ok(HubHandle {
            state: self.state,
            local_addr,
            shutdown_tx,
        })
    }
}

// =============================================================================
// WebSocket Handler
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> impl IntoResponse {
    "OK"
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HubState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    debug!(addr = %addr, "New WebSocket connection");
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
}

/// Handles one client connection.
async fn handle_socket(socket: WebSocket, state: Arc<HubState>, addr: SocketAddr) {
    let client_id = state.next_client.fetch_add(1, Ordering::SeqCst);
    state.clients.write().await.insert(
        client_id,
        ConnectedClient {
            addr,
            connected_at: chrono::Utc::now(),
        },
    );
    info!(client_id, addr = %addr, "Client connected");

    let (mut sender, mut receiver) = socket.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(64);

    // Outgoing message task
    let outgoing_handle = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Broadcast forwarding task, skipping our own changes
    let mut broadcast_rx = state.broadcast_tx.subscribe();
    let forward_tx = outgoing_tx.clone();
    let broadcast_handle = tokio::spawn(async move {
        loop {
            match broadcast_rx.recv().await {
                Ok((origin, _)) if origin == client_id => continue,
                Ok((_, change)) => {
                    if send_frame(&forward_tx, &InboundMessage::change(change))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(client_id, skipped, "Broadcast receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Main receive loop
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                let reply = handle_client_frame(&state, client_id, text.as_str()).await;
                if let Some(reply) = reply {
                    if send_frame(&outgoing_tx, &reply).await.is_err() {
                        break;
                    }
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = outgoing_tx.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) => {
                debug!(client_id, "Client requested close");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(client_id, error = %e, "WebSocket error");
                break;
            }
            None => break,
        }
    }

    // Cleanup
    broadcast_handle.abort();
    outgoing_handle.abort();
    if state.clients.write().await.remove(&client_id).is_some() {
        info!(client_id, "Client disconnected");
    }
}

/// Applies one client frame; returns the direct reply, if any.
async fn handle_client_frame(
    state: &HubState,
    client_id: u64,
    text: &str,
) -> Option<InboundMessage> {
    let message = match OutboundMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(client_id, error = %e, "Invalid message format");
            return Some(InboundMessage::error("MALFORMED", e.to_string()));
        }
    };

    match message {
        OutboundMessage::TrackChange { data } => {
            let appended = state.log.write().await.append(data.clone());
            if appended {
                debug!(client_id, id = %data.id, "Change appended");
                let _ = state.broadcast_tx.send((client_id, data));
            } else {
                debug!(client_id, id = %data.id, "Duplicate change ignored");
            }
            None
        }
        OutboundMessage::SyncRequest { cursor } => {
            let (changes, cursor) = state.log.read().await.since(&cursor);
            debug!(client_id, count = changes.len(), %cursor, "Serving sync request");
            Some(InboundMessage::SyncResponse { changes, cursor })
        }
        OutboundMessage::Ping => Some(InboundMessage::Pong),
    }
}

async fn send_frame(tx: &mpsc::Sender<Message>, message: &InboundMessage) -> SyncResult<()> {
    let json = message.to_json()?;
    tx.send(Message::Text(json.into()))
        .await
        .map_err(|_| SyncError::ChannelError("Outgoing channel closed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synchronizer::{SynchronizerBuilder, SynchronizerConfig};
    use crate::testing::{eventually_async, eventually};
    use crate::transport::{Channel, Connector, Transport, TransportConfig};
    use crate::websocket::WsConnector;
    use mirror_core::{ChangeDraft, ChangeKind};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn change(id: &str) -> Change {
        ChangeDraft::new(ChangeKind::Create, "note", id).into_change_with(id, chrono::Utc::now())
    }

    async fn start_hub() -> HubHandle {
        HubServer::new(HubConfig {
            port: 0,
            bind_addr: "127.0.0.1".into(),
        })
        .start()
        .await
        .unwrap()
    }

    #[test]
    fn test_hub_config_default() {
        let config = HubConfig::default();
        assert_eq!(config.port, DEFAULT_HUB_PORT);
        assert_eq!(config.bind_address(), "127.0.0.1:8765");
    }

    #[test]
    fn test_change_log_cursor() {
        let mut log = ChangeLog::default();
        assert!(log.append(change("a")));
        assert!(log.append(change("b")));
        assert!(!log.append(change("a")));

        let (all, cursor) = log.since(&SyncCursor::Unknown);
        assert_eq!(all.len(), 2);
        assert_eq!(cursor, SyncCursor::at("2"));

        let (tail, _) = log.since(&SyncCursor::at("1"));
        assert_eq!(tail[0].id, "b");

        assert!(log.since(&SyncCursor::at("2")).0.is_empty());
        assert_eq!(log.since(&SyncCursor::at("garbage")).0.len(), 2);
        assert!(log.since(&SyncCursor::at("99")).0.is_empty());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let hub = start_hub().await;

        let mut stream = tokio::net::TcpStream::connect(hub.local_addr()).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("OK"));
        hub.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_protocol_over_websocket() {
        let hub = start_hub().await;
        let mut channel = WsConnector::new().connect(&hub.ws_url()).await.unwrap();

        let push = OutboundMessage::track_change(change("a")).to_json().unwrap();
        channel.send(push.clone()).await.unwrap();
        channel.send(push).await.unwrap();
        channel
            .send(OutboundMessage::sync_request(SyncCursor::Unknown).to_json().unwrap())
            .await
            .unwrap();

        let reply = InboundMessage::from_json(&channel.recv().await.unwrap().unwrap()).unwrap();
        match reply {
            InboundMessage::SyncResponse { changes, cursor } => {
                assert_eq!(changes.len(), 1);
                assert_eq!(cursor, SyncCursor::at("1"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        channel.send(OutboundMessage::Ping.to_json().unwrap()).await.unwrap();
        let pong = InboundMessage::from_json(&channel.recv().await.unwrap().unwrap()).unwrap();
        assert_eq!(pong, InboundMessage::Pong);

        channel.send("{\"type\":\"nope\"}".into()).await.unwrap();
        let err = InboundMessage::from_json(&channel.recv().await.unwrap().unwrap()).unwrap();
        assert!(matches!(err, InboundMessage::Error { ref code, .. } if code == "MALFORMED"));

        channel.close().await;
        hub.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_two_clients_converge_through_hub() {
        let hub = start_hub().await;

        let spawn_client = |name: &str| {
            let transport = Transport::spawn(
                TransportConfig {
                    url: hub.ws_url(),
                    ..Default::default()
                },
                WsConnector::new(),
            );
            let sync = SynchronizerBuilder::new(
                SynchronizerConfig {
                    actor_id: Some(name.to_string()),
                    ..Default::default()
                },
                transport.clone(),
            )
            .spawn();
            transport.open();
            (transport, sync)
        };

        let (transport_a, sync_a) = spawn_client("device-a");
        let (transport_b, sync_b) = spawn_client("device-b");
        eventually(|| transport_a.is_connected() && transport_b.is_connected()).await;
        eventually_async(|| async { hub.client_count().await == 2 }).await;

        let receipt = sync_a
            .track_change(
                ChangeDraft::new(ChangeKind::Update, "note", "n-1")
                    .field("body")
                    .new_value("hello"),
            )
            .await
            .unwrap();
        let confirmed = receipt.confirmed().await.unwrap();
        assert_eq!(confirmed.actor_id.as_deref(), Some("device-a"));

        eventually_async(|| async {
            sync_b
                .snapshot()
                .await
                .unwrap()
                .confirmed
                .iter()
                .any(|c| c.id == confirmed.id)
        })
        .await;

        let outcome = sync_b.sync_changes().await.unwrap();
        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.cursor, SyncCursor::at("1"));
        assert_eq!(hub.change_count().await, 1);

        transport_a.close();
        transport_b.close();
        hub.shutdown().await.unwrap();
    }
}
