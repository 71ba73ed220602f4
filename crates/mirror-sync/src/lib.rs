//! # mirror-sync: Sync Engine for Mirror
//!
//! Keeps a local [`ChangeStore`](mirror_core::ChangeStore) converged with a
//! server-authoritative change log over an unreliable connection.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  Synchronizer (single-owner actor)               │  │
//! │  │                                                                  │  │
//! │  │  track_change · sync_changes · retry_failed · clear · status    │  │
//! │  └───────┬──────────────────────┬──────────────────────┬───────────┘  │
//! │          ▼                      ▼                      ▼               │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌──────────────────────┐ │
//! │  │ OutboxProcessor│  │    Transport       │  │  InboundHandler      │ │
//! │  │                │  │                    │  │                      │ │
//! │  │ FIFO delivery  │  │ Reconnect/backoff  │  │ change, sync_response│ │
//! │  │ of pending     │  │ heartbeat, status  │  │ dedup by id          │ │
//! │  └────────────────┘  └─────────┬──────────┘  └──────────────────────┘ │
//! │                                │ Connector                             │
//! │                                ▼                                       │
//! │                        WsConnector (tokio-tungstenite)                 │
//! │                                                                         │
//! │  SIDE CHANNELS:                                                        │
//! │  • SyncPersistence - Volatile or mirror_db::Database                   │
//! │  • Notifier        - snapshots, status, stuck changes, errors          │
//! │  • HubServer       - reference relay for development and tests         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - TOML + env configuration
//! - [`error`] - Sync error types
//! - [`protocol`] - Wire messages
//! - [`transport`] - Connection state machine with reconnection
//! - [`websocket`] - WebSocket [`Connector`](transport::Connector)
//! - [`outbox`] - Pending queue delivery
//! - [`inbound`] - Server frame handling
//! - [`synchronizer`] - The actor tying it together
//! - [`persistence`] - Storage hooks
//! - [`notifier`] - Event hooks
//! - [`hub`] - Reference relay server
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mirror_core::{ChangeDraft, ChangeKind};
//! use mirror_sync::{SyncConfig, SynchronizerBuilder, Transport, TracingNotifier, WsConnector};
//!
//! let config = SyncConfig::load_or_default(None);
//! let transport = Transport::spawn(config.transport_config(), WsConnector::new());
//! let sync = SynchronizerBuilder::new(config.synchronizer_config(), transport.clone())
//!     .with_notifier(Arc::new(TracingNotifier))
//!     .spawn();
//! transport.open();
//!
//! let receipt = sync
//!     .track_change(ChangeDraft::new(ChangeKind::Update, "task", "t-1").field("done").new_value(true))
//!     .await?;
//! receipt.confirmed().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod hub;
pub mod inbound;
pub mod notifier;
pub mod outbox;
pub mod persistence;
pub mod protocol;
pub mod synchronizer;
pub mod transport;
pub mod websocket;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use hub::{HubConfig, HubHandle, HubServer};
pub use notifier::{NoopNotifier, Notifier, StuckChange, TracingNotifier};
pub use persistence::{SyncPersistence, Volatile};
pub use protocol::{InboundMessage, OutboundMessage};
pub use synchronizer::{
    SyncOutcome, SyncStatus, Synchronizer, SynchronizerBuilder, SynchronizerConfig,
    SynchronizerHandle, TrackedChange,
};
pub use transport::{ConnectionState, Transport, TransportConfig, TransportHandle};
pub use websocket::WsConnector;
