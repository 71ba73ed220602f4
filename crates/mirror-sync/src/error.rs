//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  NotConnected   │  │  MalformedMessage       │ │
//! │  │  MissingDeviceId│  │  Connection     │  │  SerializationFailed    │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  ServerError            │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Sync cycle    │  │    Storage      │  │      Lifecycle          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  SyncFailed     │  │  DatabaseError  │  │  Closed / Discarded     │ │
//! │  │  StuckChange    │  │                 │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Nothing here is fatal to the process. Transport and sync-cycle        │
//! │  errors degrade the engine to "offline" until the next reconnect.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use mirror_core::{CoreError, ValidationError};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID (used as the default actor id).
    #[error("Device ID not configured. Run `mirror-agent init-config` first.")]
    MissingDeviceId,

    /// Invalid server URL.
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// A send was attempted while the transport is not CONNECTED.
    #[error("Not connected to sync server")]
    NotConnected,

    /// Failed to establish the physical connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection dropped.
    #[error("Disconnected from sync server")]
    Disconnected,

    /// Connection timeout.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// The transport was closed by its owner; it will not reconnect.
    #[error("Transport is closed")]
    Closed,

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// An inbound frame was unparseable or of unknown type.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Failed to serialize an outbound message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// The server answered with an `error` frame.
    #[error("Server error [{code}]: {message}")]
    ServerError { code: String, message: String },

    // =========================================================================
    // Sync Cycle Errors
    // =========================================================================
    /// A pull did not complete. Retried on the next interval or connect.
    #[error("Sync failed: {0}")]
    SyncFailed(String),

    /// A change has been pending longer than the staleness threshold.
    #[error("Change {id} pending for {pending_secs}s after {attempts} failed attempts")]
    StuckChange {
        id: String,
        pending_secs: i64,
        attempts: u32,
    },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Persistence failed. The in-memory store stays authoritative.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// Change store rule violation or invalid draft.
    #[error(transparent)]
    Core(#[from] CoreError),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    /// A tracked change was dropped by `clear()` before it was confirmed.
    #[error("Change {0} was discarded before confirmation")]
    Discarded(String),

    /// Synchronizer is shutting down.
    #[error("Synchronizer is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Core(CoreError::Validation(err))
    }
}

impl From<mirror_db::DbError> for SyncError {
    fn from(err: mirror_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the engine recovers from this error on its own.
    ///
    /// ## Retryable Errors
    /// - Not connected / connection failures / timeouts
    /// - Failed sync cycles
    /// - Stuck changes (they stay queued)
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Invalid drafts
    /// - Closed transport, shutdown
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::NotConnected
                | SyncError::ConnectionFailed(_)
                | SyncError::Disconnected
                | SyncError::Timeout(_)
                | SyncError::WebSocketError(_)
                | SyncError::SyncFailed(_)
                | SyncError::StuckChange { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if this error indicates a protocol mismatch.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            SyncError::MalformedMessage(_) | SyncError::SerializationFailed(_)
        )
    }
}
