//! # Sync Protocol Messages
//!
//! JSON frames exchanged with the sync server.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Sync Protocol Messages                             │
//! │                                                                         │
//! │  PUSH (client → server)                                                │
//! │  ──────────────────────                                                │
//! │  CLIENT ───► track_change { data: Change }                             │
//! │                                                                         │
//! │  PULL                                                                  │
//! │  ────                                                                  │
//! │  CLIENT ───► sync_request { cursor: null | "token" }                   │
//! │  SERVER ───► sync_response { changes: [Change], cursor }               │
//! │                                                                         │
//! │  LIVE FEED (server → client)                                           │
//! │  ───────────────────────────                                           │
//! │  SERVER ───► change { data: Change }                                   │
//! │                                                                         │
//! │  KEEPALIVE                                                             │
//! │  ─────────                                                             │
//! │  CLIENT ───► ping          SERVER ───► pong (optional)                 │
//! │                                                                         │
//! │  ERROR                                                                 │
//! │  ─────                                                                 │
//! │  SERVER ───► error { code, message }                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Internally tagged JSON, one message per text frame:
//! ```json
//! { "type": "sync_request", "cursor": null }
//! ```

use serde::{Deserialize, Serialize};

use mirror_core::{Change, SyncCursor};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Outbound (client → server)
// =============================================================================

/// Messages the engine sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Pushes one locally tracked change.
    TrackChange { data: Change },

    /// Pulls everything after `cursor` (`null` = full resync).
    SyncRequest {
        #[serde(default)]
        cursor: SyncCursor,
    },

    /// Heartbeat.
    Ping,
}

impl OutboundMessage {
    pub fn track_change(change: Change) -> Self {
        OutboundMessage::TrackChange { data: change }
    }

    pub fn sync_request(cursor: SyncCursor) -> Self {
        OutboundMessage::SyncRequest { cursor }
    }

    /// Returns the wire tag (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            OutboundMessage::TrackChange { .. } => "track_change",
            OutboundMessage::SyncRequest { .. } => "sync_request",
            OutboundMessage::Ping => "ping",
        }
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::MalformedMessage(e.to_string()))
    }
}

// =============================================================================
// Inbound (server → client)
// =============================================================================

/// Messages the engine receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// A change committed on the server, possibly by another client.
    Change { data: Change },

    /// Reply to `sync_request`.
    SyncResponse {
        #[serde(default)]
        changes: Vec<Change>,
        #[serde(default)]
        cursor: SyncCursor,
    },

    /// Reply to `ping`. Carries no information.
    Pong,

    /// Server-side failure report.
    Error { code: String, message: String },
}

impl InboundMessage {
    pub fn change(change: Change) -> Self {
        InboundMessage::Change { data: change }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        InboundMessage::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Returns the wire tag (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            InboundMessage::Change { .. } => "change",
            InboundMessage::SyncResponse { .. } => "sync_response",
            InboundMessage::Pong => "pong",
            InboundMessage::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses one frame. Unknown `type` values and bad payloads are
    /// [`SyncError::MalformedMessage`].
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::MalformedMessage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::{ChangeDraft, ChangeKind};
    use serde_json::{json, Value};

    fn sample() -> Change {
        ChangeDraft::new(ChangeKind::Create, "task", "t-1")
            .into_change_with("c-1", "2024-05-01T10:00:00Z".parse().unwrap())
    }

    #[test]
    fn test_outbound_wire_shapes() {
        let ping: Value = serde_json::from_str(&OutboundMessage::Ping.to_json().unwrap()).unwrap();
        assert_eq!(ping, json!({"type": "ping"}));

        let pull: Value = serde_json::from_str(
            &OutboundMessage::sync_request(SyncCursor::Unknown)
                .to_json()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(pull, json!({"type": "sync_request", "cursor": null}));

        let push: Value = serde_json::from_str(
            &OutboundMessage::track_change(sample()).to_json().unwrap(),
        )
        .unwrap();
        assert_eq!(push["type"], "track_change");
        assert_eq!(push["data"]["id"], "c-1");
        assert_eq!(push["data"]["entityType"], "task");
    }

    #[test]
    fn test_inbound_sync_response() {
        let msg = InboundMessage::from_json(
            r#"{"type":"sync_response","changes":[{"id":"x","kind":"UPDATE","entityType":"task","entityId":"t-1","timestamp":"2024-05-01T10:00:00Z"}],"cursor":7}"#,
        )
        .unwrap();

        match msg {
            InboundMessage::SyncResponse { changes, cursor } => {
                assert_eq!(changes.len(), 1);
                assert_eq!(changes[0].id, "x");
                assert_eq!(cursor, SyncCursor::at("7"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_inbound_change_and_pong() {
        let json = InboundMessage::change(sample()).to_json().unwrap();
        assert_eq!(
            InboundMessage::from_json(&json).unwrap(),
            InboundMessage::change(sample())
        );
        assert_eq!(
            InboundMessage::from_json(r#"{"type":"pong"}"#).unwrap(),
            InboundMessage::Pong
        );
    }

    #[test]
    fn test_malformed_frames() {
        for frame in [
            "not json",
            r#"{"type":"teleport"}"#,
            r#"{"type":"change"}"#,
            r#"{"data":{}}"#,
        ] {
            assert!(matches!(
                InboundMessage::from_json(frame),
                Err(SyncError::MalformedMessage(_))
            ));
        }
    }
}
