//! # Change Types
//!
//! The records that flow through the synchronization engine.
//!
//! ## Change Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Change Lifecycle                                │
//! │                                                                         │
//! │  ChangeDraft (caller)                                                   │
//! │       │  into_change(): id = uuid v4, timestamp = now                   │
//! │       ▼                                                                 │
//! │  Change ──► PendingChange (attempts, last_error)                        │
//! │                  │                                                      │
//! │                  │  successful send / server echo                       │
//! │                  ▼                                                      │
//! │             confirmed log (newest first)                                │
//! │                                                                         │
//! │  A Change is never mutated. Corrections are new Changes.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Shape
//! `Change` serializes with camelCase keys and an UPPERCASE `kind`:
//! ```json
//! {
//!   "id": "7d3c...", "kind": "UPDATE",
//!   "entityType": "task", "entityId": "t-42", "field": "title",
//!   "oldValue": "Draft", "newValue": "Final",
//!   "timestamp": "2024-05-01T10:00:00Z", "actorId": "device-1"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use ts_rs::TS;
use uuid::Uuid;

// =============================================================================
// Change Kind
// =============================================================================

/// The kind of mutation a [`Change`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A new entity instance.
    Create,
    /// One attribute (or the whole entity) changed.
    Update,
    /// The entity instance was removed.
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "CREATE"),
            ChangeKind::Update => write!(f, "UPDATE"),
            ChangeKind::Delete => write!(f, "DELETE"),
        }
    }
}

// =============================================================================
// Change
// =============================================================================

/// An immutable record of one mutation.
///
/// `id` is assigned client-side and is unique for the lifetime of a store.
/// `timestamp` is the client-observed creation instant and only drives
/// display ordering; it carries no causal meaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub id: String,

    pub kind: ChangeKind,

    /// Logical entity kind, e.g. "task" or "invoice".
    pub entity_type: String,

    /// Identifier of the affected entity instance.
    pub entity_id: String,

    /// Attribute name. Absent for whole-entity CREATE/DELETE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub old_value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub new_value: Option<Value>,

    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,

    /// Acting principal. May be filled in by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[ts(type = "Record<string, unknown>")]
    pub metadata: BTreeMap<String, Value>,
}

// =============================================================================
// Change Draft
// =============================================================================

/// The caller-supplied part of a change, before an id and timestamp exist.
///
/// ## Example
/// ```rust
/// use mirror_core::{ChangeDraft, ChangeKind};
///
/// let change = ChangeDraft::new(ChangeKind::Update, "task", "t-42")
///     .field("title")
///     .old_value("Draft")
///     .new_value("Final")
///     .into_change();
///
/// assert_eq!(change.entity_id, "t-42");
/// assert!(!change.id.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDraft {
    pub kind: ChangeKind,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub old_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ChangeDraft {
    /// Creates a draft for the given entity instance.
    pub fn new(kind: ChangeKind, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        ChangeDraft {
            kind,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            field: None,
            old_value: None,
            new_value: None,
            actor_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn old_value(mut self, value: impl Into<Value>) -> Self {
        self.old_value = Some(value.into());
        self
    }

    pub fn new_value(mut self, value: impl Into<Value>) -> Self {
        self.new_value = Some(value.into());
        self
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Adds one metadata entry.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Finalizes the draft with a fresh UUID v4 id and the current time.
    pub fn into_change(self) -> Change {
        self.into_change_with(Uuid::new_v4().to_string(), Utc::now())
    }

    /// Finalizes the draft with an explicit id and timestamp.
    pub fn into_change_with(self, id: impl Into<String>, timestamp: DateTime<Utc>) -> Change {
        Change {
            id: id.into(),
            kind: self.kind,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            field: self.field,
            old_value: self.old_value,
            new_value: self.new_value,
            timestamp,
            actor_id: self.actor_id,
            metadata: self.metadata,
        }
    }
}

// =============================================================================
// Sync Cursor
// =============================================================================

/// Opaque position in the server's change log.
///
/// `Unknown` asks the server for a full resync. On the wire it is `null`;
/// a known position is a string token. Numeric cursors from the server are
/// accepted and kept as their decimal text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncCursor {
    #[default]
    Unknown,
    At(String),
}

impl SyncCursor {
    pub fn at(token: impl Into<String>) -> Self {
        SyncCursor::At(token.into())
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, SyncCursor::Unknown)
    }

    /// Returns the token, if known.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SyncCursor::Unknown => None,
            SyncCursor::At(token) => Some(token),
        }
    }
}

impl From<Option<String>> for SyncCursor {
    fn from(token: Option<String>) -> Self {
        token.map_or(SyncCursor::Unknown, SyncCursor::At)
    }
}

impl std::fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCursor::Unknown => write!(f, "unknown"),
            SyncCursor::At(token) => write!(f, "{}", token),
        }
    }
}

impl Serialize for SyncCursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SyncCursor::Unknown => serializer.serialize_none(),
            SyncCursor::At(token) => serializer.serialize_str(token),
        }
    }
}

impl<'de> Deserialize<'de> for SyncCursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(SyncCursor::Unknown),
            Some(Value::String(token)) => Ok(SyncCursor::At(token)),
            Some(Value::Number(n)) => Ok(SyncCursor::At(n.to_string())),
            Some(other) => Err(serde::de::Error::custom(format!(
                "cursor must be null, a string or a number, got {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Pending Change
// =============================================================================

/// A change applied locally but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub change: Change,

    /// When the change entered the pending queue.
    #[ts(as = "String")]
    pub enqueued_at: DateTime<Utc>,

    /// Failed delivery attempts so far.
    pub attempts: u32,

    pub last_error: Option<String>,
}

impl PendingChange {
    pub fn new(change: Change, enqueued_at: DateTime<Utc>) -> Self {
        PendingChange {
            change,
            enqueued_at,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.change.id
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Read-only view handed to renderers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ChangeSnapshot {
    /// Newest first.
    pub confirmed: Vec<Change>,
    /// FIFO order.
    pub pending: Vec<Change>,
}

/// Everything needed to rebuild a store after a restart.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub confirmed: Vec<Change>,
    pub pending: Vec<PendingChange>,
    pub cursor: SyncCursor,
}
