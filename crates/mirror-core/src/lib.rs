//! # mirror-core: Pure Change Model
//!
//! Types and in-memory state shared by every layer of the Mirror
//! change-synchronization engine. Nothing in this crate performs I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Mirror Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Application (forms, dashboards, renderers)           │   │
//! │  │        produces ChangeDrafts, renders ChangeSnapshots            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          mirror-sync (Synchronizer, Transport, protocol)        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ mirror-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌──────────────┐  ┌────────────────────────┐  │   │
//! │  │   │   types   │  │    store     │  │      validation        │  │   │
//! │  │   │  Change   │  │ ChangeStore  │  │   validate_draft       │  │   │
//! │  │   │  Cursor   │  │ pending/conf │  │                        │  │   │
//! │  │   └───────────┘  └──────────────┘  └────────────────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • NO TIMERS                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - `Change`, `ChangeDraft`, `SyncCursor`, snapshots
//! - [`store`] - `ChangeStore`, the pending queue and confirmed log
//! - [`error`] - Domain error types
//! - [`validation`] - Draft validation
//!
//! ## Example Usage
//!
//! ```rust
//! use mirror_core::{ChangeDraft, ChangeKind, ChangeStore};
//!
//! let mut store = ChangeStore::new();
//! let change = ChangeDraft::new(ChangeKind::Create, "task", "t-1").into_change();
//! let id = change.id.clone();
//!
//! store.enqueue_pending(change).unwrap();
//! assert_eq!(store.pending_len(), 1);
//!
//! store.confirm(&id);
//! assert_eq!(store.confirmed_len(), 1);
//! assert_eq!(store.pending_len(), 0);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod store;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use store::ChangeStore;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of entity types, entity ids and field names.
pub const MAX_IDENTIFIER_LEN: usize = 128;
