//! # Repository Module
//!
//! Database repository implementations for Mirror.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Synchronizer persistence hook                                         │
//! │       │                                                                 │
//! │       │  db.changes().confirm(&change)                                 │
//! │       ▼                                                                 │
//! │  ChangeRepository                                                      │
//! │  ├── enqueue_pending(&self, entry)                                     │
//! │  ├── pending(&self)                                                    │
//! │  ├── record_failure(&self, id, error)                                  │
//! │  ├── confirm(&self, change)                                            │
//! │  └── confirmed(&self)                                                  │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ChangeRepository`](changes::ChangeRepository) - Pending queue and confirmed log
//! - [`SyncStateRepository`](state::SyncStateRepository) - Sync cursor

pub mod changes;
pub mod state;
