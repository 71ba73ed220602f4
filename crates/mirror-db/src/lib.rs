//! # mirror-db: Persistence Layer for Mirror
//!
//! SQLite storage for the pending queue, the confirmed log and the last
//! sync cursor, so tracked changes survive a restart.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Mirror Data Flow                                 │
//! │                                                                         │
//! │  Synchronizer (mirror-sync)                                            │
//! │       │  SyncPersistence hooks                                          │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     mirror-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │◄───│ ChangeRepo     │    │ 001_init.sql │  │   │
//! │  │   │ SqlitePool    │    │ SyncStateRepo  │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (storage.database_path in sync.toml)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mirror_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("mirror.db")).await?;
//! let state = db.load_state().await?;
//! let store = mirror_core::ChangeStore::restore(state);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::changes::ChangeRepository;
pub use repository::state::SyncStateRepository;
