//! Harvest Store
//!
//! Durable key-value storage for collected identifiers, exported identifiers,
//! collection stats and in-flight task records.
//!
//! # Architecture
//!
//! - **[`KeyValueStore`]**: `get` / merging `set` / `remove` / `clear` plus a
//!   change subscription that reports per-key diffs to every subscriber
//! - **[`SqliteStore`]**: `SQLite` backend using `SQLx` with embedded migrations
//! - **[`MemoryStore`]**: in-process backend for tests and ephemeral runs
//! - **[`IdentifierSets`]**: read-modify-write helpers for the Collected Set
//! - **[`ExportTracker`]**: pending/exported bookkeeping on top of the sets
//!
//! # Example
//!
//! ```ignore
//! use harvest_store::{KeyValueStore, SqliteStore};
//!
//! let store = SqliteStore::open("harvest.db").await?;
//! let mut changes = store.subscribe();
//! store.set(serde_json::json!({"ids": ["123456789012"]}).as_object().cloned().unwrap()).await?;
//! let diff = changes.recv().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod changes;
pub mod connection;
pub mod error;
pub mod export;
pub mod kv;
pub mod memory;
pub mod migrations;
pub mod sets;
pub mod sqlite;

// Re-export commonly used types
pub use changes::{StoreChange, StoreChanges, Subscription, SubscriptionHandle};
pub use connection::StorePool;
pub use error::{Result, StoreError};
pub use export::ExportTracker;
pub use kv::{KeyValueStore, Record};
pub use memory::MemoryStore;
pub use sets::{CollectionStats, IdentifierSets, MergeReport};
pub use sqlite::SqliteStore;
