//! Local persistence for bundlesync.
//!
//! A store holds the manifest committed by the last successful sync and one
//! record per resource keyed by path. Both backends commit atomically: a
//! reader sees either the state before a commit or the state after it.

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::{MemorySnapshot, MemoryStore};
pub use sqlite::SqliteStore;
pub use store::{ManifestStore, ResourceStore, SyncStore};
