//! Snapshot persistence for fetched listings.
//!
//! A snapshot is the serialized result of one complete paginated fetch,
//! stored wholesale under a resource key together with its write time.
//! Readers see either the previous or the next complete snapshot, and a
//! present snapshot is always served regardless of age; freshness only
//! decides whether a background refresh gets triggered.

mod layer;
mod storage;

pub use layer::SnapshotCache;
pub use storage::{Snapshot, SnapshotStore, SqliteStore};

#[cfg(test)]
pub use storage::MemoryStore;
