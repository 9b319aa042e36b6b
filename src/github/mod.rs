//! GitHub listings: the concrete page sources behind the cache.

pub mod client;
pub mod sources;
pub mod types;
