//! Caching layer for external data and LLM results
//!
//! Entries live in SQLite so they survive restarts. Each entry expires after
//! the TTL its data kind gets from the [`FreshnessPolicy`](crate::freshness::FreshnessPolicy).

mod facade;
mod key;
mod store;

pub use facade::CacheFacade;
pub use key::CacheKey;
pub use store::{CacheEntry, CacheStats, CacheStore};
