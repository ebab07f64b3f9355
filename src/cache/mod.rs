//! Cache Module
//!
//! Provides named in-memory cache tables with per-item TTL expiration,
//! lifecycle callbacks and access ranking.

mod entry;
mod registry;
mod table;


// Re-export public types
pub use entry::{CacheItem, ExpireCallback};
pub use registry::Registry;
pub use table::{CacheTable, DataLoader, ItemCallback};
