//! cachetable - An in-process cache with per-item TTL expiration
//!
//! Named tables of generic key/value items, each table driven by a single
//! self-adjusting expiration timer, with lifecycle callbacks, a miss loader and
//! access-frequency ranking.
//!
//! ```ignore
//! use std::time::Duration;
//! use cachetable::CacheTable;
//!
//! let table: CacheTable<String, String> = CacheTable::new("sessions");
//! table.insert("token".to_string(), Duration::from_secs(30), "alice".to_string());
//! assert!(table.exists(&"token".to_string()));
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{CacheItem, CacheTable, Registry};
pub use config::Config;
pub use error::{CacheError, Result};
