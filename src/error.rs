//! Error types for cache tables
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache tables.
///
/// Lookup errors carry the name of the table the lookup ran against.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not present in the table and no loader configured
    #[error("Key not found in cache table '{0}'")]
    NotFound(String),

    /// Key not present and the configured loader produced nothing
    #[error("Key not found and could not be loaded into cache table '{0}'")]
    NotLoadable(String),

    /// The runtime that drives expiration sweeps could not be started
    #[error("Failed to start sweeper runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
