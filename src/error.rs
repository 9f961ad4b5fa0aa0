//! Error types for the cache
//!
//! Cache misses are not errors. The only failures modelled here belong to the
//! durable tier, and the cache logs and swallows all of them.

use thiserror::Error;

// == Durable Error Enum ==
/// Failure reported by a durable tier implementation.
#[derive(Error, Debug)]
pub enum DurableError {
    /// Underlying storage I/O failed
    #[error("Durable tier I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be encoded into a durable record
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored record could not be decoded
    #[error("Corrupt durable record for key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// The backing store refused the operation
    #[error("Durable tier unavailable: {0}")]
    Unavailable(String),
}

// == Result Type Alias ==
/// Convenience Result type for durable tier operations.
pub type Result<T> = std::result::Result<T, DurableError>;
