//! Shared error types for ZoneSync.

use thiserror::Error;

/// A specialized `Result` type for core ZoneSync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from core ZoneSync plumbing.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A bucket shard key that does not follow the
    /// `<bucket>:<bucket_id>[:<shard_id>]` layout.
    #[error("invalid bucket shard key: {0:?}")]
    InvalidShardKey(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
