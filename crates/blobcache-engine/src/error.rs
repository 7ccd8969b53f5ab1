//! Error types for the cache engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Error variants for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A single payload too large to ever fit in the cache.
    #[error("payload of {length} bytes exceeds cache capacity of {capacity_bytes} bytes")]
    PayloadTooLarge {
        /// True length of the rejected payload.
        length: u64,
        /// Configured byte capacity of the cache.
        capacity_bytes: u64,
    },

    /// The index file is missing, truncated, or inconsistent with the data file.
    #[error("corrupt index: {reason}")]
    CorruptIndex {
        /// Description of the inconsistency.
        reason: String,
    },

    /// A cache file already exists and holds data.
    #[error("file already exists and is not empty: {}", path.display())]
    AlreadyExists {
        /// The offending path.
        path: PathBuf,
    },

    /// The cache configuration is not usable.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the problem.
        reason: String,
    },

    /// Serialization error while encoding cache state.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the error.
        reason: String,
    },
}
