//! Error types for the levelz core library.

use thiserror::Error;

/// Top-level error type for all levelz operations.
#[derive(Error, Debug)]
pub enum LevelzError {
    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A storage call failed in a way that was already reported elsewhere,
    /// e.g. by the leader of a collapsed single-flight load.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A batched experience flush was rolled back and its entries discarded.
    #[error("Batch flush failed ({entries} entries across {players} players discarded): {reason}")]
    FlushFailed {
        /// Pending mutations in the discarded batch.
        entries: usize,
        /// Distinct players the batch would have updated.
        players: usize,
        /// Underlying failure.
        reason: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, LevelzError>;
