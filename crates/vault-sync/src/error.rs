//! Error types for vault-sync.

use thiserror::Error;

/// Result type for vault-sync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or decoding sync state.
#[derive(Debug, Error)]
pub enum Error {
    /// A snapshot or entry could not be decoded as a whole.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Encoding failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}
