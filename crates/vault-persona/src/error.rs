//! Error types for vault personas.

use thiserror::Error;
use vault_consensus::AccumulatorError;
use vault_dht::{AccountName, DataKey};

/// Result type for persona operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving an account.
///
/// All of these are local to one account; none of them stop a service.
#[derive(Debug, Error)]
pub enum Error {
    /// A put would take consumed capacity past claimed capacity.
    #[error("Quota exceeded: {requested} requested, {available} available")]
    QuotaExceeded { requested: i64, available: i64 },

    /// Negative size or capacity in a request.
    #[error("Invalid size: {0}")]
    InvalidSize(i64),

    /// Delete or adjust of a key the account does not hold.
    #[error("No such record: {0}")]
    NoSuchRecord(DataKey),

    /// Message for an account this node does not hold.
    #[error("No such account: {0}")]
    NoSuchAccount(AccountName),

    /// Totals update for a Pmid the account never registered.
    #[error("Pmid {pmid} not registered to {account}")]
    PmidNotRegistered { account: AccountName, pmid: AccountName },

    /// Two different payloads from one sender for the same request.
    #[error(transparent)]
    ConflictingVote(#[from] AccumulatorError),

    /// Sync state or snapshot error (including corrupt snapshots).
    #[error("Sync error: {0}")]
    Sync(#[from] vault_sync::Error),

    /// Encoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
