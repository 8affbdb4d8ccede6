//! Error types for vault-consensus.

use thiserror::Error;
use vault_dht::NodeId;

use crate::accumulator::RequestKey;

/// Result type for accumulator operations.
pub type Result<T> = std::result::Result<T, AccumulatorError>;

/// Errors raised while accumulating requests.
#[derive(Debug, Error)]
pub enum AccumulatorError {
    /// The sender already voted for this request with different content.
    /// The earlier vote stands.
    #[error("conflicting vote from {sender} for {key}")]
    ConflictingVote { key: RequestKey, sender: NodeId },
}
