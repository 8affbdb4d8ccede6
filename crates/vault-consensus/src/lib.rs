//! Request accumulation for vault personas
//!
//! A close group has no leader. Every replica forwards its own copy of a
//! request, and a persona only acts once enough *distinct* replicas have sent
//! *identical* content.
//!
//! # Quorum Table
//!
//! The number of senders required depends only on the message kind:
//! - client-originated kinds → 1 (the client is the only sender)
//! - kinds sent by a manager group → majority of the group, floor(n/2) + 1
//!
//! Keeping the threshold static makes each check O(1) and independent of
//! membership churn happening at the same time.
//!
//! # Accumulator
//!
//! [`Accumulator::add_request`] returns [`AddResult::QuorumReached`] exactly
//! once per [`RequestKey`]; the caller then runs the handler. Conflicting
//! votes from one sender are rejected, and stale requests are evicted after a
//! bounded retention window.

mod accumulator;
mod error;
mod threshold;

pub use accumulator::{
    Accumulator, AccumulatorConfig, AddResult, ContentDigest, MessageId, RequestKey,
};
pub use error::{AccumulatorError, Result};
pub use threshold::{
    group_quorum, MessageKind, QuorumTable, MAID_MANAGER_QUORUM, PMID_MANAGER_QUORUM,
};
