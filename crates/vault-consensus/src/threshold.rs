//! Quorum thresholds per message kind.
//!
//! The number of corroborating senders a request needs is a pure function of
//! its kind. It never depends on the live close-group size, so a quorum check
//! is O(1) and unaffected by concurrent churn. Every node in the network must
//! run with the same table for replicas to converge.

use serde::{Deserialize, Serialize};
use vault_dht::DEFAULT_GROUP_SIZE;

/// Message kinds understood by the vault personas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    CreateAccountRequest,
    PutRequest,
    PutResponse,
    DeleteRequest,
    Synchronise,
    AccountTransfer,
    ChurnNotification,
    RegisterPmidRequest,
    UnregisterPmidRequest,
    PmidTotalsUpdate,
    GetPmidAccountRequest,
    GetPmidAccountResponse,
}

impl MessageKind {
    /// Every kind, in table order.
    pub const ALL: [MessageKind; 12] = [
        MessageKind::CreateAccountRequest,
        MessageKind::PutRequest,
        MessageKind::PutResponse,
        MessageKind::DeleteRequest,
        MessageKind::Synchronise,
        MessageKind::AccountTransfer,
        MessageKind::ChurnNotification,
        MessageKind::RegisterPmidRequest,
        MessageKind::UnregisterPmidRequest,
        MessageKind::PmidTotalsUpdate,
        MessageKind::GetPmidAccountRequest,
        MessageKind::GetPmidAccountResponse,
    ];

    const fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Majority of a close group: floor(n / 2) + 1.
///
/// ```
/// use vault_consensus::group_quorum;
///
/// assert_eq!(group_quorum(4), 3);
/// assert_eq!(group_quorum(3), 2);
/// assert_eq!(group_quorum(1), 1);
/// ```
pub const fn group_quorum(group_size: usize) -> usize {
    group_size / 2 + 1
}

/// Static mapping from message kind to minimum distinct senders (always ≥ 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumTable {
    votes: [usize; MessageKind::ALL.len()],
}

impl QuorumTable {
    /// Every kind satisfied by a single sender.
    pub const fn single() -> Self {
        Self {
            votes: [1; MessageKind::ALL.len()],
        }
    }

    /// Table for the Maid manager persona.
    ///
    /// Clients talk to it directly (one sender); only totals reported by the
    /// Pmid manager group need a group majority.
    pub const fn maid_manager(group_size: usize) -> Self {
        Self::single().with_required(MessageKind::PmidTotalsUpdate, group_quorum(group_size))
    }

    /// Table for the Pmid manager persona.
    ///
    /// Account creation, puts and deletes arrive from manager groups and
    /// need a group majority; responses from the Pmid node itself need one.
    pub const fn pmid_manager(group_size: usize) -> Self {
        let quorum = group_quorum(group_size);
        Self::single()
            .with_required(MessageKind::CreateAccountRequest, quorum)
            .with_required(MessageKind::PutRequest, quorum)
            .with_required(MessageKind::DeleteRequest, quorum)
    }

    /// Override the requirement for one kind. Zero is raised to one.
    pub const fn with_required(mut self, kind: MessageKind, votes: usize) -> Self {
        self.votes[kind.index()] = if votes == 0 { 1 } else { votes };
        self
    }

    /// Minimum distinct corroborating senders for `kind`.
    pub const fn required_votes(&self, kind: MessageKind) -> usize {
        self.votes[kind.index()]
    }
}

impl Default for QuorumTable {
    fn default() -> Self {
        Self::single()
    }
}

/// Pmid manager table for the default group size.
pub const PMID_MANAGER_QUORUM: QuorumTable = QuorumTable::pmid_manager(DEFAULT_GROUP_SIZE);

/// Maid manager table for the default group size.
pub const MAID_MANAGER_QUORUM: QuorumTable = QuorumTable::maid_manager(DEFAULT_GROUP_SIZE);
