//! Messages exchanged by the personas.
//!
//! A message's kind is derived from its payload, so the kind used for the
//! quorum lookup can never disagree with what the message carries.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use vault_consensus::{MessageId, MessageKind, QuorumTable, RequestKey};
use vault_dht::{AccountName, DataKey, NodeId};

use crate::models::PmidRecord;

/// Result of storing an element, as reported by a Pmid node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PutResult {
    Stored,
    Failed(String),
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    CreateAccount,
    /// Sent by the Maid managers when a client registers a Pmid node.
    CreatePmidAccount { claimed_available_size: i64 },
    /// Store `key`. `size` is the cost charged to a Maid account or the
    /// element size held by a Pmid node.
    Put { key: DataKey, size: i64 },
    PutResponse { key: DataKey, size: i64, result: PutResult },
    Delete { key: DataKey },
    /// One replica's serialised unresolved entry.
    Synchronise { entry: ByteBuf },
    /// A whole serialised account.
    AccountTransfer { account: ByteBuf },
    ChurnNotification { old: Vec<NodeId>, new: Vec<NodeId> },
    RegisterPmid { pmid: AccountName, claimed_available_size: i64 },
    UnregisterPmid { pmid: AccountName },
    PmidTotals { record: PmidRecord },
    GetPmidAccount,
    /// Serialised `PmidManagerValue`.
    GetPmidAccountResponse { elements: ByteBuf },
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::CreateAccount | Payload::CreatePmidAccount { .. } => {
                MessageKind::CreateAccountRequest
            }
            Payload::Put { .. } => MessageKind::PutRequest,
            Payload::PutResponse { .. } => MessageKind::PutResponse,
            Payload::Delete { .. } => MessageKind::DeleteRequest,
            Payload::Synchronise { .. } => MessageKind::Synchronise,
            Payload::AccountTransfer { .. } => MessageKind::AccountTransfer,
            Payload::ChurnNotification { .. } => MessageKind::ChurnNotification,
            Payload::RegisterPmid { .. } => MessageKind::RegisterPmidRequest,
            Payload::UnregisterPmid { .. } => MessageKind::UnregisterPmidRequest,
            Payload::PmidTotals { .. } => MessageKind::PmidTotalsUpdate,
            Payload::GetPmidAccount => MessageKind::GetPmidAccountRequest,
            Payload::GetPmidAccountResponse { .. } => MessageKind::GetPmidAccountResponse,
        }
    }
}

/// A message about one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation id; responses and forwards reuse the request's id.
    pub message_id: MessageId,
    pub account: AccountName,
    pub payload: Payload,
}

impl Message {
    pub fn new(message_id: MessageId, account: AccountName, payload: Payload) -> Self {
        Self {
            message_id,
            account,
            payload,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Key under which replicas' copies of this message accumulate.
    pub fn request_key(&self) -> RequestKey {
        RequestKey::new(self.kind(), self.message_id, self.account)
    }
}

/// A message as handed over by the routing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message: Message,
    pub sender: NodeId,
    pub receiver: NodeId,
}

impl Delivery {
    pub fn new(message: Message, sender: NodeId, receiver: NodeId) -> Self {
        Self {
            message,
            sender,
            receiver,
        }
    }
}

/// Who may send or receive a message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Authority {
    Client,
    MaidManager,
    DataManager,
    PmidManager,
    PmidNode,
    /// The local routing layer.
    Routing,
}

/// Sender and receiver authority of a message kind for one persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub sender: Authority,
    pub receiver: Authority,
}

const fn routed(sender: Authority, receiver: Authority) -> Option<Route> {
    Some(Route { sender, receiver })
}

/// A persona this node can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Persona {
    MaidManager,
    PmidManager,
}

impl Persona {
    pub const fn authority(self) -> Authority {
        match self {
            Persona::MaidManager => Authority::MaidManager,
            Persona::PmidManager => Authority::PmidManager,
        }
    }

    /// Route for `kind`, or `None` if this persona does not accept it.
    pub const fn route(self, kind: MessageKind) -> Option<Route> {
        use Authority::*;
        use MessageKind as K;
        match (self, kind) {
            (_, K::Synchronise) | (_, K::AccountTransfer) => {
                routed(self.authority(), self.authority())
            }
            (_, K::ChurnNotification) => routed(Routing, self.authority()),

            (Persona::MaidManager, K::CreateAccountRequest)
            | (Persona::MaidManager, K::PutRequest)
            | (Persona::MaidManager, K::DeleteRequest)
            | (Persona::MaidManager, K::RegisterPmidRequest)
            | (Persona::MaidManager, K::UnregisterPmidRequest) => routed(Client, MaidManager),
            (Persona::MaidManager, K::PmidTotalsUpdate) => routed(PmidManager, MaidManager),

            (Persona::PmidManager, K::CreateAccountRequest) => routed(MaidManager, PmidManager),
            (Persona::PmidManager, K::PutRequest) | (Persona::PmidManager, K::DeleteRequest) => {
                routed(DataManager, PmidManager)
            }
            (Persona::PmidManager, K::PutResponse)
            | (Persona::PmidManager, K::GetPmidAccountRequest) => routed(PmidNode, PmidManager),

            _ => None,
        }
    }

    /// Quorum table for this persona at the given group size.
    pub const fn quorum_table(self, group_size: usize) -> QuorumTable {
        match self {
            Persona::MaidManager => QuorumTable::maid_manager(group_size),
            Persona::PmidManager => QuorumTable::pmid_manager(group_size),
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Node id that receives traffic addressed to a name (a data manager group or
/// a Pmid node).
pub fn node_for(identity: &vault_dht::Identity) -> NodeId {
    NodeId::from_bytes(*identity.as_bytes())
}
