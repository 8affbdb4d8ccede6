//! Vault personas
//!
//! A vault plays several personas at once, one per kind of name it is close
//! to. This crate hosts the two that keep accounts:
//!
//! - **Maid manager**: holds client accounts. Charges every put against the
//!   capacity the client's registered Pmid nodes offer.
//! - **Pmid manager**: holds one account per Pmid node, recording which
//!   elements it stores.
//!
//! # Request flow
//!
//! ```text
//! Delivery ─► PersonaCore::admit ─► handler ─► Sync ─► MergePolicy ─► AccountDatabase
//!                  │                   │
//!                  │                   └─► Dispatcher (forwards, responses, Synchronise)
//!                  └─► Dropped / Absorbed
//! ```
//!
//! Each replica votes locally and broadcasts its vote to the rest of the
//! close group. An entry is merged once a majority of the group agree.
//!
//! # Churn
//!
//! On a membership change, joiners receive an `AccountTransfer` with the
//! whole account, departed replicas' votes are re-attributed to their
//! replacements, and accounts this node no longer serves are archived to
//! the [`AccountStore`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod maid_manager;
pub mod messages;
pub mod models;
pub mod pmid_manager;
pub mod service;
pub mod storage;

pub use config::VaultConfig;
pub use dispatcher::{ChannelDispatcher, Dispatcher, Outbound};
pub use error::{Error, Result};
pub use maid_manager::MaidManagerService;
pub use messages::{Authority, Delivery, Message, Payload, Persona, PutResult, Route};
pub use models::{
    Account, MaidAccount, MaidStatus, PmidAccount, PmidManagerValue, PmidRecord, SyncSettings,
};
pub use pmid_manager::PmidManagerService;
pub use service::{Disposition, DropReason, EvictionReport, PersonaCore, SenderValidator};
pub use storage::AccountStore;
