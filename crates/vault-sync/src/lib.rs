//! Vote-based account synchronisation for close groups.
//!
//! Replicas of an account each propose mutations as [`UnresolvedEntry`]
//! votes. A [`Sync`] engine gathers votes from peers and, once a quorum of
//! replicas agree on a value, merges it into the [`AccountDatabase`] through
//! a persona-specific [`MergePolicy`].
//!
//! # Lifecycle of an entry
//!
//! 1. A replica records its own vote with [`Sync::add_local_entry`] and
//!    broadcasts the returned entry to its close group.
//! 2. Peers fold it in with [`Sync::add_unresolved_entry`].
//! 3. At quorum the entry is removed from the pending set and merged; a
//!    refused merge is reported as [`SyncOutcome::Rejected`].
//! 4. Entries that never reach quorum are dropped by [`Sync::evict_stale`].
//!
//! # Churn
//!
//! [`Sync::replace_node`] moves a departed replica's votes to its
//! replacement, and [`Sync::snapshot`] / [`Sync::apply_snapshot`] hand a
//! whole account to a joining replica.

pub mod database;
pub mod error;
pub mod snapshot;
pub mod sync;
pub mod unresolved;

pub use database::{AccountDatabase, PersistedRecord};
pub use error::{Error, Result};
pub use snapshot::SyncSnapshot;
pub use sync::{ApplyReport, MergePolicy, Outcome, Resolution, Sync, SyncOutcome};
pub use unresolved::{Action, UnresolvedEntry};
