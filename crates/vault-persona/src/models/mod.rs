//! Account models served by the personas.

mod maid_account;
mod pmid_account;
mod pmid_value;

pub use maid_account::{MaidAccount, MaidMergePolicy, MaidStatus, PmidTotals};
pub use pmid_account::{ElementChange, PmidAccount, PmidMergePolicy, PmidRecord};
pub use pmid_value::PmidManagerValue;

use std::time::Duration;

use vault_dht::{AccountName, NodeId};
use vault_sync::{ApplyReport, MergePolicy};

use crate::error::{Error, Result};

/// Parameters every account's sync engine is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Agreeing replicas needed to resolve an entry.
    pub quorum: usize,
    /// How long an unresolved entry may wait for quorum.
    pub retention: Duration,
}

/// Sizes and capacities arrive from other nodes and must not be negative.
pub(crate) fn checked_size(size: i64) -> Result<i64> {
    if size < 0 {
        return Err(Error::InvalidSize(size));
    }
    Ok(size)
}

/// An account a persona keeps per owner.
///
/// Services only reach accounts through this trait, so churn handling,
/// transfer and archival work the same for every persona.
pub trait Account: Send + 'static {
    type Policy: MergePolicy;

    /// Key prefix under which archives are stored.
    const PREFIX: &'static str;

    /// Fresh account voting as `this_node`.
    fn create(name: AccountName, this_node: NodeId, settings: SyncSettings) -> Self;

    fn name(&self) -> AccountName;

    fn sync(&self) -> &vault_sync::Sync<Self::Policy>;

    fn sync_mut(&mut self) -> &mut vault_sync::Sync<Self::Policy>;

    /// Encode the whole account for transfer or archival.
    fn serialise(&self) -> Result<Vec<u8>>;

    /// Merge a transferred or archived account into this one.
    fn apply_transfer(&mut self, bytes: &[u8]) -> Result<ApplyReport>;

    /// Build an account from a transfer.
    fn parse(
        name: AccountName,
        this_node: NodeId,
        settings: SyncSettings,
        bytes: &[u8],
    ) -> Result<Self>
    where
        Self: Sized,
    {
        let mut account = Self::create(name, this_node, settings);
        account.apply_transfer(bytes)?;
        Ok(account)
    }
}
