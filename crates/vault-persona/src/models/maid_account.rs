//! Maid account: a client's storage quota and what it has spent.
//!
//! Claimed capacity is what the client's registered Pmid nodes offer to the
//! network. Consumed capacity is the sum of the costs of every record the
//! account holds. A put is only merged while consumed stays within claimed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use tracing::debug;
use vault_dht::{AccountName, DataKey, NodeId};
use vault_sync::{
    AccountDatabase, Action, ApplyReport, MergePolicy, Outcome, PersistedRecord, Resolution,
    Sync, SyncSnapshot, UnresolvedEntry,
};

use super::{checked_size, Account, PmidRecord, SyncSettings};
use crate::error::{Error, Result};

/// Advisory account health reported with every merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaidStatus {
    Ok,
    /// More than 90% of claimed capacity is consumed.
    LowSpace,
}

/// Cost accounting with quota enforcement.
#[derive(Debug, Clone, Default)]
pub struct MaidMergePolicy {
    consumed: i64,
    claimed: i64,
}

impl MaidMergePolicy {
    pub fn consumed(&self) -> i64 {
        self.consumed
    }

    pub fn claimed(&self) -> i64 {
        self.claimed
    }

    pub fn set_claimed(&mut self, claimed: i64) {
        self.claimed = claimed;
    }

    pub fn status(&self) -> MaidStatus {
        if i128::from(self.consumed) * 10 > i128::from(self.claimed) * 9 {
            MaidStatus::LowSpace
        } else {
            MaidStatus::Ok
        }
    }

    /// Fail unless replacing `previous` with `cost` stays within quota.
    pub fn check_quota(&self, previous: i64, cost: i64) -> Result<()> {
        let cost = checked_size(cost)?;
        let available = self
            .claimed
            .saturating_sub(self.consumed.saturating_sub(previous));
        if cost > available {
            return Err(Error::QuotaExceeded {
                requested: cost,
                available,
            });
        }
        Ok(())
    }

    /// Consumed capacity after replacing `previous` with `cost`.
    fn replaced(&self, previous: i64, cost: i64) -> i64 {
        self.consumed.saturating_sub(previous).saturating_add(cost)
    }
}

impl MergePolicy for MaidMergePolicy {
    type Value = i64;
    type Outcome = MaidStatus;
    type Error = Error;

    fn resolve(
        &mut self,
        resolution: &Resolution<i64>,
        db: &mut AccountDatabase<i64>,
    ) -> Result<MaidStatus> {
        let key = resolution.key;
        let cost = resolution.value;
        match resolution.action {
            Action::Put => {
                let previous = db.get(&key).map_or(0, |r| r.value);
                self.check_quota(previous, cost)?;
                db.put(key, PersistedRecord::new(cost, resolution.corroboration));
                self.consumed = self.replaced(previous, cost);
            }
            Action::Adjust => {
                let previous = db.get(&key).ok_or(Error::NoSuchRecord(key))?.value;
                self.check_quota(previous, cost)?;
                db.put(key, PersistedRecord::new(cost, resolution.corroboration));
                self.consumed = self.replaced(previous, cost);
            }
            Action::Delete => {
                let record = db.remove(&key).ok_or(Error::NoSuchRecord(key))?;
                self.consumed = self.consumed.saturating_sub(record.value);
            }
        }
        Ok(self.status())
    }

    fn restore(&mut self, db: &AccountDatabase<i64>) {
        self.consumed = db
            .iter()
            .fold(0i64, |total, (_, r)| total.saturating_add(r.value));
    }
}

/// Pmid nodes registered to a Maid account, with their last reported totals.
pub type PmidTotals = BTreeMap<AccountName, PmidRecord>;

#[derive(Serialize, Deserialize)]
struct MaidTransfer {
    pmid_totals: Vec<PmidRecord>,
    sync: ByteBuf,
}

/// A client account, replicated across its Maid manager group.
#[derive(Debug)]
pub struct MaidAccount {
    name: AccountName,
    sync: Sync<MaidMergePolicy>,
    pmid_totals: PmidTotals,
}

impl MaidAccount {
    pub fn status(&self) -> MaidStatus {
        self.sync.policy().status()
    }

    pub fn consumed(&self) -> i64 {
        self.sync.policy().consumed()
    }

    pub fn claimed(&self) -> i64 {
        self.sync.policy().claimed()
    }

    pub fn pmid_totals(&self) -> &PmidTotals {
        &self.pmid_totals
    }

    /// Register a Pmid node. Re-registering replaces its totals.
    pub fn register_pmid(&mut self, record: PmidRecord) -> Result<bool> {
        let record = record.checked()?;
        let added = self.pmid_totals.insert(record.pmid_name, record).is_none();
        self.refresh_claimed();
        Ok(added)
    }

    pub fn unregister_pmid(&mut self, pmid: &AccountName) -> bool {
        let removed = self.pmid_totals.remove(pmid).is_some();
        self.refresh_claimed();
        removed
    }

    /// Replace the totals of an already registered Pmid node.
    pub fn update_pmid_totals(&mut self, record: PmidRecord) -> Result<()> {
        let record = record.checked()?;
        let slot = self
            .pmid_totals
            .get_mut(&record.pmid_name)
            .ok_or(Error::PmidNotRegistered {
                account: self.name,
                pmid: record.pmid_name,
            })?;
        *slot = record;
        self.refresh_claimed();
        Ok(())
    }

    /// Quota check made before this node votes on a put.
    pub fn check_put(&self, key: &DataKey, cost: i64) -> Result<()> {
        let previous = self.sync.database().get(key).map_or(0, |r| r.value);
        self.sync.policy().check_quota(previous, cost)
    }

    /// Vote for a put of `key` costing `cost`.
    pub fn vote_put(
        &mut self,
        key: DataKey,
        cost: i64,
    ) -> (UnresolvedEntry<i64>, Outcome<MaidMergePolicy>) {
        self.sync.add_local_entry(key, Action::Put, cost)
    }

    /// Vote to delete `key`. Fails if the account holds no such record.
    pub fn vote_delete(
        &mut self,
        key: DataKey,
    ) -> Result<(UnresolvedEntry<i64>, Outcome<MaidMergePolicy>)> {
        let cost = self
            .sync
            .database()
            .get(&key)
            .ok_or(Error::NoSuchRecord(key))?
            .value;
        Ok(self.sync.add_local_entry(key, Action::Delete, cost))
    }

    fn refresh_claimed(&mut self) {
        let claimed = self
            .pmid_totals
            .values()
            .fold(0i64, |total, r| total.saturating_add(r.claimed_available_size));
        debug!(account = %self.name, claimed, "Claimed capacity updated");
        self.sync.policy_mut().set_claimed(claimed);
    }
}

impl Account for MaidAccount {
    type Policy = MaidMergePolicy;

    const PREFIX: &'static str = "maid";

    fn create(name: AccountName, this_node: NodeId, settings: SyncSettings) -> Self {
        Self {
            name,
            sync: Sync::new(
                MaidMergePolicy::default(),
                this_node,
                settings.quorum,
                settings.retention,
            ),
            pmid_totals: PmidTotals::new(),
        }
    }

    fn name(&self) -> AccountName {
        self.name
    }

    fn sync(&self) -> &Sync<MaidMergePolicy> {
        &self.sync
    }

    fn sync_mut(&mut self) -> &mut Sync<MaidMergePolicy> {
        &mut self.sync
    }

    fn serialise(&self) -> Result<Vec<u8>> {
        let transfer = MaidTransfer {
            pmid_totals: self.pmid_totals.values().copied().collect(),
            sync: ByteBuf::from(self.sync.snapshot().serialise()?),
        };
        Ok(bincode::serialize(&transfer)?)
    }

    fn apply_transfer(&mut self, bytes: &[u8]) -> Result<ApplyReport> {
        let transfer: MaidTransfer = bincode::deserialize(bytes)
            .map_err(|e| vault_sync::Error::CorruptSnapshot(e.to_string()))?;
        let snapshot = SyncSnapshot::parse(&transfer.sync)?;

        // Capacity first, so replayed puts are checked against the right quota.
        for record in transfer.pmid_totals {
            self.pmid_totals.entry(record.pmid_name).or_insert(record);
        }
        self.refresh_claimed();
        Ok(self.sync.apply_snapshot(snapshot))
    }
}
