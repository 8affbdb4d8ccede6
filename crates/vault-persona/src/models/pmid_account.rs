//! Pmid account: elements stored on one Pmid node, as seen by its managers.

use std::convert::Infallible;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use vault_dht::{AccountName, DataKey, NodeId};
use vault_sync::{
    AccountDatabase, Action, ApplyReport, MergePolicy, Outcome, PersistedRecord, Resolution,
    Sync, SyncSnapshot, UnresolvedEntry,
};

use super::{checked_size, Account, PmidManagerValue, SyncSettings};
use crate::error::Result;

/// Totals for one Pmid node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmidRecord {
    pub pmid_name: AccountName,
    pub stored_count: i64,
    pub stored_total_size: i64,
    pub claimed_available_size: i64,
}

impl PmidRecord {
    /// Record for a node that stores nothing yet.
    pub fn new(pmid_name: AccountName, claimed_available_size: i64) -> Self {
        Self {
            pmid_name,
            stored_count: 0,
            stored_total_size: 0,
            claimed_available_size,
        }
    }

    /// The record, if none of its counters is negative.
    pub fn checked(self) -> Result<Self> {
        checked_size(self.stored_count)?;
        checked_size(self.stored_total_size)?;
        checked_size(self.claimed_available_size)?;
        Ok(self)
    }
}

/// What a resolved Pmid entry did to the element set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementChange {
    Stored { previous: Option<i64> },
    Removed { size: i64 },
    /// Delete of an element that was already gone.
    Absent,
}

/// Stored-element accounting. Never refuses a resolution.
#[derive(Debug, Clone, Default)]
pub struct PmidMergePolicy {
    elements: PmidManagerValue,
}

impl PmidMergePolicy {
    pub fn elements(&self) -> &PmidManagerValue {
        &self.elements
    }
}

impl MergePolicy for PmidMergePolicy {
    type Value = i64;
    type Outcome = ElementChange;
    type Error = Infallible;

    fn resolve(
        &mut self,
        resolution: &Resolution<i64>,
        db: &mut AccountDatabase<i64>,
    ) -> std::result::Result<ElementChange, Infallible> {
        let key = resolution.key;
        match resolution.action {
            Action::Put | Action::Adjust => {
                db.put(
                    key,
                    PersistedRecord::new(resolution.value, resolution.corroboration),
                );
                let previous = self.elements.add(key, resolution.value);
                Ok(ElementChange::Stored { previous })
            }
            Action::Delete => {
                db.remove(&key);
                Ok(match self.elements.delete(&key) {
                    Some(size) => ElementChange::Removed { size },
                    None => ElementChange::Absent,
                })
            }
        }
    }

    fn restore(&mut self, db: &AccountDatabase<i64>) {
        self.elements.clear();
        for (key, record) in db.iter() {
            self.elements.add(*key, record.value);
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PmidTransfer {
    claimed_available_size: i64,
    sync: ByteBuf,
}

/// A Pmid node's account, replicated across its Pmid manager group.
#[derive(Debug)]
pub struct PmidAccount {
    name: AccountName,
    sync: Sync<PmidMergePolicy>,
    claimed_available_size: i64,
}

impl PmidAccount {
    pub fn elements(&self) -> &PmidManagerValue {
        self.sync.policy().elements()
    }

    /// Current totals derived from the element set.
    pub fn record(&self) -> PmidRecord {
        let elements = self.elements();
        PmidRecord {
            pmid_name: self.name,
            stored_count: i64::try_from(elements.len()).unwrap_or(i64::MAX),
            stored_total_size: elements.total_size(),
            claimed_available_size: self.claimed_available_size,
        }
    }

    pub fn set_claimed_available_size(&mut self, size: i64) {
        self.claimed_available_size = size;
    }

    /// Vote that the Pmid node now stores `key`.
    pub fn vote_put(
        &mut self,
        key: DataKey,
        size: i64,
    ) -> (UnresolvedEntry<i64>, Outcome<PmidMergePolicy>) {
        self.sync.add_local_entry(key, Action::Put, size)
    }

    /// Vote that the Pmid node no longer stores `key`.
    pub fn vote_delete(
        &mut self,
        key: DataKey,
    ) -> (UnresolvedEntry<i64>, Outcome<PmidMergePolicy>) {
        let size = self.elements().size_of(&key).unwrap_or(0);
        self.sync.add_local_entry(key, Action::Delete, size)
    }
}

impl Account for PmidAccount {
    type Policy = PmidMergePolicy;

    const PREFIX: &'static str = "pmid";

    fn create(name: AccountName, this_node: NodeId, settings: SyncSettings) -> Self {
        Self {
            name,
            sync: Sync::new(
                PmidMergePolicy::default(),
                this_node,
                settings.quorum,
                settings.retention,
            ),
            claimed_available_size: 0,
        }
    }

    fn name(&self) -> AccountName {
        self.name
    }

    fn sync(&self) -> &Sync<PmidMergePolicy> {
        &self.sync
    }

    fn sync_mut(&mut self) -> &mut Sync<PmidMergePolicy> {
        &mut self.sync
    }

    fn serialise(&self) -> Result<Vec<u8>> {
        let transfer = PmidTransfer {
            claimed_available_size: self.claimed_available_size,
            sync: ByteBuf::from(self.sync.snapshot().serialise()?),
        };
        Ok(bincode::serialize(&transfer)?)
    }

    fn apply_transfer(&mut self, bytes: &[u8]) -> Result<ApplyReport> {
        let transfer: PmidTransfer = bincode::deserialize(bytes)
            .map_err(|e| vault_sync::Error::CorruptSnapshot(e.to_string()))?;
        let snapshot = SyncSnapshot::parse(&transfer.sync)?;
        self.claimed_available_size = self
            .claimed_available_size
            .max(transfer.claimed_available_size);
        Ok(self.sync.apply_snapshot(snapshot))
    }
}
