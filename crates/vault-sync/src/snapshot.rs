//! Account snapshots for transfer and archival.
//!
//! Each record and each pending entry is encoded on its own inside the
//! envelope. A damaged item is skipped on parse instead of failing the whole
//! account; only an unreadable envelope is fatal.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use tracing::warn;
use vault_dht::DataKey;

use crate::database::PersistedRecord;
use crate::error::{Error, Result};
use crate::unresolved::UnresolvedEntry;

/// Full sync state of one account: corroborated records plus pending entries,
/// both in key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot<V> {
    pub records: Vec<(DataKey, PersistedRecord<V>)>,
    pub pending: Vec<UnresolvedEntry<V>>,
}

impl<V> Default for SyncSnapshot<V> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            pending: Vec::new(),
        }
    }
}

impl<V> SyncSnapshot<V> {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.pending.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    records: Vec<ByteBuf>,
    pending: Vec<ByteBuf>,
}

impl<V: Serialize> SyncSnapshot<V> {
    /// Encode the snapshot. Equal snapshots always encode to equal bytes.
    pub fn serialise(&self) -> Result<Vec<u8>> {
        let records = self
            .records
            .iter()
            .map(|record| bincode::serialize(record).map(ByteBuf::from))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let pending = self
            .pending
            .iter()
            .map(|entry| entry.serialise().map(ByteBuf::from))
            .collect::<Result<Vec<_>>>()?;
        Ok(bincode::serialize(&Envelope { records, pending })?)
    }
}

impl<V: DeserializeOwned> SyncSnapshot<V> {
    /// Decode a snapshot, skipping damaged items.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::parse_lossy(bytes).map(|(snapshot, _)| snapshot)
    }

    /// Decode a snapshot and report how many damaged items were skipped.
    pub fn parse_lossy(bytes: &[u8]) -> Result<(Self, usize)> {
        let envelope: Envelope =
            bincode::deserialize(bytes).map_err(|e| Error::CorruptSnapshot(e.to_string()))?;

        let mut skipped = 0;
        let mut records = Vec::with_capacity(envelope.records.len());
        for raw in &envelope.records {
            match bincode::deserialize::<(DataKey, PersistedRecord<V>)>(raw) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupt persisted record in snapshot");
                    skipped += 1;
                }
            }
        }

        let mut pending = Vec::with_capacity(envelope.pending.len());
        for raw in &envelope.pending {
            match UnresolvedEntry::parse(raw) {
                Ok(entry) => pending.push(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupt unresolved entry in snapshot");
                    skipped += 1;
                }
            }
        }

        Ok((Self { records, pending }, skipped))
    }
}
