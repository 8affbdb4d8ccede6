//! Per-account database of corroborated records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vault_dht::DataKey;

/// A corroborated value and how many replicas backed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord<V> {
    pub value: V,
    /// Distinct voters at resolution time.
    pub corroboration: u32,
}

impl<V> PersistedRecord<V> {
    pub fn new(value: V, corroboration: u32) -> Self {
        Self {
            value,
            corroboration,
        }
    }
}

/// Records for one account owner, keyed by data key.
///
/// Only merge policies write here; a [`Sync`](crate::Sync) hands out shared
/// references only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDatabase<V> {
    records: BTreeMap<DataKey, PersistedRecord<V>>,
}

impl<V> Default for AccountDatabase<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> AccountDatabase<V> {
    /// Create an empty database.
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &DataKey) -> Option<&PersistedRecord<V>> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &DataKey) -> bool {
        self.records.contains_key(key)
    }

    /// Insert or replace a record. Returns the previous one.
    pub fn put(&mut self, key: DataKey, record: PersistedRecord<V>) -> Option<PersistedRecord<V>> {
        self.records.insert(key, record)
    }

    pub fn remove(&mut self, key: &DataKey) -> Option<PersistedRecord<V>> {
        self.records.remove(key)
    }

    /// Records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&DataKey, &PersistedRecord<V>)> {
        self.records.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &DataKey> {
        self.records.keys()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
