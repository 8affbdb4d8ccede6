//! Stored-element set held by a Pmid manager for one Pmid node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vault_dht::DataKey;

use crate::error::Result;

/// Elements a Pmid node currently stores, with their sizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmidManagerValue {
    elements: BTreeMap<DataKey, i64>,
}

impl PmidManagerValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an element. An existing key takes the new size.
    pub fn add(&mut self, key: DataKey, size: i64) -> Option<i64> {
        self.elements.insert(key, size)
    }

    /// Remove an element. Absent keys are not an error.
    pub fn delete(&mut self, key: &DataKey) -> Option<i64> {
        self.elements.remove(key)
    }

    pub fn size_of(&self, key: &DataKey) -> Option<i64> {
        self.elements.get(key).copied()
    }

    pub fn contains(&self, key: &DataKey) -> bool {
        self.elements.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Sum of element sizes, saturating at `i64::MAX`.
    pub fn total_size(&self) -> i64 {
        self.elements
            .values()
            .fold(0i64, |total, size| total.saturating_add(*size))
    }

    /// Elements in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&DataKey, &i64)> {
        self.elements.iter()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }

    /// Encode the full set. Key order makes the encoding canonical.
    pub fn serialise(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| vault_sync::Error::CorruptSnapshot(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use vault_dht::Identity;

    fn key(seed: u8) -> DataKey {
        DataKey::ImmutableData(Identity([seed; 32]))
    }

    #[test]
    fn add_overwrites_size() {
        let mut value = PmidManagerValue::new();
        assert_eq!(value.add(key(1), 100), None);
        assert_eq!(value.add(key(1), 120), Some(100));
        assert_eq!(value.len(), 1);
        assert_eq!(value.total_size(), 120);
    }

    #[test]
    fn total_size_saturates() {
        let mut value = PmidManagerValue::new();
        value.add(key(1), i64::MAX);
        value.add(key(2), 10);
        assert_eq!(value.total_size(), i64::MAX);
    }

    #[test]
    fn delete_absent_is_noop() {
        let mut value = PmidManagerValue::new();
        value.add(key(1), 10);
        assert_eq!(value.delete(&key(2)), None);
        assert_eq!(value.delete(&key(1)), Some(10));
        assert_eq!(value.delete(&key(1)), None);
        assert!(value.is_empty());
    }

    #[test]
    fn serialise_is_byte_exact() {
        let mut value = PmidManagerValue::new();
        value.add(key(3), 30);
        value.add(DataKey::MutableData(Identity([1; 32])), 7);
        value.add(key(1), 10);
        let bytes = value.serialise().unwrap();
        let parsed = PmidManagerValue::parse(&bytes).unwrap();
        assert_eq!(parsed, value);
        assert_eq!(parsed.serialise().unwrap(), bytes);
    }

    #[test]
    fn parse_rejects_truncated_input() {
        let mut value = PmidManagerValue::new();
        value.add(key(1), 10);
        let bytes = value.serialise().unwrap();
        assert!(matches!(
            PmidManagerValue::parse(&bytes[..bytes.len() - 3]),
            Err(Error::Sync(vault_sync::Error::CorruptSnapshot(_)))
        ));
    }
}
