//! Unresolved entries: pending mutations awaiting corroboration.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use vault_dht::{DataKey, NodeId};

use crate::error::{Error, Result};

/// Requested mutation kind. Values are persisted; never reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    Put,
    Delete,
    Adjust,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// One pending mutation and the replicas that voted for it.
///
/// A voter holds at most one vote: voting again replaces the earlier value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedEntry<V> {
    pub key: DataKey,
    pub action: Action,
    votes: BTreeMap<NodeId, V>,
}

impl<V> UnresolvedEntry<V> {
    /// Entry with no votes yet.
    pub fn new(key: DataKey, action: Action) -> Self {
        Self {
            key,
            action,
            votes: BTreeMap::new(),
        }
    }

    /// Entry carrying a single vote.
    pub fn with_vote(key: DataKey, action: Action, voter: NodeId, value: V) -> Self {
        let mut entry = Self::new(key, action);
        entry.votes.insert(voter, value);
        entry
    }

    /// (DataKey, Action) pair this entry is pending under.
    pub fn entry_key(&self) -> (DataKey, Action) {
        (self.key, self.action)
    }

    /// Record a vote. Returns true if `voter` had not voted before.
    pub fn add_vote(&mut self, voter: NodeId, value: V) -> bool {
        self.votes.insert(voter, value).is_none()
    }

    /// Fold another entry's votes into this one. Returns new voters added.
    pub fn merge(&mut self, other: UnresolvedEntry<V>) -> usize {
        let mut added = 0;
        for (voter, value) in other.votes {
            if self.add_vote(voter, value) {
                added += 1;
            }
        }
        added
    }

    pub fn has_vote(&self, voter: &NodeId) -> bool {
        self.votes.contains_key(voter)
    }

    /// Number of distinct voters.
    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn votes(&self) -> impl Iterator<Item = (&NodeId, &V)> {
        self.votes.iter()
    }

    /// Move `old`'s vote to `new`.
    ///
    /// Does nothing if `old` has not voted, or if `new` already holds a vote
    /// of its own: a re-attribution never merges two votes into one.
    pub fn replace_voter(&mut self, old: &NodeId, new: NodeId) -> bool {
        if self.votes.contains_key(&new) {
            return false;
        }
        match self.votes.remove(old) {
            Some(value) => {
                self.votes.insert(new, value);
                true
            }
            None => false,
        }
    }
}

impl<V: Ord> UnresolvedEntry<V> {
    /// The value backed by the most voters, if that support reaches `quorum`.
    ///
    /// Ties are broken towards the smaller value so every replica picks the
    /// same one.
    pub fn corroborated(&self, quorum: usize) -> Option<(&V, usize)> {
        let mut support: BTreeMap<&V, usize> = BTreeMap::new();
        for value in self.votes.values() {
            *support.entry(value).or_default() += 1;
        }
        let best = support.into_iter().fold(None, |best: Option<(&V, usize)>, (v, n)| {
            match best {
                Some((_, m)) if m >= n => best,
                _ => Some((v, n)),
            }
        })?;
        (best.1 >= quorum.max(1)).then_some(best)
    }
}

impl<V: Serialize> UnresolvedEntry<V> {
    /// Encode for transfer or synchronisation.
    pub fn serialise(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

impl<V: DeserializeOwned> UnresolvedEntry<V> {
    /// Decode an entry produced by [`serialise`](Self::serialise).
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::CorruptSnapshot(e.to_string()))
    }
}
