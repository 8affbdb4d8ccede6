//! Sync engine - folds corroborated entries into an account database.
//!
//! Every replica in a close group votes on each mutation it sees and shares
//! that vote with its peers. A [`Sync`] collects those votes per
//! (DataKey, Action) and, once enough replicas agree on one value, hands the
//! value to the account's [`MergePolicy`]. The policy is the only code that
//! writes to the [`AccountDatabase`].
//!
//! # Convergence
//!
//! Replicas may see votes in different orders and reach quorum through
//! different voters. Because a policy only looks at the key, the action and
//! the agreed value, every replica that resolves an entry produces the same
//! database content.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};
use vault_dht::{DataKey, NodeId};

use crate::database::{AccountDatabase, PersistedRecord};
use crate::snapshot::SyncSnapshot;
use crate::unresolved::{Action, UnresolvedEntry};

/// A corroborated mutation ready to be merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution<V> {
    pub key: DataKey,
    pub action: Action,
    pub value: V,
    /// Replicas that agreed on `value`.
    pub corroboration: u32,
}

/// Persona-specific rules turning a resolution into a database mutation.
///
/// `resolve` must be deterministic in its inputs. Applying the same
/// resolution twice must leave the database as applying it once would.
pub trait MergePolicy {
    /// Vote payload (a cost, a size, ...).
    type Value: Clone + Ord + Debug + Serialize + DeserializeOwned;
    /// What a successful merge reports back.
    type Outcome: Debug;
    /// Why a merge was refused.
    type Error: std::error::Error;

    /// Apply one resolution. On error the database must be left untouched.
    fn resolve(
        &mut self,
        resolution: &Resolution<Self::Value>,
        db: &mut AccountDatabase<Self::Value>,
    ) -> Result<Self::Outcome, Self::Error>;

    /// Rebuild any aggregates after records were loaded in bulk.
    fn restore(&mut self, _db: &AccountDatabase<Self::Value>) {}
}

/// Result of adding an entry.
#[derive(Debug)]
pub enum SyncOutcome<V, O, E> {
    /// Recorded; not yet corroborated.
    Pending { votes: usize, required: usize },
    /// Corroborated and merged.
    Resolved { value: V, outcome: O },
    /// Corroborated but refused by the merge policy. The entry is retired.
    Rejected { value: V, error: E },
}

impl<V, O, E> SyncOutcome<V, O, E> {
    pub fn is_pending(&self) -> bool {
        matches!(self, SyncOutcome::Pending { .. })
    }
}

/// Outcome type for a given policy.
pub type Outcome<P> =
    SyncOutcome<<P as MergePolicy>::Value, <P as MergePolicy>::Outcome, <P as MergePolicy>::Error>;

/// Counters from applying a transferred snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Records taken from the snapshot.
    pub records: usize,
    /// Pending entries replayed as votes.
    pub replayed: usize,
    /// Replayed entries that reached quorum and merged.
    pub resolved: usize,
    /// Replayed entries that reached quorum and were refused.
    pub rejected: usize,
}

#[derive(Debug)]
struct Pending<V> {
    entry: UnresolvedEntry<V>,
    first_seen: Instant,
}

/// Pending entries plus the database they resolve into.
#[derive(Debug)]
pub struct Sync<P: MergePolicy> {
    policy: P,
    db: AccountDatabase<P::Value>,
    pending: BTreeMap<(DataKey, Action), Pending<P::Value>>,
    this_node: NodeId,
    quorum: usize,
    retention: Duration,
}

impl<P: MergePolicy> Sync<P> {
    /// Create an engine voting as `this_node` and resolving at `quorum`.
    pub fn new(policy: P, this_node: NodeId, quorum: usize, retention: Duration) -> Self {
        Self {
            policy,
            db: AccountDatabase::new(),
            pending: BTreeMap::new(),
            this_node,
            quorum: quorum.max(1),
            retention,
        }
    }

    pub fn this_node(&self) -> &NodeId {
        &self.this_node
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn database(&self) -> &AccountDatabase<P::Value> {
        &self.db
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Mutable access to policy state (e.g. capacity limits).
    /// The database stays out of reach.
    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    /// Record this node's own vote and return the entry to share with peers.
    pub fn add_local_entry(
        &mut self,
        key: DataKey,
        action: Action,
        value: P::Value,
    ) -> (UnresolvedEntry<P::Value>, Outcome<P>) {
        let entry = UnresolvedEntry::with_vote(key, action, self.this_node, value);
        let outcome = self.add_unresolved_entry(entry.clone());
        (entry, outcome)
    }

    /// Merge an entry's votes and resolve it if now corroborated.
    pub fn add_unresolved_entry(&mut self, entry: UnresolvedEntry<P::Value>) -> Outcome<P> {
        self.add_unresolved_entry_at(entry, Instant::now())
    }

    /// [`add_unresolved_entry`](Self::add_unresolved_entry) with an explicit clock.
    pub fn add_unresolved_entry_at(
        &mut self,
        entry: UnresolvedEntry<P::Value>,
        now: Instant,
    ) -> Outcome<P> {
        let entry_key = entry.entry_key();
        let slot = self.pending.entry(entry_key).or_insert_with(|| Pending {
            entry: UnresolvedEntry::new(entry_key.0, entry_key.1),
            first_seen: now,
        });
        slot.entry.merge(entry);

        let Some((value, votes)) = slot
            .entry
            .corroborated(self.quorum)
            .map(|(v, n)| (v.clone(), n))
        else {
            let votes = slot.entry.vote_count();
            trace!(key = %entry_key.0, action = %entry_key.1, votes, "Entry pending");
            return SyncOutcome::Pending {
                votes,
                required: self.quorum,
            };
        };

        self.pending.remove(&entry_key);
        let resolution = Resolution {
            key: entry_key.0,
            action: entry_key.1,
            value,
            corroboration: u32::try_from(votes).unwrap_or(u32::MAX),
        };

        match self.policy.resolve(&resolution, &mut self.db) {
            Ok(outcome) => {
                debug!(
                    key = %resolution.key,
                    action = %resolution.action,
                    votes,
                    "Entry resolved"
                );
                SyncOutcome::Resolved {
                    value: resolution.value,
                    outcome,
                }
            }
            Err(error) => {
                warn!(
                    key = %resolution.key,
                    action = %resolution.action,
                    error = %error,
                    "Merge refused corroborated entry"
                );
                SyncOutcome::Rejected {
                    value: resolution.value,
                    error,
                }
            }
        }
    }

    /// Pending entries in key order.
    pub fn unresolved_data(&self) -> Vec<UnresolvedEntry<P::Value>> {
        self.pending.values().map(|p| p.entry.clone()).collect()
    }

    /// Pending entries this node has voted on, for re-broadcast to peers.
    pub fn local_unresolved_data(&self) -> Vec<UnresolvedEntry<P::Value>> {
        self.pending
            .values()
            .filter(|p| p.entry.has_vote(&self.this_node))
            .map(|p| p.entry.clone())
            .collect()
    }

    /// Total distinct votes across pending entries.
    pub fn pending_votes(&self) -> usize {
        self.pending.values().map(|p| p.entry.vote_count()).sum()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Re-attribute `old`'s votes to `new` on every pending entry.
    ///
    /// Vote counts are unchanged and no entry is re-evaluated, so nothing
    /// resolves as a side effect. Returns the number of entries touched.
    pub fn replace_node(&mut self, old: &NodeId, new: NodeId) -> usize {
        let touched = self
            .pending
            .values_mut()
            .map(|p| p.entry.replace_voter(old, new))
            .filter(|touched| *touched)
            .count();
        if touched > 0 {
            debug!(%old, %new, touched, "Re-attributed pending votes");
        }
        touched
    }

    /// Drop entries older than the retention window. Returns how many.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let retention = self.retention;
        let before = self.pending.len();
        self.pending
            .retain(|_, p| now.saturating_duration_since(p.first_seen) < retention);
        let evicted = before - self.pending.len();
        if evicted > 0 {
            debug!(evicted, "Evicted stale unresolved entries");
        }
        evicted
    }

    /// Records and pending entries, for transfer or archival.
    pub fn snapshot(&self) -> SyncSnapshot<P::Value> {
        SyncSnapshot {
            records: self
                .db
                .iter()
                .map(|(k, r)| (*k, r.clone()))
                .collect(),
            pending: self.unresolved_data(),
        }
    }

    /// Merge a transferred snapshot.
    ///
    /// Records are facts another replica already resolved: they are taken
    /// as-is without re-voting. Where both sides hold a record for the same
    /// key, the one with higher (corroboration, value) wins, so applying the
    /// same snapshot twice changes nothing. Pending entries are replayed as
    /// ordinary votes.
    pub fn apply_snapshot(&mut self, snapshot: SyncSnapshot<P::Value>) -> ApplyReport {
        let mut report = ApplyReport::default();

        for (key, incoming) in snapshot.records {
            let keep_existing = self.db.get(&key).is_some_and(|existing| {
                (existing.corroboration, &existing.value)
                    >= (incoming.corroboration, &incoming.value)
            });
            if !keep_existing {
                self.db.put(key, PersistedRecord::new(incoming.value, incoming.corroboration));
                report.records += 1;
            }
        }
        self.policy.restore(&self.db);

        for entry in snapshot.pending {
            report.replayed += 1;
            match self.add_unresolved_entry(entry) {
                SyncOutcome::Pending { .. } => {}
                SyncOutcome::Resolved { .. } => report.resolved += 1,
                SyncOutcome::Rejected { .. } => report.rejected += 1,
            }
        }

        debug!(
            records = report.records,
            replayed = report.replayed,
            resolved = report.resolved,
            "Applied transferred snapshot"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vault_dht::Identity;

    /// Last-value-wins policy; deletes of absent keys fail.
    #[derive(Debug, Default)]
    struct Overwrite {
        restored: usize,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("missing")]
    struct Missing;

    impl MergePolicy for Overwrite {
        type Value = i64;
        type Outcome = ();
        type Error = Missing;

        fn resolve(
            &mut self,
            r: &Resolution<i64>,
            db: &mut AccountDatabase<i64>,
        ) -> Result<(), Missing> {
            match r.action {
                Action::Put | Action::Adjust => {
                    db.put(r.key, PersistedRecord::new(r.value, r.corroboration));
                    Ok(())
                }
                Action::Delete => db.remove(&r.key).map(|_| ()).ok_or(Missing),
            }
        }

        fn restore(&mut self, db: &AccountDatabase<i64>) {
            self.restored = db.len();
        }
    }

    fn node(seed: u8) -> NodeId {
        NodeId([seed; 32])
    }

    fn data(seed: u8) -> DataKey {
        DataKey::ImmutableData(Identity([seed; 32]))
    }

    fn vote(key: u8, voter: u8, value: i64) -> UnresolvedEntry<i64> {
        UnresolvedEntry::with_vote(data(key), Action::Put, node(voter), value)
    }

    fn engine(quorum: usize) -> Sync<Overwrite> {
        Sync::new(Overwrite::default(), node(0), quorum, Duration::from_secs(60))
    }

    #[test]
    fn resolves_at_quorum_and_clears_entry() {
        let mut sync = engine(2);
        assert!(sync.add_unresolved_entry(vote(1, 1, 50)).is_pending());
        assert!(matches!(
            sync.add_unresolved_entry(vote(1, 2, 50)),
            SyncOutcome::Resolved { value: 50, .. }
        ));
        assert_eq!(sync.pending_len(), 0);
        assert_eq!(sync.database().get(&data(1)).unwrap().corroboration, 2);
    }

    #[test]
    fn same_voter_twice_does_not_resolve() {
        let mut sync = engine(2);
        sync.add_unresolved_entry(vote(1, 1, 50));
        assert!(sync.add_unresolved_entry(vote(1, 1, 50)).is_pending());
        assert!(sync.database().is_empty());
    }

    #[test]
    fn rejected_merge_retires_entry_and_leaves_db() {
        let mut sync = engine(1);
        let entry = UnresolvedEntry::with_vote(data(4), Action::Delete, node(1), 0);
        assert!(matches!(
            sync.add_unresolved_entry(entry),
            SyncOutcome::Rejected { .. }
        ));
        assert_eq!(sync.pending_len(), 0);
        assert!(sync.database().is_empty());
    }

    #[test]
    fn local_entry_carries_own_vote() {
        let mut sync = engine(2);
        let (entry, outcome) = sync.add_local_entry(data(1), Action::Put, 7);
        assert!(outcome.is_pending());
        assert!(entry.has_vote(&node(0)));
        assert_eq!(sync.local_unresolved_data(), vec![entry]);
    }

    #[test]
    fn three_replicas_converge_through_different_pairs() {
        let pairs = [(1u8, 2u8), (2, 3), (1, 3)];
        let dbs: Vec<_> = pairs
            .iter()
            .map(|&(a, b)| {
                let mut sync = engine(2);
                sync.add_unresolved_entry(vote(9, a, 300));
                sync.add_unresolved_entry(vote(9, b, 300));
                sync.database().clone()
            })
            .collect();
        assert_eq!(dbs[0], dbs[1]);
        assert_eq!(dbs[1], dbs[2]);
        assert_eq!(dbs[0].get(&data(9)).unwrap().value, 300);
    }

    #[test]
    fn stale_entries_evicted() {
        let mut sync = engine(3);
        let start = Instant::now();
        sync.add_unresolved_entry_at(vote(1, 1, 5), start);
        sync.add_unresolved_entry_at(vote(2, 1, 5), start + Duration::from_secs(50));
        assert_eq!(sync.evict_stale(start + Duration::from_secs(60)), 1);
        assert_eq!(sync.pending_len(), 1);
    }

    #[test]
    fn snapshot_roundtrip_through_bytes() {
        let mut sync = engine(2);
        sync.add_unresolved_entry(vote(1, 1, 10));
        sync.add_unresolved_entry(vote(1, 2, 10));
        sync.add_unresolved_entry(vote(2, 1, 20));
        let snapshot = sync.snapshot();
        let bytes = snapshot.serialise().unwrap();
        assert_eq!(SyncSnapshot::<i64>::parse(&bytes).unwrap(), snapshot);
    }

    #[test]
    fn apply_snapshot_is_idempotent() {
        let mut source = engine(2);
        source.add_unresolved_entry(vote(1, 1, 10));
        source.add_unresolved_entry(vote(1, 2, 10));
        source.add_unresolved_entry(vote(2, 1, 20));
        let snapshot = source.snapshot();

        let mut target = engine(2);
        let first = target.apply_snapshot(snapshot.clone());
        assert_eq!(first.records, 1);
        assert_eq!(first.replayed, 1);
        assert_eq!(target.policy().restored, 1);

        let second = target.apply_snapshot(snapshot);
        assert_eq!(second.records, 0);
        assert_eq!(target.database(), source.database());
        assert_eq!(target.pending_votes(), 1);
    }

    #[test]
    fn replayed_pending_vote_can_complete_quorum() {
        let mut source = engine(2);
        source.add_unresolved_entry(vote(5, 1, 10));

        let mut target = engine(2);
        target.add_unresolved_entry(vote(5, 2, 10));
        let report = target.apply_snapshot(source.snapshot());
        assert_eq!(report.resolved, 1);
        assert!(target.database().contains(&data(5)));
    }

    #[test]
    fn replace_node_moves_votes_without_resolving() {
        let mut sync = engine(2);
        sync.add_unresolved_entry(vote(1, 1, 10));
        assert_eq!(sync.replace_node(&node(1), node(2)), 1);
        assert_eq!(sync.pending_votes(), 1);
        assert!(sync.database().is_empty());
        // A later vote from the replacement is a revote, not a second vote.
        assert!(sync.add_unresolved_entry(vote(1, 2, 10)).is_pending());
    }

    proptest! {
        #[test]
        fn replace_node_conserves_votes(
            votes in proptest::collection::vec((0u8..6, 1u8..6), 0..30),
            old in 1u8..6,
            new in 1u8..8,
        ) {
            let mut sync = engine(10);
            for (key, voter) in votes {
                sync.add_unresolved_entry(vote(key, voter, 1));
            }
            let before = sync.pending_votes();
            let pending_before = sync.pending_len();
            sync.replace_node(&node(old), node(new));
            prop_assert_eq!(sync.pending_votes(), before);
            prop_assert_eq!(sync.pending_len(), pending_before);
            prop_assert!(sync.database().is_empty());
        }
    }
}
