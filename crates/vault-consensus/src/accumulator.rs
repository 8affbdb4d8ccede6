//! Request accumulation.
//!
//! A persona sees the same logical request once per replica that forwards it.
//! The accumulator groups those copies by [`RequestKey`], counts distinct
//! senders that agree on identical content, and reports
//! [`AddResult::QuorumReached`] exactly once per key. Running the handler is
//! left to the caller, which keeps this type free of business logic.
//!
//! # Retention
//!
//! Requests that never reach quorum would otherwise live forever. Entries are
//! dropped after [`AccumulatorConfig::retention`], and once
//! [`AccumulatorConfig::max_requests`] keys are tracked the oldest is evicted
//! to make room. A dispatched request evicted that way leaves its key behind
//! until retention expires, so late copies are still recognised as duplicates.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use vault_dht::{AccountName, NodeId};

use crate::error::{AccumulatorError, Result};
use crate::threshold::{MessageKind, QuorumTable};

/// Correlation id chosen by the request originator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifies one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub kind: MessageKind,
    pub message_id: MessageId,
    pub account: AccountName,
}

impl RequestKey {
    pub const fn new(kind: MessageKind, message_id: MessageId, account: AccountName) -> Self {
        Self {
            kind,
            message_id,
            account,
        }
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{} for {}", self.kind, self.message_id, self.account)
    }
}

/// Blake3 digest of a request's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest(pub [u8; 32]);

impl ContentDigest {
    pub fn of(content: &[u8]) -> Self {
        Self(*blake3::hash(content).as_bytes())
    }
}

/// Outcome of recording one vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    /// Recorded; not enough agreeing senders yet.
    Pending { votes: usize, required: usize },
    /// This vote completed the quorum. Returned once per key.
    QuorumReached { votes: usize },
    /// Repeat of a recorded vote, or any vote after quorum.
    DuplicateIgnored,
}

/// Retention bounds.
#[derive(Debug, Clone, Copy)]
pub struct AccumulatorConfig {
    /// How long a request is tracked after its first vote.
    pub retention: Duration,
    /// Upper bound on tracked requests.
    pub max_requests: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(300),
            max_requests: 10_000,
        }
    }
}

#[derive(Debug)]
struct PendingRequest {
    /// Senders in arrival order with the digest each one voted for.
    votes: Vec<(NodeId, ContentDigest)>,
    required: usize,
    dispatched: bool,
    first_seen: Instant,
    seq: u64,
}

impl PendingRequest {
    fn vote_of(&self, sender: &NodeId) -> Option<&ContentDigest> {
        self.votes.iter().find(|(s, _)| s == sender).map(|(_, d)| d)
    }

    fn agreeing(&self, digest: &ContentDigest) -> usize {
        self.votes.iter().filter(|(_, d)| d == digest).count()
    }
}

/// Deduplicating, quorum-gating request accumulator.
#[derive(Debug)]
pub struct Accumulator {
    table: QuorumTable,
    config: AccumulatorConfig,
    requests: HashMap<RequestKey, PendingRequest>,
    /// Insertion order, for capacity eviction.
    order: BTreeMap<u64, RequestKey>,
    /// Dispatched keys evicted for capacity, with their first-seen time.
    settled: HashMap<RequestKey, Instant>,
    next_seq: u64,
}

impl Accumulator {
    pub fn new(table: QuorumTable, config: AccumulatorConfig) -> Self {
        Self {
            table,
            config,
            requests: HashMap::new(),
            order: BTreeMap::new(),
            settled: HashMap::new(),
            next_seq: 0,
        }
    }

    /// The quorum table in force.
    pub fn table(&self) -> &QuorumTable {
        &self.table
    }

    /// Record `sender`'s vote for `key` with the given content.
    pub fn add_request(
        &mut self,
        key: RequestKey,
        sender: NodeId,
        content: &[u8],
    ) -> Result<AddResult> {
        self.add_request_at(key, sender, content, Instant::now())
    }

    /// [`add_request`](Self::add_request) with an explicit clock reading.
    pub fn add_request_at(
        &mut self,
        key: RequestKey,
        sender: NodeId,
        content: &[u8],
        now: Instant,
    ) -> Result<AddResult> {
        let digest = ContentDigest::of(content);

        if self.settled.contains_key(&key) {
            return Ok(AddResult::DuplicateIgnored);
        }
        if !self.requests.contains_key(&key) {
            self.make_room();
        }
        let required = self.table.required_votes(key.kind);
        let next_seq = &mut self.next_seq;
        let order = &mut self.order;
        let request = self.requests.entry(key).or_insert_with(|| {
            let seq = *next_seq;
            *next_seq += 1;
            order.insert(seq, key);
            PendingRequest {
                votes: Vec::new(),
                required,
                dispatched: false,
                first_seen: now,
                seq,
            }
        });

        match request.vote_of(&sender) {
            Some(existing) if *existing != digest => {
                return Err(AccumulatorError::ConflictingVote { key, sender });
            }
            Some(_) => return Ok(AddResult::DuplicateIgnored),
            None => request.votes.push((sender, digest)),
        }

        if request.dispatched {
            return Ok(AddResult::DuplicateIgnored);
        }

        let votes = request.agreeing(&digest);
        if votes >= request.required {
            request.dispatched = true;
            Ok(AddResult::QuorumReached { votes })
        } else {
            Ok(AddResult::Pending {
                votes,
                required: request.required,
            })
        }
    }

    /// Drop requests first seen more than `retention` before `now`.
    /// Returns how many were evicted.
    pub fn evict_stale(&mut self, now: Instant) -> usize {
        let retention = self.config.retention;
        let stale: Vec<RequestKey> = self
            .requests
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.first_seen) >= retention)
            .map(|(k, _)| *k)
            .collect();
        for key in &stale {
            self.remove(key);
        }
        self.settled
            .retain(|_, first_seen| now.saturating_duration_since(*first_seen) < retention);
        stale.len()
    }

    /// Whether the handler for `key` has already been released.
    pub fn is_dispatched(&self, key: &RequestKey) -> bool {
        self.settled.contains_key(key) || self.requests.get(key).is_some_and(|r| r.dispatched)
    }

    /// Distinct senders recorded for `key`.
    pub fn sender_count(&self, key: &RequestKey) -> usize {
        self.requests.get(key).map_or(0, |r| r.votes.len())
    }

    /// Number of tracked requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn make_room(&mut self) {
        while self.requests.len() >= self.config.max_requests.max(1) {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            if let Some(request) = self.requests.remove(&oldest) {
                if request.dispatched {
                    self.settled.insert(oldest, request.first_seen);
                }
            }
        }
    }

    fn remove(&mut self, key: &RequestKey) {
        if let Some(request) = self.requests.remove(key) {
            self.order.remove(&request.seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vault_dht::Identity;

    fn node(seed: u8) -> NodeId {
        let mut id = [0u8; 32];
        id[0] = seed;
        NodeId(id)
    }

    fn key(id: u64) -> RequestKey {
        RequestKey::new(
            MessageKind::PutRequest,
            MessageId(id),
            AccountName(Identity([1u8; 32])),
        )
    }

    fn accumulator(threshold: usize) -> Accumulator {
        Accumulator::new(
            QuorumTable::single().with_required(MessageKind::PutRequest, threshold),
            AccumulatorConfig::default(),
        )
    }

    #[test]
    fn quorum_reached_exactly_once() {
        let mut acc = accumulator(2);
        assert_eq!(
            acc.add_request(key(1), node(1), b"put").unwrap(),
            AddResult::Pending { votes: 1, required: 2 }
        );
        assert_eq!(
            acc.add_request(key(1), node(2), b"put").unwrap(),
            AddResult::QuorumReached { votes: 2 }
        );
        assert_eq!(
            acc.add_request(key(1), node(3), b"put").unwrap(),
            AddResult::DuplicateIgnored
        );
        assert!(acc.is_dispatched(&key(1)));
        // Late matching votes are still recorded.
        assert_eq!(acc.sender_count(&key(1)), 3);
    }

    #[test]
    fn same_sender_same_content_is_duplicate() {
        let mut acc = accumulator(2);
        acc.add_request(key(1), node(1), b"put").unwrap();
        assert_eq!(
            acc.add_request(key(1), node(1), b"put").unwrap(),
            AddResult::DuplicateIgnored
        );
        assert_eq!(acc.sender_count(&key(1)), 1);
    }

    #[test]
    fn conflicting_vote_rejected_and_first_stands() {
        let mut acc = accumulator(2);
        acc.add_request(key(1), node(1), b"a").unwrap();
        let err = acc.add_request(key(1), node(1), b"b").unwrap_err();
        assert!(matches!(err, AccumulatorError::ConflictingVote { .. }));
        // Quorum is computed over the first vote's content.
        assert_eq!(
            acc.add_request(key(1), node(2), b"a").unwrap(),
            AddResult::QuorumReached { votes: 2 }
        );
    }

    #[test]
    fn different_content_from_different_senders_does_not_combine() {
        let mut acc = accumulator(2);
        acc.add_request(key(1), node(1), b"a").unwrap();
        assert_eq!(
            acc.add_request(key(1), node(2), b"b").unwrap(),
            AddResult::Pending { votes: 1, required: 2 }
        );
        assert_eq!(
            acc.add_request(key(1), node(3), b"b").unwrap(),
            AddResult::QuorumReached { votes: 2 }
        );
    }

    #[test]
    fn keys_are_independent() {
        let mut acc = accumulator(1);
        assert!(matches!(
            acc.add_request(key(1), node(1), b"x").unwrap(),
            AddResult::QuorumReached { .. }
        ));
        assert!(matches!(
            acc.add_request(key(2), node(1), b"x").unwrap(),
            AddResult::QuorumReached { .. }
        ));
    }

    #[test]
    fn stale_requests_are_evicted() {
        let mut acc = Accumulator::new(
            QuorumTable::single().with_required(MessageKind::PutRequest, 3),
            AccumulatorConfig {
                retention: Duration::from_secs(10),
                max_requests: 100,
            },
        );
        let start = Instant::now();
        acc.add_request_at(key(1), node(1), b"x", start).unwrap();
        acc.add_request_at(key(2), node(1), b"x", start + Duration::from_secs(8))
            .unwrap();

        assert_eq!(acc.evict_stale(start + Duration::from_secs(5)), 0);
        assert_eq!(acc.evict_stale(start + Duration::from_secs(10)), 1);
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.sender_count(&key(1)), 0);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut acc = Accumulator::new(
            QuorumTable::single().with_required(MessageKind::PutRequest, 2),
            AccumulatorConfig {
                retention: Duration::from_secs(60),
                max_requests: 2,
            },
        );
        acc.add_request(key(1), node(1), b"x").unwrap();
        acc.add_request(key(2), node(1), b"x").unwrap();
        acc.add_request(key(3), node(1), b"x").unwrap();
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.sender_count(&key(1)), 0);
        assert_eq!(acc.sender_count(&key(3)), 1);
    }

    #[test]
    fn capacity_eviction_keeps_dispatched_keys() {
        let mut acc = Accumulator::new(
            QuorumTable::single(),
            AccumulatorConfig {
                retention: Duration::from_secs(60),
                max_requests: 2,
            },
        );
        let start = Instant::now();
        assert!(matches!(
            acc.add_request_at(key(1), node(1), b"x", start).unwrap(),
            AddResult::QuorumReached { votes: 1 }
        ));
        acc.add_request_at(key(2), node(1), b"x", start).unwrap();
        acc.add_request_at(key(3), node(1), b"x", start).unwrap();
        assert_eq!(acc.len(), 2);
        assert!(acc.is_dispatched(&key(1)));

        // A late copy of the evicted request must not run the handler again.
        assert_eq!(
            acc.add_request_at(key(1), node(2), b"x", start).unwrap(),
            AddResult::DuplicateIgnored
        );
        assert_eq!(acc.len(), 2);

        acc.evict_stale(start + Duration::from_secs(60));
        assert!(!acc.is_dispatched(&key(1)));
        assert!(acc.is_empty());
    }

    proptest! {
        #[test]
        fn fires_iff_threshold_distinct_senders(
            threshold in 1usize..6,
            senders in proptest::collection::vec(0u8..8, 0..24),
        ) {
            let mut acc = accumulator(threshold);
            let mut fired = 0;
            let mut distinct = std::collections::BTreeSet::new();
            for s in senders {
                distinct.insert(s);
                let result = acc.add_request(key(7), node(s), b"same").unwrap();
                if let AddResult::QuorumReached { votes } = result {
                    fired += 1;
                    prop_assert_eq!(votes, threshold);
                    prop_assert_eq!(distinct.len(), threshold);
                }
            }
            prop_assert!(fired <= 1);
            prop_assert_eq!(fired == 1, distinct.len() >= threshold);
        }
    }
}
