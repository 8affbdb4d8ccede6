//! Close groups: the replicas responsible for a name.
//!
//! The routing layer hands us a flat membership list. A name's close group
//! is the `group_size` members (this node included) XOR-closest to it.

use crate::{Identity, NodeId};

/// Replicas per close group when no override is configured.
pub const DEFAULT_GROUP_SIZE: usize = 4;

/// Ordered set of nodes closest to `target`, closest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseGroup {
    target: Identity,
    members: Vec<NodeId>,
}

impl CloseGroup {
    /// Select the `group_size` candidates closest to `target`.
    ///
    /// Duplicates are collapsed; ties cannot occur since distinct ids have
    /// distinct XOR distances.
    pub fn compute<I>(target: Identity, candidates: I, group_size: usize) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut members: Vec<NodeId> = candidates.into_iter().collect();
        members.sort_by_key(|n| n.distance_to(&target));
        members.dedup();
        members.truncate(group_size);
        Self { target, members }
    }

    /// The name this group serves.
    pub const fn target(&self) -> &Identity {
        &self.target
    }

    /// Members, closest first.
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.members.contains(node)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members that are not `node` (the peers to broadcast to).
    pub fn peers_of<'a>(&'a self, node: &'a NodeId) -> impl Iterator<Item = &'a NodeId> {
        self.members.iter().filter(move |m| *m != node)
    }

    /// Diff from `self` (old) to `newer`.
    pub fn diff(&self, newer: &CloseGroup) -> CloseGroupDiff {
        membership_diff(&self.members, &newer.members)
    }
}

/// Change in membership between two lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseGroupDiff {
    /// Present in the new list only, in new-list order.
    pub joined: Vec<NodeId>,
    /// Present in the old list only, in old-list order.
    pub left: Vec<NodeId>,
}

impl CloseGroupDiff {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.left.is_empty()
    }

    /// Pair each departed node with the joiner that took its slot.
    ///
    /// Pairing is positional; surplus leavers or joiners are unpaired.
    pub fn replacements(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.left.iter().copied().zip(self.joined.iter().copied())
    }
}

/// Diff two raw membership lists.
pub fn membership_diff(old: &[NodeId], new: &[NodeId]) -> CloseGroupDiff {
    CloseGroupDiff {
        joined: new.iter().filter(|n| !old.contains(n)).copied().collect(),
        left: old.iter().filter(|n| !new.contains(n)).copied().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(first: u8) -> NodeId {
        let mut id = [0u8; 32];
        id[0] = first;
        NodeId(id)
    }

    #[test]
    fn compute_orders_by_distance_and_truncates() {
        let target = Identity([0u8; 32]);
        let group = CloseGroup::compute(
            target,
            [node(0x40), node(0x01), node(0x80), node(0x02), node(0x01)],
            3,
        );
        assert_eq!(group.members(), &[node(0x01), node(0x02), node(0x40)]);
        assert!(group.contains(&node(0x02)));
        assert!(!group.contains(&node(0x80)));
    }

    #[test]
    fn diff_reports_joins_and_leaves() {
        let old = [node(1), node(2), node(3)];
        let new = [node(1), node(3), node(4)];
        let diff = membership_diff(&old, &new);
        assert_eq!(diff.joined, vec![node(4)]);
        assert_eq!(diff.left, vec![node(2)]);
        assert_eq!(diff.replacements().collect::<Vec<_>>(), vec![(node(2), node(4))]);
    }

    #[test]
    fn identical_groups_have_empty_diff() {
        let target = Identity([9u8; 32]);
        let a = CloseGroup::compute(target, [node(1), node(2)], 4);
        let b = CloseGroup::compute(target, [node(2), node(1)], 4);
        assert!(a.diff(&b).is_empty());
    }

    #[test]
    fn unpaired_leaver_has_no_replacement() {
        let diff = membership_diff(&[node(1), node(2)], &[node(1)]);
        assert_eq!(diff.replacements().count(), 0);
        assert_eq!(diff.left, vec![node(2)]);
    }

    #[test]
    fn peers_exclude_self() {
        let group = CloseGroup::compute(Identity([0u8; 32]), [node(1), node(2), node(3)], 4);
        let me = node(2);
        let peers: Vec<_> = group.peers_of(&me).copied().collect();
        assert_eq!(peers, vec![node(1), node(3)]);
    }
}
