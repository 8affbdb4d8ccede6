//! Vault naming layer
//!
//! Every account and every stored element lives at a 32-byte name in the
//! same XOR space as the nodes that hold it. The set of nodes closest to a
//! name is that name's *close group*: the replicas that must corroborate any
//! change to it.
//!
//! # Contents
//!
//! - [`Identity`] / [`AccountName`]: raw 32-byte names (Blake3 output)
//! - [`DataKey`]: the closed set of data variants an account can reference
//! - [`NodeId`]: a vault node's identifier and XOR distance helpers
//! - [`CloseGroup`]: the ordered replica set for a name and churn diffs

mod name;
mod node;
mod close_group;

pub use name::{AccountName, DataKey, DataTag, Identity, UnknownDataTag};
pub use node::NodeId;
pub use close_group::{membership_diff, CloseGroup, CloseGroupDiff, DEFAULT_GROUP_SIZE};

/// Hash arbitrary bytes to an identity using Blake3.
pub fn hash_identity(data: &[u8]) -> Identity {
    Identity(*blake3::hash(data).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_identity_deterministic() {
        assert_eq!(hash_identity(b"chunk"), hash_identity(b"chunk"));
        assert_ne!(hash_identity(b"chunk"), hash_identity(b"other"));
    }
}
