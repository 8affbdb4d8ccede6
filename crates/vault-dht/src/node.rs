//! Vault node identifiers.

use serde::{Deserialize, Serialize};

use crate::Identity;

/// Unique node identifier (256-bit hash of the node's public key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The node id viewed as a name in XOR space.
    pub const fn as_identity(&self) -> Identity {
        Identity(self.0)
    }

    /// XOR distance to a name. Byte-wise comparison of the result orders
    /// nodes by closeness.
    pub fn distance_to(&self, target: &Identity) -> [u8; 32] {
        let mut result = [0u8; 32];
        for (i, out) in result.iter_mut().enumerate() {
            *out = self.0[i] ^ target.0[i];
        }
        result
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}...", &self.to_hex()[..8])
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
    fn distance_to_self_is_zero() {
        let n = node(0x5a);
        assert_eq!(n.distance_to(&n.as_identity()), [0u8; 32]);
    }

    #[test]
    fn distance_orders_by_xor_metric() {
        let target = Identity([0u8; 32]);
        assert!(node(0x01).distance_to(&target) < node(0x80).distance_to(&target));
        assert_eq!(node(0x81).distance_to(&node(0x80).as_identity())[0], 0x01);
    }
}
