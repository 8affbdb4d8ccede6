//! Identity, account and data names.

use serde::{Deserialize, Serialize};

/// A raw 32-byte name (Blake3 hash).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(pub [u8; 32]);

impl Identity {
    /// Create an identity from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}...", &self.to_hex()[..8])
    }
}

/// Name of an account held by a persona (a Maid or a Pmid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountName(pub Identity);

impl AccountName {
    pub const fn identity(&self) -> &Identity {
        &self.0
    }
}

impl From<Identity> for AccountName {
    fn from(id: Identity) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Type tag of a data variant. Values are persisted; never reorder.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataTag {
    ImmutableData = 0,
    MutableData = 1,
}

/// Returned when a persisted tag byte names no known data variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownDataTag(pub u8);

impl std::fmt::Display for UnknownDataTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown data tag {}", self.0)
    }
}

impl std::error::Error for UnknownDataTag {}

impl TryFrom<u8> for DataTag {
    type Error = UnknownDataTag;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DataTag::ImmutableData),
            1 => Ok(DataTag::MutableData),
            other => Err(UnknownDataTag(other)),
        }
    }
}

/// A record name inside an account: the data variant plus its identity.
///
/// The set of variants is closed; every consumer matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataKey {
    /// Content-addressed chunk.
    ImmutableData(Identity),
    /// Owner-signed, versioned data.
    MutableData(Identity),
}

impl DataKey {
    /// Build a key from a tag and identity.
    pub const fn new(tag: DataTag, identity: Identity) -> Self {
        match tag {
            DataTag::ImmutableData => DataKey::ImmutableData(identity),
            DataTag::MutableData => DataKey::MutableData(identity),
        }
    }

    /// Type tag of this key.
    pub const fn tag(&self) -> DataTag {
        match self {
            DataKey::ImmutableData(_) => DataTag::ImmutableData,
            DataKey::MutableData(_) => DataTag::MutableData,
        }
    }

    /// Identity of the referenced data.
    pub const fn identity(&self) -> &Identity {
        match self {
            DataKey::ImmutableData(id) | DataKey::MutableData(id) => id,
        }
    }
}

impl std::fmt::Display for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataKey::ImmutableData(id) => write!(f, "immutable:{}", id),
            DataKey::MutableData(id) => write!(f, "mutable:{}", id),
        }
    }
}
