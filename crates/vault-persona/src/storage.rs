//! Archived accounts in RocksDB.
//!
//! An account is archived when this node leaves its close group and
//! restored when the node starts again. Keys are `<prefix>:<hex name>`.

use std::path::Path;

use rocksdb::{Options, DB};
use tracing::warn;
use vault_dht::{AccountName, Identity};

use crate::error::Result;

/// Storage backend for archived accounts.
pub struct AccountStore {
    db: DB,
}

impl std::fmt::Debug for AccountStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountStore")
            .field("path", &self.db.path())
            .finish()
    }
}

fn account_key(prefix: &str, name: &AccountName) -> String {
    format!("{}:{}", prefix, hex::encode(name.identity().as_bytes()))
}

impl AccountStore {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        std::fs::create_dir_all(path.as_ref())?;
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }

    /// Store an account, replacing any earlier archive.
    pub fn archive(&self, prefix: &str, name: &AccountName, account: &[u8]) -> Result<()> {
        self.db.put(account_key(prefix, name).as_bytes(), account)?;
        Ok(())
    }

    /// Get an archived account.
    pub fn load(&self, prefix: &str, name: &AccountName) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(account_key(prefix, name).as_bytes())?)
    }

    /// Delete an archived account.
    pub fn remove(&self, prefix: &str, name: &AccountName) -> Result<()> {
        self.db.delete(account_key(prefix, name).as_bytes())?;
        Ok(())
    }

    /// List all archived accounts under `prefix`.
    ///
    /// Keys that do not name an account are skipped.
    pub fn load_all(&self, prefix: &str) -> Result<Vec<(AccountName, Vec<u8>)>> {
        let prefix = format!("{}:", prefix);
        let mut accounts = Vec::new();

        let iter = self.db.prefix_iterator(prefix.as_bytes());
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            match parse_name(&key[prefix.len()..]) {
                Some(name) => accounts.push((name, value.to_vec())),
                None => {
                    warn!(key = %String::from_utf8_lossy(&key), "Skipping malformed archive key");
                }
            }
        }

        Ok(accounts)
    }
}

fn parse_name(raw: &[u8]) -> Option<AccountName> {
    let bytes: [u8; 32] = hex::decode(raw).ok()?.try_into().ok()?;
    Some(AccountName(Identity::from_bytes(bytes)))
}
