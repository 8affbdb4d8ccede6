//! Vault node configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;
use vault_consensus::AccumulatorConfig;
use vault_dht::DEFAULT_GROUP_SIZE;

use crate::models::SyncSettings;

/// Configuration for the personas hosted by one vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultConfig {
    /// Data directory for archived accounts
    pub data_dir: PathBuf,

    /// Replicas per close group
    pub group_size: usize,

    /// How long unresolved requests and entries wait for quorum
    pub retention: Duration,

    /// Cap on requests tracked by the accumulator
    pub max_pending_requests: usize,

    /// Interval between stale-state sweeps
    pub maintenance_interval: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl VaultConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = PathBuf::from(
            lookup("VAULT_DATA_DIR").unwrap_or_else(|| "./vault-data".to_string()),
        );
        let group_size = parse_or(&lookup, "VAULT_GROUP_SIZE", DEFAULT_GROUP_SIZE).max(1);
        let retention = Duration::from_secs(parse_or(&lookup, "VAULT_RETENTION_SECS", 300));
        let max_pending_requests =
            parse_or(&lookup, "VAULT_MAX_PENDING_REQUESTS", 10_000).max(1);
        let maintenance_interval =
            Duration::from_secs(parse_or(&lookup, "VAULT_MAINTENANCE_SECS", 30).max(1));

        Self {
            data_dir,
            group_size,
            retention,
            max_pending_requests,
            maintenance_interval,
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size.max(1);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max.max(1);
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Majority of the configured group.
    pub fn quorum(&self) -> usize {
        vault_consensus::group_quorum(self.group_size)
    }

    pub fn accumulator(&self) -> AccumulatorConfig {
        AccumulatorConfig {
            retention: self.retention,
            max_requests: self.max_pending_requests,
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            quorum: self.quorum(),
            retention: self.retention,
        }
    }
}

fn parse_or<T, F>(lookup: &F, name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, %default, "Invalid value, using default");
            default
        }),
    }
}
