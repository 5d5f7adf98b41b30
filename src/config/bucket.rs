//! Ephemeral bucket and root engine configuration.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ExecutorPoolConfig;
use crate::util::clock::RelTime;

/// Ephemeral bucket configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EphemeralBucketConfig {
    /// Number of partitions (vbuckets) in the bucket.
    pub num_partitions: u16,
    /// Number of lock stripes in each partition's hash table.
    pub ht_locks: usize,
    /// Tombstones older than this many seconds are purged.
    pub metadata_purge_age_secs: RelTime,
    /// Seconds between runs of the hash table cleaner.
    pub metadata_purge_interval_secs: u64,
    /// Seconds between unprompted runs of the stale item deleter.
    pub stale_item_deleter_interval_secs: u64,
}

impl Default for EphemeralBucketConfig {
    fn default() -> Self {
        Self {
            num_partitions: 64,
            ht_locks: 47,
            metadata_purge_age_secs: 60,
            metadata_purge_interval_secs: 60,
            stale_item_deleter_interval_secs: 60,
        }
    }
}

impl EphemeralBucketConfig {
    /// Interval between hash table cleaner runs.
    #[must_use]
    pub const fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.metadata_purge_interval_secs)
    }

    /// Interval between stale item deleter runs.
    #[must_use]
    pub const fn deleter_interval(&self) -> Duration {
        Duration::from_secs(self.stale_item_deleter_interval_secs)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_partitions == 0 {
            return Err("num_partitions must be greater than 0".into());
        }
        if self.ht_locks == 0 {
            return Err("ht_locks must be greater than 0".into());
        }
        if self.metadata_purge_interval_secs == 0 {
            return Err("metadata_purge_interval_secs must be greater than 0".into());
        }
        if self.stale_item_deleter_interval_secs == 0 {
            return Err("stale_item_deleter_interval_secs must be greater than 0".into());
        }
        Ok(())
    }

    /// Check that `next` only changes fields which may be altered at runtime.
    ///
    /// # Errors
    ///
    /// Returns a description of the structural field that differs.
    pub fn validate_reload(&self, next: &Self) -> Result<(), String> {
        next.validate()?;
        if next.num_partitions != self.num_partitions {
            return Err("num_partitions cannot change at runtime".into());
        }
        if next.ht_locks != self.ht_locks {
            return Err("ht_locks cannot change at runtime".into());
        }
        Ok(())
    }
}

/// Root engine configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Executor pool settings.
    pub executor: ExecutorPoolConfig,
    /// Ephemeral bucket settings.
    pub bucket: EphemeralBucketConfig,
}

impl EngineConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first section error, prefixed with the section name.
    pub fn validate(&self) -> Result<(), String> {
        self.executor
            .validate()
            .map_err(|e| format!("executor invalid: {e}"))?;
        self.bucket
            .validate()
            .map_err(|e| format!("bucket invalid: {e}"))?;
        Ok(())
    }

    /// Parse engine configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Shared, atomically replaceable configuration snapshot.
///
/// Readers take an `Arc` to the current snapshot and keep using it for the
/// rest of their operation; a reload never tears a snapshot already handed out.
#[derive(Debug)]
pub struct ConfigHandle<T> {
    current: RwLock<Arc<T>>,
}

impl<T> ConfigHandle<T> {
    /// Wrap an initial configuration.
    pub fn new(initial: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    /// Replace the snapshot, returning the previous one.
    pub fn swap(&self, next: T) -> Arc<T> {
        std::mem::replace(&mut *self.current.write(), Arc::new(next))
    }
}
