//! Ephemeral bucket: a fixed set of partitions sharing one configuration.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::partition::EphemeralPartition;
use super::tombstone_purger::PurgeStats;
use crate::config::{ConfigHandle, EphemeralBucketConfig};
use crate::core::EngineError;
use crate::util::clock::{RelTime, TimeSource};

/// Callback driven by [`EphemeralBucket::visit`].
pub trait PartitionVisitor {
    /// Visit one partition.
    fn visit_partition(&mut self, partition: &Arc<EphemeralPartition>);

    /// Called once after the last partition.
    fn complete(&mut self) {}
}

/// In-memory bucket whose deleted keys leave tombstones behind.
pub struct EphemeralBucket {
    partitions: Vec<Arc<EphemeralPartition>>,
    config: ConfigHandle<EphemeralBucketConfig>,
    clock: Arc<dyn TimeSource>,
    purge_stats: PurgeStats,
}

impl EphemeralBucket {
    /// Create a bucket with every configured partition.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` if the configuration is invalid.
    pub fn new(
        config: EphemeralBucketConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        let partitions = (0..config.num_partitions)
            .map(|id| Arc::new(EphemeralPartition::new(id, config.ht_locks, Arc::clone(&clock))))
            .collect();
        info!(
            partitions = config.num_partitions,
            ht_locks = config.ht_locks,
            purge_age_secs = config.metadata_purge_age_secs,
            "ephemeral bucket created"
        );
        Ok(Self {
            partitions,
            config: ConfigHandle::new(config),
            clock,
            purge_stats: PurgeStats::default(),
        })
    }

    /// Partition `id`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::UnknownPartition` if `id` is out of range.
    pub fn partition(&self, id: u16) -> Result<&Arc<EphemeralPartition>, EngineError> {
        self.partitions
            .get(usize::from(id))
            .ok_or(EngineError::UnknownPartition(id))
    }

    /// Every partition, in id order.
    #[must_use]
    pub fn partitions(&self) -> &[Arc<EphemeralPartition>] {
        &self.partitions
    }

    /// Current configuration snapshot.
    #[must_use]
    pub fn config(&self) -> Arc<EphemeralBucketConfig> {
        self.config.load()
    }

    /// Replace the runtime-tunable configuration. Purge tasks pick the new
    /// values up on their next run.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidConfig` if `next` is invalid or changes a
    /// structural field.
    pub fn reconfigure(&self, next: EphemeralBucketConfig) -> Result<(), EngineError> {
        self.config
            .load()
            .validate_reload(&next)
            .map_err(EngineError::InvalidConfig)?;
        info!(
            purge_age_secs = next.metadata_purge_age_secs,
            purge_interval_secs = next.metadata_purge_interval_secs,
            deleter_interval_secs = next.stale_item_deleter_interval_secs,
            "ephemeral bucket reconfigured"
        );
        self.config.swap(next);
        Ok(())
    }

    /// Current engine-relative time.
    #[must_use]
    pub fn now(&self) -> RelTime {
        self.clock.now()
    }

    /// Visit every partition in id order.
    pub fn visit(&self, visitor: &mut dyn PartitionVisitor) {
        for partition in &self.partitions {
            visitor.visit_partition(partition);
        }
        visitor.complete();
    }

    /// Purge task counters.
    #[must_use]
    pub const fn purge_stats(&self) -> &PurgeStats {
        &self.purge_stats
    }

    /// Items linked in all hash tables.
    #[must_use]
    pub fn num_items(&self) -> usize {
        self.partitions.iter().map(|p| p.ht_len()).sum()
    }

    /// Run [`EphemeralPartition::check_invariants`] on every partition.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), EngineError> {
        self.partitions
            .iter()
            .try_for_each(|p| p.check_invariants())
    }

    /// Stale items awaiting reclamation across all partitions.
    #[must_use]
    pub fn num_stale(&self) -> usize {
        self.partitions.iter().map(|p| p.num_stale()).sum()
    }
}

impl fmt::Debug for EphemeralBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralBucket")
            .field("partitions", &self.partitions.len())
            .field("config", &*self.config.load())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::ManualClock;

    fn bucket() -> EphemeralBucket {
        let config = EphemeralBucketConfig {
            num_partitions: 4,
            ht_locks: 3,
            ..EphemeralBucketConfig::default()
        };
        EphemeralBucket::new(config, Arc::new(ManualClock::new(0))).unwrap()
    }

    struct CountVisits {
        visited: Vec<u16>,
        completed: bool,
    }

    impl PartitionVisitor for CountVisits {
        fn visit_partition(&mut self, partition: &Arc<EphemeralPartition>) {
            self.visited.push(partition.id());
        }

        fn complete(&mut self) {
            self.completed = true;
        }
    }

    #[test]
    fn test_visit_all_partitions_in_order() {
        let bucket = bucket();
        let mut visitor = CountVisits {
            visited: Vec::new(),
            completed: false,
        };
        bucket.visit(&mut visitor);
        assert_eq!(visitor.visited, vec![0, 1, 2, 3]);
        assert!(visitor.completed);
    }

    #[test]
    fn test_unknown_partition() {
        let bucket = bucket();
        assert!(bucket.partition(3).is_ok());
        assert!(matches!(
            bucket.partition(4),
            Err(EngineError::UnknownPartition(4))
        ));
    }

    #[test]
    fn test_reconfigure_swaps_tunables_only() {
        let bucket = bucket();
        let mut next = (*bucket.config()).clone();
        next.metadata_purge_age_secs = 5;
        bucket.reconfigure(next.clone()).unwrap();
        assert_eq!(bucket.config().metadata_purge_age_secs, 5);

        next.num_partitions = 8;
        assert!(matches!(
            bucket.reconfigure(next),
            Err(EngineError::InvalidConfig(_))
        ));
        assert_eq!(bucket.config().num_partitions, 4);
    }
}
