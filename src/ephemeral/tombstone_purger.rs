//! Two-phase tombstone purge for ephemeral buckets.
//!
//! Tombstones are kept in memory, so they must be aged out or they would
//! fill RAM. Removing one means dropping it from both the hash table and the
//! sequence list, but an in-flight range read may have been promised the
//! sequence list range the tombstone sits in. Purging is therefore split
//! between two paired tasks:
//!
//! 1. [`TombstoneHtCleaner`] visits every partition's hash table and, for each
//!    tombstone older than the purge age, unlinks it and marks it stale. The
//!    item stays in the sequence list, so range reads are unaffected.
//! 2. [`StaleItemDeleter`] walks each sequence list and removes stale items
//!    that no active range read covers.
//!
//! Items also become stale when a write replaces them; the deleter reclaims
//! those too and is the only place any item is reclaimed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::bucket::{EphemeralBucket, PartitionVisitor};
use super::hash_table::{HashTableVisitor, VisitAction};
use super::partition::EphemeralPartition;
use super::seq_list::SequenceList;
use super::stored_value::{ItemState, OrderedStoredValue};
use crate::core::{AppResult, NextRun, Task, TaskClass, TaskHandle};
use crate::util::clock::RelTime;

/// True if `item` is a tombstone older than `purge_age` at time `now`.
///
/// Age is `now - delete_time`; a tombstone exactly `purge_age` old is kept.
#[must_use]
pub fn is_purge_eligible(item: &OrderedStoredValue, now: RelTime, purge_age: RelTime) -> bool {
    item.age(now).is_some_and(|age| age > purge_age)
}

/// Hash table visitor that unlinks expired tombstones and marks them stale.
///
/// Ownership of each purged item passes to the sequence list, where the
/// stale item deleter finds it.
#[derive(Debug)]
pub struct HtTombstonePurger<'a> {
    partition: u16,
    seq_list: &'a SequenceList,
    now: RelTime,
    purge_age: RelTime,
    purged: usize,
}

impl<'a> HtTombstonePurger<'a> {
    /// Create a purger for one partition's hash table; `seq_list` is the
    /// same partition's sequence list.
    #[must_use]
    pub const fn new(
        partition: u16,
        seq_list: &'a SequenceList,
        now: RelTime,
        purge_age: RelTime,
    ) -> Self {
        Self {
            partition,
            seq_list,
            now,
            purge_age,
            purged: 0,
        }
    }

    /// Items unlinked so far.
    #[must_use]
    pub const fn num_purged(&self) -> usize {
        self.purged
    }
}

impl HashTableVisitor for HtTombstonePurger<'_> {
    fn visit(&mut self, item: &Arc<OrderedStoredValue>) -> VisitAction {
        let state = item.state();
        if state != ItemState::Live {
            error!(
                partition = self.partition,
                seqno = item.seqno(),
                state = ?state,
                "item linked in hash table is not live"
            );
            return VisitAction::Continue;
        }
        if !is_purge_eligible(item, self.now, self.purge_age) {
            return VisitAction::Continue;
        }
        if self.seq_list.mark_stale(item) {
            self.purged += 1;
            VisitAction::Unlink
        } else {
            VisitAction::Continue
        }
    }
}

/// Partition visitor running [`HtTombstonePurger`] over every partition.
#[derive(Debug)]
pub struct HtCleaner {
    purge_age: RelTime,
    now: RelTime,
    marked_stale: usize,
}

impl HtCleaner {
    /// Create a cleaner purging tombstones older than `purge_age` at `now`.
    #[must_use]
    pub const fn new(purge_age: RelTime, now: RelTime) -> Self {
        Self {
            purge_age,
            now,
            marked_stale: 0,
        }
    }

    /// Items marked stale across all visited partitions.
    #[must_use]
    pub const fn num_items_marked_stale(&self) -> usize {
        self.marked_stale
    }
}

impl PartitionVisitor for HtCleaner {
    fn visit_partition(&mut self, partition: &Arc<EphemeralPartition>) {
        self.marked_stale += partition.purge_tombstones(self.purge_age, self.now);
    }
}

/// Snapshot of [`PurgeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeStatsSnapshot {
    /// Completed hash table cleaner runs.
    pub cleaner_runs: u64,
    /// Completed stale item deleter runs.
    pub deleter_runs: u64,
    /// Items marked stale by the latest cleaner run.
    pub last_marked_stale: u64,
    /// Items marked stale by all cleaner runs.
    pub total_marked_stale: u64,
    /// Items reclaimed by the latest deleter run.
    pub last_reclaimed: u64,
    /// Items reclaimed by all deleter runs.
    pub total_reclaimed: u64,
}

/// Purge counters for one bucket, updated after every task run.
#[derive(Debug, Default)]
pub struct PurgeStats {
    cleaner_runs: AtomicU64,
    deleter_runs: AtomicU64,
    last_marked_stale: AtomicU64,
    total_marked_stale: AtomicU64,
    last_reclaimed: AtomicU64,
    total_reclaimed: AtomicU64,
}

impl PurgeStats {
    fn record_cleaner_run(&self, marked: usize) {
        let marked = marked as u64;
        self.cleaner_runs.fetch_add(1, Ordering::Relaxed);
        self.last_marked_stale.store(marked, Ordering::Relaxed);
        self.total_marked_stale.fetch_add(marked, Ordering::Relaxed);
    }

    fn record_deleter_run(&self, reclaimed: usize) {
        let reclaimed = reclaimed as u64;
        self.deleter_runs.fetch_add(1, Ordering::Relaxed);
        self.last_reclaimed.store(reclaimed, Ordering::Relaxed);
        self.total_reclaimed.fetch_add(reclaimed, Ordering::Relaxed);
    }

    /// Current values.
    #[must_use]
    pub fn snapshot(&self) -> PurgeStatsSnapshot {
        PurgeStatsSnapshot {
            cleaner_runs: self.cleaner_runs.load(Ordering::Relaxed),
            deleter_runs: self.deleter_runs.load(Ordering::Relaxed),
            last_marked_stale: self.last_marked_stale.load(Ordering::Relaxed),
            total_marked_stale: self.total_marked_stale.load(Ordering::Relaxed),
            last_reclaimed: self.last_reclaimed.load(Ordering::Relaxed),
            total_reclaimed: self.total_reclaimed.load(Ordering::Relaxed),
        }
    }
}

/// Periodic task moving expired tombstones out of every hash table of a
/// bucket, then waking its paired [`StaleItemDeleter`].
pub struct TombstoneHtCleaner {
    bucket: Arc<EphemeralBucket>,
    deleter: TaskHandle,
}

impl TombstoneHtCleaner {
    /// Create the cleaner for `bucket`; `deleter` is the already scheduled
    /// stale item deleter of the same bucket.
    #[must_use]
    pub fn new(bucket: Arc<EphemeralBucket>, deleter: TaskHandle) -> Self {
        Self { bucket, deleter }
    }

    /// One pass over the bucket. Returns the number of items marked stale.
    pub fn clean(&self) -> usize {
        let config = self.bucket.config();
        let now = self.bucket.now();
        let mut cleaner = HtCleaner::new(config.metadata_purge_age_secs, now);
        self.bucket.visit(&mut cleaner);
        let marked = cleaner.num_items_marked_stale();
        self.bucket.purge_stats().record_cleaner_run(marked);
        marked
    }
}

impl Task for TombstoneHtCleaner {
    fn description(&self) -> String {
        "Eph tombstone hashtable cleaner".into()
    }

    fn class(&self) -> TaskClass {
        TaskClass::NonIo
    }

    fn max_expected_duration(&self) -> Option<Duration> {
        // Scans every stripe of every partition.
        Some(Duration::from_secs(1))
    }

    fn run(&mut self) -> AppResult<NextRun> {
        let marked = self.clean();
        if marked > 0 {
            info!(marked, "tombstone cleaner marked items stale, waking deleter");
            self.deleter.wake();
        } else {
            debug!("tombstone cleaner found nothing to purge");
        }
        Ok(NextRun::After(self.bucket.config().purge_interval()))
    }
}

/// Periodic task reclaiming stale items from every sequence list of a bucket.
pub struct StaleItemDeleter {
    bucket: Arc<EphemeralBucket>,
}

impl StaleItemDeleter {
    /// Create the deleter for `bucket`.
    #[must_use]
    pub fn new(bucket: Arc<EphemeralBucket>) -> Self {
        Self { bucket }
    }

    /// One pass over the bucket. Returns the number of items reclaimed.
    pub fn delete_stale(&self) -> usize {
        let reclaimed: usize = self
            .bucket
            .partitions()
            .iter()
            .map(|partition| partition.purge_stale_items())
            .sum();
        self.bucket.purge_stats().record_deleter_run(reclaimed);
        reclaimed
    }
}

impl Task for StaleItemDeleter {
    fn description(&self) -> String {
        "Eph tombstone stale item deleter".into()
    }

    fn class(&self) -> TaskClass {
        TaskClass::NonIo
    }

    fn run(&mut self) -> AppResult<NextRun> {
        let reclaimed = self.delete_stale();
        if reclaimed > 0 {
            info!(reclaimed, "stale item deleter reclaimed items");
        }
        Ok(NextRun::After(self.bucket.config().deleter_interval()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligibility_is_strictly_older() {
        let tombstone = OrderedStoredValue::new_tombstone("k", 1, 100);
        assert!(!is_purge_eligible(&tombstone, 150, 50));
        assert!(is_purge_eligible(&tombstone, 151, 50));
        // Clock behind the delete time never underflows.
        assert!(!is_purge_eligible(&tombstone, 10, 0));

        let live = OrderedStoredValue::new_value("k", Vec::new(), 2);
        assert!(!is_purge_eligible(&live, u32::MAX, 0));
    }

    #[test]
    fn test_purger_skips_non_live_items() {
        let list = SequenceList::new();
        let mut purger = HtTombstonePurger::new(0, &list, 1_000, 10);
        let stale = Arc::new(OrderedStoredValue::new_tombstone("k", 1, 0));
        assert!(stale.mark_stale());

        assert_eq!(purger.visit(&stale), VisitAction::Continue);
        assert_eq!(purger.num_purged(), 0);

        let expired = Arc::new(OrderedStoredValue::new_tombstone("j", 2, 0));
        assert_eq!(purger.visit(&expired), VisitAction::Unlink);
        assert!(expired.is_stale());
        assert_eq!(purger.num_purged(), 1);
        assert_eq!(list.num_stale(), 1);
    }

    #[test]
    fn test_stats_track_last_and_total() {
        let stats = PurgeStats::default();
        stats.record_cleaner_run(3);
        stats.record_cleaner_run(0);
        stats.record_deleter_run(2);

        let snap = stats.snapshot();
        assert_eq!(snap.cleaner_runs, 2);
        assert_eq!(snap.last_marked_stale, 0);
        assert_eq!(snap.total_marked_stale, 3);
        assert_eq!(snap.deleter_runs, 1);
        assert_eq!(snap.total_reclaimed, 2);
    }
}
