//! One ephemeral partition: a hash table and a sequence list over the same items.
//!
//! Writers lock the key's hash table stripe first and the sequence list
//! second; nothing takes them in the other order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::hash_table::{HashTable, HashTableVisitor, VisitAction};
use super::seq_list::{RangeRead, SequenceList};
use super::stored_value::{ItemState, OrderedStoredValue, Seqno};
use super::tombstone_purger::HtTombstonePurger;
use crate::core::EngineError;
use crate::util::clock::{RelTime, TimeSource};

/// Counters kept by a partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStats {
    /// Tombstones aged out of the hash table.
    pub tombstones_purged: u64,
    /// Revisions marked stale because a newer revision replaced them.
    pub stale_on_replace: u64,
    /// Stale revisions removed from the sequence list.
    pub stale_reclaimed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    tombstones_purged: AtomicU64,
    stale_on_replace: AtomicU64,
    stale_reclaimed: AtomicU64,
}

/// A partition (vbucket) of an ephemeral bucket.
pub struct EphemeralPartition {
    id: u16,
    ht: HashTable,
    seq_list: Arc<SequenceList>,
    clock: Arc<dyn TimeSource>,
    counters: Counters,
}

impl EphemeralPartition {
    /// Create an empty partition with `ht_locks` hash table stripes.
    #[must_use]
    pub fn new(id: u16, ht_locks: usize, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            id,
            ht: HashTable::new(ht_locks),
            seq_list: Arc::new(SequenceList::new()),
            clock,
            counters: Counters::default(),
        }
    }

    /// Partition id.
    #[must_use]
    pub const fn id(&self) -> u16 {
        self.id
    }

    /// Store `value` under `key`, returning the new revision's seqno.
    pub fn set(&self, key: &str, value: impl Into<Vec<u8>>) -> Seqno {
        let value = value.into();
        self.write(key, |seqno| {
            OrderedStoredValue::new_value(key, value, seqno)
        })
    }

    /// Delete `key`, leaving a tombstone stamped with the current relative
    /// time. Returns the tombstone's seqno, or `None` if the key has no live
    /// value.
    pub fn delete(&self, key: &str) -> Option<Seqno> {
        let now = self.clock.now();
        let mut stripe = self.ht.lock_key(key);
        if !stripe.get(key).is_some_and(|item| !item.is_deleted()) {
            return None;
        }
        let tombstone = self
            .seq_list
            .lock()
            .append(|seqno| OrderedStoredValue::new_tombstone(key, seqno, now));
        if let Some(old) = stripe.insert(Arc::clone(&tombstone)) {
            self.retire_replaced(&old);
        }
        debug!(partition = self.id, seqno = tombstone.seqno(), delete_time = now, "key deleted");
        Some(tombstone.seqno())
    }

    fn write(&self, key: &str, make: impl FnOnce(Seqno) -> OrderedStoredValue) -> Seqno {
        let mut stripe = self.ht.lock_key(key);
        let item = self.seq_list.lock().append(make);
        if let Some(old) = stripe.insert(Arc::clone(&item)) {
            self.retire_replaced(&old);
        }
        item.seqno()
    }

    /// Hand a revision just unlinked by a write to the stale item deleter.
    /// Called with the key's stripe still locked.
    fn retire_replaced(&self, old: &OrderedStoredValue) {
        if self.seq_list.mark_stale(old) {
            self.counters.stale_on_replace.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Live value of `key`; tombstones read as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<OrderedStoredValue>> {
        self.ht.find(key).filter(|item| !item.is_deleted())
    }

    /// Current revision of `key` as indexed, tombstones included.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<Arc<OrderedStoredValue>> {
        self.ht.find(key)
    }

    /// Ordered read over `[start, end]`; see [`SequenceList::range_read`].
    pub fn range_read(&self, start: Seqno, end: Seqno) -> RangeRead {
        self.seq_list.range_read(start, end)
    }

    /// Unlink tombstones older than `purge_age` at time `now` from the hash
    /// table, marking them stale. Returns the number marked.
    pub fn purge_tombstones(&self, purge_age: RelTime, now: RelTime) -> usize {
        let mut purger = HtTombstonePurger::new(self.id, &self.seq_list, now, purge_age);
        self.ht.visit(&mut purger);
        let purged = purger.num_purged();
        self.counters
            .tombstones_purged
            .fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    /// Reclaim stale revisions no range read still covers. Returns the number
    /// reclaimed.
    pub fn purge_stale_items(&self) -> usize {
        let reclaimed = self.seq_list.purge_stale();
        self.counters
            .stale_reclaimed
            .fetch_add(reclaimed as u64, Ordering::Relaxed);
        reclaimed
    }

    /// Highest seqno assigned so far.
    #[must_use]
    pub fn high_seqno(&self) -> Seqno {
        self.seq_list.high_seqno()
    }

    /// Items linked in the hash table.
    #[must_use]
    pub fn ht_len(&self) -> usize {
        self.ht.len()
    }

    /// Revisions held by the sequence list, stale ones included.
    #[must_use]
    pub fn seq_list_len(&self) -> usize {
        self.seq_list.len()
    }

    /// Stale revisions awaiting the deleter.
    #[must_use]
    pub fn num_stale(&self) -> usize {
        self.seq_list.num_stale()
    }

    /// Range reads currently in progress.
    #[must_use]
    pub fn active_range_reads(&self) -> usize {
        self.seq_list.active_range_reads()
    }

    /// Verify that every item linked in the hash table is live.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvariantViolation` naming the first stale or
    /// reclaimed item still reachable by key.
    pub fn check_invariants(&self) -> Result<(), EngineError> {
        #[derive(Default)]
        struct FindNonLive(Option<(String, u64, ItemState)>);

        impl HashTableVisitor for FindNonLive {
            fn visit(&mut self, item: &Arc<OrderedStoredValue>) -> VisitAction {
                match item.state() {
                    ItemState::Live => VisitAction::Continue,
                    state => {
                        self.0 = Some((item.key().to_owned(), item.seqno(), state));
                        VisitAction::Stop
                    }
                }
            }
        }

        let mut finder = FindNonLive::default();
        self.ht.visit(&mut finder);
        match finder.0 {
            None => Ok(()),
            Some((key, seqno, state)) => Err(EngineError::InvariantViolation(format!(
                "partition {} indexes {state:?} item `{key}` at seqno {seqno}",
                self.id
            ))),
        }
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> PartitionStats {
        PartitionStats {
            tombstones_purged: self.counters.tombstones_purged.load(Ordering::Relaxed),
            stale_on_replace: self.counters.stale_on_replace.load(Ordering::Relaxed),
            stale_reclaimed: self.counters.stale_reclaimed.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for EphemeralPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralPartition")
            .field("id", &self.id)
            .field("ht_len", &self.ht_len())
            .field("high_seqno", &self.high_seqno())
            .finish_non_exhaustive()
    }
}
