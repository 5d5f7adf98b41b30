//! Seqno-ordered list of every revision still held in memory.
//!
//! The list keeps a revision addressable at its seqno until it is reclaimed.
//! A [`RangeRead`] registers the seqno range it was promised; no item inside
//! an active range is removed until the read is dropped, so a reader never
//! sees a gap open up behind a purge.
//!
//! The stale item deleter is the only code that removes entries. It walks
//! the list in batches of [`PURGE_BATCH`] entries and hands the lock to any
//! waiting writer between batches.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use super::stored_value::{OrderedStoredValue, Seqno};

/// Entries examined per lock hold during [`SequenceList::purge_stale`].
pub const PURGE_BATCH: usize = 1024;

#[derive(Debug, Default)]
pub(crate) struct SeqListInner {
    items: BTreeMap<Seqno, Arc<OrderedStoredValue>>,
    high_seqno: Seqno,
    ranges: HashMap<u64, (Seqno, Seqno)>,
    next_range_id: u64,
}

impl SeqListInner {
    /// Append a new revision at the next seqno.
    pub fn append(
        &mut self,
        make: impl FnOnce(Seqno) -> OrderedStoredValue,
    ) -> Arc<OrderedStoredValue> {
        self.high_seqno += 1;
        let item = Arc::new(make(self.high_seqno));
        self.items.insert(self.high_seqno, Arc::clone(&item));
        item
    }

    fn covered(&self, seqno: Seqno) -> bool {
        self.ranges
            .values()
            .any(|(start, end)| (*start..=*end).contains(&seqno))
    }

    /// Seqnos of reclaimable entries among the `limit` entries starting at
    /// `from`, and the seqno to resume from, if any entries remain.
    fn reclaimable_batch(&self, from: Seqno, limit: usize) -> (Vec<Seqno>, Option<Seqno>) {
        let mut scan = self.items.range(from..);
        let doomed = scan
            .by_ref()
            .take(limit)
            .filter(|(seqno, item)| item.is_stale() && !self.covered(**seqno))
            .map(|(seqno, _)| *seqno)
            .collect();
        (doomed, scan.next().map(|(seqno, _)| *seqno))
    }
}

/// Ordered list of revisions for one partition.
#[derive(Debug, Default)]
pub struct SequenceList {
    inner: Mutex<SeqListInner>,
    stale: AtomicUsize,
}

impl SequenceList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SeqListInner> {
        self.inner.lock()
    }

    /// Number of revisions held, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// True if the list holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Highest seqno ever assigned.
    #[must_use]
    pub fn high_seqno(&self) -> Seqno {
        self.inner.lock().high_seqno
    }

    /// Number of stale revisions awaiting reclamation.
    #[must_use]
    pub fn num_stale(&self) -> usize {
        self.stale.load(Ordering::Acquire)
    }

    /// Number of range reads currently registered.
    #[must_use]
    pub fn active_range_reads(&self) -> usize {
        self.inner.lock().ranges.len()
    }

    /// Mark `item`, a revision held by this list, stale. The caller must hold
    /// the item's hash table stripe and have just unlinked it. Returns false
    /// if the item was not live.
    pub(crate) fn mark_stale(&self, item: &OrderedStoredValue) -> bool {
        // Counted before the transition so the deleter never decrements first.
        self.stale.fetch_add(1, Ordering::AcqRel);
        if item.mark_stale() {
            true
        } else {
            self.stale.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }

    /// Start an ordered read of `[start, end]`, clamped to the current high
    /// seqno. Every item in that range at this moment stays readable until the
    /// returned iterator is dropped.
    pub fn range_read(self: &Arc<Self>, start: Seqno, end: Seqno) -> RangeRead {
        let mut inner = self.inner.lock();
        let end = end.min(inner.high_seqno);
        let id = inner.next_range_id;
        inner.next_range_id += 1;
        inner.ranges.insert(id, (start, end));
        debug!(range_id = id, start, end, "range read registered");
        RangeRead {
            list: Arc::clone(self),
            id,
            cursor: start,
            end,
        }
    }

    /// Remove stale revisions not covered by an active range read. Returns the
    /// number reclaimed; covered ones are left for a later call.
    ///
    /// The lock is held for at most [`PURGE_BATCH`] entries at a time.
    pub fn purge_stale(&self) -> usize {
        let mut reclaimed = 0;
        let mut cursor: Seqno = 0;
        let mut inner = self.inner.lock();
        loop {
            let (doomed, resume) = inner.reclaimable_batch(cursor, PURGE_BATCH);
            let mut batch = 0;
            for seqno in doomed {
                if let Some(item) = inner.items.remove(&seqno) {
                    if item.mark_reclaimed() {
                        batch += 1;
                    }
                }
            }
            self.stale.fetch_sub(batch, Ordering::AcqRel);
            reclaimed += batch;

            let Some(resume) = resume else {
                break;
            };
            cursor = resume;
            MutexGuard::bump(&mut inner);
        }
        reclaimed
    }

    fn end_range(&self, id: u64) {
        self.inner.lock().ranges.remove(&id);
        debug!(range_id = id, "range read finished");
    }
}

/// In-progress ordered read over a seqno range.
///
/// Yields revisions in seqno order, including stale ones a concurrent writer
/// or purge has since unlinked from the hash table.
pub struct RangeRead {
    list: Arc<SequenceList>,
    id: u64,
    cursor: Seqno,
    end: Seqno,
}

impl RangeRead {
    /// Inclusive upper bound this read was promised.
    #[must_use]
    pub const fn end(&self) -> Seqno {
        self.end
    }
}

impl Iterator for RangeRead {
    type Item = Arc<OrderedStoredValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor > self.end {
            return None;
        }
        let inner = self.list.lock();
        let (seqno, item) = inner.items.range(self.cursor..=self.end).next()?;
        self.cursor = seqno + 1;
        Some(Arc::clone(item))
    }
}

impl Drop for RangeRead {
    fn drop(&mut self) {
        self.list.end_range(self.id);
    }
}
