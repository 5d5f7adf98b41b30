//! Items stored in an ephemeral partition.
//!
//! An [`OrderedStoredValue`] is immutable once created: an update or delete
//! appends a new revision with a fresh seqno. The only mutable part is the
//! lifecycle tag, which moves strictly forward `Live -> Stale -> Reclaimed`.
//! The hash table cleaner or a writer replacing the revision makes it stale;
//! only the stale item deleter reclaims it.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::util::clock::RelTime;

/// Position of an item in a partition's sequence list.
pub type Seqno = u64;

/// Lifecycle of an item across the hash table and the sequence list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ItemState {
    /// Linked in the hash table (or the current revision being linked).
    Live = 0,
    /// Unlinked from the hash table; only the sequence list still holds it.
    Stale = 1,
    /// Removed from the sequence list.
    Reclaimed = 2,
}

impl ItemState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Live,
            1 => Self::Stale,
            _ => Self::Reclaimed,
        }
    }
}

/// One revision of a key, shared by the hash table and the sequence list.
pub struct OrderedStoredValue {
    key: String,
    value: Option<Vec<u8>>,
    seqno: Seqno,
    delete_time: Option<RelTime>,
    state: AtomicU8,
}

impl OrderedStoredValue {
    /// A live revision carrying `value`.
    #[must_use]
    pub fn new_value(key: impl Into<String>, value: Vec<u8>, seqno: Seqno) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            seqno,
            delete_time: None,
            state: AtomicU8::new(ItemState::Live as u8),
        }
    }

    /// A tombstone recording that `key` was deleted at `delete_time`.
    #[must_use]
    pub fn new_tombstone(key: impl Into<String>, seqno: Seqno, delete_time: RelTime) -> Self {
        Self {
            key: key.into(),
            value: None,
            seqno,
            delete_time: Some(delete_time),
            state: AtomicU8::new(ItemState::Live as u8),
        }
    }

    /// Document key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value bytes; `None` for a tombstone.
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Sequence number assigned when this revision was appended.
    #[must_use]
    pub const fn seqno(&self) -> Seqno {
        self.seqno
    }

    /// True for a tombstone.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.delete_time.is_some()
    }

    /// Relative time the key was deleted, for tombstones.
    #[must_use]
    pub const fn delete_time(&self) -> Option<RelTime> {
        self.delete_time
    }

    /// Seconds since deletion at relative time `now`; `None` for live values.
    #[must_use]
    pub fn age(&self, now: RelTime) -> Option<RelTime> {
        self.delete_time.map(|t| now.saturating_sub(t))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ItemState {
        ItemState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True while unlinked from the hash table but not yet reclaimed.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.state() == ItemState::Stale
    }

    /// `Live -> Stale`. Must be called with the item's hash table stripe
    /// locked and together with unlinking it. Returns false if the item was
    /// not live.
    pub(crate) fn mark_stale(&self) -> bool {
        self.state
            .compare_exchange(
                ItemState::Live as u8,
                ItemState::Stale as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `Stale -> Reclaimed`, performed when the sequence list drops the
    /// item. Returns false if the item was not stale.
    pub(crate) fn mark_reclaimed(&self) -> bool {
        self.state
            .compare_exchange(
                ItemState::Stale as u8,
                ItemState::Reclaimed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl fmt::Debug for OrderedStoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedStoredValue")
            .field("key", &self.key)
            .field("seqno", &self.seqno)
            .field("deleted", &self.is_deleted())
            .field("delete_time", &self.delete_time)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone_age() {
        let item = OrderedStoredValue::new_tombstone("k", 3, 100);
        assert!(item.is_deleted());
        assert_eq!(item.value(), None);
        assert_eq!(item.age(160), Some(60));
        assert_eq!(item.age(50), Some(0));

        let live = OrderedStoredValue::new_value("k", b"v".to_vec(), 4);
        assert_eq!(live.age(160), None);
    }

    #[test]
    fn test_state_only_moves_forward() {
        let item = OrderedStoredValue::new_tombstone("k", 1, 0);
        assert_eq!(item.state(), ItemState::Live);
        // A live item cannot skip the stale state.
        assert!(!item.mark_reclaimed());
        assert_eq!(item.state(), ItemState::Live);

        assert!(item.mark_stale());
        assert!(!item.mark_stale());
        assert!(item.is_stale());

        assert!(item.mark_reclaimed());
        assert!(!item.mark_reclaimed());
        assert_eq!(item.state(), ItemState::Reclaimed);
        assert!(!item.mark_stale());
    }
}
