//! Striped hash table indexing the current revision of every key.
//!
//! The table is split into a fixed number of stripes, each behind its own
//! mutex. Every read, write and visit of a key happens under that key's
//! stripe lock, and a full visit only ever holds one stripe at a time.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::stored_value::OrderedStoredValue;

/// What a [`HashTableVisitor`] wants done with the item it just saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitAction {
    /// Leave the item linked and keep going.
    Continue,
    /// Unlink the item from the table and keep going.
    Unlink,
    /// Leave the item linked and stop the visit after this stripe.
    Stop,
}

/// Callback driven by [`HashTable::visit`].
pub trait HashTableVisitor {
    /// Inspect one linked item. Called with the item's stripe lock held, so
    /// an `Unlink` takes effect before any other thread can look the key up.
    fn visit(&mut self, item: &Arc<OrderedStoredValue>) -> VisitAction;
}

type Stripe = HashMap<String, Arc<OrderedStoredValue>>;

/// Exclusive access to the stripe holding one key.
pub struct StripeGuard<'a> {
    index: usize,
    map: MutexGuard<'a, Stripe>,
}

impl StripeGuard<'_> {
    /// Stripe number, for diagnostics.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Arc<OrderedStoredValue>> {
        self.map.get(key)
    }

    /// Link `item` under its key, returning the revision it replaced.
    pub(crate) fn insert(
        &mut self,
        item: Arc<OrderedStoredValue>,
    ) -> Option<Arc<OrderedStoredValue>> {
        self.map.insert(item.key().to_owned(), item)
    }
}

/// Hash index from key to current revision.
pub struct HashTable {
    stripes: Vec<Mutex<Stripe>>,
    hasher: RandomState,
}

impl HashTable {
    /// Create a table with `num_locks` stripes (at least one).
    #[must_use]
    pub fn new(num_locks: usize) -> Self {
        Self {
            stripes: (0..num_locks.max(1))
                .map(|_| Mutex::new(HashMap::new()))
                .collect(),
            hasher: RandomState::new(),
        }
    }

    fn stripe_of(&self, key: &str) -> usize {
        let hash = self.hasher.hash_one(key);
        // Stripe count fits in usize, so the remainder does too.
        usize::try_from(hash % self.stripes.len() as u64).unwrap_or(0)
    }

    /// Lock the stripe that holds `key`.
    pub fn lock_key(&self, key: &str) -> StripeGuard<'_> {
        let index = self.stripe_of(key);
        StripeGuard {
            index,
            map: self.stripes[index].lock(),
        }
    }

    /// Current revision of `key`, tombstones included.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<Arc<OrderedStoredValue>> {
        self.lock_key(key).get(key).cloned()
    }

    /// Visit every linked item, one stripe at a time. Returns the number of
    /// items visited.
    pub fn visit(&self, visitor: &mut dyn HashTableVisitor) -> usize {
        let mut visited = 0;
        for stripe in &self.stripes {
            let mut map = stripe.lock();
            let mut stopped = false;
            map.retain(|_, item| {
                if stopped {
                    return true;
                }
                visited += 1;
                match visitor.visit(item) {
                    VisitAction::Continue => true,
                    VisitAction::Unlink => false,
                    VisitAction::Stop => {
                        stopped = true;
                        true
                    }
                }
            });
            if stopped {
                break;
            }
        }
        visited
    }

    /// Number of linked items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stripes.iter().map(|s| s.lock().len()).sum()
    }

    /// True if no item is linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stripes.iter().all(|s| s.lock().is_empty())
    }

    /// Number of lock stripes.
    #[must_use]
    pub fn num_locks(&self) -> usize {
        self.stripes.len()
    }
}
