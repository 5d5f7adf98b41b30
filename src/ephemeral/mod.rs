//! In-memory ephemeral bucket storage and its tombstone purge tasks.

pub mod bucket;
pub mod hash_table;
pub mod partition;
pub mod seq_list;
pub mod stored_value;
pub mod tombstone_purger;

pub use bucket::{EphemeralBucket, PartitionVisitor};
pub use hash_table::{HashTable, HashTableVisitor, StripeGuard, VisitAction};
pub use partition::{EphemeralPartition, PartitionStats};
pub use seq_list::{RangeRead, SequenceList};
pub use stored_value::{ItemState, OrderedStoredValue, Seqno};
pub use tombstone_purger::{
    is_purge_eligible, HtCleaner, HtTombstonePurger, PurgeStats, PurgeStatsSnapshot,
    StaleItemDeleter, TombstoneHtCleaner,
};
