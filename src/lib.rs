//! # Ephemeral KV
//!
//! A background task executor and the in-memory bucket maintenance it drives.
//!
//! The crate has two halves:
//!
//! - **Executor pool**: a fixed set of OS worker threads, grouped by
//!   [`TaskClass`](core::TaskClass), running periodic and one-shot
//!   [`Task`](core::Task)s. Each task decides when it runs next by returning a
//!   [`NextRun`](core::NextRun); idle workers block on a condition variable
//!   until the earliest deadline or an explicit wake.
//! - **Ephemeral buckets**: partitions holding every key in a striped
//!   [`HashTable`](ephemeral::HashTable) and every revision in a seqno-ordered
//!   [`SequenceList`](ephemeral::SequenceList). Deleted keys leave tombstones
//!   that two paired tasks purge in two phases without ever pulling an item
//!   out from under an in-flight range read.
//!
//! ## Tombstone purge
//!
//! 1. [`TombstoneHtCleaner`](ephemeral::TombstoneHtCleaner) unlinks tombstones
//!    older than the configured purge age from the hash table and marks them
//!    stale, then wakes the deleter.
//! 2. [`StaleItemDeleter`](ephemeral::StaleItemDeleter) removes stale items
//!    from the sequence list once no active range read covers them.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ephemeral_kv::builders::build_engine;
//! use ephemeral_kv::config::EngineConfig;
//! use ephemeral_kv::util::clock::SystemClock;
//!
//! let engine = build_engine(&EngineConfig::default(), Arc::new(SystemClock::new()))?;
//! let vb = engine.bucket().partition(0)?;
//! vb.set("key", "value");
//! vb.delete("key");
//! // ... one purge age later the tombstone is gone.
//! engine.shutdown();
//! ```
//!
//! For complete examples, see:
//! - `tests/executor_pool_test.rs` - scheduling, wake, cancel and shutdown
//! - `tests/tombstone_purge_test.rs` - the purge protocol end to end

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Task executor: tasks, ready queues, worker threads and the pool.
pub mod core;
/// Configuration models for the executor pool and buckets.
pub mod config;
/// Builders to construct a running engine from configuration.
pub mod builders;
/// Ephemeral bucket storage and tombstone purging.
pub mod ephemeral;
/// Shared utilities.
pub mod util;
