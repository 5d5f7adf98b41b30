//! Configuration models for the executor pool and ephemeral buckets.

pub mod bucket;
pub mod executor;

pub use bucket::{ConfigHandle, EngineConfig, EphemeralBucketConfig};
pub use executor::{ExecutorPoolConfig, DEFAULT_TASK_LOG_SIZE};
