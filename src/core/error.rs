//! Error types for the executor and the ephemeral engine.

use thiserror::Error;

use crate::core::TaskClass;

/// Errors produced by the executor pool.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The pool is shutting down and no longer admits tasks.
    #[error("executor pool has been shut down")]
    PoolShutdown,
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// No worker threads are configured for the task's class.
    #[error("no worker threads serve task class `{0}`")]
    NoWorkers(TaskClass),
    /// The OS refused to start a worker thread.
    #[error("failed to spawn executor thread `{name}`: {source}")]
    ThreadSpawn {
        /// Name of the thread that failed to start.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced by ephemeral buckets and partitions.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The requested partition does not exist in this bucket.
    #[error("partition {0} does not exist")]
    UnknownPartition(u16),
    /// A core data-structure invariant was found broken.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

/// Application-facing result using anyhow for task bodies and higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
