//! Build a running engine from configuration.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::EngineConfig;
use crate::core::{AppResult, EngineError, ExecutorPool, TaskHandle};
use crate::ephemeral::{EphemeralBucket, StaleItemDeleter, TombstoneHtCleaner};
use crate::util::clock::TimeSource;

/// An executor pool with one ephemeral bucket and its purge tasks registered.
pub struct Engine {
    pool: Arc<ExecutorPool>,
    bucket: Arc<EphemeralBucket>,
    cleaner: TaskHandle,
    deleter: TaskHandle,
}

impl Engine {
    /// The executor pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<ExecutorPool> {
        &self.pool
    }

    /// The ephemeral bucket.
    #[must_use]
    pub const fn bucket(&self) -> &Arc<EphemeralBucket> {
        &self.bucket
    }

    /// Handle of the hash table cleaner task.
    #[must_use]
    pub const fn cleaner(&self) -> &TaskHandle {
        &self.cleaner
    }

    /// Handle of the stale item deleter task.
    #[must_use]
    pub const fn deleter(&self) -> &TaskHandle {
        &self.deleter
    }

    /// Cancel the purge tasks and shut the pool down, joining every worker.
    pub fn shutdown(&self) {
        self.cleaner.cancel();
        self.deleter.cancel();
        self.pool.shutdown();
        info!("engine shut down");
    }
}

/// Create the pool and the bucket, then register the paired purge tasks.
///
/// The deleter is scheduled first so the cleaner can hold its handle. Both
/// first run one interval after startup.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, a worker thread cannot
/// be started, or the purge tasks cannot be scheduled.
pub fn build_engine(config: &EngineConfig, clock: Arc<dyn TimeSource>) -> AppResult<Engine> {
    config.validate().map_err(EngineError::InvalidConfig)?;

    let pool = Arc::new(
        ExecutorPool::new(config.executor.clone()).context("failed to start executor pool")?,
    );
    let bucket = Arc::new(
        EphemeralBucket::new(config.bucket.clone(), clock).context("failed to create bucket")?,
    );

    let deleter = pool
        .schedule_after(
            StaleItemDeleter::new(Arc::clone(&bucket)),
            config.bucket.deleter_interval(),
        )
        .context("failed to schedule stale item deleter")?;
    let cleaner = pool
        .schedule_after(
            TombstoneHtCleaner::new(Arc::clone(&bucket), deleter.clone()),
            config.bucket.purge_interval(),
        )
        .context("failed to schedule tombstone cleaner")?;

    info!(
        cleaner_task = cleaner.id(),
        deleter_task = deleter.id(),
        "engine started"
    );
    Ok(Engine {
        pool,
        bucket,
        cleaner,
        deleter,
    })
}
