//! Executor pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::TaskClass;

/// Default number of entries kept in each thread's recent/slow run logs.
pub const DEFAULT_TASK_LOG_SIZE: usize = 20;

/// Configuration for [`ExecutorPool`](crate::core::ExecutorPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorPoolConfig {
    /// Worker threads serving [`TaskClass::Writer`].
    pub writer_threads: usize,
    /// Worker threads serving [`TaskClass::Reader`].
    pub reader_threads: usize,
    /// Worker threads serving [`TaskClass::AuxIo`].
    pub aux_io_threads: usize,
    /// Worker threads serving [`TaskClass::NonIo`].
    pub non_io_threads: usize,
    /// Finest interval at which a sleeping worker re-evaluates deadlines.
    pub sleep_granularity_ms: u64,
    /// Runs longer than this land in the thread's slow log.
    pub slow_task_threshold_ms: u64,
    /// Capacity of each per-thread run log.
    pub task_log_size: usize,
    /// Stack size for worker threads, in bytes.
    pub thread_stack_size: usize,
}

impl Default for ExecutorPoolConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            writer_threads: cpus.clamp(1, 4),
            reader_threads: cpus.clamp(1, 4),
            aux_io_threads: 1,
            non_io_threads: (cpus / 2).clamp(1, 8),
            sleep_granularity_ms: 1,
            slow_task_threshold_ms: 100,
            task_log_size: DEFAULT_TASK_LOG_SIZE,
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl ExecutorPoolConfig {
    /// Create a configuration with CPU-derived defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker thread count for one task class.
    #[must_use]
    pub const fn with_threads(mut self, class: TaskClass, count: usize) -> Self {
        match class {
            TaskClass::Writer => self.writer_threads = count,
            TaskClass::Reader => self.reader_threads = count,
            TaskClass::AuxIo => self.aux_io_threads = count,
            TaskClass::NonIo => self.non_io_threads = count,
        }
        self
    }

    /// Set the sleep granularity.
    #[must_use]
    pub fn with_sleep_granularity(mut self, granularity: Duration) -> Self {
        self.sleep_granularity_ms = u64::try_from(granularity.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the slow-run threshold.
    #[must_use]
    pub fn with_slow_task_threshold(mut self, threshold: Duration) -> Self {
        self.slow_task_threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the per-thread run log capacity.
    #[must_use]
    pub const fn with_task_log_size(mut self, size: usize) -> Self {
        self.task_log_size = size;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Number of workers configured for `class`.
    #[must_use]
    pub const fn threads_for(&self, class: TaskClass) -> usize {
        match class {
            TaskClass::Writer => self.writer_threads,
            TaskClass::Reader => self.reader_threads,
            TaskClass::AuxIo => self.aux_io_threads,
            TaskClass::NonIo => self.non_io_threads,
        }
    }

    /// Total number of worker threads across all classes.
    #[must_use]
    pub fn total_threads(&self) -> usize {
        TaskClass::ALL.iter().map(|c| self.threads_for(*c)).sum()
    }

    /// Sleep granularity as a `Duration`.
    #[must_use]
    pub const fn sleep_granularity(&self) -> Duration {
        Duration::from_millis(self.sleep_granularity_ms)
    }

    /// Slow-run threshold as a `Duration`.
    #[must_use]
    pub const fn slow_task_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_task_threshold_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.total_threads() == 0 {
            return Err("at least one worker thread must be configured".into());
        }
        if self.task_log_size == 0 {
            return Err("task_log_size must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ExecutorPoolConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.task_log_size, DEFAULT_TASK_LOG_SIZE);
        assert!(config.threads_for(TaskClass::NonIo) >= 1);
    }

    #[test]
    fn test_with_threads_targets_one_class() {
        let config = ExecutorPoolConfig::new()
            .with_threads(TaskClass::Writer, 0)
            .with_threads(TaskClass::Reader, 0)
            .with_threads(TaskClass::AuxIo, 0)
            .with_threads(TaskClass::NonIo, 3);
        assert_eq!(config.total_threads(), 3);
        assert_eq!(config.threads_for(TaskClass::NonIo), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = TaskClass::ALL
            .iter()
            .fold(ExecutorPoolConfig::new(), |c, class| c.with_threads(*class, 0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_setters() {
        let config = ExecutorPoolConfig::new()
            .with_sleep_granularity(Duration::from_millis(5))
            .with_slow_task_threshold(Duration::from_secs(1));
        assert_eq!(config.sleep_granularity(), Duration::from_millis(5));
        assert_eq!(config.slow_task_threshold(), Duration::from_secs(1));
    }
}
