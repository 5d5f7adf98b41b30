//! Executor pool: worker threads plus one ready queue per task class.
//!
//! # Design
//!
//! - **No polling**: idle workers block on their class queue's `Condvar`,
//!   either indefinitely (`Waiting`) or until the earliest wake time (`Sleeping`)
//! - **Single runner per task**: a task is handed out only when its status moves
//!   from `Queued` to `Running`, under the queue lock
//! - **Clean shutdown**: shutdown refuses admission, drops queued tasks, wakes
//!   every idle worker and joins every thread before returning

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ExecutorPoolConfig;

use super::error::SchedulerError;
use super::executor_thread::{ExecutorThread, ThreadSnapshot, WorkerSettings};
use super::ready_queue::{deadline_after, ReadyQueue};
use super::task::{Task, TaskClass, TaskEntry, TaskHandle};

/// Statistics about pool activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Tasks admitted through `schedule`.
    pub scheduled_tasks: u64,
    /// Individual `run` invocations that returned (successfully or not).
    pub completed_runs: u64,
    /// Tasks that asked to retire.
    pub retired_tasks: u64,
    /// Runs that returned an error or panicked.
    pub failed_tasks: u64,
    /// Tasks cancelled explicitly or dropped at shutdown.
    pub cancelled_tasks: u64,
    /// Tasks currently waiting in a queue, per class.
    pub queued_tasks: Vec<(TaskClass, usize)>,
}

impl PoolStats {
    /// Total tasks currently waiting across all classes.
    #[must_use]
    pub fn total_queued(&self) -> usize {
        self.queued_tasks.iter().map(|(_, n)| n).sum()
    }
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub scheduled_tasks: AtomicU64,
    pub completed_runs: AtomicU64,
    pub retired_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub cancelled_tasks: AtomicU64,
}

/// Pool of worker threads running periodic and one-shot background tasks.
pub struct ExecutorPool {
    config: ExecutorPoolConfig,
    /// Indexed by [`TaskClass::index`].
    queues: Vec<Arc<ReadyQueue>>,
    threads: Mutex<Vec<ExecutorThread>>,
    worker_count: usize,
    counters: Arc<PoolCounters>,
    shutdown: AtomicBool,
    task_id_counter: AtomicU64,
}

impl ExecutorPool {
    /// Create the pool and start every configured worker thread.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if the configuration is invalid
    /// and `SchedulerError::ThreadSpawn` if a worker could not be started; any
    /// workers already started are shut down again.
    pub fn new(config: ExecutorPoolConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let counters = Arc::new(PoolCounters::default());
        let queues: Vec<_> = TaskClass::ALL
            .iter()
            .map(|class| Arc::new(ReadyQueue::new(*class, Arc::clone(&counters))))
            .collect();
        let settings = WorkerSettings {
            sleep_granularity: config.sleep_granularity(),
            slow_threshold: config.slow_task_threshold(),
            log_size: config.task_log_size,
            stack_size: config.thread_stack_size,
        };

        let pool = Self {
            worker_count: config.total_threads(),
            config,
            queues,
            threads: Mutex::new(Vec::new()),
            counters,
            shutdown: AtomicBool::new(false),
            task_id_counter: AtomicU64::new(0),
        };

        {
            let mut threads = pool.threads.lock();
            for class in TaskClass::ALL {
                for n in 0..pool.config.threads_for(class) {
                    let mut thread = ExecutorThread::new(
                        format!("{class}_worker_{n}"),
                        Arc::clone(&pool.queues[class.index()]),
                        Arc::clone(&pool.counters),
                        settings,
                    );
                    let started = thread.start();
                    threads.push(thread);
                    started?;
                }
            }
        }

        info!(
            writer = pool.config.writer_threads,
            reader = pool.config.reader_threads,
            aux_io = pool.config.aux_io_threads,
            non_io = pool.config.non_io_threads,
            "ExecutorPool initialized"
        );
        Ok(pool)
    }

    /// Admit a task to run as soon as a worker of its class is free.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::PoolShutdown` once shutdown has begun; the task is dropped
    /// - `SchedulerError::NoWorkers` if no thread serves the task's class
    pub fn schedule<T: Task>(&self, task: T) -> Result<TaskHandle, SchedulerError> {
        self.schedule_boxed(Box::new(task), Duration::ZERO)
    }

    /// Admit a task whose first run is due after `delay`.
    ///
    /// # Errors
    ///
    /// See [`ExecutorPool::schedule`].
    pub fn schedule_after<T: Task>(
        &self,
        task: T,
        delay: Duration,
    ) -> Result<TaskHandle, SchedulerError> {
        self.schedule_boxed(Box::new(task), delay)
    }

    /// Admit an already boxed task.
    ///
    /// # Errors
    ///
    /// See [`ExecutorPool::schedule`].
    pub fn schedule_boxed(
        &self,
        task: Box<dyn Task>,
        delay: Duration,
    ) -> Result<TaskHandle, SchedulerError> {
        if self.shutdown.load(Ordering::Acquire) {
            let description = task.description();
            warn!(task = %description, "rejecting task, executor pool is shut down");
            return Err(SchedulerError::PoolShutdown);
        }
        let class = task.class();
        if self.config.threads_for(class) == 0 {
            return Err(SchedulerError::NoWorkers(class));
        }

        let id = self.task_id_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = Arc::new(TaskEntry::new(
            id,
            task,
            deadline_after(Instant::now(), delay),
        ));
        let queue = &self.queues[class.index()];
        queue.admit(&entry)?;

        let description = entry.description();
        debug!(
            task_id = id,
            task = %description,
            class = %class,
            delay_ms = delay.as_millis(),
            "task scheduled"
        );
        Ok(TaskHandle {
            entry,
            queue: Arc::downgrade(queue),
        })
    }

    /// Make a task due immediately. Safe to call from any thread, including
    /// while the task itself is running. Returns false if the task is dead or
    /// the pool is shutting down.
    pub fn wake(&self, task: &TaskHandle) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        task.wake()
    }

    /// Stop a task from running again. Returns false if it was already dead.
    pub fn cancel(&self, task: &TaskHandle) -> bool {
        task.cancel()
    }

    /// True once shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Pool configuration.
    #[must_use]
    pub const fn config(&self) -> &ExecutorPoolConfig {
        &self.config
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            worker_count: self.worker_count,
            scheduled_tasks: self.counters.scheduled_tasks.load(Ordering::Relaxed),
            completed_runs: self.counters.completed_runs.load(Ordering::Relaxed),
            retired_tasks: self.counters.retired_tasks.load(Ordering::Relaxed),
            failed_tasks: self.counters.failed_tasks.load(Ordering::Relaxed),
            cancelled_tasks: self.counters.cancelled_tasks.load(Ordering::Relaxed),
            queued_tasks: self
                .queues
                .iter()
                .map(|q| (q.class(), q.len()))
                .collect(),
        }
    }

    /// Diagnostic snapshot of every worker thread.
    #[must_use]
    pub fn threads(&self) -> Vec<ThreadSnapshot> {
        self.threads.lock().iter().map(ExecutorThread::snapshot).collect()
    }

    /// Thread snapshots and statistics as one JSON document.
    #[must_use]
    pub fn diagnostics_json(&self) -> serde_json::Value {
        serde_json::json!({
            "stats": self.stats(),
            "threads": self.threads(),
        })
    }

    /// Shut the pool down.
    ///
    /// Refuses new tasks, drops queued ones, wakes every idle worker and blocks
    /// until each worker has finished its in-flight run and been joined.
    /// Idempotent; later calls return immediately.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Shutting down executor pool");

        // Joined outside the lock so diagnostics never block on a slow task.
        let mut threads = std::mem::take(&mut *self.threads.lock());
        for thread in &threads {
            thread.request_shutdown();
        }
        let dropped: usize = self.queues.iter().map(|q| q.shutdown()).sum();
        self.counters
            .cancelled_tasks
            .fetch_add(dropped as u64, Ordering::Relaxed);

        let current = thread::current().id();
        for thread in &mut threads {
            if thread.thread_id() == Some(current) {
                // Shutdown was triggered from inside a task on this very worker.
                warn!(thread = %thread.name(), "not joining the calling worker thread");
                continue;
            }
            if thread.join() {
                debug!(thread = %thread.name(), "executor thread joined");
            } else {
                warn!(thread = %thread.name(), "executor thread panicked");
            }
        }

        info!(
            thread_count = threads.len(),
            dropped_tasks = dropped,
            "Executor pool shut down complete"
        );
        *self.threads.lock() = threads;
    }

    /// Shut the pool down from async code without blocking the runtime.
    #[cfg(feature = "tokio-runtime")]
    pub async fn shutdown_async(self: Arc<Self>) {
        if let Err(e) = tokio::task::spawn_blocking(move || self.shutdown()).await {
            warn!(error = %e, "executor pool shutdown task failed");
        }
    }
}

impl Drop for ExecutorPool {
    fn drop(&mut self) {
        if !self.is_shutdown() {
            debug!("ExecutorPool dropped without explicit shutdown");
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AppResult;
    use crate::core::task::NextRun;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        runs: Arc<AtomicUsize>,
        limit: usize,
    }

    impl Task for Counting {
        fn description(&self) -> String {
            "counting".into()
        }

        fn run(&mut self) -> AppResult<NextRun> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.limit {
                Ok(NextRun::Retire)
            } else {
                Ok(NextRun::immediately())
            }
        }
    }

    fn small_config() -> ExecutorPoolConfig {
        TaskClass::ALL
            .iter()
            .fold(ExecutorPoolConfig::new(), |c, class| c.with_threads(*class, 0))
            .with_threads(TaskClass::NonIo, 2)
    }

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        done()
    }

    #[test]
    fn test_runs_until_retired() {
        let pool = ExecutorPool::new(small_config()).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = pool
            .schedule(Counting {
                runs: Arc::clone(&runs),
                limit: 5,
            })
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || handle.is_dead()));
        assert_eq!(runs.load(Ordering::SeqCst), 5);
        let stats = pool.stats();
        assert_eq!(stats.scheduled_tasks, 1);
        assert_eq!(stats.completed_runs, 5);
        assert_eq!(stats.retired_tasks, 1);
        pool.shutdown();
    }

    #[test]
    fn test_class_without_workers_rejected() {
        let pool = ExecutorPool::new(small_config()).unwrap();
        struct Io;
        impl Task for Io {
            fn description(&self) -> String {
                "io".into()
            }
            fn class(&self) -> TaskClass {
                TaskClass::Writer
            }
            fn run(&mut self) -> AppResult<NextRun> {
                Ok(NextRun::Retire)
            }
        }
        assert!(matches!(
            pool.schedule(Io),
            Err(SchedulerError::NoWorkers(TaskClass::Writer))
        ));
        pool.shutdown();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = small_config().with_threads(TaskClass::NonIo, 0);
        assert!(matches!(
            ExecutorPool::new(config),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }
}
