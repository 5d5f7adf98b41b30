//! Executor worker threads.
//!
//! Each thread serves the ready queue of one [`TaskClass`] and walks the state
//! machine `Creating -> Running <-> Waiting <-> Sleeping -> Shutdown -> Dead`.
//! A worker only blocks while idle; once `run` has been entered it always
//! returns to the loop before the thread honours a shutdown request.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::error::SchedulerError;
use super::executor_pool::PoolCounters;
use super::ready_queue::{Disposition, ReadyQueue};
use super::task::{NextRun, TaskClass, TaskEntry, TaskId};
use super::task_log::{TaskLog, TaskLogEntry};
use crate::util::clock::now_ms;

/// Placeholder reported while a thread has no task.
pub const IDLE_TASK_NAME: &str = "Not currently running any task";

/// Lifecycle state of an executor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ExecutorState {
    /// Constructed, OS thread not started yet.
    Creating = 0,
    /// Executing a task's `run`.
    Running = 1,
    /// Idle with nothing queued; blocked without a deadline.
    Waiting = 2,
    /// Idle until the earliest queued wake time.
    Sleeping = 3,
    /// Shutdown requested; exits after any in-flight run.
    Shutdown = 4,
    /// OS thread has exited.
    Dead = 5,
}

impl ExecutorState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Creating,
            1 => Self::Running,
            2 => Self::Waiting,
            3 => Self::Sleeping,
            4 => Self::Shutdown,
            _ => Self::Dead,
        }
    }

    /// Lower-case name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Sleeping => "sleeping",
            Self::Shutdown => "shutdown",
            Self::Dead => "dead",
        }
    }
}

#[derive(Debug, Clone)]
struct CurrentTask {
    id: TaskId,
    description: String,
    started: Instant,
}

/// State shared between the worker thread and the pool's diagnostics.
struct ThreadShared {
    name: String,
    class: TaskClass,
    state: AtomicU8,
    waketime: Mutex<Option<Instant>>,
    current: Mutex<Option<CurrentTask>>,
    log: Mutex<TaskLog>,
    slow_log: Mutex<TaskLog>,
}

impl ThreadShared {
    fn state(&self) -> ExecutorState {
        ExecutorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move between the live states. Fails once shutdown has been requested.
    fn transition(&self, to: ExecutorState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match ExecutorState::from_u8(raw) {
                    ExecutorState::Shutdown | ExecutorState::Dead => None,
                    _ => Some(to as u8),
                }
            })
            .is_ok()
    }

    fn idle(&self, deadline: Option<Instant>) {
        *self.waketime.lock() = deadline;
        let to = if deadline.is_some() {
            ExecutorState::Sleeping
        } else {
            ExecutorState::Waiting
        };
        self.transition(to);
    }
}

/// Point-in-time view of one executor thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    /// Thread name.
    pub name: String,
    /// Class of tasks the thread serves.
    pub class: TaskClass,
    /// Current lifecycle state.
    pub state: ExecutorState,
    /// Id of the task being run, if any.
    pub task_id: Option<TaskId>,
    /// Description of the task being run, or [`IDLE_TASK_NAME`].
    pub task_name: String,
    /// How long the current task has been running.
    pub task_runtime: Option<Duration>,
    /// Time until the deadline a sleeping thread is waiting for.
    pub wakes_in: Option<Duration>,
    /// Recent runs, oldest first.
    pub log: Vec<TaskLogEntry>,
    /// Recent runs that exceeded their slow threshold, oldest first.
    pub slow_log: Vec<TaskLogEntry>,
}

/// Tunables copied from the pool configuration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerSettings {
    pub sleep_granularity: Duration,
    pub slow_threshold: Duration,
    pub log_size: usize,
    pub stack_size: usize,
}

/// One OS worker thread, owned and joined by the pool.
pub struct ExecutorThread {
    shared: Arc<ThreadShared>,
    queue: Arc<ReadyQueue>,
    counters: Arc<PoolCounters>,
    settings: WorkerSettings,
    handle: Option<JoinHandle<()>>,
}

impl ExecutorThread {
    pub(crate) fn new(
        name: String,
        queue: Arc<ReadyQueue>,
        counters: Arc<PoolCounters>,
        settings: WorkerSettings,
    ) -> Self {
        let shared = Arc::new(ThreadShared {
            name,
            class: queue.class(),
            state: AtomicU8::new(ExecutorState::Creating as u8),
            waketime: Mutex::new(None),
            current: Mutex::new(None),
            log: Mutex::new(TaskLog::new(settings.log_size)),
            slow_log: Mutex::new(TaskLog::new(settings.log_size)),
        });
        Self {
            shared,
            queue,
            counters,
            settings,
            handle: None,
        }
    }

    /// Start the OS thread.
    pub(crate) fn start(&mut self) -> Result<(), SchedulerError> {
        let worker = Worker {
            shared: Arc::clone(&self.shared),
            queue: Arc::clone(&self.queue),
            counters: Arc::clone(&self.counters),
            settings: self.settings,
        };
        let handle = thread::Builder::new()
            .name(self.shared.name.clone())
            .stack_size(self.settings.stack_size)
            .spawn(move || worker.run())
            .map_err(|source| SchedulerError::ThreadSpawn {
                name: self.shared.name.clone(),
                source,
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Ask the thread to exit after any in-flight task. Does not block.
    pub(crate) fn request_shutdown(&self) {
        let _ = self
            .shared
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                (ExecutorState::from_u8(raw) != ExecutorState::Dead)
                    .then_some(ExecutorState::Shutdown as u8)
            });
    }

    /// Join the OS thread. Returns false if the thread panicked.
    pub(crate) fn join(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            self.shared
                .state
                .store(ExecutorState::Dead as u8, Ordering::Release);
            return true;
        };
        let ok = handle.join().is_ok();
        self.shared
            .state
            .store(ExecutorState::Dead as u8, Ordering::Release);
        ok
    }

    pub(crate) fn thread_id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(|h| h.thread().id())
    }

    /// Thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ExecutorState {
        self.shared.state()
    }

    /// Description of the running task, or [`IDLE_TASK_NAME`].
    #[must_use]
    pub fn task_name(&self) -> String {
        self.shared
            .current
            .lock()
            .as_ref()
            .map_or_else(|| IDLE_TASK_NAME.to_string(), |c| c.description.clone())
    }

    /// Recent runs, oldest first.
    #[must_use]
    pub fn log(&self) -> Vec<TaskLogEntry> {
        self.shared.log.lock().contents()
    }

    /// Recent slow runs, oldest first.
    #[must_use]
    pub fn slow_log(&self) -> Vec<TaskLogEntry> {
        self.shared.slow_log.lock().contents()
    }

    /// Full diagnostic snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ThreadSnapshot {
        let current = self.shared.current.lock().clone();
        let now = Instant::now();
        let state = self.state();
        let wakes_in = match state {
            ExecutorState::Sleeping => self
                .shared
                .waketime
                .lock()
                .map(|at| at.saturating_duration_since(now)),
            _ => None,
        };
        ThreadSnapshot {
            name: self.shared.name.clone(),
            class: self.shared.class,
            state,
            task_id: current.as_ref().map(|c| c.id),
            task_name: current
                .as_ref()
                .map_or_else(|| IDLE_TASK_NAME.to_string(), |c| c.description.clone()),
            task_runtime: current.map(|c| now.saturating_duration_since(c.started)),
            wakes_in,
            log: self.log(),
            slow_log: self.slow_log(),
        }
    }
}

/// The half of an executor thread that lives on the OS thread.
struct Worker {
    shared: Arc<ThreadShared>,
    queue: Arc<ReadyQueue>,
    counters: Arc<PoolCounters>,
    settings: WorkerSettings,
}

impl Worker {
    fn run(self) {
        info!(thread = %self.shared.name, class = %self.shared.class, "executor thread started");
        let shared = Arc::clone(&self.shared);
        while let Some(task) = self
            .queue
            .next_task(self.settings.sleep_granularity, |deadline| shared.idle(deadline))
        {
            if !self.shared.transition(ExecutorState::Running) {
                // Shutdown raced with the dequeue; the task is dropped unrun.
                self.queue.abandon(&task);
                break;
            }
            let next = self.execute(&task);
            match self.queue.reschedule(&task, next) {
                Disposition::Requeued(at) => debug!(
                    task_id = task.id,
                    delay_ms = at.saturating_duration_since(Instant::now()).as_millis(),
                    "task rescheduled"
                ),
                Disposition::Retired => debug!(task_id = task.id, "task retired"),
                Disposition::Cancelled => debug!(task_id = task.id, "task dropped after cancel"),
            }
            if self.shared.state() == ExecutorState::Shutdown {
                break;
            }
        }
        self.shared
            .state
            .store(ExecutorState::Dead as u8, Ordering::Release);
        info!(thread = %self.shared.name, "executor thread exiting");
    }

    fn execute(&self, task: &Arc<TaskEntry>) -> NextRun {
        let description = task.description();
        let started = Instant::now();
        let started_at_ms = now_ms();
        *self.shared.current.lock() = Some(CurrentTask {
            id: task.id,
            description: description.clone(),
            started,
        });

        let outcome = task.run_body();

        let duration = started.elapsed();
        *self.shared.current.lock() = None;
        self.counters.completed_runs.fetch_add(1, Ordering::Relaxed);
        self.record(task, TaskLogEntry::new(description.clone(), started_at_ms, duration));

        match outcome {
            Ok(Ok(next)) => next,
            Ok(Err(err)) => {
                self.counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
                let err = format!("{err:#}");
                error!(task_id = task.id, task = %description, error = %err, "task failed, retiring");
                NextRun::Retire
            }
            Err(payload) => {
                self.counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
                let panic = panic_message(payload.as_ref());
                error!(task_id = task.id, task = %description, panic = %panic, "task panicked, retiring");
                NextRun::Retire
            }
        }
    }

    fn record(&self, task: &TaskEntry, entry: TaskLogEntry) {
        let threshold = task.max_expected.unwrap_or(self.settings.slow_threshold);
        if entry.duration > threshold {
            warn!(
                thread = %self.shared.name,
                task = %entry.name,
                duration_ms = entry.duration.as_millis(),
                threshold_ms = threshold.as_millis(),
                "slow task run"
            );
            self.shared.slow_log.lock().record(entry.clone());
        }
        self.shared.log.lock().record(entry);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            ExecutorState::Creating,
            ExecutorState::Running,
            ExecutorState::Waiting,
            ExecutorState::Sleeping,
            ExecutorState::Shutdown,
            ExecutorState::Dead,
        ] {
            assert_eq!(ExecutorState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_transition_refused_after_shutdown() {
        let counters = Arc::new(PoolCounters::default());
        let queue = Arc::new(ReadyQueue::new(TaskClass::NonIo, Arc::clone(&counters)));
        let thread = ExecutorThread::new(
            "non_io_worker_0".into(),
            queue,
            counters,
            WorkerSettings {
                sleep_granularity: Duration::from_millis(1),
                slow_threshold: Duration::from_millis(10),
                log_size: 4,
                stack_size: 256 * 1024,
            },
        );
        assert_eq!(thread.state(), ExecutorState::Creating);
        assert!(thread.shared.transition(ExecutorState::Waiting));
        thread.request_shutdown();
        assert!(!thread.shared.transition(ExecutorState::Running));
        assert_eq!(thread.state(), ExecutorState::Shutdown);
        assert_eq!(thread.task_name(), IDLE_TASK_NAME);
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
