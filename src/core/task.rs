//! Task abstraction and the handle used to steer a scheduled task.
//!
//! A [`Task`] is one quantum of background work. The pool calls
//! [`Task::run`] on a worker thread whenever the task's wake time has passed
//! and the task tells the pool, through the returned [`NextRun`], when it
//! wants to run next. A task is never run concurrently with itself: the pool
//! keeps at most one queue entry per task live, and the body sits behind a
//! mutex that only the running worker takes.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::error::AppResult;
use super::ready_queue::ReadyQueue;

/// Unique task identifier assigned at admission.
pub type TaskId = u64;

/// Category of background work, used to route tasks to worker subsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskClass {
    /// Work that writes to persistent storage.
    Writer,
    /// Work that reads from persistent storage.
    Reader,
    /// Auxiliary I/O such as backfills.
    AuxIo,
    /// Pure in-memory maintenance.
    NonIo,
}

impl TaskClass {
    /// Every class, in queue index order.
    pub const ALL: [Self; 4] = [Self::Writer, Self::Reader, Self::AuxIo, Self::NonIo];

    /// Index of this class's ready queue.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Writer => 0,
            Self::Reader => 1,
            Self::AuxIo => 2,
            Self::NonIo => 3,
        }
    }

    /// Short name used in thread names and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Writer => "writer",
            Self::Reader => "reader",
            Self::AuxIo => "aux_io",
            Self::NonIo => "non_io",
        }
    }
}

impl fmt::Display for TaskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a task wants to run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRun {
    /// Run again once this much time has passed.
    After(Duration),
    /// Run again at an absolute instant.
    At(Instant),
    /// Never run again.
    Retire,
}

impl NextRun {
    /// Run again as soon as a worker is free.
    #[must_use]
    pub const fn immediately() -> Self {
        Self::After(Duration::ZERO)
    }
}

/// A unit of schedulable background work.
pub trait Task: Send + 'static {
    /// Stable human-readable description for logs and diagnostics.
    fn description(&self) -> String;

    /// Queue this task is routed to.
    fn class(&self) -> TaskClass {
        TaskClass::NonIo
    }

    /// Runs longer than this are recorded in the slow log. `None` uses the
    /// pool-wide threshold.
    fn max_expected_duration(&self) -> Option<Duration> {
        None
    }

    /// Execute one quantum of work.
    ///
    /// # Errors
    ///
    /// An error is treated as a defect in the task: it is logged with the task
    /// description and the task is retired.
    fn run(&mut self) -> AppResult<NextRun>;
}

/// Scheduling status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in its class queue for its wake time.
    Queued,
    /// A worker is executing `run`.
    Running,
    /// Retired, cancelled, or dropped at shutdown.
    Dead,
}

/// Mutable scheduling state. Only written while holding the owning queue's lock.
#[derive(Debug)]
pub(crate) struct SchedState {
    pub status: TaskStatus,
    pub waketime: Instant,
    /// Bumped on every requeue; heap entries carrying an older value are stale.
    pub generation: u64,
    /// A wake arrived while the task was running.
    pub woken: bool,
    pub cancelled: bool,
}

pub(crate) struct TaskEntry {
    pub id: TaskId,
    pub class: TaskClass,
    pub max_expected: Option<Duration>,
    description: RwLock<String>,
    body: Mutex<Box<dyn Task>>,
    pub sched: Mutex<SchedState>,
}

impl TaskEntry {
    pub fn new(id: TaskId, task: Box<dyn Task>, waketime: Instant) -> Self {
        Self {
            id,
            class: task.class(),
            max_expected: task.max_expected_duration(),
            description: RwLock::new(task.description()),
            body: Mutex::new(task),
            sched: Mutex::new(SchedState {
                status: TaskStatus::Dead,
                waketime,
                generation: 0,
                woken: false,
                cancelled: false,
            }),
        }
    }

    pub fn description(&self) -> String {
        self.description.read().clone()
    }

    /// Run the body. Callers must have taken the task off its queue first.
    pub fn run_body(&self) -> std::thread::Result<AppResult<NextRun>> {
        let mut body = self.body.lock();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| body.run()));
        *self.description.write() = body.description();
        outcome
    }
}

impl fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEntry")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("description", &*self.description.read())
            .finish_non_exhaustive()
    }
}

/// Handle to a task admitted to an [`ExecutorPool`](super::ExecutorPool).
///
/// Cheap to clone and safe to use from any thread, including from inside
/// another task's `run`.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) entry: Arc<TaskEntry>,
    pub(crate) queue: Weak<ReadyQueue>,
}

impl TaskHandle {
    /// Identifier assigned at admission.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.entry.id
    }

    /// Class queue the task lives in.
    #[must_use]
    pub fn class(&self) -> TaskClass {
        self.entry.class
    }

    /// Latest description reported by the task.
    #[must_use]
    pub fn description(&self) -> String {
        self.entry.description()
    }

    /// Current scheduling status.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.entry.sched.lock().status
    }

    /// Time the task is next due.
    #[must_use]
    pub fn waketime(&self) -> Instant {
        self.entry.sched.lock().waketime
    }

    /// True once the task will never run again.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.status() == TaskStatus::Dead
    }

    /// Make the task due now. If it is running, it runs again as soon as the
    /// current run returns. Returns false if the task is dead or the pool is gone.
    pub fn wake(&self) -> bool {
        self.queue
            .upgrade()
            .is_some_and(|queue| queue.wake(&self.entry))
    }

    /// Stop the task from running again. A run in progress completes first.
    /// Returns false if the task was already dead.
    pub fn cancel(&self) -> bool {
        self.queue
            .upgrade()
            .is_some_and(|queue| queue.cancel(&self.entry))
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.entry.id)
            .field("class", &self.entry.class)
            .field("status", &self.status())
            .finish()
    }
}
