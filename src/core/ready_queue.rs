//! Per-class ready queue ordered by wake time.
//!
//! Entries live in a min-heap keyed on `(waketime, seq)`. Waking or
//! rescheduling a queued task pushes a fresh entry and bumps the task's
//! generation, so the old entry is discarded lazily when it reaches the top.
//! Once superseded entries outnumber queued tasks the heap is rebuilt without
//! them, so frequent wakes of a long-sleeping task cannot grow it unbounded.
//! Every write to a task's [`SchedState`](super::task::SchedState) happens
//! under this queue's lock; the lock order is queue state, then task state.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use super::error::SchedulerError;
use super::executor_pool::PoolCounters;
use super::task::{NextRun, TaskClass, TaskEntry, TaskStatus};

/// Superseded entries tolerated before a compaction is considered.
const COMPACT_MIN_DEAD: usize = 64;

/// Cap for "never" style delays so `Instant` arithmetic cannot overflow.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(FAR_FUTURE))
        .unwrap_or(now)
}

struct QueueEntry {
    waketime: Instant,
    seq: u64,
    generation: u64,
    task: Arc<TaskEntry>,
}

// Reversed for a min-heap: earliest wake time, then earliest insertion, first.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .waketime
            .cmp(&self.waketime)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

enum Poll {
    Ready(Arc<TaskEntry>),
    Sleep(Instant),
    Empty,
}

struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    /// Tasks whose status is `Queued`.
    queued: usize,
    /// Heap entries superseded by a wake or cancel and not yet popped.
    dead: usize,
    shutdown: bool,
}

impl QueueState {
    fn push(&mut self, task: Arc<TaskEntry>, waketime: Instant, generation: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueueEntry {
            waketime,
            seq,
            generation,
            task,
        });
    }

    /// Record one superseded entry and drop all of them once they outnumber
    /// the live ones.
    fn supersede(&mut self) {
        self.dead += 1;
        if self.dead > COMPACT_MIN_DEAD && self.dead > self.queued {
            self.heap.retain(|entry| {
                let sched = entry.task.sched.lock();
                sched.status == TaskStatus::Queued && sched.generation == entry.generation
            });
            debug!(dropped = self.dead, remaining = self.heap.len(), "compacted ready queue");
            self.dead = 0;
        }
    }

    fn poll(&mut self, now: Instant) -> Poll {
        loop {
            let (stale, due) = match self.heap.peek() {
                None => return Poll::Empty,
                Some(top) => {
                    let sched = top.task.sched.lock();
                    let stale =
                        sched.status != TaskStatus::Queued || sched.generation != top.generation;
                    (stale, top.waketime)
                }
            };
            if stale {
                self.heap.pop();
                self.dead = self.dead.saturating_sub(1);
                continue;
            }
            if due > now {
                return Poll::Sleep(due);
            }
            let Some(top) = self.heap.pop() else {
                return Poll::Empty;
            };
            top.task.sched.lock().status = TaskStatus::Running;
            self.queued -= 1;
            return Poll::Ready(top.task);
        }
    }
}

/// How a finished run was disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Requeued(Instant),
    Retired,
    Cancelled,
}

/// Ready queue for one [`TaskClass`], shared by that class's workers.
pub(crate) struct ReadyQueue {
    class: TaskClass,
    state: Mutex<QueueState>,
    cond: Condvar,
    counters: Arc<PoolCounters>,
}

impl ReadyQueue {
    pub fn new(class: TaskClass, counters: Arc<PoolCounters>) -> Self {
        Self {
            class,
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                queued: 0,
                dead: 0,
                shutdown: false,
            }),
            cond: Condvar::new(),
            counters,
        }
    }

    pub const fn class(&self) -> TaskClass {
        self.class
    }

    /// Admit a new task at the wake time it was created with.
    pub fn admit(&self, task: &Arc<TaskEntry>) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(SchedulerError::PoolShutdown);
        }
        let (waketime, generation) = {
            let mut sched = task.sched.lock();
            sched.status = TaskStatus::Queued;
            sched.generation += 1;
            (sched.waketime, sched.generation)
        };
        state.push(Arc::clone(task), waketime, generation);
        state.queued += 1;
        self.counters
            .scheduled_tasks
            .fetch_add(1, AtomicOrdering::Relaxed);
        self.cond.notify_one();
        Ok(())
    }

    /// Make a task due now; see [`TaskHandle::wake`](super::TaskHandle::wake).
    pub fn wake(&self, task: &Arc<TaskEntry>) -> bool {
        let mut state = self.state.lock();
        if state.shutdown {
            return false;
        }
        let mut sched = task.sched.lock();
        match sched.status {
            TaskStatus::Queued => {
                let now = Instant::now();
                sched.waketime = now;
                sched.generation += 1;
                let generation = sched.generation;
                drop(sched);
                state.push(Arc::clone(task), now, generation);
                state.supersede();
                self.cond.notify_one();
                debug!(task_id = task.id, class = %self.class, "woke queued task");
                true
            }
            TaskStatus::Running => {
                sched.woken = true;
                debug!(task_id = task.id, class = %self.class, "woke running task");
                true
            }
            TaskStatus::Dead => false,
        }
    }

    pub fn cancel(&self, task: &Arc<TaskEntry>) -> bool {
        let mut state = self.state.lock();
        let mut sched = task.sched.lock();
        let (was_live, was_queued) = match sched.status {
            TaskStatus::Queued => {
                sched.status = TaskStatus::Dead;
                state.queued -= 1;
                (true, true)
            }
            TaskStatus::Running => (true, false),
            TaskStatus::Dead => (false, false),
        };
        if was_live && !sched.cancelled {
            sched.cancelled = true;
            self.counters
                .cancelled_tasks
                .fetch_add(1, AtomicOrdering::Relaxed);
            debug!(task_id = task.id, class = %self.class, "cancelled task");
        }
        drop(sched);
        if was_queued {
            state.supersede();
        }
        was_live
    }

    /// Drop a dequeued task that will never run because its worker is
    /// shutting down. Counted as cancelled.
    pub fn abandon(&self, task: &Arc<TaskEntry>) {
        let _state = self.state.lock();
        let mut sched = task.sched.lock();
        sched.status = TaskStatus::Dead;
        sched.woken = false;
        if !std::mem::replace(&mut sched.cancelled, true) {
            self.counters
                .cancelled_tasks
                .fetch_add(1, AtomicOrdering::Relaxed);
        }
        debug!(task_id = task.id, class = %self.class, "task dropped unrun at shutdown");
    }

    /// Dispose of a task whose run just returned.
    pub fn reschedule(&self, task: &Arc<TaskEntry>, next: NextRun) -> Disposition {
        let mut state = self.state.lock();
        let mut sched = task.sched.lock();
        let woken = std::mem::take(&mut sched.woken);
        if sched.cancelled || state.shutdown {
            sched.status = TaskStatus::Dead;
            return Disposition::Cancelled;
        }
        let now = Instant::now();
        let at = match next {
            NextRun::Retire => {
                sched.status = TaskStatus::Dead;
                self.counters
                    .retired_tasks
                    .fetch_add(1, AtomicOrdering::Relaxed);
                return Disposition::Retired;
            }
            _ if woken => now,
            NextRun::After(delay) => deadline_after(now, delay),
            NextRun::At(at) => at,
        };
        sched.status = TaskStatus::Queued;
        sched.waketime = at;
        sched.generation += 1;
        let generation = sched.generation;
        drop(sched);
        state.push(Arc::clone(task), at, generation);
        state.queued += 1;
        Disposition::Requeued(at)
    }

    /// Block until a task is due and hand it out marked `Running`.
    ///
    /// `idle` is told the deadline being slept towards (`None` while waiting
    /// with nothing queued) each time the caller is about to block. Returns
    /// `None` once the queue is shut down.
    pub fn next_task(
        &self,
        granularity: Duration,
        mut idle: impl FnMut(Option<Instant>),
    ) -> Option<Arc<TaskEntry>> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return None;
            }
            let now = Instant::now();
            match state.poll(now) {
                Poll::Ready(task) => {
                    // Hand the earliest remaining deadline to another idle worker.
                    if !state.heap.is_empty() {
                        self.cond.notify_one();
                    }
                    return Some(task);
                }
                Poll::Sleep(deadline) => {
                    idle(Some(deadline));
                    let wake_at = deadline.max(deadline_after(now, granularity));
                    let _ = self.cond.wait_until(&mut state, wake_at);
                }
                Poll::Empty => {
                    idle(None);
                    self.cond.wait(&mut state);
                }
            }
        }
    }

    /// Refuse further admission, drop every queued task and wake all workers.
    pub fn shutdown(&self) -> usize {
        let mut state = self.state.lock();
        state.shutdown = true;
        let mut dropped = 0;
        for entry in state.heap.drain() {
            let mut sched = entry.task.sched.lock();
            if sched.status == TaskStatus::Queued {
                sched.status = TaskStatus::Dead;
                sched.cancelled = true;
                dropped += 1;
            }
        }
        state.queued = 0;
        state.dead = 0;
        self.cond.notify_all();
        dropped
    }

    pub fn len(&self) -> usize {
        self.state.lock().queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AppResult;
    use crate::core::task::Task;

    struct Noop(&'static str);

    impl Task for Noop {
        fn description(&self) -> String {
            self.0.into()
        }

        fn run(&mut self) -> AppResult<NextRun> {
            Ok(NextRun::Retire)
        }
    }

    fn queue() -> ReadyQueue {
        ReadyQueue::new(TaskClass::NonIo, Arc::new(PoolCounters::default()))
    }

    fn counter(value: &std::sync::atomic::AtomicU64) -> u64 {
        value.load(AtomicOrdering::Relaxed)
    }

    fn entry(id: u64, name: &'static str, waketime: Instant) -> Arc<TaskEntry> {
        Arc::new(TaskEntry::new(id, Box::new(Noop(name)), waketime))
    }

    fn take(queue: &ReadyQueue) -> Option<Arc<TaskEntry>> {
        match queue.state.lock().poll(Instant::now()) {
            Poll::Ready(task) => Some(task),
            Poll::Sleep(_) | Poll::Empty => None,
        }
    }

    #[test]
    fn test_earliest_deadline_first() {
        let q = queue();
        let now = Instant::now();
        q.admit(&entry(1, "late", now + Duration::from_secs(60))).unwrap();
        q.admit(&entry(2, "due", now)).unwrap();

        let task = take(&q).unwrap();
        assert_eq!(task.id, 2);
        assert_eq!(task.sched.lock().status, TaskStatus::Running);
        assert!(take(&q).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_wake_supersedes_old_entry() {
        let q = queue();
        let task = entry(1, "sleepy", Instant::now() + Duration::from_secs(3600));
        q.admit(&task).unwrap();
        assert!(take(&q).is_none());

        assert!(q.wake(&task));
        let ready = take(&q).unwrap();
        assert_eq!(ready.id, 1);
        // The superseded entry must not hand the same task out twice.
        assert!(take(&q).is_none());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_wake_while_running_requeues_now() {
        let q = queue();
        let task = entry(1, "busy", Instant::now());
        q.admit(&task).unwrap();
        let running = take(&q).unwrap();

        assert!(q.wake(&running));
        let disposition = q.reschedule(&running, NextRun::After(Duration::from_secs(3600)));
        let Disposition::Requeued(at) = disposition else {
            panic!("expected requeue, got {disposition:?}");
        };
        assert!(at <= Instant::now());
        assert!(take(&q).is_some());
    }

    #[test]
    fn test_cancel_queued_and_running() {
        let q = queue();
        let queued = entry(1, "queued", Instant::now() + Duration::from_secs(60));
        let running = entry(2, "running", Instant::now());
        q.admit(&queued).unwrap();
        q.admit(&running).unwrap();
        let running = take(&q).unwrap();

        assert!(q.cancel(&queued));
        assert!(!q.cancel(&queued));
        assert!(q.cancel(&running));
        assert_eq!(
            q.reschedule(&running, NextRun::immediately()),
            Disposition::Cancelled
        );
        assert_eq!(running.sched.lock().status, TaskStatus::Dead);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_shutdown_rejects_and_drops() {
        let q = queue();
        let task = entry(1, "pending", Instant::now() + Duration::from_secs(60));
        q.admit(&task).unwrap();

        assert_eq!(q.shutdown(), 1);
        assert_eq!(task.sched.lock().status, TaskStatus::Dead);
        assert!(matches!(
            q.admit(&entry(2, "late", Instant::now())),
            Err(SchedulerError::PoolShutdown)
        ));
        assert!(q.next_task(Duration::from_millis(1), |_| {}).is_none());
    }

    #[test]
    fn test_repeated_wakes_keep_heap_bounded() {
        let q = queue();
        let sleepy = entry(1, "sleepy", Instant::now() + Duration::from_secs(3600));
        let other = entry(2, "other", Instant::now() + Duration::from_secs(7200));
        q.admit(&sleepy).unwrap();
        q.admit(&other).unwrap();

        for _ in 0..1_000 {
            assert!(q.wake(&sleepy));
        }
        let heap_len = q.state.lock().heap.len();
        assert!(heap_len <= COMPACT_MIN_DEAD + 3, "heap grew to {heap_len}");

        // Compaction keeps each live task exactly once.
        let ready = take(&q).unwrap();
        assert_eq!(ready.id, 1);
        assert!(take(&q).is_none());
        assert_eq!(q.len(), 1);
        assert!(q.cancel(&other));
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_abandoned_task_counts_as_cancelled() {
        let q = queue();
        let task = entry(1, "unlucky", Instant::now());
        q.admit(&task).unwrap();
        let task = take(&q).unwrap();

        q.abandon(&task);
        assert_eq!(task.sched.lock().status, TaskStatus::Dead);
        assert_eq!(counter(&q.counters.cancelled_tasks), 1);
        assert_eq!(counter(&q.counters.retired_tasks), 0);

        // A task already cancelled is not counted twice.
        let cancelled = entry(2, "cancelled", Instant::now());
        q.admit(&cancelled).unwrap();
        let cancelled = take(&q).unwrap();
        assert!(q.cancel(&cancelled));
        q.abandon(&cancelled);
        assert_eq!(counter(&q.counters.cancelled_tasks), 2);
    }

    #[test]
    fn test_far_future_delay_does_not_overflow() {
        let now = Instant::now();
        assert!(deadline_after(now, Duration::MAX) > now);
    }
}
