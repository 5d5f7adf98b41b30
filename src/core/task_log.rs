//! Bounded per-thread logs of recent task runs.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Record of one completed task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    /// Task description at the start of the run.
    pub name: String,
    /// Wall-clock start time, milliseconds since the Unix epoch.
    pub started_at_ms: u128,
    /// How long `run` took.
    pub duration: Duration,
}

impl TaskLogEntry {
    /// Build an entry.
    pub fn new(name: impl Into<String>, started_at_ms: u128, duration: Duration) -> Self {
        Self {
            name: name.into(),
            started_at_ms,
            duration,
        }
    }
}

/// Fixed-capacity ring of log entries; the oldest entry is evicted first.
#[derive(Debug, Clone)]
pub struct TaskLog {
    entries: VecDeque<TaskLogEntry>,
    capacity: usize,
}

impl TaskLog {
    /// Create an empty log holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn record(&mut self, entry: TaskLogEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries from oldest to newest.
    #[must_use]
    pub fn contents(&self) -> Vec<TaskLogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> TaskLogEntry {
        TaskLogEntry::new(name, 1, Duration::from_millis(3))
    }

    #[test]
    fn test_log_evicts_oldest() {
        let mut log = TaskLog::new(2);
        log.record(entry("a"));
        log.record(entry("b"));
        log.record(entry("c"));

        let names: Vec<_> = log.contents().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_zero_capacity_log_stays_empty() {
        let mut log = TaskLog::new(0);
        log.record(entry("a"));
        assert!(log.is_empty());
    }
}
