//! Tests for the bounded task logs

use ephemeral_kv::core::{TaskLog, TaskLogEntry};
use std::time::Duration;

#[test]
fn test_log_keeps_newest_entries() {
    let mut log = TaskLog::new(3);
    for i in 0..5u64 {
        log.record(TaskLogEntry::new(format!("task-{i}"), u128::from(i), Duration::from_millis(i)));
    }
    let names: Vec<_> = log.contents().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["task-2", "task-3", "task-4"]);
    assert_eq!(log.capacity(), 3);
}

#[test]
fn test_log_entry_serializes() {
    let entry = TaskLogEntry::new("purge", 1_000, Duration::from_millis(250));
    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["name"], "purge");
    let back: TaskLogEntry = serde_json::from_value(json).unwrap();
    assert_eq!(back, entry);
}
