//! Tests for configuration validation and reload

use ephemeral_kv::config::{
    ConfigHandle, EngineConfig, EphemeralBucketConfig, ExecutorPoolConfig, DEFAULT_TASK_LOG_SIZE,
};
use ephemeral_kv::core::TaskClass;
use std::time::Duration;

#[test]
fn test_executor_defaults() {
    let config = ExecutorPoolConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.task_log_size, DEFAULT_TASK_LOG_SIZE);
    assert_eq!(config.sleep_granularity(), Duration::from_millis(1));
    assert!(config.threads_for(TaskClass::NonIo) >= 1);
}

#[test]
fn test_executor_builder_setters() {
    let config = ExecutorPoolConfig::new()
        .with_threads(TaskClass::Writer, 2)
        .with_threads(TaskClass::Reader, 0)
        .with_threads(TaskClass::AuxIo, 0)
        .with_threads(TaskClass::NonIo, 3)
        .with_sleep_granularity(Duration::from_millis(10))
        .with_slow_task_threshold(Duration::from_secs(2))
        .with_task_log_size(5);

    assert_eq!(config.total_threads(), 5);
    assert_eq!(config.sleep_granularity_ms, 10);
    assert_eq!(config.slow_task_threshold(), Duration::from_secs(2));
    assert_eq!(config.task_log_size, 5);
}

#[test]
fn test_executor_invalid_configs() {
    let no_threads = TaskClass::ALL
        .iter()
        .fold(ExecutorPoolConfig::new(), |c, class| c.with_threads(*class, 0));
    assert!(no_threads.validate().is_err());

    assert!(ExecutorPoolConfig::new()
        .with_task_log_size(0)
        .validate()
        .is_err());
    assert!(ExecutorPoolConfig::new()
        .with_thread_stack_size(1024)
        .validate()
        .is_err());
}

#[test]
fn test_bucket_invalid_configs() {
    let base = EphemeralBucketConfig::default();
    assert!(EphemeralBucketConfig { num_partitions: 0, ..base.clone() }.validate().is_err());
    assert!(EphemeralBucketConfig { ht_locks: 0, ..base.clone() }.validate().is_err());
    assert!(EphemeralBucketConfig { metadata_purge_interval_secs: 0, ..base.clone() }
        .validate()
        .is_err());
    // A purge age of zero is allowed: tombstones go as soon as they are a second old.
    assert!(EphemeralBucketConfig { metadata_purge_age_secs: 0, ..base }.validate().is_ok());
}

#[test]
fn test_engine_config_from_json() {
    let json = r#"{
        "executor": { "writer_threads": 1, "reader_threads": 1, "aux_io_threads": 0, "non_io_threads": 2 },
        "bucket": { "num_partitions": 8, "metadata_purge_interval_secs": 5 }
    }"#;
    let config = EngineConfig::from_json_str(json).unwrap();
    assert_eq!(config.executor.total_threads(), 4);
    assert_eq!(config.bucket.num_partitions, 8);
    assert_eq!(config.bucket.purge_interval(), Duration::from_secs(5));
    assert_eq!(config.bucket.ht_locks, 47);
}

#[test]
fn test_engine_config_rejects_bad_json() {
    assert!(EngineConfig::from_json_str("{ not json").is_err());
    let err = EngineConfig::from_json_str(r#"{ "bucket": { "ht_locks": 0 } }"#).unwrap_err();
    assert!(err.contains("bucket invalid"));
}

#[test]
fn test_config_handle_readers_keep_snapshot() {
    let handle = ConfigHandle::new(EphemeralBucketConfig::default());
    let reader = handle.load();
    handle.swap(EphemeralBucketConfig {
        metadata_purge_age_secs: 1,
        ..EphemeralBucketConfig::default()
    });
    assert_eq!(reader.metadata_purge_age_secs, 60);
    assert_eq!(handle.load().metadata_purge_age_secs, 1);
}
