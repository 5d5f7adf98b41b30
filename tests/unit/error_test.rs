//! Tests for error types

use ephemeral_kv::core::{EngineError, SchedulerError, TaskClass};

#[test]
fn test_scheduler_error_messages() {
    assert_eq!(
        SchedulerError::PoolShutdown.to_string(),
        "executor pool has been shut down"
    );
    assert_eq!(
        SchedulerError::NoWorkers(TaskClass::AuxIo).to_string(),
        "no worker threads serve task class `aux_io`"
    );
    assert_eq!(
        SchedulerError::InvalidConfig("task_log_size must be greater than 0".into()).to_string(),
        "invalid configuration: task_log_size must be greater than 0"
    );
}

#[test]
fn test_engine_error_messages() {
    assert_eq!(
        EngineError::UnknownPartition(70).to_string(),
        "partition 70 does not exist"
    );
    assert!(EngineError::InvariantViolation("stale item indexed".into())
        .to_string()
        .contains("stale item indexed"));
}

#[test]
fn test_errors_convert_into_anyhow() {
    fn fails() -> ephemeral_kv::core::AppResult<()> {
        Err(EngineError::UnknownPartition(3))?
    }
    let err = fails().unwrap_err();
    assert!(err.downcast_ref::<EngineError>().is_some());
}
