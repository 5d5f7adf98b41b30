//! Unit tests for individual components

mod clock_test;
mod config_test;
mod error_test;
mod task_log_test;
