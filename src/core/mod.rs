//! Background task executor: tasks, ready queues, worker threads and the pool.

pub mod error;
pub mod executor_pool;
pub mod executor_thread;
mod ready_queue;
pub mod task;
pub mod task_log;

pub use error::{AppResult, EngineError, SchedulerError};
pub use executor_pool::{ExecutorPool, PoolStats};
pub use executor_thread::{ExecutorState, ExecutorThread, ThreadSnapshot, IDLE_TASK_NAME};
pub use task::{NextRun, Task, TaskClass, TaskHandle, TaskId, TaskStatus};
pub use task_log::{TaskLog, TaskLogEntry};
