use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::core::errors::TaskError;

// Type aliases
pub type TaskId = u64;

/// What a step body hands to the next step.
pub type StepResult = Result<Value, TaskError>;

/// How a task ended; handed to Final handlers and completion observers.
pub type Outcome = Result<Value, TaskError>;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued for the next tick
    Ready,
    /// A step body or handler is executing
    Running,
    /// Suspended by sleep, pause, a generator yield or an inspection stop
    Paused,
    /// Waiting on a primitive or on a join barrier
    Blocked,
    /// Step chain finished without error; handlers are running
    Succeeded,
    /// Step chain failed; handlers are running
    Failed,
    /// Handlers ran, observers notified
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Done => "done",
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, TaskStatus::Paused | TaskStatus::Blocked)
    }

    /// The step chain is over; only handlers may still be running.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Done
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task is currently suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    Sleep,
    Pause,
    /// Waiting on a semaphore, mutex, queue, signal, generator or boxon
    Wait,
    /// Waiting for the forks registered since the previous join
    Join,
    /// A generator handed a value out and waits to be resumed
    Yield,
    /// A generator that was never resumed
    Start,
    /// Stopped on a failed assertion in debug mode
    Inspect,
}

impl SuspendReason {
    pub fn status(&self) -> TaskStatus {
        match self {
            SuspendReason::Wait | SuspendReason::Join => TaskStatus::Blocked,
            _ => TaskStatus::Paused,
        }
    }
}

/// Serializable snapshot of a task, for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub label: Option<String>,
    pub parent: Option<TaskId>,
    pub status: TaskStatus,
    pub suspended: Option<SuspendReason>,
    pub cursor: usize,
    pub steps: usize,
    pub pending_forks: usize,
    pub result: Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
