use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::task::TaskId;

/// Unified error type for step bodies, handlers and the scheduler itself.
///
/// Errors are cloned into every Failure handler, every Final handler and every
/// completion observer, so the type is `Clone`; foreign errors are kept behind
/// an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// A value raised from inside a step body.
    #[error("step raised: {}", display_payload(.0))]
    Raised(Value),

    /// A task deadline elapsed before the task finished.
    #[error("task {task_id} timed out after {duration:?}")]
    Timeout { task_id: TaskId, duration: Duration },

    /// A forked child failed, failing the join it belongs to.
    #[error("task {task_id}: fork #{index} (task {child_id}) failed: {source}")]
    JoinFailure {
        task_id: TaskId,
        child_id: TaskId,
        index: usize,
        #[source]
        source: Box<TaskError>,
    },

    /// Queued work exceeded a safety bound. Fatal, never retried.
    #[error("scheduler overflow: {what} exceeded limit {limit}")]
    Overflow { what: String, limit: usize },

    /// A failed `Task::check` assertion.
    #[error("assertion failed in task {task_id}: {message}")]
    Assertion { task_id: TaskId, message: String },

    /// The API was used in a way the runtime refuses.
    #[error("usage error: {0}")]
    Usage(String),

    /// `Generator::next` on a generator that already finished.
    #[error("generator task {task_id} is exhausted")]
    GeneratorExhausted { task_id: TaskId },

    #[error("Configuration invalid: {0}")]
    InvalidConfiguration(String),

    #[error("{0}")]
    Other(Arc<anyhow::Error>),
}

fn display_payload(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl TaskError {
    /// Raise an arbitrary value
    pub fn raise(value: impl Into<Value>) -> Self {
        Self::Raised(value.into())
    }

    /// Create a usage error
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Create an overflow error
    pub fn overflow(what: impl Into<String>, limit: usize) -> Self {
        Self::Overflow {
            what: what.into(),
            limit,
        }
    }

    /// Overflow means the scheduler can no longer make progress safely.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Overflow { .. })
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, Self::Assertion { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The raised value, or the rendered message for every other kind.
    pub fn payload(&self) -> Value {
        match self {
            Self::Raised(value) => value.clone(),
            other => Value::String(other.to_string()),
        }
    }

    /// Walk `JoinFailure` chains down to the error that started them.
    pub fn root_cause(&self) -> &TaskError {
        match self {
            Self::JoinFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type alias for TaskError
pub type Result<T> = std::result::Result<T, TaskError>;

impl From<String> for TaskError {
    fn from(s: String) -> Self {
        TaskError::Raised(Value::String(s))
    }
}

impl From<&str> for TaskError {
    fn from(s: &str) -> Self {
        TaskError::Raised(Value::String(s.to_string()))
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::Other(Arc::new(err))
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::Other(Arc::new(err.into()))
    }
}
