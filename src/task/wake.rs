use serde_json::Value;
use std::fmt;

use super::model::{Outcome, TaskId};
use super::Task;
use crate::core::errors::TaskError;

/// Continuation for one suspension of one task.
///
/// Every suspension gets a fresh epoch. A handle only wakes the task while
/// that same suspension is still pending, so timers, primitives and
/// external callbacks that arrive late are harmless no-ops.
#[derive(Clone)]
pub struct WakeHandle {
    task: Task,
    epoch: u64,
}

impl WakeHandle {
    pub(crate) fn new(task: Task, epoch: u64) -> Self {
        Self { task, epoch }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id()
    }

    /// True while the suspension this handle was created for is pending.
    pub fn is_live(&self) -> bool {
        self.task.is_suspended_at(self.epoch)
    }

    /// Resume; the next step receives the suspended step's own result.
    pub fn wake(&self) -> bool {
        self.task.wake_at(self.epoch, None)
    }

    /// Resume with a value that becomes the next step's input.
    pub fn wake_with(&self, value: Value) -> bool {
        self.task.wake_at(self.epoch, Some(Ok(value)))
    }

    /// Resume by failing the task at its suspension point.
    pub fn fail(&self, err: TaskError) -> bool {
        self.task.wake_at(self.epoch, Some(Err(err)))
    }

    pub fn complete(&self, outcome: Outcome) -> bool {
        self.task.wake_at(self.epoch, Some(outcome))
    }
}

impl fmt::Debug for WakeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeHandle")
            .field("task", &self.task.id())
            .field("epoch", &self.epoch)
            .finish()
    }
}
