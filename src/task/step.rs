use serde_json::Value;

use super::model::{Outcome, StepResult};
use super::Task;
use crate::core::errors::{Result, TaskError};

/// A step body: receives the task it runs in and the previous result.
pub type StepFn = Box<dyn FnMut(&Task, Value) -> StepResult>;

pub(crate) type SuccessFn = Box<dyn FnOnce(&Task, &Value) -> Result<()>>;
pub(crate) type FailureFn = Box<dyn FnOnce(&Task, &TaskError) -> Result<()>>;
pub(crate) type FinalFn = Box<dyn FnOnce(&Task, &Outcome) -> Result<()>>;
pub(crate) type Observer = Box<dyn FnOnce(&Outcome)>;

/// Entry of a task's step chain
pub(crate) enum Step {
    Plain(StepFn),
    Repeat(StepFn),
    /// Body of a child task spawned when the cursor reaches this entry
    Fork(StepFn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Plain,
    Repeat,
    Fork,
}

impl Step {
    pub(crate) fn kind(&self) -> StepKind {
        match self {
            Step::Plain(_) => StepKind::Plain,
            Step::Repeat(_) => StepKind::Repeat,
            Step::Fork(_) => StepKind::Fork,
        }
    }

    pub(crate) fn into_body(self) -> StepFn {
        match self {
            Step::Plain(body) | Step::Repeat(body) | Step::Fork(body) => body,
        }
    }
}

/// Raised from inside a Repeat body; consumed when the body returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopSignal {
    Break,
    Continue,
}
