//! Generator emulation on top of task suspension.
//!
//! A generator is an ordinary task that starts parked. `next` wakes it with an
//! input that its next step receives as the previous result; the body hands a
//! value back with [`Task::yield_value`], which parks the task again once the
//! body returns. Local state lives in the step closures and the task's
//! variables, and the cursor remembers which step or loop iteration resumes.

use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, warn};

use super::model::{Outcome, StepResult, SuspendReason, TaskId};
use super::wake::WakeHandle;
use super::Task;
use crate::core::errors::{Result, TaskError};
use crate::scheduler::Shared;

#[derive(Default)]
pub(crate) struct GeneratorState {
    /// Task blocked in `next`, waiting for the next yielded value
    consumer: Option<WakeHandle>,
    /// The generator's own suspension, released by `next` or `resume`
    parked: Option<WakeHandle>,
    /// Value yielded while nobody was waiting
    buffered: Option<Value>,
    done: bool,
}

/// Consumer-side handle of a generator task.
#[derive(Clone)]
pub struct Generator {
    task: Task,
    state: Rc<RefCell<GeneratorState>>,
}

impl Generator {
    pub(crate) fn create<F>(shared: &Rc<Shared>, body: F) -> Generator
    where
        F: FnMut(&Task, Value) -> StepResult + 'static,
    {
        let task = Task::create(shared, None);
        let state = Rc::new(RefCell::new(GeneratorState::default()));
        task.state_mut().generator = Some(state.clone());
        task.step(body);

        let parked = task.suspend(SuspendReason::Start);
        state.borrow_mut().parked = Some(parked);

        let observed = state.clone();
        let task_id = task.id();
        task.on_complete(move |outcome| Generator::completed(&observed, task_id, outcome));

        Generator { task, state }
    }

    fn completed(state: &Rc<RefCell<GeneratorState>>, task_id: TaskId, outcome: &Outcome) {
        let consumer = {
            let mut st = state.borrow_mut();
            st.done = true;
            st.parked = None;
            st.consumer.take()
        };
        match consumer {
            Some(consumer) if consumer.is_live() => {
                consumer.complete(outcome.clone());
            }
            _ => {
                if let Err(err) = outcome {
                    warn!(task_id, error = %err, "generator failed with no consumer waiting");
                }
            }
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn is_done(&self) -> bool {
        self.state.borrow().done
    }

    /// Ask for the next value from inside `caller`'s step body.
    ///
    /// The caller blocks until the generator yields; the yielded value (or
    /// the generator's final result once its chain ends) becomes the input of
    /// the caller's next step. `input` is fed to the generator as the
    /// previous result of the step it resumes at. A value that was already
    /// yielded is handed over without resuming the generator.
    pub fn next(&self, caller: &Task, input: Value) -> Result<()> {
        let buffered = {
            let mut st = self.state.borrow_mut();
            if st.done {
                return Err(TaskError::GeneratorExhausted {
                    task_id: self.task.id(),
                });
            }
            if st.consumer.as_ref().map(WakeHandle::is_live).unwrap_or(false) {
                return Err(TaskError::usage(format!(
                    "generator {} already has a pending consumer",
                    self.task.id()
                )));
            }
            st.buffered.take()
        };
        if let Some(value) = buffered {
            caller.deliver(Ok(value));
            return Ok(());
        }

        let waiting = caller.block_on("generator")?;
        let parked = {
            let mut st = self.state.borrow_mut();
            st.consumer = Some(waiting);
            st.parked.take()
        };
        match parked {
            Some(parked) if parked.is_live() => {
                parked.wake_with(input);
            }
            _ => debug!(
                task_id = self.task.id(),
                "generator is running; consumer waits for its next yield"
            ),
        }
        Ok(())
    }

    /// Resume the generator from host code, outside any task.
    pub fn resume(&self, input: Value) -> Result<()> {
        let parked = {
            let mut st = self.state.borrow_mut();
            if st.done {
                return Err(TaskError::GeneratorExhausted {
                    task_id: self.task.id(),
                });
            }
            st.parked.take()
        };
        match parked {
            Some(parked) if parked.wake_with(input) => Ok(()),
            _ => Err(TaskError::usage(format!(
                "generator {} is not parked",
                self.task.id()
            ))),
        }
    }

    /// Take the value yielded while no task was waiting in `next`.
    pub fn take_yielded(&self) -> Option<Value> {
        self.state.borrow_mut().buffered.take()
    }
}

impl Task {
    /// Hand `value` to the generator's consumer and park this generator
    /// once the current body returns.
    pub fn yield_value(&self, value: Value) -> Result<()> {
        let state = self.state().generator.clone().ok_or_else(|| {
            TaskError::usage(format!("task {} is not a generator", self.id()))
        })?;

        let parked = self.suspend(SuspendReason::Yield);
        if !parked.is_live() {
            return Err(TaskError::usage("yield outside of a step body"));
        }

        let consumer = {
            let mut st = state.borrow_mut();
            st.parked = Some(parked);
            st.consumer.take()
        };
        match consumer {
            Some(consumer) if consumer.is_live() => {
                consumer.wake_with(value);
            }
            _ => state.borrow_mut().buffered = Some(value),
        }
        Ok(())
    }
}
