//! Fork/join barrier.
//!
//! Consecutive Fork steps open one fork run. Every child reports back into its
//! slot; the next non-fork step (or the end of the chain) is the join and only
//! runs once every slot is filled. Results are collected in slot order, so the
//! join sees fork-registration order whatever order the children finished in.

use serde_json::Value;
use std::rc::Rc;
use tracing::debug;

use super::model::{Outcome, SuspendReason, TaskId, TaskStatus};
use super::step::{Step, StepFn};
use super::Task;
use crate::core::errors::TaskError;
use crate::scheduler::Shared;

struct ForkSlot {
    child: TaskId,
    outcome: Option<Outcome>,
}

/// The fork run a task is currently gathering.
#[derive(Default)]
pub(crate) struct ForkSet {
    /// Bumped whenever a run is closed or abandoned, so late reports from
    /// children of an old run are ignored.
    generation: u64,
    slots: Vec<ForkSlot>,
    pending: usize,
}

impl ForkSet {
    pub(crate) fn is_open(&self) -> bool {
        !self.slots.is_empty()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending
    }

    fn open_slot(&mut self, child: TaskId) -> (u64, usize) {
        self.slots.push(ForkSlot {
            child,
            outcome: None,
        });
        self.pending += 1;
        (self.generation, self.slots.len() - 1)
    }

    /// Records a child outcome. Returns true when it was the last one missing.
    fn settle(&mut self, generation: u64, index: usize, outcome: Outcome) -> bool {
        if generation != self.generation {
            return false;
        }
        match self.slots.get_mut(index) {
            Some(slot) if slot.outcome.is_none() => {
                slot.outcome = Some(outcome);
                self.pending -= 1;
                self.pending == 0
            }
            _ => false,
        }
    }

    /// Closes a completed run: the first failure in registration order fails
    /// the join, otherwise the values come back as one array.
    pub(crate) fn close(&mut self, task_id: TaskId) -> Outcome {
        let slots = std::mem::take(&mut self.slots);
        self.generation += 1;
        self.pending = 0;

        let mut values = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            match slot.outcome {
                Some(Ok(value)) => values.push(value),
                Some(Err(err)) => {
                    return Err(TaskError::JoinFailure {
                        task_id,
                        child_id: slot.child,
                        index,
                        source: Box::new(err),
                    })
                }
                None => values.push(Value::Null),
            }
        }
        Ok(Value::Array(values))
    }

    /// Abandons the current run; children keep running but nobody waits.
    pub(crate) fn detach(&mut self) {
        if self.is_open() {
            self.slots.clear();
            self.pending = 0;
            self.generation += 1;
        }
    }
}

impl Task {
    /// Spawns the child for one Fork step and wires its outcome into the
    /// parent's current fork run. The child starts on the next tick.
    pub(crate) fn start_fork(&self, shared: &Rc<Shared>, body: StepFn, input: Value) {
        let child = Task::create(shared, Some(self.clone()));
        {
            let mut st = child.state_mut();
            st.steps.push(Some(Step::Plain(body)));
            st.result = input;
        }

        let (generation, index) = self.state_mut().forks.open_slot(child.id());
        let parent = self.clone();
        child.on_complete(move |outcome| parent.fork_settled(generation, index, outcome.clone()));

        debug!(
            task_id = self.id(),
            child_id = child.id(),
            index,
            "fork spawned"
        );
        child.schedule();
    }

    fn fork_settled(&self, generation: u64, index: usize, outcome: Outcome) {
        let wake = {
            let mut st = self.state_mut();
            let last = st.forks.settle(generation, index, outcome);
            if last && st.suspension == Some(SuspendReason::Join) {
                st.suspension = None;
                st.status == TaskStatus::Blocked
            } else {
                false
            }
        };
        if wake {
            debug!(task_id = self.id(), "join barrier released");
            self.schedule();
        }
    }
}
