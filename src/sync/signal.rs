use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;

use super::waiters::WaitList;
use crate::core::errors::Result;
use crate::task::Task;

/// Condition-variable analogue. Waiters are woken in FIFO order and receive
/// the payload as the input of their next step.
#[derive(Clone, Default)]
pub struct Signal {
    waiters: Rc<RefCell<WaitList>>,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `task` until the next `signal` or `broadcast`.
    pub fn wait(&self, task: &Task) -> Result<()> {
        let handle = task.block_on("signal")?;
        self.waiters.borrow_mut().push(handle, ());
        Ok(())
    }

    /// Wake the oldest waiter. Returns false if nobody was waiting.
    pub fn signal(&self, payload: Value) -> bool {
        let next = self.waiters.borrow_mut().pop_live();
        match next {
            Some((handle, ())) => handle.wake_with(payload),
            None => false,
        }
    }

    /// Wake every waiter; returns how many were woken.
    pub fn broadcast(&self, payload: Value) -> usize {
        let woken = self.waiters.borrow_mut().drain_live();
        woken
            .into_iter()
            .filter(|(handle, ())| handle.wake_with(payload.clone()))
            .count()
    }

    pub fn waiting(&self) -> usize {
        self.waiters.borrow().len()
    }
}
