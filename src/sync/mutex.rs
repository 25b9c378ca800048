use std::cell::Cell;
use std::rc::Rc;
use tracing::warn;

use super::semaphore::Semaphore;
use crate::core::errors::{Result, TaskError};
use crate::task::{Task, TaskId};

/// Mutual exclusion between tasks: a one-permit semaphore that remembers
/// its owner.
///
/// Locking twice from the owner, or unlocking from any other task, is a
/// usage error.
#[derive(Clone)]
pub struct Mutex {
    permit: Semaphore,
    owner: Rc<Cell<Option<TaskId>>>,
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    pub fn new() -> Self {
        Self {
            permit: Semaphore::new(1),
            owner: Rc::new(Cell::new(None)),
        }
    }

    /// Lock for `task`. `Ok(false)` means the task blocks and resumes as the
    /// owner.
    pub fn lock(&self, task: &Task) -> Result<bool> {
        if self.owner.get() == Some(task.id()) {
            return Err(TaskError::usage(format!(
                "task {} already holds this mutex",
                task.id()
            )));
        }
        let acquired = self.permit.acquire(task)?;
        if acquired {
            self.owner.set(Some(task.id()));
        }
        Ok(acquired)
    }

    pub fn try_lock(&self, task: &Task) -> bool {
        if self.permit.try_acquire() {
            self.owner.set(Some(task.id()));
            true
        } else {
            false
        }
    }

    /// Unlock; ownership passes straight to the oldest blocked task.
    pub fn unlock(&self, task: &Task) -> Result<()> {
        if self.owner.get() != Some(task.id()) {
            warn!(
                task_id = task.id(),
                owner = ?self.owner.get(),
                "mutex released by a task that does not hold it"
            );
            return Err(TaskError::usage(format!(
                "task {} released a mutex it does not hold",
                task.id()
            )));
        }
        self.owner.set(None);
        if let Some(next) = self.permit.release()? {
            self.owner.set(Some(next));
        }
        Ok(())
    }

    pub fn owner(&self) -> Option<TaskId> {
        self.owner.get()
    }

    pub fn is_locked(&self) -> bool {
        self.owner.get().is_some()
    }

    pub fn waiting(&self) -> usize {
        self.permit.waiting()
    }
}

/// Reentrant mutex: the owner may lock again and must unlock as many times.
#[derive(Clone, Default)]
pub struct Lock {
    mutex: Mutex,
    depth: Rc<Cell<usize>>,
}

impl Lock {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok(false)` when `task` blocks; it resumes holding the lock once.
    pub fn lock(&self, task: &Task) -> Result<bool> {
        if self.mutex.owner() == Some(task.id()) {
            self.depth.set(self.depth.get() + 1);
            return Ok(true);
        }
        let acquired = self.mutex.lock(task)?;
        if acquired {
            self.depth.set(1);
        }
        Ok(acquired)
    }

    pub fn unlock(&self, task: &Task) -> Result<()> {
        if self.mutex.owner() != Some(task.id()) {
            return self.mutex.unlock(task);
        }
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth == 0 {
            self.mutex.unlock(task)?;
            if self.mutex.is_locked() {
                self.depth.set(1);
            }
        }
        Ok(())
    }

    pub fn owner(&self) -> Option<TaskId> {
        self.mutex.owner()
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }
}
