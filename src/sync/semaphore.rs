use std::cell::RefCell;
use std::rc::Rc;
use tracing::warn;

use super::waiters::WaitList;
use crate::core::errors::{Result, TaskError};
use crate::task::{Task, TaskId};

struct SemaphoreState {
    permits: usize,
    capacity: usize,
    waiters: WaitList,
}

/// Counting semaphore for tasks of one scheduler.
///
/// `acquire` either takes a permit right away or blocks the calling task;
/// `release` hands the permit straight to the oldest blocked task, so the
/// count never rises while somebody is waiting.
#[derive(Clone)]
pub struct Semaphore {
    inner: Rc<RefCell<SemaphoreState>>,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SemaphoreState {
                permits: capacity,
                capacity,
                waiters: WaitList::default(),
            })),
        }
    }

    /// Take a permit for `task`.
    ///
    /// Returns true when the permit was free. Otherwise `task` blocks once
    /// its current body returns and resumes holding the permit. A task that
    /// cannot block (a handler, a finished task) gets a `Usage` error and
    /// no permit.
    pub fn acquire(&self, task: &Task) -> Result<bool> {
        if self.try_acquire() {
            return Ok(true);
        }
        let handle = task.block_on("semaphore")?;
        self.inner.borrow_mut().waiters.push(handle, ());
        Ok(false)
    }

    /// Take a permit if one is free, never blocking.
    pub fn try_acquire(&self) -> bool {
        let mut st = self.inner.borrow_mut();
        if st.permits > 0 {
            st.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Give a permit back. Returns the task it was handed to, if any.
    pub fn release(&self) -> Result<Option<TaskId>> {
        let next = {
            let mut st = self.inner.borrow_mut();
            match st.waiters.pop_live() {
                Some((handle, ())) => Some(handle),
                None => {
                    if st.permits >= st.capacity {
                        warn!(capacity = st.capacity, "semaphore released more often than acquired");
                        return Err(TaskError::usage(format!(
                            "semaphore released above its capacity of {}",
                            st.capacity
                        )));
                    }
                    st.permits += 1;
                    None
                }
            }
        };
        Ok(next.map(|handle| {
            handle.wake();
            handle.task_id()
        }))
    }

    pub fn available(&self) -> usize {
        self.inner.borrow().permits
    }

    pub fn capacity(&self) -> usize {
        self.inner.borrow().capacity
    }

    /// Number of tasks blocked in `acquire`
    pub fn waiting(&self) -> usize {
        self.inner.borrow().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use crate::task::TaskStatus;
    use serde_json::json;

    #[test]
    fn test_try_acquire_and_release() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        assert_eq!(sem.available(), 0);

        assert_eq!(sem.release().unwrap(), None);
        assert_eq!(sem.available(), 1);
        sem.release().unwrap();
        assert!(matches!(sem.release(), Err(TaskError::Usage(_))));
        assert_eq!(sem.available(), 2);
    }

    #[test]
    fn test_release_hands_permit_to_oldest_waiter() {
        let scheduler = Scheduler::new();
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());

        let mut waiters = Vec::new();
        for _ in 0..2 {
            let s = sem.clone();
            let task = scheduler.spawn(move |task, _| {
                s.acquire(task)?;
                Ok(json!("acquired"))
            });
            waiters.push(task);
        }
        scheduler.run_until_idle().unwrap();
        assert_eq!(sem.waiting(), 2);
        assert_eq!(waiters[0].status(), TaskStatus::Blocked);

        assert_eq!(sem.release().unwrap(), Some(waiters[0].id()));
        assert_eq!(sem.available(), 0);
        assert_eq!(sem.waiting(), 1);

        scheduler.run_until_idle().unwrap();
        assert!(waiters[0].is_done());
        assert_eq!(waiters[1].status(), TaskStatus::Blocked);
    }

    #[test]
    fn test_acquire_from_handler_is_refused() {
        let scheduler = Scheduler::new();
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        let refused = Rc::new(RefCell::new(None));

        let (s, r) = (sem.clone(), refused.clone());
        scheduler.spawn(|_, v| Ok(v)).finally(move |task, _| {
            *r.borrow_mut() = Some(s.acquire(task));
            Ok(())
        });
        scheduler.run_until_idle().unwrap();

        assert!(matches!(*refused.borrow(), Some(Err(TaskError::Usage(_)))));
        assert_eq!(sem.waiting(), 0);
        assert_eq!(sem.release().unwrap(), None);
    }
}
