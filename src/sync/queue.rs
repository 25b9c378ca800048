use serde_json::Value;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::warn;

use super::waiters::WaitList;
use crate::core::errors::Result;
use crate::task::{Task, WakeHandle};

struct QueueState {
    items: VecDeque<Value>,
    /// `None` for an unbounded queue; `Some(0)` makes every put a rendezvous
    capacity: Option<usize>,
    getters: WaitList,
    putters: WaitList<Value>,
}

impl QueueState {
    fn is_full(&self) -> bool {
        self.capacity
            .map(|capacity| self.items.len() >= capacity)
            .unwrap_or(false)
    }

    /// Pops one item, refilling the buffer from the oldest blocked producer.
    fn take(&mut self) -> Option<(Value, Option<WakeHandle>)> {
        match self.items.pop_front() {
            Some(item) => {
                let producer = self.putters.pop_live().map(|(handle, pending)| {
                    self.items.push_back(pending);
                    handle
                });
                Some((item, producer))
            }
            None => self
                .putters
                .pop_live()
                .map(|(handle, pending)| (pending, Some(handle))),
        }
    }
}

/// FIFO channel between tasks, also the bridge for non-task producers.
///
/// Items handed to a task by `get` arrive as the input of its next step, the
/// same way whether the item was buffered or the task had to block for it.
#[derive(Clone)]
pub struct Queue {
    inner: Rc<RefCell<QueueState>>,
}

impl Queue {
    pub fn new(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(QueueState {
                items: VecDeque::new(),
                capacity,
                getters: WaitList::default(),
                putters: WaitList::default(),
            })),
        }
    }

    /// Put `item` from inside `task`'s body.
    ///
    /// A blocked consumer receives the item directly. Otherwise it is
    /// buffered, or, when the queue is full, `task` blocks holding the item
    /// and `false` is returned. A full queue and a task that cannot block is
    /// a `Usage` error; the item is not kept.
    pub fn put(&self, task: &Task, item: Value) -> Result<bool> {
        let item = match self.offer(item) {
            Ok(()) => return Ok(true),
            Err(item) => item,
        };
        match task.block_on("queue") {
            Ok(handle) => {
                self.inner.borrow_mut().putters.push(handle, item);
                Ok(false)
            }
            Err(err) => {
                warn!(task_id = task.id(), %item, "queue full and producer cannot block");
                Err(err)
            }
        }
    }

    /// Put from outside any task. Hands the item back when the queue is full.
    pub fn push(&self, item: Value) -> std::result::Result<(), Value> {
        self.offer(item)
    }

    fn offer(&self, item: Value) -> std::result::Result<(), Value> {
        let consumer = {
            let mut st = self.inner.borrow_mut();
            match st.getters.pop_live() {
                Some((handle, ())) => handle,
                None => {
                    if st.is_full() {
                        return Err(item);
                    }
                    st.items.push_back(item);
                    return Ok(());
                }
            }
        };
        consumer.wake_with(item);
        Ok(())
    }

    /// Get the next item for `task`'s next step.
    ///
    /// Returns true when an item was available right away; otherwise the
    /// task blocks until a producer arrives.
    pub fn get(&self, task: &Task) -> Result<bool> {
        let taken = self.inner.borrow_mut().take();
        match taken {
            Some((item, producer)) => {
                task.deliver(Ok(item));
                if let Some(producer) = producer {
                    producer.wake();
                }
                Ok(true)
            }
            None => {
                let handle = task.block_on("queue")?;
                self.inner.borrow_mut().getters.push(handle, ());
                Ok(false)
            }
        }
    }

    /// Take an item from outside any task, never blocking.
    pub fn try_get(&self) -> Option<Value> {
        let (item, producer) = self.inner.borrow_mut().take()?;
        if let Some(producer) = producer {
            producer.wake();
        }
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.borrow().is_full()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.inner.borrow().capacity
    }

    /// Consumers blocked in `get`
    pub fn waiting_getters(&self) -> usize {
        self.inner.borrow().getters.len()
    }

    /// Producers blocked in `put`
    pub fn waiting_putters(&self) -> usize {
        self.inner.borrow().putters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::TaskError;
    use crate::scheduler::Scheduler;
    use serde_json::json;

    #[test]
    fn test_push_and_try_get_respect_capacity() {
        let queue = Queue::new(2);
        assert!(queue.push(json!(1)).is_ok());
        assert!(queue.push(json!(2)).is_ok());
        assert_eq!(queue.push(json!(3)), Err(json!(3)));
        assert!(queue.is_full());

        assert_eq!(queue.try_get(), Some(json!(1)));
        assert_eq!(queue.try_get(), Some(json!(2)));
        assert_eq!(queue.try_get(), None);
    }

    #[test]
    fn test_put_hands_item_to_blocked_consumer() {
        let scheduler = Scheduler::new();
        let queue = Queue::new(4);

        let q = queue.clone();
        let consumer = scheduler.spawn(move |task, _| {
            q.get(task)?;
            Ok(json!("placeholder"))
        });
        consumer.step(|_, item| Ok(item));
        scheduler.run_until_idle().unwrap();
        assert_eq!(queue.waiting_getters(), 1);

        assert!(queue.push(json!("direct")).is_ok());
        assert!(queue.is_empty());
        scheduler.run_until_idle().unwrap();
        assert_eq!(consumer.outcome().unwrap().unwrap(), json!("direct"));
    }

    #[test]
    fn test_full_queue_blocks_producer_until_get() {
        let scheduler = Scheduler::new();
        let queue = Queue::new(1);
        queue.push(json!("a")).unwrap();

        let q = queue.clone();
        let producer = scheduler.spawn(move |task, _| {
            q.put(task, json!("b"))?;
            Ok(Value::Null)
        });
        scheduler.run_until_idle().unwrap();
        assert_eq!(queue.waiting_putters(), 1);
        assert!(!producer.is_done());

        assert_eq!(queue.try_get(), Some(json!("a")));
        assert_eq!(queue.len(), 1);
        scheduler.run_until_idle().unwrap();
        assert!(producer.is_done());
        assert_eq!(queue.try_get(), Some(json!("b")));
    }

    #[test]
    fn test_zero_capacity_is_rendezvous() {
        let queue = Queue::new(0);
        assert_eq!(queue.push(json!(1)), Err(json!(1)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_put_on_full_queue_from_handler_is_refused() {
        let scheduler = Scheduler::new();
        let queue = Queue::new(1);
        queue.push(json!("a")).unwrap();
        let results = std::rc::Rc::new(RefCell::new(Vec::new()));

        let (q, r) = (queue.clone(), results.clone());
        scheduler.spawn(|_, v| Ok(v)).finally(move |task, _| {
            r.borrow_mut().push(q.put(task, json!("b")));
            r.borrow_mut().push(q.get(task));
            r.borrow_mut().push(q.get(task));
            Ok(())
        });
        scheduler.run_until_idle().unwrap();

        let results = results.borrow();
        assert!(matches!(results[0], Err(TaskError::Usage(_))));
        // the buffered item is still handed over without blocking
        assert!(matches!(results[1], Ok(true)));
        assert!(matches!(results[2], Err(TaskError::Usage(_))));
        assert_eq!(queue.waiting_putters(), 0);
        assert_eq!(queue.waiting_getters(), 0);
    }
}
