use std::collections::VecDeque;

/// FIFO ready queue with capacity control.
///
/// The scheduler is single-threaded, so this is a plain `VecDeque`; the
/// capacity is the overflow tripwire rather than backpressure.
#[derive(Debug)]
pub struct ReadyQueue<T> {
    queue: VecDeque<T>,
    capacity: usize,
}

impl<T> ReadyQueue<T> {
    /// Creates a new ReadyQueue with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
        }
    }

    /// Attempts to push an item onto the queue
    /// Returns false if the queue is at capacity
    pub fn push(&mut self, item: T) -> bool {
        if self.queue.len() >= self.capacity {
            return false;
        }
        self.queue.push_back(item);
        true
    }

    /// Takes everything queued right now. Items pushed after this call belong
    /// to the next batch.
    pub fn take_batch(&mut self) -> VecDeque<T> {
        std::mem::take(&mut self.queue)
    }

    /// Puts the unprocessed rest of a batch back in front of anything queued
    /// since, keeping its order. Ignores capacity: those items were already
    /// admitted once.
    pub fn requeue_front(&mut self, rest: impl DoubleEndedIterator<Item = T>) {
        for item in rest.rev() {
            self.queue.push_front(item);
        }
    }

    /// Returns the current number of items in the queue
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Checks if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Clears all items from the queue
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Returns the capacity of the queue
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
