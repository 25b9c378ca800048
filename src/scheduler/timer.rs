use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tokio::time::Instant;

struct TimerEntry<T> {
    at: Instant,
    seq: u64,
    action: T,
}

impl<T> PartialEq for TimerEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<T> Eq for TimerEntry<T> {}

impl<T> PartialOrd for TimerEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for TimerEntry<T> {
    // Reversed so the BinaryHeap pops the earliest deadline; `seq` keeps
    // timers with equal deadlines in insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Deadline-ordered timer heap.
pub(crate) struct Timers<T> {
    heap: BinaryHeap<TimerEntry<T>>,
    seq: u64,
}

impl<T> Timers<T> {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    pub(crate) fn insert(&mut self, at: Instant, action: T) {
        self.seq += 1;
        self.heap.push(TimerEntry {
            at,
            seq: self.seq,
            action,
        });
    }

    /// Removes and returns every action due at `now`, earliest first.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.at > now {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                due.push(entry.action);
            }
        }
        due
    }

    /// Drops leading timers whose action no longer matters, then reports the
    /// next deadline.
    pub(crate) fn next_deadline(&mut self, live: impl Fn(&T) -> bool) -> Option<Instant> {
        while let Some(top) = self.heap.peek() {
            if live(&top.action) {
                return Some(top.at);
            }
            self.heap.pop();
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}
