use std::collections::VecDeque;

use crate::task::WakeHandle;

/// FIFO list of suspended tasks, each with an optional payload.
///
/// Handles go stale when their task is resumed some other way (fulfilled,
/// deadline, finished); stale entries are skipped when popping.
pub(crate) struct WaitList<T = ()> {
    waiters: VecDeque<(WakeHandle, T)>,
}

impl<T> Default for WaitList<T> {
    fn default() -> Self {
        Self {
            waiters: VecDeque::new(),
        }
    }
}

impl<T> WaitList<T> {
    pub(crate) fn push(&mut self, handle: WakeHandle, item: T) {
        self.waiters.push_back((handle, item));
    }

    /// Oldest waiter whose suspension is still pending
    pub(crate) fn pop_live(&mut self) -> Option<(WakeHandle, T)> {
        while let Some((handle, item)) = self.waiters.pop_front() {
            if handle.is_live() {
                return Some((handle, item));
            }
        }
        None
    }

    pub(crate) fn drain_live(&mut self) -> Vec<(WakeHandle, T)> {
        self.waiters
            .drain(..)
            .filter(|(handle, _)| handle.is_live())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters
            .iter()
            .filter(|(handle, _)| handle.is_live())
            .count()
    }
}
