use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::mem;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::ready_queue::ReadyQueue;
use super::timer::Timers;
use crate::core::config::SchedulerConfig;
use crate::core::errors::{Result, TaskError};
use crate::task::{Generator, StepResult, Task, TaskId, TaskInfo, WakeHandle};

/// Work the timer heap performs when a deadline passes
pub(crate) enum TimerAction {
    /// End a sleep
    Wake(WakeHandle),
    /// Fail a task that is still running
    Deadline { task: Task, duration: Duration },
}

impl TimerAction {
    fn is_live(&self) -> bool {
        match self {
            TimerAction::Wake(handle) => handle.is_live(),
            TimerAction::Deadline { task, .. } => !task.status().is_finished(),
        }
    }

    fn fire(self) {
        match self {
            TimerAction::Wake(handle) => {
                handle.wake();
            }
            TimerAction::Deadline { task, duration } => task.expire(duration),
        }
    }
}

/// State shared between a scheduler and every task it owns.
pub(crate) struct Shared {
    config: SchedulerConfig,
    next_id: Cell<TaskId>,
    ready: RefCell<ReadyQueue<Task>>,
    timers: RefCell<Timers<TimerAction>>,
    /// Tasks that have not finished yet
    tasks: RefCell<HashMap<TaskId, Task>>,
    /// Reentrancy guard: non-zero while a drain cycle runs
    stepping: Cell<usize>,
    ticks: Cell<u64>,
    completed: Cell<u64>,
    exit_after: Cell<Option<u64>>,
    stop: Cell<bool>,
    fatal: RefCell<Option<TaskError>>,
    unhandled: RefCell<Vec<(TaskId, TaskError)>>,
    notify: Notify,
}

impl Shared {
    fn new(config: SchedulerConfig) -> Self {
        Self {
            ready: RefCell::new(ReadyQueue::new(config.ready_capacity)),
            config,
            next_id: Cell::new(1),
            timers: RefCell::new(Timers::new()),
            tasks: RefCell::new(HashMap::new()),
            stepping: Cell::new(0),
            ticks: Cell::new(0),
            completed: Cell::new(0),
            exit_after: Cell::new(None),
            stop: Cell::new(false),
            fatal: RefCell::new(None),
            unhandled: RefCell::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    pub(crate) fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> Instant {
        Instant::now()
    }

    pub(crate) fn next_id(&self) -> TaskId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    pub(crate) fn register(&self, task: &Task) {
        self.tasks.borrow_mut().insert(task.id(), task.clone());
    }

    pub(crate) fn release(&self, id: TaskId) {
        let released = self.tasks.borrow_mut().remove(&id);
        if released.is_some() {
            self.completed.set(self.completed.get() + 1);
        }
    }

    /// Queue one tick for `task`. Work queued while a drain cycle runs is
    /// picked up by the next cycle.
    pub(crate) fn enqueue(&self, task: Task) {
        let pushed = self.ready.borrow_mut().push(task);
        if !pushed {
            let limit = self.ready.borrow().capacity();
            self.poison(TaskError::overflow("ready queue", limit));
            return;
        }
        if self.stepping.get() == 0 {
            self.notify.notify_one();
        }
    }

    pub(crate) fn add_timer(&self, at: Instant, action: TimerAction) {
        self.timers.borrow_mut().insert(at, action);
        if self.stepping.get() == 0 {
            self.notify.notify_one();
        }
    }

    /// Record a fatal condition; every driver call fails from now on.
    pub(crate) fn poison(&self, err: TaskError) {
        let mut fatal = self.fatal.borrow_mut();
        if fatal.is_none() {
            error!(error = %err, "scheduler poisoned");
            *fatal = Some(err);
        }
    }

    pub(crate) fn record_unhandled(&self, id: TaskId, err: TaskError) {
        self.unhandled.borrow_mut().push((id, err));
    }

    fn check_fatal(&self) -> Result<()> {
        match &*self.fatal.borrow() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn fire_timers(&self) {
        let due = self.timers.borrow_mut().pop_due(self.now());
        for action in due {
            action.fire();
        }
    }

    fn next_timer(&self) -> Option<Instant> {
        self.timers.borrow_mut().next_deadline(TimerAction::is_live)
    }
}

struct SteppingGuard<'a>(&'a Shared);

impl<'a> SteppingGuard<'a> {
    fn enter(shared: &'a Shared) -> Self {
        shared.stepping.set(shared.stepping.get() + 1);
        Self(shared)
    }
}

impl Drop for SteppingGuard<'_> {
    fn drop(&mut self) {
        self.0.stepping.set(self.0.stepping.get() - 1);
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub live_tasks: usize,
    pub ready_queue_size: usize,
    pub ready_queue_capacity: usize,
    pub pending_timers: usize,
    pub ticks: u64,
    pub completed_tasks: u64,
    pub unhandled_errors: usize,
}

/// Cooperative single-threaded scheduler.
///
/// Owns the ready queue, the timer heap and the table of live tasks. Every
/// instance is independent; tasks keep only a weak link back to it.
#[derive(Clone)]
pub struct Scheduler {
    shared: Rc<Shared>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create a scheduler with the default configuration
    pub fn new() -> Self {
        Self::from_shared(Rc::new(Shared::new(SchedulerConfig::default())))
    }

    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        info!(
            ready_capacity = config.ready_capacity,
            ticks_per_yield = config.ticks_per_yield,
            trace = config.trace,
            "scheduler configured"
        );
        Ok(Self::from_shared(Rc::new(Shared::new(config))))
    }

    pub(crate) fn from_shared(shared: Rc<Shared>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &SchedulerConfig {
        self.shared.config()
    }

    /// Create an empty root task, scheduled for the next tick. Register its
    /// steps before driving the scheduler.
    pub fn task(&self) -> Task {
        let task = Task::create(&self.shared, None);
        if let Some(deadline) = self.shared.config().default_deadline {
            task.deadline(deadline);
        }
        task.schedule();
        if self.shared.config().trace {
            debug!(task_id = task.id(), "root task created");
        }
        task
    }

    /// Create and schedule a root task running `body` as its first step
    pub fn spawn<F>(&self, body: F) -> Task
    where
        F: FnMut(&Task, Value) -> StepResult + 'static,
    {
        let task = self.task();
        task.step(body);
        task
    }

    /// Create a generator task; it stays parked until the first `next`.
    pub fn generator<F>(&self, body: F) -> Generator
    where
        F: FnMut(&Task, Value) -> StepResult + 'static,
    {
        Generator::create(&self.shared, body)
    }

    /// Run one drain cycle: fire due timers, then run every tick queued at
    /// the start of the cycle. Returns the number of ticks run.
    ///
    /// Called from inside a step body this is a no-op; the outer cycle keeps
    /// ownership of the queue.
    pub fn drain(&self) -> Result<usize> {
        let shared = &*self.shared;
        shared.check_fatal()?;
        if shared.stepping.get() > 0 {
            return Ok(0);
        }
        let _guard = SteppingGuard::enter(shared);

        shared.fire_timers();
        let mut batch = shared.ready.borrow_mut().take_batch();
        let mut ran = 0;
        while let Some(task) = batch.pop_front() {
            task.run_tick();
            ran += 1;
            shared.ticks.set(shared.ticks.get() + 1);
            shared.check_fatal()?;

            if let Some(left) = shared.exit_after.get() {
                let left = left.saturating_sub(1);
                shared.exit_after.set(Some(left));
                if left == 0 {
                    info!(ticks = shared.ticks.get(), "tick budget exhausted, stopping");
                    shared.exit_after.set(None);
                    shared.stop.set(true);
                    shared.ready.borrow_mut().requeue_front(batch.drain(..));
                    break;
                }
            }
        }
        Ok(ran)
    }

    /// Drain until no tick is queued. Timers that are not yet due stay
    /// pending. Returns the number of ticks run.
    pub fn run_until_idle(&self) -> Result<usize> {
        let mut total = 0;
        loop {
            total += self.drain()?;
            if self.shared.stop.get() || self.shared.ready.borrow().is_empty() {
                return Ok(total);
            }
        }
    }

    /// Drive ticks and timers until nothing is queued and no live timer is
    /// pending.
    pub async fn run(&self) -> Result<()> {
        self.drive(false).await
    }

    /// Like `run`, but keep waiting for external work until `stop` is called.
    pub async fn serve(&self) -> Result<()> {
        self.drive(true).await
    }

    async fn drive(&self, serving: bool) -> Result<()> {
        let shared = self.shared.clone();
        shared.stop.set(false);
        let per_yield = shared.config().ticks_per_yield;
        let mut since_yield = 0;

        loop {
            since_yield += self.drain()?;
            if shared.stop.get() {
                return Ok(());
            }
            if since_yield >= per_yield {
                since_yield = 0;
                tokio::task::yield_now().await;
            }
            if !shared.ready.borrow().is_empty() {
                continue;
            }
            match shared.next_timer() {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = shared.notify.notified() => {}
                    }
                }
                None if serving => shared.notify.notified().await,
                None => return Ok(()),
            }
        }
    }

    /// Make a running `run`/`serve` return after the current tick.
    pub fn stop(&self) {
        self.shared.stop.set(true);
        self.shared.notify.notify_one();
    }

    /// Stop the driver after `ticks` more ticks. Test-harness hook.
    pub fn exit_after(&self, ticks: u64) {
        self.shared.exit_after.set(Some(ticks));
    }

    /// Forget every task, tick and timer and restart ids. Refused while a
    /// drain cycle is running.
    pub fn reset(&self) -> Result<()> {
        let shared = &*self.shared;
        if shared.stepping.get() > 0 {
            return Err(TaskError::usage("reset called from inside a drain cycle"));
        }
        let ready = {
            let mut queue = shared.ready.borrow_mut();
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        let tasks = mem::take(&mut *shared.tasks.borrow_mut());
        shared.timers.borrow_mut().clear();
        warn!(dropped_tasks = tasks.len(), dropped_ticks = ready, "scheduler reset");
        drop(tasks);

        shared.next_id.set(1);
        shared.ticks.set(0);
        shared.completed.set(0);
        shared.exit_after.set(None);
        shared.stop.set(false);
        *shared.fatal.borrow_mut() = None;
        shared.unhandled.borrow_mut().clear();
        Ok(())
    }

    /// Look up a task that has not finished yet
    pub fn task_by_id(&self, id: TaskId) -> Option<Task> {
        self.shared.tasks.borrow().get(&id).cloned()
    }

    /// Diagnostic view of every live task, ordered by id
    pub fn snapshot(&self) -> Vec<TaskInfo> {
        let tasks: Vec<Task> = self.shared.tasks.borrow().values().cloned().collect();
        let mut infos: Vec<TaskInfo> = tasks.iter().map(Task::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Failures no handler or observer took care of
    pub fn unhandled(&self) -> Vec<(TaskId, TaskError)> {
        self.shared.unhandled.borrow().clone()
    }

    /// The fatal error the scheduler stopped on, if any
    pub fn fatal(&self) -> Option<TaskError> {
        self.shared.fatal.borrow().clone()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.ready.borrow().is_empty() && self.shared.next_timer().is_none()
    }

    pub fn stats(&self) -> SchedulerStats {
        let shared = &*self.shared;
        let ready = shared.ready.borrow();
        SchedulerStats {
            live_tasks: shared.tasks.borrow().len(),
            ready_queue_size: ready.len(),
            ready_queue_capacity: ready.capacity(),
            pending_timers: shared.timers.borrow().len(),
            ticks: shared.ticks.get(),
            completed_tasks: shared.completed.get(),
            unhandled_errors: shared.unhandled.borrow().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskStatus;
    use serde_json::json;

    #[test]
    fn test_work_queued_during_drain_runs_next_cycle() {
        let scheduler = Scheduler::new();
        scheduler.spawn(|task, v| {
            task.spawn(|_, v| Ok(v))?;
            Ok(v)
        });

        assert_eq!(scheduler.drain().unwrap(), 1);
        assert_eq!(scheduler.stats().ready_queue_size, 2);
        assert_eq!(scheduler.drain().unwrap(), 2);
    }

    #[test]
    fn test_stepping_guard_released_after_fatal() {
        let scheduler = Scheduler::new();
        scheduler.shared.poison(TaskError::overflow("test", 1));
        assert!(scheduler.drain().is_err());
        assert_eq!(scheduler.shared.stepping.get(), 0);
        assert!(scheduler.reset().is_ok());
    }

    #[test]
    fn test_exit_after_requeues_rest_of_batch() {
        let scheduler = Scheduler::new();
        let a = scheduler.spawn(|_, _| Ok(json!("a")));
        let b = scheduler.spawn(|_, _| Ok(json!("b")));
        scheduler.exit_after(1);

        assert_eq!(scheduler.drain().unwrap(), 1);
        assert_eq!(a.status(), TaskStatus::Ready);
        assert_eq!(b.status(), TaskStatus::Ready);
        assert_eq!(scheduler.stats().ready_queue_size, 2);
        assert!(b.result().is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sleeps_until_next_timer() {
        let scheduler = Scheduler::new();
        let task = scheduler.spawn(|task, v| {
            task.sleep(Duration::from_secs(3));
            Ok(v)
        });
        task.step(|_, _| Ok(json!("woke")));

        let started = Instant::now();
        scheduler.run().await.unwrap();
        assert_eq!(task.outcome().unwrap().unwrap(), json!("woke"));
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(scheduler.is_idle());
    }
}
