use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

use super::fork::ForkSet;
use super::generator::GeneratorState;
use super::model::{Outcome, StepResult, SuspendReason, TaskId, TaskInfo, TaskStatus};
use super::step::{FailureFn, FinalFn, LoopSignal, Observer, Step, SuccessFn};
use super::wake::WakeHandle;
use crate::core::errors::{Result, TaskError};
use crate::scheduler::{Scheduler, Shared, TimerAction};

/// Mutable part of a task. Never borrowed across a call into user code.
pub(crate) struct TaskState {
    pub(crate) label: Option<String>,
    pub(crate) parent: Option<Task>,
    pub(crate) status: TaskStatus,

    // Step chain
    /// `None` marks a consumed Plain step or a finished Repeat
    pub(crate) steps: Vec<Option<Step>>,
    pub(crate) cursor: usize,
    /// Where steps registered by the running body go
    pub(crate) insert_at: Option<usize>,
    pub(crate) inserted: usize,
    pub(crate) in_repeat: bool,
    pub(crate) loop_signal: Option<LoopSignal>,
    /// Back-to-back iterations of the current Repeat without a suspension
    pub(crate) loop_iterations: usize,

    // Values threaded between steps
    pub(crate) result: Value,
    pub(crate) error: Option<TaskError>,
    /// Delivered by a wake-up or a primitive; replaces the step result
    pub(crate) resumed: Option<Outcome>,
    pub(crate) vars: HashMap<String, Value>,

    // Suspension
    pub(crate) suspension: Option<SuspendReason>,
    pub(crate) epoch: u64,
    pub(crate) queued: bool,

    pub(crate) forks: ForkSet,
    pub(crate) generator: Option<Rc<RefCell<GeneratorState>>>,

    // Handlers
    pub(crate) in_handler: bool,
    pub(crate) on_success: Vec<SuccessFn>,
    pub(crate) on_failure: Vec<FailureFn>,
    pub(crate) on_final: Vec<FinalFn>,
    pub(crate) observers: Vec<Observer>,
    pub(crate) outcome: Option<Outcome>,

    pub(crate) created_at: DateTime<Utc>,
}

impl TaskState {
    fn new(parent: Option<Task>) -> Self {
        Self {
            label: None,
            parent,
            status: TaskStatus::Ready,
            steps: Vec::new(),
            cursor: 0,
            insert_at: None,
            inserted: 0,
            in_repeat: false,
            loop_signal: None,
            loop_iterations: 0,
            result: Value::Null,
            error: None,
            resumed: None,
            vars: HashMap::new(),
            suspension: None,
            epoch: 0,
            queued: false,
            forks: ForkSet::default(),
            generator: None,
            in_handler: false,
            on_success: Vec::new(),
            on_failure: Vec::new(),
            on_final: Vec::new(),
            observers: Vec::new(),
            outcome: None,
            created_at: Utc::now(),
        }
    }

    /// Folds a delivered value into the result, unless an error already won.
    pub(crate) fn apply_resumed(&mut self) {
        if let Some(resumed) = self.resumed.take() {
            if self.error.is_none() {
                match resumed {
                    Ok(value) => self.result = value,
                    Err(err) => self.error = Some(err),
                }
            }
        }
    }
}

pub(crate) struct TaskInner {
    id: TaskId,
    sched: Weak<Shared>,
    state: RefCell<TaskState>,
}

/// Handle to a cooperative task.
///
/// Cloning is cheap and every clone refers to the same task. Registration
/// methods return `&Self` so chains read top to bottom:
///
/// ```rust,ignore
/// let task = scheduler.spawn(|_, _| Ok(json!(1)));
/// task.step(|_, n| Ok(json!(n.as_i64().unwrap_or(0) + 1)))
///     .failure(|_, err| { eprintln!("{err}"); Ok(()) })
///     .finally(|_, _| Ok(()));
/// ```
#[derive(Clone)]
pub struct Task {
    inner: Rc<TaskInner>,
}

impl Task {
    /// Allocates and registers a task. It is not scheduled yet.
    pub(crate) fn create(shared: &Rc<Shared>, parent: Option<Task>) -> Task {
        let task = Task {
            inner: Rc::new(TaskInner {
                id: shared.next_id(),
                sched: Rc::downgrade(shared),
                state: RefCell::new(TaskState::new(parent)),
            }),
        };
        shared.register(&task);
        task
    }

    pub(crate) fn state(&self) -> Ref<'_, TaskState> {
        self.inner.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, TaskState> {
        self.inner.state.borrow_mut()
    }

    pub(crate) fn shared(&self) -> Option<Rc<Shared>> {
        self.inner.sched.upgrade()
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Assign a diagnostic label
    pub fn label(&self, label: impl Into<String>) -> &Self {
        self.state_mut().label = Some(label.into());
        self
    }

    pub fn name(&self) -> Option<String> {
        self.state().label.clone()
    }

    pub fn status(&self) -> TaskStatus {
        self.state().status
    }

    pub fn is_done(&self) -> bool {
        self.state().status == TaskStatus::Done
    }

    pub fn parent(&self) -> Option<Task> {
        self.state().parent.clone()
    }

    /// Last value produced by a step
    pub fn result(&self) -> Value {
        self.state().result.clone()
    }

    pub fn error(&self) -> Option<TaskError> {
        self.state().error.clone()
    }

    /// Final outcome, once the task is done
    pub fn outcome(&self) -> Option<Outcome> {
        self.state().outcome.clone()
    }

    /// Overwrite the current result. Mostly useful in handlers of a task that
    /// has no steps of its own.
    pub fn set_result(&self, value: Value) -> &Self {
        self.state_mut().result = value;
        self
    }

    pub fn scheduler(&self) -> Option<Scheduler> {
        self.shared().map(Scheduler::from_shared)
    }

    pub fn same_as(&self, other: &Task) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn info(&self) -> TaskInfo {
        let st = self.state();
        TaskInfo {
            id: self.id(),
            label: st.label.clone(),
            parent: st.parent.as_ref().map(Task::id),
            status: st.status,
            suspended: st.suspension,
            cursor: st.cursor,
            steps: st.steps.iter().filter(|step| step.is_some()).count(),
            pending_forks: st.forks.pending(),
            result: st.result.clone(),
            error: st.error.as_ref().map(|e| e.to_string()),
            created_at: st.created_at,
        }
    }

    // ----- step registration -------------------------------------------

    fn push_step(&self, step: Step) -> &Self {
        let mut st = self.state_mut();
        if st.status.is_finished() {
            warn!(task_id = self.id(), "step registered on a finished task ignored");
            return self;
        }
        match st.insert_at {
            Some(at) => {
                let at = at + st.inserted;
                st.steps.insert(at, Some(step));
                st.inserted += 1;
            }
            None => st.steps.push(Some(step)),
        }
        self
    }

    /// Register a Plain step. Its input is the previous step's result.
    pub fn step<F>(&self, body: F) -> &Self
    where
        F: FnMut(&Task, Value) -> StepResult + 'static,
    {
        self.push_step(Step::Plain(Box::new(body)))
    }

    /// Register a Repeat step; the body runs again with its own result until
    /// it calls [`Task::break_loop`].
    pub fn repeat<F>(&self, body: F) -> &Self
    where
        F: FnMut(&Task, Value) -> StepResult + 'static,
    {
        self.push_step(Step::Repeat(Box::new(body)))
    }

    /// Register a Fork step. The body becomes the first step of a child task;
    /// the next non-fork step joins every fork registered since the last join
    /// and receives their results as one array in registration order.
    pub fn fork<F>(&self, body: F) -> &Self
    where
        F: FnMut(&Task, Value) -> StepResult + 'static,
    {
        self.push_step(Step::Fork(Box::new(body)))
    }

    pub fn success<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&Task, &Value) -> Result<()> + 'static,
    {
        self.state_mut().on_success.push(Box::new(handler));
        self
    }

    pub fn failure<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&Task, &TaskError) -> Result<()> + 'static,
    {
        self.state_mut().on_failure.push(Box::new(handler));
        self
    }

    pub fn finally<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&Task, &Outcome) -> Result<()> + 'static,
    {
        self.state_mut().on_final.push(Box::new(handler));
        self
    }

    /// Call `observer` with the final outcome once the task is done,
    /// immediately if it already is.
    pub fn on_complete<F>(&self, observer: F) -> &Self
    where
        F: FnOnce(&Outcome) + 'static,
    {
        let finished = {
            let mut st = self.state_mut();
            let finished = if st.status == TaskStatus::Done {
                st.outcome.clone()
            } else {
                None
            };
            if finished.is_none() {
                st.observers.push(Box::new(observer));
                return self;
            }
            finished
        };
        if let Some(outcome) = finished {
            observer(&outcome);
        }
        self
    }

    /// Spawn a child task that inherits this task's scope but is not part of
    /// any join barrier.
    pub fn spawn<F>(&self, body: F) -> Result<Task>
    where
        F: FnMut(&Task, Value) -> StepResult + 'static,
    {
        let shared = self
            .shared()
            .ok_or_else(|| TaskError::usage("scheduler is gone"))?;
        let child = Task::create(&shared, Some(self.clone()));
        child.step(body);
        child.schedule();
        Ok(child)
    }

    // ----- scoped variables --------------------------------------------

    /// Write into this task's own scope
    pub fn set_var(&self, name: impl Into<String>, value: Value) -> &Self {
        self.state_mut().vars.insert(name.into(), value);
        self
    }

    /// Read a variable, walking up through the parents until found
    pub fn var(&self, name: &str) -> Option<Value> {
        let parent = {
            let st = self.state();
            if let Some(value) = st.vars.get(name) {
                return Some(value.clone());
            }
            st.parent.clone()
        };
        parent.and_then(|parent| parent.var(name))
    }

    /// Read a variable from this task's own scope only
    pub fn local_var(&self, name: &str) -> Option<Value> {
        self.state().vars.get(name).cloned()
    }

    // ----- suspension --------------------------------------------------

    /// Suspend the task. Takes effect when the running body returns.
    pub(crate) fn suspend(&self, reason: SuspendReason) -> WakeHandle {
        let mut st = self.state_mut();
        if st.in_handler || st.status.is_finished() {
            warn!(
                task_id = self.id(),
                ?reason,
                "suspension outside of a step body ignored"
            );
            return WakeHandle::new(self.clone(), st.epoch);
        }
        st.epoch += 1;
        st.suspension = Some(reason);
        if st.status != TaskStatus::Running {
            st.status = reason.status();
        }
        WakeHandle::new(self.clone(), st.epoch)
    }

    /// Block on a coordination primitive. Fails when the task cannot
    /// suspend here: inside a handler, or once it has finished.
    pub(crate) fn block_on(&self, primitive: &str) -> Result<WakeHandle> {
        let handle = self.suspend(SuspendReason::Wait);
        if handle.is_live() {
            Ok(handle)
        } else {
            Err(TaskError::usage(format!(
                "task {} cannot block on a {} outside of a step body",
                self.id(),
                primitive
            )))
        }
    }

    pub(crate) fn is_suspended_at(&self, epoch: u64) -> bool {
        let st = self.state();
        st.epoch == epoch && st.suspension.is_some()
    }

    pub(crate) fn wake_at(&self, epoch: u64, delivered: Option<Outcome>) -> bool {
        let schedule = {
            let mut st = self.state_mut();
            if st.epoch != epoch || st.suspension.is_none() {
                return false;
            }
            st.suspension = None;
            if let Some(outcome) = delivered {
                st.resumed = Some(outcome);
            }
            st.status.is_suspended()
        };
        if schedule {
            self.schedule();
        }
        true
    }

    /// Hand a value to the task's next step without suspending it.
    pub(crate) fn deliver(&self, outcome: Outcome) {
        self.state_mut().resumed = Some(outcome);
    }

    /// Mark ready and queue a tick, unless one is already queued.
    pub(crate) fn schedule(&self) {
        let Some(shared) = self.shared() else {
            return;
        };
        {
            let mut st = self.state_mut();
            if st.status.is_finished() {
                return;
            }
            st.status = TaskStatus::Ready;
            if st.queued {
                return;
            }
            st.queued = true;
        }
        shared.enqueue(self.clone());
    }

    /// Suspend for `duration`; the next step receives this step's result.
    pub fn sleep(&self, duration: Duration) -> &Self {
        let handle = self.suspend(SuspendReason::Sleep);
        if handle.is_live() {
            if let Some(shared) = self.shared() {
                shared.add_timer(shared.now() + duration, TimerAction::Wake(handle));
            }
        }
        self
    }

    /// Suspend until resumed through [`Task::resume`] or the returned handle.
    pub fn pause(&self) -> WakeHandle {
        self.suspend(SuspendReason::Pause)
    }

    /// Resume a paused or sleeping task; `value` becomes the next input.
    pub fn resume(&self, value: Value) -> Result<()> {
        let epoch = {
            let st = self.state();
            match st.suspension {
                Some(SuspendReason::Pause)
                | Some(SuspendReason::Sleep)
                | Some(SuspendReason::Inspect) => st.epoch,
                other => {
                    return Err(TaskError::usage(format!(
                        "task {} is not paused (suspension: {:?})",
                        self.id(),
                        other
                    )))
                }
            }
        };
        self.wake_at(epoch, Some(Ok(value)));
        Ok(())
    }

    // ----- loop control ------------------------------------------------

    /// End the enclosing Repeat after the current iteration.
    pub fn break_loop(&self) -> Result<()> {
        self.loop_signal(LoopSignal::Break)
    }

    /// Re-enter the enclosing Repeat right away, within the same tick.
    pub fn continue_loop(&self) -> Result<()> {
        self.loop_signal(LoopSignal::Continue)
    }

    fn loop_signal(&self, signal: LoopSignal) -> Result<()> {
        let mut st = self.state_mut();
        if !st.in_repeat {
            return Err(TaskError::usage(format!(
                "{:?} outside of a repeat body in task {}",
                signal,
                self.id()
            )));
        }
        st.loop_signal = Some(signal);
        Ok(())
    }

    // ----- cross-task injection ----------------------------------------

    /// Fulfil this task's pending step from outside its own chain.
    ///
    /// A suspended task (sleeping, paused, blocked on a primitive or on a join)
    /// is released and its next step receives `outcome`; abandoned forks keep
    /// running detached. A queued or running task gets `outcome` as the
    /// result of its current step.
    pub fn fulfill(&self, outcome: Outcome) -> Result<()> {
        let schedule = {
            let mut st = self.state_mut();
            if st.status.is_finished() {
                return Err(TaskError::usage(format!(
                    "task {} already finished",
                    self.id()
                )));
            }
            st.resumed = Some(outcome);
            if st.status.is_suspended() {
                st.epoch += 1;
                st.suspension = None;
                st.forks.detach();
                true
            } else {
                false
            }
        };
        debug!(task_id = self.id(), "step fulfilled from outside the chain");
        if schedule {
            self.schedule();
        }
        Ok(())
    }

    /// Fail the task with `Timeout` if it is still running after `duration`.
    pub fn deadline(&self, duration: Duration) -> &Self {
        if let Some(shared) = self.shared() {
            shared.add_timer(
                shared.now() + duration,
                TimerAction::Deadline {
                    task: self.clone(),
                    duration,
                },
            );
        }
        self
    }

    pub(crate) fn expire(&self, duration: Duration) {
        if self.status().is_finished() {
            return;
        }
        warn!(task_id = self.id(), ?duration, "task deadline elapsed");
        let _ = self.fulfill(Err(TaskError::Timeout {
            task_id: self.id(),
            duration,
        }));
    }

    // ----- assertions --------------------------------------------------

    /// Assert `condition`. Fails with `TaskError::Assertion`, or in
    /// `pause_on_assert` mode stops the task for inspection; resume it to
    /// carry on.
    pub fn check(&self, condition: bool, message: impl Into<String>) -> Result<()> {
        if condition {
            return Ok(());
        }
        let message = message.into();
        let pause = self
            .shared()
            .map(|shared| shared.config().pause_on_assert)
            .unwrap_or(false);
        if pause {
            warn!(task_id = self.id(), %message, "assertion failed, task paused for inspection");
            self.suspend(SuspendReason::Inspect);
            return Ok(());
        }
        Err(TaskError::Assertion {
            task_id: self.id(),
            message,
        })
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Task");
        dbg.field("id", &self.id());
        match self.inner.state.try_borrow() {
            Ok(st) => dbg
                .field("label", &st.label)
                .field("status", &st.status)
                .field("cursor", &st.cursor)
                .finish(),
            Err(_) => dbg.finish_non_exhaustive(),
        }
    }
}
