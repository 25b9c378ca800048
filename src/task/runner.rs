//! One tick of a task: run steps until the chain suspends, reschedules or
//! ends, then route the outcome through the handlers.

use std::mem;
use std::rc::Rc;
use tracing::{debug, error, warn};

use super::model::{Outcome, SuspendReason, TaskStatus};
use super::step::{LoopSignal, Step, StepKind};
use super::Task;
use crate::core::errors::TaskError;
use crate::scheduler::Shared;

enum Next {
    Finish,
    Blocked,
    Run(usize, Step),
    Again,
}

impl Task {
    /// Entry point for the scheduler's drain loop.
    pub(crate) fn run_tick(&self) {
        let Some(shared) = self.shared() else {
            return;
        };
        {
            let mut st = self.state_mut();
            st.queued = false;
            if st.status != TaskStatus::Ready {
                // woken and then finished or re-suspended before this tick ran
                return;
            }
            st.status = TaskStatus::Running;
            st.apply_resumed();
        }

        let trace = shared.config().trace;
        let sync_limit = shared.config().max_sync_iterations;
        let loop_limit = shared.config().max_loop_iterations;
        let mut sync_iterations = 0usize;

        loop {
            match self.advance(&shared) {
                Next::Finish => return self.finish(),
                Next::Blocked => {
                    self.state_mut().loop_iterations = 0;
                    if trace {
                        debug!(task_id = self.id(), "waiting on join barrier");
                    }
                    return;
                }
                Next::Again => continue,
                Next::Run(idx, step) => {
                    let kind = step.kind();
                    let mut body = step.into_body();
                    let input = {
                        let mut st = self.state_mut();
                        st.insert_at = Some(if kind == StepKind::Repeat { idx } else { idx + 1 });
                        st.inserted = 0;
                        st.loop_signal = None;
                        st.in_repeat = kind == StepKind::Repeat;
                        st.result.clone()
                    };
                    if trace {
                        debug!(task_id = self.id(), cursor = idx, ?kind, "running step");
                    }

                    let output = body(self, input);

                    let mut st = self.state_mut();
                    match output {
                        Ok(value) => st.result = value,
                        Err(err) => {
                            if st.error.is_none() {
                                st.error = Some(err);
                            }
                        }
                    }
                    st.apply_resumed();

                    let inserted = mem::take(&mut st.inserted);
                    st.insert_at = None;
                    st.in_repeat = false;
                    let signal = st.loop_signal.take();
                    if kind == StepKind::Repeat {
                        if signal != Some(LoopSignal::Break) && st.error.is_none() {
                            st.steps[idx + inserted] = Some(Step::Repeat(body));
                        }
                        st.cursor = idx;
                    } else {
                        st.cursor = idx + 1;
                    }
                    if kind == StepKind::Repeat && signal != Some(LoopSignal::Break) {
                        st.loop_iterations += 1;
                    } else {
                        st.loop_iterations = 0;
                    }

                    if st.error.is_some() {
                        if st.suspension.take().is_some() {
                            // invalidate the handle handed out by the body
                            st.epoch += 1;
                        }
                        continue;
                    }
                    if let Some(reason) = st.suspension {
                        st.status = reason.status();
                        st.loop_iterations = 0;
                        if trace {
                            debug!(task_id = self.id(), ?reason, "task suspended");
                        }
                        return;
                    }
                    if st.loop_iterations > loop_limit {
                        let err = TaskError::overflow(
                            format!("iterations of a repeat in task {}", self.id()),
                            loop_limit,
                        );
                        error!(task_id = self.id(), limit = loop_limit, "repeat never breaks");
                        shared.poison(err.clone());
                        st.error = Some(err);
                        continue;
                    }
                    if signal == Some(LoopSignal::Continue) && inserted == 0 {
                        sync_iterations += 1;
                        if sync_iterations > sync_limit {
                            let err = TaskError::overflow(
                                format!("continue re-entries of task {}", self.id()),
                                sync_limit,
                            );
                            error!(task_id = self.id(), limit = sync_limit, "runaway repeat loop");
                            shared.poison(err.clone());
                            st.error = Some(err);
                        }
                        continue;
                    }
                    drop(st);
                    self.schedule();
                    return;
                }
            }
        }
    }

    /// Starts pending forks, enforces the join barrier and takes the next
    /// runnable step out of the chain.
    fn advance(&self, shared: &Rc<Shared>) -> Next {
        if self.state().error.is_some() {
            return Next::Finish;
        }

        let (bodies, input) = {
            let mut st = self.state_mut();
            let mut bodies = Vec::new();
            while st.cursor < st.steps.len() {
                let idx = st.cursor;
                match st.steps[idx].as_ref().map(Step::kind) {
                    None => st.cursor += 1,
                    Some(StepKind::Fork) => {
                        if let Some(step) = st.steps[idx].take() {
                            bodies.push(step.into_body());
                        }
                        st.cursor += 1;
                    }
                    Some(_) => break,
                }
            }
            (bodies, st.result.clone())
        };
        for body in bodies {
            self.start_fork(shared, body, input.clone());
        }

        let mut st = self.state_mut();
        if st.forks.is_open() {
            if st.forks.pending() > 0 {
                st.epoch += 1;
                st.suspension = Some(SuspendReason::Join);
                st.status = TaskStatus::Blocked;
                return Next::Blocked;
            }
            match st.forks.close(self.id()) {
                Ok(joined) => st.result = joined,
                Err(err) => {
                    st.error = Some(err);
                    return Next::Finish;
                }
            }
        }

        let idx = st.cursor;
        if idx >= st.steps.len() {
            return Next::Finish;
        }
        match st.steps[idx].take() {
            Some(step) => Next::Run(idx, step),
            None => Next::Again,
        }
    }

    /// Ends the step chain: Success xor Failure handlers, then Final handlers,
    /// then completion observers.
    pub(crate) fn finish(&self) {
        let (mut outcome, on_success, on_failure, on_final) = {
            let mut st = self.state_mut();
            st.forks.detach();
            st.suspension = None;
            st.in_handler = true;
            let outcome: Outcome = match &st.error {
                Some(err) => Err(err.clone()),
                None => Ok(st.result.clone()),
            };
            st.status = if outcome.is_ok() {
                TaskStatus::Succeeded
            } else {
                TaskStatus::Failed
            };
            (
                outcome,
                mem::take(&mut st.on_success),
                mem::take(&mut st.on_failure),
                mem::take(&mut st.on_final),
            )
        };

        let mut handled = false;
        match outcome.clone() {
            Ok(value) => {
                for handler in on_success {
                    if let Err(err) = handler(self, &value) {
                        warn!(task_id = self.id(), error = %err, "success handler failed");
                        outcome = Err(err);
                        break;
                    }
                }
                self.refresh_result(&mut outcome);
            }
            Err(original) => {
                handled = !on_failure.is_empty();
                for handler in on_failure {
                    if let Err(err) = handler(self, &original) {
                        warn!(task_id = self.id(), error = %err, "failure handler failed");
                        outcome = Err(err);
                    }
                }
            }
        }

        for handler in on_final {
            if let Err(err) = handler(self, &outcome) {
                warn!(task_id = self.id(), error = %err, "final handler failed");
                outcome = Err(err);
            }
        }
        self.refresh_result(&mut outcome);

        let (observers, label) = {
            let mut st = self.state_mut();
            st.status = TaskStatus::Done;
            match &outcome {
                Ok(value) => st.result = value.clone(),
                Err(err) => st.error = Some(err.clone()),
            }
            st.outcome = Some(outcome.clone());
            st.steps.clear();
            st.cursor = 0;
            (mem::take(&mut st.observers), st.label.clone())
        };

        let shared = self.shared();
        if let Err(err) = &outcome {
            if !handled && observers.is_empty() {
                error!(task_id = self.id(), label = ?label, error = %err, "unhandled task failure");
                if let Some(shared) = &shared {
                    shared.record_unhandled(self.id(), err.clone());
                }
            }
        }
        if shared.as_ref().map(|s| s.config().trace).unwrap_or(false) {
            debug!(task_id = self.id(), ok = outcome.is_ok(), "task done");
        }

        for observer in observers {
            observer(&outcome);
        }
        if let Some(shared) = shared {
            shared.release(self.id());
        }
    }

    /// Picks up a result a handler set through `set_result`. A failed
    /// outcome stays failed.
    fn refresh_result(&self, outcome: &mut Outcome) {
        if outcome.is_ok() {
            *outcome = Ok(self.state().result.clone());
        }
    }
}
