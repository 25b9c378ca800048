//! Boxon: a single-assignment cell holding an outcome.
//!
//! A cell is created pending or already resolved. The first resolution wins
//! and later attempts are ignored; callbacks attached before resolution run
//! in attachment order when it happens, callbacks attached afterwards run
//! immediately. Cells bridge into tasks through [`Boxon::wait`] and into
//! async code through `.await`.

mod combinators;

use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::future::IntoFuture;
use std::rc::Rc;
use tracing::debug;

use crate::core::errors::{Result, TaskError};
use crate::task::{Outcome, StepResult, Task};

pub use combinators::{all, race, Castable};

type Callback = Box<dyn FnOnce(&Outcome)>;

#[derive(Default)]
struct BoxonState {
    outcome: Option<Outcome>,
    callbacks: Vec<Callback>,
}

#[derive(Clone, Default)]
pub struct Boxon {
    inner: Rc<RefCell<BoxonState>>,
}

impl Boxon {
    /// A pending cell
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolved(value: Value) -> Self {
        let cell = Self::new();
        cell.ok(value);
        cell
    }

    pub fn rejected(err: TaskError) -> Self {
        let cell = Self::new();
        cell.fail(err);
        cell
    }

    /// Store `outcome` unless the cell already holds one. Returns whether
    /// this call resolved the cell.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let callbacks = {
            let mut st = self.inner.borrow_mut();
            if st.outcome.is_some() {
                debug!("boxon already resolved; later outcome ignored");
                return false;
            }
            st.outcome = Some(outcome.clone());
            std::mem::take(&mut st.callbacks)
        };
        for callback in callbacks {
            callback(&outcome);
        }
        true
    }

    pub fn ok(&self, value: Value) -> bool {
        self.resolve(Ok(value))
    }

    pub fn fail(&self, err: TaskError) -> bool {
        self.resolve(Err(err))
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.borrow().outcome.is_some()
    }

    pub fn get(&self) -> Option<Outcome> {
        self.inner.borrow().outcome.clone()
    }

    /// The memorized value, or the memorized error raised again.
    pub fn value(&self) -> Result<Value> {
        self.get()
            .unwrap_or_else(|| Err(TaskError::usage("boxon is still pending")))
    }

    /// Run `callback` with the outcome, right away if it is already known.
    pub fn on_resolved<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Outcome) + 'static,
    {
        let known = {
            let mut st = self.inner.borrow_mut();
            let known = st.outcome.clone();
            if known.is_none() {
                st.callbacks.push(Box::new(callback));
                return self;
            }
            known
        };
        if let Some(outcome) = known {
            callback(&outcome);
        }
        self
    }

    /// Promise-style chaining: a new cell resolved from whichever handler
    /// matches the outcome.
    pub fn then<S, F>(&self, on_ok: S, on_err: F) -> Boxon
    where
        S: FnOnce(Value) -> StepResult + 'static,
        F: FnOnce(TaskError) -> StepResult + 'static,
    {
        let next = Boxon::new();
        let target = next.clone();
        self.on_resolved(move |outcome| {
            let chained = match outcome.clone() {
                Ok(value) => on_ok(value),
                Err(err) => on_err(err),
            };
            target.resolve(chained);
        });
        next
    }

    /// Make `task`'s next step receive the outcome, blocking until it is
    /// known. Returns true when it already was.
    pub fn wait(&self, task: &Task) -> Result<bool> {
        if let Some(outcome) = self.get() {
            task.deliver(outcome);
            return Ok(true);
        }
        let handle = task.block_on("boxon")?;
        self.on_resolved(move |outcome| {
            handle.complete(outcome.clone());
        });
        Ok(false)
    }

    /// Wrap a thunk: `thunk` gets the cell and resolves it when it can.
    pub fn from_thunk<F>(thunk: F) -> Boxon
    where
        F: FnOnce(Boxon),
    {
        let cell = Boxon::new();
        thunk(cell.clone());
        cell
    }

    /// A cell resolved with the task's final outcome.
    pub fn from_task(task: &Task) -> Boxon {
        let cell = Boxon::new();
        let target = cell.clone();
        task.on_complete(move |outcome| {
            target.resolve(outcome.clone());
        });
        cell
    }

    /// Adapt a value, cell, thunk or task into a cell. Cells pass through
    /// unchanged.
    pub fn cast(source: impl Into<Castable>) -> Boxon {
        match source.into() {
            Castable::Value(value) => Boxon::resolved(value),
            Castable::Boxon(cell) => cell,
            Castable::Thunk(thunk) => Boxon::from_thunk(thunk),
            Castable::Task(task) => Boxon::from_task(&task),
        }
    }
}

impl IntoFuture for Boxon {
    type Output = Result<Value>;
    type IntoFuture = LocalBoxFuture<'static, Result<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        let (tx, rx) = oneshot::channel();
        self.on_resolved(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        async move {
            rx.await
                .unwrap_or_else(|_| Err(TaskError::usage("boxon dropped before it resolved")))
        }
        .boxed_local()
    }
}

impl fmt::Debug for Boxon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(st) => f
                .debug_struct("Boxon")
                .field("outcome", &st.outcome)
                .field("callbacks", &st.callbacks.len())
                .finish(),
            Err(_) => f.debug_struct("Boxon").finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_second_resolution_ignored() {
        let cell = Boxon::new();
        assert!(cell.ok(Value::Null));
        assert!(!cell.ok(json!("ignored")));
        assert_eq!(cell.value().unwrap(), Value::Null);
    }

    #[test]
    fn test_memorized_error_raised_again() {
        let cell = Boxon::new();
        cell.fail("E".into());
        match cell.value() {
            Err(TaskError::Raised(payload)) => assert_eq!(payload, json!("E")),
            other => panic!("Expected raised error, got {:?}", other),
        }
    }

    #[test]
    fn test_memorized_value_returned() {
        let cell = Boxon::new();
        cell.ok(json!("V"));
        assert_eq!(cell.value().unwrap(), json!("V"));
    }

    #[test]
    fn test_callbacks_on_resolved_cell_run_in_order() {
        let cell = Boxon::resolved(json!(7));
        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = seen.clone();
            cell.on_resolved(move |outcome| {
                let value = outcome.clone().unwrap();
                seen.borrow_mut().push(format!("{tag}:{value}"));
            });
        }
        assert_eq!(*seen.borrow(), vec!["first:7", "second:7"]);
    }

    #[test]
    fn test_pending_value_is_usage_error() {
        let cell = Boxon::new();
        assert!(matches!(cell.value(), Err(TaskError::Usage(_))));
    }

    #[test]
    fn test_then_maps_both_branches() {
        let source = Boxon::new();
        let doubled = source.then(
            |v| Ok(json!(v.as_i64().unwrap_or(0) * 2)),
            |err| Err(err),
        );
        let recovered = Boxon::rejected("boom".into()).then(|v| Ok(v), |_| Ok(json!("fallback")));

        assert!(!doubled.is_resolved());
        source.ok(json!(21));
        assert_eq!(doubled.value().unwrap(), json!(42));
        assert_eq!(recovered.value().unwrap(), json!("fallback"));
    }

    #[test]
    fn test_cast_thunk_and_passthrough() {
        let cell = Boxon::cast(Castable::thunk(|done: Boxon| {
            done.ok(json!("from thunk"));
        }));
        assert_eq!(cell.value().unwrap(), json!("from thunk"));

        let same = Boxon::cast(cell.clone());
        same.ok(json!("late"));
        assert_eq!(cell.value().unwrap(), json!("from thunk"));
        assert_eq!(Boxon::cast(json!(3)).value().unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_await_resolved_cell() {
        let cell = Boxon::new();
        let waiting = cell.clone().into_future();
        cell.ok(json!("ready"));
        assert_eq!(waiting.await.unwrap(), json!("ready"));
    }

    #[tokio::test]
    async fn test_await_dropped_cell_is_usage_error() {
        let waiting = Boxon::new().into_future();
        assert!(matches!(waiting.await, Err(TaskError::Usage(_))));
    }
}
