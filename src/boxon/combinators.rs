use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::Boxon;
use crate::task::Task;

/// Anything `Boxon::cast` and the combinators accept.
pub enum Castable {
    /// Treated as already resolved
    Value(Value),
    Boxon(Boxon),
    /// Single-callback function resolving the cell it is handed
    Thunk(Box<dyn FnOnce(Boxon)>),
    /// Resolved with the task's final outcome
    Task(Task),
}

impl Castable {
    pub fn thunk<F>(thunk: F) -> Self
    where
        F: FnOnce(Boxon) + 'static,
    {
        Castable::Thunk(Box::new(thunk))
    }
}

impl From<Value> for Castable {
    fn from(value: Value) -> Self {
        Castable::Value(value)
    }
}

impl From<Boxon> for Castable {
    fn from(cell: Boxon) -> Self {
        Castable::Boxon(cell)
    }
}

impl From<&Boxon> for Castable {
    fn from(cell: &Boxon) -> Self {
        Castable::Boxon(cell.clone())
    }
}

impl From<Task> for Castable {
    fn from(task: Task) -> Self {
        Castable::Task(task)
    }
}

impl From<&Task> for Castable {
    fn from(task: &Task) -> Self {
        Castable::Task(task.clone())
    }
}

/// Resolves with every value in input order once all entries resolved, or
/// with the first error. An empty input resolves to an empty array.
pub fn all<I, C>(entries: I) -> Boxon
where
    I: IntoIterator<Item = C>,
    C: Into<Castable>,
{
    let cells: Vec<Boxon> = entries.into_iter().map(Boxon::cast).collect();
    let combined = Boxon::new();
    if cells.is_empty() {
        combined.ok(Value::Array(Vec::new()));
        return combined;
    }

    let slots = Rc::new(RefCell::new(vec![None; cells.len()]));
    let remaining = Rc::new(Cell::new(cells.len()));
    for (index, cell) in cells.into_iter().enumerate() {
        let combined = combined.clone();
        let slots = slots.clone();
        let remaining = remaining.clone();
        cell.on_resolved(move |outcome| match outcome {
            Err(err) => {
                combined.fail(err.clone());
            }
            Ok(value) => {
                slots.borrow_mut()[index] = Some(value.clone());
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    let values = slots
                        .borrow_mut()
                        .drain(..)
                        .map(|slot| slot.unwrap_or(Value::Null))
                        .collect();
                    combined.ok(Value::Array(values));
                }
            }
        });
    }
    combined
}

/// Resolves with whichever entry resolves first. Stays pending when the
/// input is empty.
pub fn race<I, C>(entries: I) -> Boxon
where
    I: IntoIterator<Item = C>,
    C: Into<Castable>,
{
    let combined = Boxon::new();
    for cell in entries.into_iter().map(Boxon::cast) {
        let combined = combined.clone();
        cell.on_resolved(move |outcome| {
            combined.resolve(outcome.clone());
        });
    }
    combined
}
