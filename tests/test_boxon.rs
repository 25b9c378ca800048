//! Boxon cells bridging tasks, host callbacks and async consumers.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::future::IntoFuture;
use std::rc::Rc;
use stepflow::boxon::{all, race};
use stepflow::{Boxon, Castable, Scheduler, TaskError};

#[test]
fn test_task_waits_on_cell() {
    let scheduler = Scheduler::new();
    let cell = Boxon::new();

    let c = cell.clone();
    let task = scheduler.spawn(move |task, v| {
        c.wait(task)?;
        Ok(v)
    });
    task.step(|_, value| Ok(json!({ "cell": value })));
    scheduler.run_until_idle().unwrap();
    assert!(!task.is_done());

    cell.ok(json!("filled"));
    scheduler.run_until_idle().unwrap();
    assert_eq!(task.outcome().unwrap().unwrap(), json!({ "cell": "filled" }));
}

#[test]
fn test_rejected_cell_fails_waiting_task() {
    let scheduler = Scheduler::new();
    let cell = Boxon::rejected("cell error".into());
    let caught = Rc::new(RefCell::new(None));

    let (c, seen) = (cell.clone(), caught.clone());
    scheduler
        .spawn(move |task, v| {
            c.wait(task)?;
            Ok(v)
        })
        .step(|_, _| Ok(json!("unreachable")))
        .failure(move |_, err| {
            *seen.borrow_mut() = Some(err.payload());
            Ok(())
        });
    scheduler.run_until_idle().unwrap();

    assert_eq!(*caught.borrow(), Some(json!("cell error")));
}

#[test]
fn test_from_task_observes_outcome() {
    let scheduler = Scheduler::new();
    let failing = scheduler.spawn(|_, _| Err("task failed".into()));
    let cell = Boxon::cast(&failing);
    scheduler.run_until_idle().unwrap();

    assert!(matches!(cell.value(), Err(TaskError::Raised(_))));
    assert!(scheduler.unhandled().is_empty());
}

#[test]
fn test_all_over_tasks_and_values() {
    let scheduler = Scheduler::new();
    let slow = scheduler.spawn(|task, v| {
        task.pause();
        Ok(v)
    });
    let quick = scheduler.spawn(|_, _| Ok(json!("quick")));

    let combined = all(vec![
        Castable::from(&slow),
        Castable::from(json!(42)),
        Castable::from(&quick),
    ]);
    scheduler.run_until_idle().unwrap();
    assert!(!combined.is_resolved());

    slow.resume(json!("slow")).unwrap();
    scheduler.run_until_idle().unwrap();
    assert_eq!(combined.value().unwrap(), json!(["slow", 42, "quick"]));
}

#[test]
fn test_race_between_tasks() {
    let scheduler = Scheduler::new();
    let never = scheduler.spawn(|task, v| {
        task.pause();
        Ok(v)
    });
    let winner = scheduler.spawn(|_, _| Ok(json!("winner")));

    let first = race([Castable::from(&never), Castable::from(&winner)]);
    scheduler.run_until_idle().unwrap();
    assert_eq!(first.value().unwrap(), json!("winner"));
}

#[test]
fn test_then_feeds_a_task() {
    let scheduler = Scheduler::new();
    let source = Boxon::new();
    let parsed = source.then(
        |raw| Ok(json!(raw.as_str().map(str::len).unwrap_or(0))),
        Err,
    );

    let p = parsed.clone();
    let task = scheduler.spawn(move |task, v| {
        p.wait(task)?;
        Ok(v)
    });
    source.ok(json!("hello"));
    scheduler.run_until_idle().unwrap();

    assert_eq!(task.outcome().unwrap().unwrap(), json!(5));
}

#[tokio::test]
async fn test_await_task_outcome_while_running() {
    let scheduler = Scheduler::new();
    let task = scheduler.spawn(|_, _| Ok(json!(1)));
    task.step(|_, n| Ok(json!(n.as_i64().unwrap_or(0) + 1)));
    let cell = Boxon::from_task(&task);

    let (driven, value) = tokio::join!(scheduler.run(), cell.into_future());
    driven.unwrap();
    assert_eq!(value.unwrap(), json!(2));
}

#[test]
fn test_thunk_resolves_later() {
    let pending: Rc<RefCell<Option<Boxon>>> = Rc::new(RefCell::new(None));
    let p = pending.clone();
    let cell = Boxon::cast(Castable::thunk(move |done| {
        *p.borrow_mut() = Some(done);
    }));
    assert!(!cell.is_resolved());

    let done = pending.borrow_mut().take().unwrap();
    done.ok(Value::Bool(true));
    assert_eq!(cell.value().unwrap(), json!(true));
}
