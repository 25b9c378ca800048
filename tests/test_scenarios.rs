//! End-to-end scenarios: traced chains and generator conversations.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use stepflow::core::logging::init_tracing;
use stepflow::{Scheduler, SchedulerConfig, TaskError};
use tracing::Level;

type Log = Rc<RefCell<Vec<String>>>;

fn recorder() -> (Log, impl Fn(&str) + Clone) {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    (log, move |entry: &str| sink.borrow_mut().push(entry.to_string()))
}

fn traced_scheduler() -> Scheduler {
    init_tracing(Level::DEBUG);
    Scheduler::with_config(SchedulerConfig::development()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_sleep_preserves_step_order() {
    let scheduler = traced_scheduler();
    let (log, record) = recorder();

    let (r1, r2, r3, r4, r5, r6) = (
        record.clone(),
        record.clone(),
        record.clone(),
        record.clone(),
        record.clone(),
        record.clone(),
    );
    scheduler
        .spawn(move |_, v| {
            r1("start");
            Ok(v)
        })
        .step(move |_, v| {
            r2("step");
            Ok(v)
        })
        .step(move |task, v| {
            r3("sleep");
            task.sleep(Duration::from_millis(100));
            r3("sleeping");
            Ok(v)
        })
        .step(move |_, v| {
            r4("sleep done");
            Ok(v)
        })
        .failure(move |_, _| {
            r5("failure");
            Ok(())
        })
        .finally(move |_, _| {
            r6("final");
            Ok(())
        });

    let started = tokio::time::Instant::now();
    scheduler.run().await.unwrap();

    assert_eq!(
        *log.borrow(),
        vec!["start", "step", "sleep", "sleeping", "sleep done", "final"]
    );
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_error_skips_rest_of_chain() {
    let scheduler = traced_scheduler();
    let (log, record) = recorder();
    let failures = Rc::new(Cell::new(0));

    let (r1, r2, r3, r4) = (
        record.clone(),
        record.clone(),
        record.clone(),
        record.clone(),
    );
    let f = failures.clone();
    scheduler
        .spawn(move |_, v| {
            r1("start");
            Ok(v)
        })
        .step(move |_, _| {
            r2("error raised");
            Err("step exploded".into())
        })
        .step(move |_, v| {
            r3("unreachable");
            Ok(v)
        })
        .failure(move |_, err| {
            assert_eq!(err.payload(), json!("step exploded"));
            f.set(f.get() + 1);
            Ok(())
        })
        .finally(move |_, outcome| {
            assert!(outcome.is_err());
            r4("final");
            Ok(())
        });
    scheduler.run().await.unwrap();

    assert_eq!(*log.borrow(), vec!["start", "error raised", "final"]);
    assert_eq!(failures.get(), 1);
}

#[test]
fn test_generator_conversation() {
    let scheduler = Scheduler::new();
    let doubler = scheduler.generator(|_, first| Ok(first));
    doubler.task().repeat(|task, input| {
        let n = input.as_i64().unwrap_or(-1);
        if n < 0 {
            task.break_loop()?;
            return Ok(json!("finished"));
        }
        task.yield_value(json!(n * 2))?;
        Ok(Value::Null)
    });

    let seen = Rc::new(RefCell::new(Vec::new()));
    let consumer = scheduler.task();
    for input in [json!(1), json!(5), json!(-1)] {
        let (g, s) = (doubler.clone(), seen.clone());
        consumer.step(move |task, previous| {
            if !previous.is_null() {
                s.borrow_mut().push(previous);
            }
            g.next(task, input.clone())?;
            Ok(Value::Null)
        });
    }
    let s = seen.clone();
    consumer.step(move |_, last| {
        s.borrow_mut().push(last.clone());
        Ok(last)
    });
    scheduler.run_until_idle().unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![json!(2), json!(10), json!("finished")]
    );
    assert!(doubler.is_done());
    assert!(matches!(
        doubler.next(&consumer, Value::Null),
        Err(TaskError::GeneratorExhausted { .. })
    ));
}

#[test]
fn test_generator_driven_from_host() {
    let scheduler = Scheduler::new();
    let counter = scheduler.generator(|task, start| {
        task.set_var("count", start);
        Ok(Value::Null)
    });
    counter.task().repeat(|task, _| {
        let count = task.var("count").and_then(|v| v.as_i64()).unwrap_or(0);
        task.set_var("count", json!(count + 1));
        task.yield_value(json!(count))?;
        Ok(Value::Null)
    });

    counter.resume(json!(10)).unwrap();
    scheduler.run_until_idle().unwrap();
    assert_eq!(counter.take_yielded(), Some(json!(10)));

    counter.resume(Value::Null).unwrap();
    scheduler.run_until_idle().unwrap();
    assert_eq!(counter.take_yielded(), Some(json!(11)));

    // a second resume before the generator ran again finds it unparked
    assert!(counter.resume(Value::Null).is_ok());
    assert!(matches!(
        counter.resume(Value::Null),
        Err(TaskError::Usage(_))
    ));
}

#[test]
fn test_yield_outside_generator_is_usage_error() {
    let scheduler = Scheduler::new();
    let task = scheduler.spawn(|task, _| {
        task.yield_value(json!(1))?;
        Ok(Value::Null)
    });
    task.failure(|_, err| {
        assert!(matches!(err, TaskError::Usage(_)));
        Ok(())
    });
    scheduler.run_until_idle().unwrap();
    assert!(task.outcome().unwrap().is_err());
}

#[test]
fn test_reset_gives_a_fresh_scheduler() {
    let scheduler = Scheduler::new();
    let first = scheduler.spawn(|task, v| {
        task.pause();
        Ok(v)
    });
    scheduler.run_until_idle().unwrap();
    assert_eq!(scheduler.stats().live_tasks, 1);

    scheduler.reset().unwrap();
    assert_eq!(scheduler.stats().live_tasks, 0);
    assert_eq!(scheduler.stats().ticks, 0);

    let second = scheduler.spawn(|_, v| Ok(v));
    assert_eq!(second.id(), first.id());
    scheduler.run_until_idle().unwrap();
    assert!(second.is_done());
}

#[test]
fn test_independent_schedulers_do_not_share_state() {
    let left = Scheduler::new();
    let right = Scheduler::new();
    left.spawn(|_, v| Ok(v));
    left.spawn(|_, v| Ok(v));
    right.spawn(|_, v| Ok(v));

    assert_eq!(left.stats().ready_queue_size, 2);
    assert_eq!(right.stats().ready_queue_size, 1);
    right.run_until_idle().unwrap();
    assert_eq!(left.stats().ready_queue_size, 2);
}
