//! Cooperative, single-threaded task scheduling.
//!
//! A [`Task`] runs an ordered chain of steps, one step per scheduler tick.
//! Steps thread their result into the next step, fork child tasks and join
//! on them, sleep, pause, and block on the coordination primitives in
//! [`sync`]. A [`Scheduler`] owns the ready queue and the timers and is
//! driven either synchronously (`drain`, `run_until_idle`) or from a tokio
//! runtime (`run`, `serve`).
//!
//! ```rust,ignore
//! let scheduler = Scheduler::new();
//! scheduler
//!     .spawn(|_, _| Ok(json!(20)))
//!     .fork(|_, n| Ok(json!(n.as_i64().unwrap_or(0) + 1)))
//!     .fork(|_, n| Ok(json!(n.as_i64().unwrap_or(0) * 2)))
//!     .step(|_, joined| Ok(joined)) // [21, 40]
//!     .finally(|_, outcome| { println!("{outcome:?}"); Ok(()) });
//! scheduler.run().await?;
//! ```

// Core infrastructure modules
pub mod core {
    pub mod config;
    pub mod errors;
    pub mod logging;
}

pub mod boxon;
pub mod scheduler;
pub mod sync;
pub mod task;

// Re-exports for convenience
pub use boxon::{Boxon, Castable};
pub use crate::core::config::{SchedulerConfig, SchedulerConfigBuilder};
pub use crate::core::errors::{Result, TaskError};
pub use scheduler::{Scheduler, SchedulerStats};
pub use serde_json::Value;
pub use sync::{Lock, Mutex, Queue, Semaphore, Signal};
pub use task::{
    Generator, Outcome, StepFn, StepKind, StepResult, SuspendReason, Task, TaskId, TaskInfo,
    TaskStatus, WakeHandle,
};
