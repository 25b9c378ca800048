mod ready_queue;
#[allow(clippy::module_inception)]
mod scheduler;
mod timer;

pub use ready_queue::ReadyQueue;
pub use scheduler::{Scheduler, SchedulerStats};
pub(crate) use scheduler::{Shared, TimerAction};
