mod fork;
mod generator;
mod model;
mod runner;
mod step;
#[allow(clippy::module_inception)]
mod task;
mod wake;

pub use generator::Generator;
pub use model::{Outcome, StepResult, SuspendReason, TaskId, TaskInfo, TaskStatus};
pub use step::{StepFn, StepKind};
pub use task::Task;
pub use wake::WakeHandle;
