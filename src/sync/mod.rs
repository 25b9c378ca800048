//! Coordination primitives built on task suspension.
//!
//! Every blocking call suspends the calling task when its current step body
//! returns; the primitive keeps the task's wake handle and resumes it, in
//! FIFO order, when the resource frees up.

mod mutex;
mod queue;
mod semaphore;
mod signal;
mod waiters;

pub use mutex::{Lock, Mutex};
pub use queue::Queue;
pub use semaphore::Semaphore;
pub use signal::Signal;
