//! A context-tracking worker pool.
//!
//! [`ContextTrackingExecutor`] runs [`Task`]s on a pool of worker threads.
//! Each task is bound to the ambient contexts of the submitting thread (see
//! [`ambit_context::ContextBinder`]) and observes them while it runs.
//! Overload and shutdown surface as [`RejectedExecution`], which hands the
//! original task back to the caller.

mod executor;
mod interrupt;
pub mod options;
mod rejection;
pub mod task;

pub use executor::{ContextTrackingExecutor, ExecutorStats};
pub use interrupt::{is_interrupted, sleep_interruptibly};
pub use options::ExecutorOptions;
pub use rejection::{ForcedTermination, RejectedExecution, RejectionReason};
pub use task::{Task, TaskRef, TaskState, named_task, same_task, task_fn};
