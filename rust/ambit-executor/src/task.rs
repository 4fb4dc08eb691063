//! Units of work accepted by the executor.

use std::fmt;
use std::sync::{Arc, Mutex};

/// A unit of work.
///
/// Tasks are shared as [`TaskRef`]s; the identity of a task is the identity of
/// its allocation, so the executor can report exactly the object that was
/// submitted (see [`same_task`]).
pub trait Task: Send + Sync + 'static {
    fn run(&self);

    /// Short label used in logs and diagnostics.
    fn name(&self) -> &str {
        "task"
    }
}

pub type TaskRef = Arc<dyn Task>;

/// Returns `true` if both references denote the same submitted task.
pub fn same_task(a: &TaskRef, b: &TaskRef) -> bool {
    Arc::ptr_eq(a, b)
}

/// Wraps a closure into a task. The closure runs at most once.
pub fn task_fn<F>(f: F) -> TaskRef
where
    F: FnOnce() + Send + 'static,
{
    named_task("task", f)
}

/// Like [`task_fn`], with a diagnostic name.
pub fn named_task<F>(name: impl Into<String>, f: F) -> TaskRef
where
    F: FnOnce() + Send + 'static,
{
    Arc::new(FnTask {
        name: name.into(),
        body: Mutex::new(Some(f)),
    })
}

struct FnTask<F> {
    name: String,
    body: Mutex<Option<F>>,
}

impl<F> Task for FnTask<F>
where
    F: FnOnce() + Send + 'static,
{
    fn run(&self) {
        let body = self.body.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(body) = body {
            body();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Observable state of a task that is still owned by the executor.
///
/// Finished tasks are no longer tracked; their outcomes are counted in
/// [`ExecutorStats`](crate::ExecutorStats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted and waiting for a worker.
    Queued,
    /// Running on a worker thread.
    Running,
    /// Running, and asked to stop by a forced termination.
    Interrupted,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}
