//! Dispatch rejection and forced-termination accounting.

use std::fmt;

use ambit_context::Status;
use serde::Serialize;

use crate::task::TaskRef;

/// Why the executor refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The backing queue is full and the pool is at its maximum size.
    QueueFull,
    /// The executor no longer accepts work.
    Shutdown,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::QueueFull => "queue is full",
            RejectionReason::Shutdown => "executor is shut down",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task the executor refused to run, handed back to the submitter.
#[derive(thiserror::Error)]
#[error("task '{}' rejected: {reason}", .task.name())]
pub struct RejectedExecution {
    task: TaskRef,
    reason: RejectionReason,
}

impl RejectedExecution {
    pub(crate) fn new(task: TaskRef, reason: RejectionReason) -> Self {
        RejectedExecution { task, reason }
    }

    /// The original task, as submitted.
    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    pub fn reason(&self) -> RejectionReason {
        self.reason
    }

    pub fn into_task(self) -> TaskRef {
        self.task
    }

    /// The status to report to a remote caller whose work was refused.
    pub fn status(&self) -> Status {
        Status::unavailable(self.to_string())
    }
}

impl fmt::Debug for RejectedExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RejectedExecution")
            .field("task", &self.task.name())
            .field("reason", &self.reason)
            .finish()
    }
}

impl From<RejectedExecution> for ambit_common::Error {
    fn from(rejected: RejectedExecution) -> Self {
        ambit_common::Error::rejected(rejected.to_string())
    }
}

/// The outcome of
/// [`ContextTrackingExecutor::force_terminate`](crate::ContextTrackingExecutor::force_terminate).
#[derive(Default)]
pub struct ForcedTermination {
    /// Tasks that were running and have been asked to stop.
    pub running: Vec<TaskRef>,
    /// Tasks removed from the queue before they started.
    pub never_started: Vec<TaskRef>,
}

impl fmt::Debug for ForcedTermination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |tasks: &[TaskRef]| {
            tasks.iter().map(|t| t.name().to_owned()).collect::<Vec<_>>()
        };
        f.debug_struct("ForcedTermination")
            .field("running", &names(&self.running))
            .field("never_started", &names(&self.never_started))
            .finish()
    }
}
