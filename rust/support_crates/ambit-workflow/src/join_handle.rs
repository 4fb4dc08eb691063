//! Join handle for results of tasks submitted to a pool.
//!
//! ## Lifecycle
//!
//! 1. **Created**: When a task is spawned, a `JoinHandle` is returned
//! 2. **Pending**: The task is running or queued for execution
//! 3. **Ready**: The task has completed and the result is available
//! 4. **Canceled**: The task was discarded before producing a result (it panicked,
//!    or it was dropped from the queue by a forced shutdown)

use std::time::Duration;

use crate::oneshot::{self, Canceled, OneshotReceiver};

/// A handle for waiting on the result of a task with `'static` lifetime.
pub struct JoinHandle<R>(OneshotReceiver<R>);

impl<R> JoinHandle<R> {
    /// Creates a new `JoinHandle` from a oneshot receiver.
    pub fn new(rx: OneshotReceiver<R>) -> JoinHandle<R> {
        JoinHandle(rx)
    }

    /// Creates a `JoinHandle` that is immediately ready with the given result.
    pub fn ready(res: R) -> Self {
        Self(oneshot::ready(res))
    }

    /// Checks if the task result is ready (or canceled) without blocking.
    pub fn is_ready(&self) -> bool {
        !self.0.is_pending()
    }

    /// Waits for the task to complete and returns its result.
    ///
    /// Returns `Err(Canceled)` if the task will never produce a result.
    pub fn join(self) -> Result<R, Canceled> {
        self.0.recv()
    }

    /// Waits at most `timeout` for the result. `Ok(None)` means the task is
    /// still pending.
    pub fn join_timeout(&self, timeout: Duration) -> Result<Option<R>, Canceled> {
        self.0.recv_timeout(timeout)
    }

    /// Waits for all handles to complete and collects their results, in order.
    pub fn join_all(
        handles: impl IntoIterator<Item = JoinHandle<R>>,
    ) -> Vec<Result<R, Canceled>> {
        handles.into_iter().map(|h| h.join()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_handle() {
        let handle = JoinHandle::ready(5);
        assert!(handle.is_ready());
        assert_eq!(handle.join(), Ok(5));
    }

    #[test]
    fn test_join_all_preserves_order() {
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let (tx, rx) = oneshot::channel();
                tx.send(i * 2).unwrap();
                JoinHandle::new(rx)
            })
            .collect();
        assert_eq!(JoinHandle::join_all(handles), vec![Ok(0), Ok(2), Ok(4)]);
    }

    #[test]
    fn test_canceled_handle() {
        let (tx, rx) = oneshot::channel::<u32>();
        let handle = JoinHandle::new(rx);
        assert!(!handle.is_ready());
        drop(tx);
        assert!(handle.is_ready());
        assert_eq!(handle.join(), Err(Canceled));
    }
}
