//! Cooperative interruption of running tasks.
//!
//! A forced termination cannot stop a thread; it raises the interrupt flag of
//! every running task and unparks its worker thread. Long-running tasks poll
//! [`is_interrupted`] (or wait with [`sleep_interruptibly`]) and return early.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

thread_local! {
    static CURRENT: RefCell<Option<Arc<AtomicBool>>> = const { RefCell::new(None) };
}

/// Returns `true` if the task running on the calling thread has been asked to stop.
///
/// Always `false` outside of executor workers.
pub fn is_interrupted() -> bool {
    CURRENT
        .try_with(|current| {
            current
                .borrow()
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::Acquire))
        })
        .unwrap_or(false)
}

/// Sleeps for `duration` unless interrupted first.
///
/// Returns `true` if the full duration elapsed, `false` on interruption.
pub fn sleep_interruptibly(duration: Duration) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if is_interrupted() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::park_timeout(deadline - now);
    }
}

/// Installs `flag` as the interrupt flag of the calling thread for the
/// lifetime of the returned scope.
pub(crate) fn enter(flag: Arc<AtomicBool>) -> InterruptScope {
    CURRENT.with(|current| *current.borrow_mut() = Some(flag));
    InterruptScope(())
}

pub(crate) struct InterruptScope(());

impl Drop for InterruptScope {
    fn drop(&mut self) {
        let _ = CURRENT.try_with(|current| current.borrow_mut().take());
    }
}
