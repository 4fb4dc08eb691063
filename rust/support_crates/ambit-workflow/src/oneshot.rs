//! A thread-safe oneshot channel for handing a single result between threads.
//!
//! The channel follows these state transitions:
//!
//! 1. Pending: waiting for a value to be sent
//! 2. Ready: a value has been sent and is available for consumption
//! 3. Closed: the value has been taken, or the sender was dropped without sending
//!
//! Dropping the sender without sending closes the channel, so a receiver never
//! waits forever on work that was discarded (e.g. a queued task dropped during a
//! forced shutdown).

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

/// Creates a new oneshot channel, returning a sender and receiver pair.
pub fn channel<T>() -> (OneshotSender<T>, OneshotReceiver<T>) {
    let cell = Arc::new(OneshotCell {
        state: Mutex::new(State::Pending),
        condvar: Condvar::new(),
    });
    (OneshotSender(Some(cell.clone())), OneshotReceiver(cell))
}

/// Creates a oneshot receiver that is already resolved with the given value.
pub fn ready<T>(value: T) -> OneshotReceiver<T> {
    OneshotReceiver(Arc::new(OneshotCell {
        state: Mutex::new(State::Ready(value)),
        condvar: Condvar::new(),
    }))
}

/// The error returned when the sending half was dropped without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled;

impl std::fmt::Display for Canceled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "oneshot sender dropped without a value")
    }
}

impl std::error::Error for Canceled {}

/// The sending half of a oneshot channel.
pub struct OneshotSender<T>(Option<Arc<OneshotCell<T>>>);

impl<T> OneshotSender<T> {
    /// Sends the value, consuming the sender.
    ///
    /// Returns `Err(value)` if the receiver has already closed the channel.
    pub fn send(mut self, value: T) -> Result<(), T> {
        let Some(cell) = self.0.take() else {
            return Err(value);
        };
        let mut state = cell.lock();
        match *state {
            State::Pending => {
                *state = State::Ready(value);
                drop(state);
                cell.condvar.notify_all();
                Ok(())
            }
            _ => Err(value),
        }
    }
}

impl<T> Drop for OneshotSender<T> {
    fn drop(&mut self) {
        if let Some(cell) = self.0.take() {
            let mut state = cell.lock();
            if matches!(*state, State::Pending) {
                *state = State::Closed;
                drop(state);
                cell.condvar.notify_all();
            }
        }
    }
}

/// The receiving half of a oneshot channel.
pub struct OneshotReceiver<T>(Arc<OneshotCell<T>>);

impl<T> OneshotReceiver<T> {
    /// Blocks until a value is received or the channel is closed.
    pub fn recv(&self) -> Result<T, Canceled> {
        let mut state = self.0.lock();
        loop {
            match std::mem::replace(&mut *state, State::Closed) {
                State::Ready(value) => return Ok(value),
                State::Closed => return Err(Canceled),
                State::Pending => {
                    *state = State::Pending;
                    state = self
                        .0
                        .condvar
                        .wait(state)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
        }
    }

    /// Waits at most `timeout` for a value.
    ///
    /// Returns `Ok(Some(value))` if a value arrived, `Ok(None)` on timeout while
    /// the channel is still pending, and `Err(Canceled)` if the channel closed.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<T>, Canceled> {
        let deadline = Instant::now() + timeout;
        let mut state = self.0.lock();
        loop {
            match std::mem::replace(&mut *state, State::Closed) {
                State::Ready(value) => return Ok(Some(value)),
                State::Closed => return Err(Canceled),
                State::Pending => {
                    *state = State::Pending;
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    let (guard, _) = self
                        .0
                        .condvar
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    state = guard;
                }
            }
        }
    }

    /// Checks if the channel is still pending (no value sent, sender alive).
    pub fn is_pending(&self) -> bool {
        matches!(*self.0.lock(), State::Pending)
    }
}

struct OneshotCell<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
}

impl<T> OneshotCell<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum State<T> {
    Pending,
    Ready(T),
    Closed,
}
