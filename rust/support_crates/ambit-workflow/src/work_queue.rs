//! A closable multi-producer, multi-consumer work queue.
//!
//! The queue backs dispatching thread pools: producers never block (a full
//! bounded queue refuses the item and hands it back), consumers block until an
//! item is available or the queue is closed and drained. Closing a queue stops
//! intake but keeps the already queued items available to consumers, which is
//! the "stop accepting, keep draining" half of a graceful shutdown.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// An error returned from [`WorkQueue::try_push`]. The rejected item is handed back.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PushError<T> {
    /// The queue is bounded and currently holds `capacity` items.
    Full(T),
    /// The queue has been closed and accepts no more items.
    Closed(T),
}

impl<T> PushError<T> {
    /// Returns the item that could not be enqueued.
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }
}

impl<T> std::fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::Full(_) => write!(f, "queue is full"),
            PushError::Closed(_) => write!(f, "queue is closed"),
        }
    }
}

impl<T: std::fmt::Debug> std::error::Error for PushError<T> {}

/// An error returned from [`WorkQueue::pop_timeout`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PopError {
    /// No item arrived before the timeout elapsed; the queue is still open.
    Timeout,
    /// The queue is closed and fully drained; no more items will ever arrive.
    Closed,
}

impl std::fmt::Display for PopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PopError::Timeout => write!(f, "timed out waiting on the queue"),
            PopError::Closed => write!(f, "queue is closed and drained"),
        }
    }
}

impl std::error::Error for PopError {}

/// A blocking MPMC queue with non-blocking, optionally bounded intake.
///
/// The queue can be cloned to create multiple handles; all clones refer to the
/// same underlying storage.
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        WorkQueue {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WorkQueue<T> {
    /// Creates a new queue.
    ///
    /// # Arguments
    ///
    /// * `capacity`:
    ///   - `Some(n)`: a bounded queue holding at most `n` items.
    ///   - `None`: an unbounded queue.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is `Some(0)`.
    pub fn new(capacity: Option<usize>) -> Self {
        assert!(
            capacity.unwrap_or(1) >= 1,
            "WorkQueue does not support zero capacity"
        );
        WorkQueue {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    capacity,
                    closed: false,
                }),
                not_empty: Condvar::new(),
            }),
        }
    }

    /// Returns the configured capacity, `None` for unbounded queues.
    pub fn capacity(&self) -> Option<usize> {
        self.lock().capacity
    }

    /// Returns the number of queued items.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Enqueues an item without blocking.
    ///
    /// - If the queue is closed, returns `Err(PushError::Closed(item))`.
    /// - If the queue is bounded and full, returns `Err(PushError::Full(item))`.
    /// - Otherwise the item is enqueued and one waiting consumer is woken.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();
        if state.closed {
            return Err(PushError::Closed(item));
        }
        if let Some(cap) = state.capacity {
            if state.queue.len() >= cap {
                return Err(PushError::Full(item));
            }
        }
        state.queue.push_back(item);
        drop(state);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues an item, blocking while the queue is empty and open.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.queue.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .inner
                .not_empty
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Dequeues an item, waiting at most `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, PopError> {
        self.pop_timeout_with(timeout, |_| ())
    }

    /// Like [`pop_timeout`](Self::pop_timeout), but invokes `on_take` with the
    /// item before the queue lock is released.
    ///
    /// This lets a consumer publish the item elsewhere (e.g. into a "running"
    /// registry) with no window in which an observer finds the item in neither
    /// place. `on_take` must not call back into this queue.
    pub fn pop_timeout_with(
        &self,
        timeout: Duration,
        on_take: impl FnOnce(&T),
    ) -> Result<T, PopError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if let Some(item) = state.queue.pop_front() {
                on_take(&item);
                return Ok(item);
            }
            if state.closed {
                return Err(PopError::Closed);
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PopError::Timeout);
                    }
                    deadline - now
                }
                // Overflowing deadline: treat as "wait forever".
                None => Duration::from_secs(3600),
            };
            let (guard, _) = self
                .inner
                .not_empty
                .wait_timeout(state, remaining)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }

    /// Closes the queue for intake. Queued items remain available to consumers,
    /// and all blocked consumers are woken to observe the new state.
    ///
    /// Returns `true` if this call closed the queue, `false` if it was already closed.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        let was_open = !state.closed;
        state.closed = true;
        drop(state);
        self.inner.not_empty.notify_all();
        was_open
    }

    /// Removes and returns every queued item, in queue order.
    pub fn drain(&self) -> Vec<T> {
        self.lock().queue.drain(..).collect()
    }

    /// Maps every queued item through `f` without dequeuing it.
    pub fn snapshot<R>(&self, f: impl FnMut(&T) -> R) -> Vec<R> {
        self.lock().queue.iter().map(f).collect()
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// The state of the queue that is protected by the Mutex.
struct State<T> {
    queue: VecDeque<T>,
    capacity: Option<usize>,
    closed: bool,
}

/// The shared core of the queue, containing the state and condition variable.
struct Inner<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar, // To signal consumers that an item has been added or the queue closed.
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_single_thread_push_pop() {
        let q = WorkQueue::new(Some(5));
        q.try_push("hello").unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(), Some("hello"));
        assert!(q.is_empty());
    }

    #[test]
    fn test_unbounded_queue() {
        let q = WorkQueue::<i32>::new(None);
        for i in 0..1000 {
            q.try_push(i).unwrap();
        }
        for i in 0..1000 {
            assert_eq!(q.pop(), Some(i));
        }
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        WorkQueue::<i32>::new(Some(0));
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let q = WorkQueue::new(Some(2));
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        match q.try_push(3) {
            Err(PushError::Full(item)) => assert_eq!(item, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(q.pop(), Some(1));
        q.try_push(3).unwrap();
    }

    #[test]
    fn test_closed_queue_rejects_but_drains() {
        let q = WorkQueue::new(None);
        q.try_push(1).unwrap();
        q.try_push(2).unwrap();
        assert!(q.close());
        assert!(!q.close());
        assert_eq!(q.try_push(3), Err(PushError::Closed(3)));
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Err(PopError::Closed));
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let q = WorkQueue::new(Some(1));
        let q_clone = q.clone();

        let handle = thread::spawn(move || q_clone.pop());

        // Give the spawned thread a moment to start and block on pop.
        thread::sleep(Duration::from_millis(50));
        q.try_push("from other thread").unwrap();

        assert_eq!(handle.join().unwrap(), Some("from other thread"));
    }

    #[test]
    fn test_close_wakes_blocked_consumers() {
        let q = WorkQueue::<u32>::new(None);
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let q = q.clone();
                thread::spawn(move || q.pop())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        q.close();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), None);
        }
    }

    #[test]
    fn test_pop_timeout_elapses() {
        let q = WorkQueue::<u32>::new(None);
        let start = Instant::now();
        assert_eq!(q.pop_timeout(Duration::from_millis(30)), Err(PopError::Timeout));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_pop_timeout_with_runs_callback_before_return() {
        let q = WorkQueue::new(None);
        q.try_push(7u32).unwrap();
        let mut seen = None;
        let item = q
            .pop_timeout_with(Duration::from_millis(10), |item| seen = Some(*item))
            .unwrap();
        assert_eq!(item, 7);
        assert_eq!(seen, Some(7));
    }

    #[test]
    fn test_drain_and_snapshot() {
        let q = WorkQueue::new(None);
        for i in 0..4 {
            q.try_push(i).unwrap();
        }
        assert_eq!(q.snapshot(|i| i * 10), vec![0, 10, 20, 30]);
        assert_eq!(q.len(), 4);
        assert_eq!(q.drain(), vec![0, 1, 2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_multi_producer_multi_consumer() {
        let q = WorkQueue::new(Some(8));
        let consumed = Arc::new(AtomicUsize::new(0));
        let num_items = 400;

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = q.clone();
                let consumed = consumed.clone();
                thread::spawn(move || {
                    while q.pop().is_some() {
                        consumed.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..num_items / 4 {
                        let mut item = i;
                        // Intake never blocks, so producers retry on a full queue.
                        loop {
                            match q.try_push(item) {
                                Ok(()) => break,
                                Err(PushError::Full(back)) => {
                                    item = back;
                                    thread::yield_now();
                                }
                                Err(PushError::Closed(_)) => panic!("closed early"),
                            }
                        }
                    }
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        q.close();
        for c in consumers {
            c.join().unwrap();
        }
        assert_eq!(consumed.load(Ordering::SeqCst), num_items);
    }
}
