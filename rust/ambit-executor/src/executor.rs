//! A worker pool that carries ambient contexts into the tasks it runs.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use ambit_common::Result;
use ambit_context::{BoundTask, ContextBinder};
use ambit_workflow::join_handle::JoinHandle;
use ambit_workflow::oneshot;
use ambit_workflow::work_queue::{PopError, PushError, WorkQueue};
use serde::Serialize;

use crate::interrupt;
use crate::options::ExecutorOptions;
use crate::rejection::{ForcedTermination, RejectedExecution, RejectionReason};
use crate::task::{TaskRef, TaskState, named_task, same_task, task_fn};

/// How long an idle core worker waits before re-checking whether it has become
/// surplus.
const CORE_IDLE_WAIT: Duration = Duration::from_secs(30);

/// A submitted task together with the contexts captured at submission.
type Job = BoundTask<TaskRef>;

/// A thread pool whose tasks observe the ambient contexts that were current
/// on the submitting thread.
///
/// Every task passed to [`execute`](Self::execute) is bound with the
/// executor's [`ContextBinder`]: the current value (or absence) of each tracked
/// context is captured at submission and reinstalled on the worker thread for
/// the duration of the task.
///
/// Submission never blocks. When the backing queue is full and the pool cannot
/// grow, or after [`shutdown`](Self::shutdown), the task is rejected and handed
/// back through [`RejectedExecution`] or the callback of
/// [`execute_or_else`](Self::execute_or_else).
///
/// Dropping the executor shuts it down gracefully without waiting; queued
/// tasks still run.
pub struct ContextTrackingExecutor {
    shared: Arc<Shared>,
}

struct Shared {
    options: ExecutorOptions,
    binder: ContextBinder,
    queue: WorkQueue<Job>,
    pool: Mutex<Pool>,
    terminated: Condvar,
    counters: Counters,
    next_worker_id: AtomicUsize,
}

#[derive(Default)]
struct Pool {
    workers: usize,
    peak_workers: usize,
    shutdown: bool,
    /// First jobs of newly spawned workers that have not picked them up yet.
    starting: BTreeMap<usize, Job>,
    /// Tasks currently executing, by worker id.
    running: BTreeMap<usize, Running>,
}

struct Running {
    task: TaskRef,
    interrupt: Arc<AtomicBool>,
    thread: Thread,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    interrupted: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time executor counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    pub interrupted: u64,
    pub rejected: u64,
    pub workers: usize,
    pub peak_workers: usize,
    pub running: usize,
    pub queued: usize,
}

impl ContextTrackingExecutor {
    /// Creates an executor. Workers are started on demand.
    pub fn new(options: ExecutorOptions, binder: ContextBinder) -> Result<Self> {
        options.validate()?;
        log::debug!(
            "creating executor '{}': core={} max={} queue={:?} tracking {:?}",
            options.thread_name_prefix,
            options.core_threads,
            options.max_threads,
            options.queue_capacity,
            binder
        );
        let queue = WorkQueue::new(options.queue_capacity);
        Ok(ContextTrackingExecutor {
            shared: Arc::new(Shared {
                options,
                binder,
                queue,
                pool: Mutex::new(Pool::default()),
                terminated: Condvar::new(),
                counters: Counters::default(),
                next_worker_id: AtomicUsize::new(0),
            }),
        })
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.shared.options
    }

    pub fn binder(&self) -> &ContextBinder {
        &self.shared.binder
    }

    /// Binds `task` to the calling thread's contexts and submits it.
    ///
    /// On rejection the original task is returned inside the error.
    pub fn execute(&self, task: TaskRef) -> std::result::Result<(), RejectedExecution> {
        let job = self.shared.binder.bind(task);
        self.shared.submit(job)
    }

    /// Like [`execute`](Self::execute), but hands a rejected task and the
    /// reason to `on_rejected` instead of returning an error.
    pub fn execute_or_else(
        &self,
        task: TaskRef,
        on_rejected: impl FnOnce(TaskRef, RejectionReason),
    ) {
        if let Err(rejected) = self.execute(task) {
            let reason = rejected.reason();
            on_rejected(rejected.into_task(), reason);
        }
    }

    /// Submits a closure; see [`execute`](Self::execute).
    pub fn execute_fn<F>(&self, f: F) -> std::result::Result<(), RejectedExecution>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute(task_fn(f))
    }

    /// Submits a closure and returns a handle to its result.
    ///
    /// The handle resolves to `Err(Canceled)` if the closure panics, or once
    /// the task returned by [`force_terminate`](Self::force_terminate) as never
    /// started is dropped.
    pub fn spawn<F, R>(&self, f: F) -> std::result::Result<JoinHandle<R>, RejectedExecution>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.execute(named_task("spawned", move || {
            // The receiver may be gone; the result is then unobserved.
            let _ = tx.send(f());
        }))?;
        Ok(JoinHandle::new(rx))
    }

    /// The original tasks currently executing on worker threads.
    pub fn running_tasks(&self) -> Vec<TaskRef> {
        self.shared
            .lock_pool()
            .running
            .values()
            .map(|r| r.task.clone())
            .collect()
    }

    /// The original tasks accepted but not yet started.
    pub fn queued_tasks(&self) -> Vec<TaskRef> {
        let mut tasks: Vec<TaskRef> = self
            .shared
            .lock_pool()
            .starting
            .values()
            .map(|job| job.task().clone())
            .collect();
        tasks.extend(self.shared.queue.snapshot(|job| job.task().clone()));
        tasks
    }

    /// The state of `task` if the executor still owns it.
    pub fn state_of(&self, task: &TaskRef) -> Option<TaskState> {
        // Tasks only move from the queue to the running set, so looking at
        // the queue first never misses a task that is being picked up.
        if self
            .shared
            .queue
            .snapshot(|job| same_task(job.task(), task))
            .contains(&true)
        {
            return Some(TaskState::Queued);
        }
        let pool = self.shared.lock_pool();
        if pool.starting.values().any(|job| same_task(job.task(), task)) {
            return Some(TaskState::Queued);
        }
        pool.running
            .values()
            .find(|r| same_task(&r.task, task))
            .map(|r| {
                if r.interrupt.load(Ordering::Acquire) {
                    TaskState::Interrupted
                } else {
                    TaskState::Running
                }
            })
    }

    /// Stops accepting new tasks. Already accepted tasks still run.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.lock_pool().shutdown
    }

    /// Returns `true` once the executor is shut down and every worker has exited.
    pub fn is_terminated(&self) -> bool {
        let pool = self.shared.lock_pool();
        pool.shutdown && pool.workers == 0
    }

    /// Blocks until the executor has terminated or `timeout` elapses.
    ///
    /// Returns `true` if the executor terminated. Without a prior
    /// [`shutdown`](Self::shutdown) this waits for the full timeout.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut pool = self.shared.lock_pool();
        loop {
            if pool.shutdown && pool.workers == 0 {
                return true;
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    deadline - now
                }
                None => CORE_IDLE_WAIT,
            };
            pool = self
                .shared
                .terminated
                .wait_timeout(pool, remaining)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Shuts down, discards every task that has not started and asks every
    /// running task to stop.
    ///
    /// Running tasks are interrupted cooperatively: their
    /// [`is_interrupted`](crate::is_interrupted) turns `true` and their worker
    /// thread is unparked. Both returned lists hold the original tasks.
    pub fn force_terminate(&self) -> ForcedTermination {
        self.shared.shutdown();
        // Drain before looking at the running set: a task popped concurrently
        // is registered as running before the queue lock is released.
        let drained = self.shared.queue.drain();
        let (starting, running) = {
            let mut pool = self.shared.lock_pool();
            let starting = std::mem::take(&mut pool.starting);
            let running: Vec<TaskRef> = pool
                .running
                .values()
                .map(|r| {
                    r.interrupt.store(true, Ordering::Release);
                    r.thread.unpark();
                    r.task.clone()
                })
                .collect();
            (starting, running)
        };
        let never_started: Vec<TaskRef> = starting
            .into_values()
            .chain(drained)
            .map(|job| job.into_parts().1)
            .collect();
        log::warn!(
            "forced termination of '{}': {} running tasks interrupted, {} tasks never started",
            self.shared.options.thread_name_prefix,
            running.len(),
            never_started.len()
        );
        ForcedTermination {
            running,
            never_started,
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        let queued = self.shared.queue.len();
        let counters = &self.shared.counters;
        let pool = self.shared.lock_pool();
        ExecutorStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            panicked: counters.panicked.load(Ordering::Relaxed),
            interrupted: counters.interrupted.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            workers: pool.workers,
            peak_workers: pool.peak_workers,
            running: pool.running.len(),
            queued: queued + pool.starting.len(),
        }
    }
}

impl Drop for ContextTrackingExecutor {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl Shared {
    fn submit(self: &Arc<Self>, job: Job) -> std::result::Result<(), RejectedExecution> {
        let job = {
            let mut pool = self.lock_pool();
            if pool.shutdown {
                drop(pool);
                return Err(self.reject(job, RejectionReason::Shutdown));
            }
            // Below the core size every submission starts a worker of its own.
            if pool.workers < self.options.core_threads {
                let mut first = Some(job);
                if let Err(e) = self.spawn_worker(&mut pool, &mut first) {
                    log::error!("failed to start a core worker: {e}");
                }
                match first {
                    None => {
                        drop(pool);
                        self.accepted();
                        return Ok(());
                    }
                    Some(job) => job,
                }
            } else {
                job
            }
        };

        let job = match self.queue.try_push(job) {
            Ok(()) => {
                self.accepted();
                return Ok(());
            }
            Err(PushError::Closed(job)) => {
                return Err(self.reject(job, RejectionReason::Shutdown));
            }
            Err(PushError::Full(job)) => job,
        };

        // The queue is full: grow the pool and hand the job to the new worker.
        let mut pool = self.lock_pool();
        if pool.shutdown || pool.workers >= self.options.max_threads {
            let reason = if pool.shutdown {
                RejectionReason::Shutdown
            } else {
                RejectionReason::QueueFull
            };
            drop(pool);
            return Err(self.reject(job, reason));
        }
        let mut first = Some(job);
        if let Err(e) = self.spawn_worker(&mut pool, &mut first) {
            log::error!("failed to start an elastic worker: {e}");
        }
        drop(pool);
        match first {
            None => {
                self.accepted();
                Ok(())
            }
            Some(job) => Err(self.reject(job, RejectionReason::QueueFull)),
        }
    }

    fn accepted(&self) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn reject(&self, job: Job, reason: RejectionReason) -> RejectedExecution {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        let task = job.into_parts().1;
        log::warn!("rejected task '{}': {reason}", task.name());
        RejectedExecution::new(task, reason)
    }

    /// Starts a worker. If `first` holds a job, the worker runs it before
    /// polling the queue; on failure the job is left in `first`.
    fn spawn_worker(
        self: &Arc<Self>,
        pool: &mut Pool,
        first: &mut Option<Job>,
    ) -> std::io::Result<()> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        if let Some(job) = first.take() {
            pool.starting.insert(id, job);
        }

        let mut builder = thread::Builder::new();
        if !self.options.thread_name_prefix.is_empty() {
            builder = builder.name(format!("{}-{id}", self.options.thread_name_prefix));
        }
        let shared = self.clone();
        match builder.spawn(move || shared.worker_loop(id)) {
            Ok(_) => {
                pool.workers += 1;
                pool.peak_workers = pool.peak_workers.max(pool.workers);
                log::debug!("started worker {id} ({} workers)", pool.workers);
                Ok(())
            }
            Err(e) => {
                *first = pool.starting.remove(&id);
                Err(e)
            }
        }
    }

    fn worker_loop(self: Arc<Self>, id: usize) {
        loop {
            let interrupt = Arc::new(AtomicBool::new(false));
            let Some(job) = self.next_job(id, &interrupt) else {
                break;
            };
            self.run_job(id, job, interrupt);
        }
        log::debug!("worker {id} exited");
    }

    /// Waits for the next job and registers it as running. Returns `None` once
    /// the worker has retired.
    fn next_job(&self, id: usize, interrupt: &Arc<AtomicBool>) -> Option<Job> {
        let register = |pool: &mut Pool, job: &Job| {
            pool.running.insert(
                id,
                Running {
                    task: job.task().clone(),
                    interrupt: interrupt.clone(),
                    thread: thread::current(),
                },
            );
        };

        {
            let mut pool = self.lock_pool();
            if let Some(job) = pool.starting.remove(&id) {
                register(&mut *pool, &job);
                return Some(job);
            }
        }

        loop {
            let timeout = if self.lock_pool().workers > self.options.core_threads {
                self.options.keep_alive_duration()
            } else {
                CORE_IDLE_WAIT
            };
            // Registration happens under the queue lock, so a task is always
            // visible either as queued or as running.
            let popped = self
                .queue
                .pop_timeout_with(timeout, |job| register(&mut *self.lock_pool(), job));
            match popped {
                Ok(job) => return Some(job),
                Err(PopError::Closed) => {
                    self.retire(&mut self.lock_pool());
                    return None;
                }
                Err(PopError::Timeout) => {
                    let mut pool = self.lock_pool();
                    if pool.workers > self.options.core_threads {
                        log::debug!("worker {id} idle for {timeout:?}, retiring");
                        self.retire(&mut pool);
                        return None;
                    }
                }
            }
        }
    }

    fn run_job(&self, id: usize, job: Job, interrupt: Arc<AtomicBool>) {
        let _scope = interrupt::enter(interrupt.clone());
        let task = job.task().clone();
        // The bound job restores the worker's contexts before the panic
        // reaches this frame.
        let outcome = catch_unwind(AssertUnwindSafe(|| job.run_with(|task| task.run())));
        self.lock_pool().running.remove(&id);

        match outcome {
            Ok(()) if interrupt.load(Ordering::Acquire) => {
                self.counters.interrupted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(()) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "task '{}' panicked on worker {id}: {}",
                    task.name(),
                    panic_message(&*payload)
                );
            }
        }
    }

    fn shutdown(&self) {
        let first = {
            let mut pool = self.lock_pool();
            let first = !pool.shutdown;
            pool.shutdown = true;
            if pool.workers == 0 {
                self.terminated.notify_all();
            }
            first
        };
        self.queue.close();
        if first {
            log::debug!(
                "executor '{}' shutting down, {} queued tasks left",
                self.options.thread_name_prefix,
                self.queue.len()
            );
        }
    }

    fn retire(&self, pool: &mut Pool) {
        pool.workers -= 1;
        if pool.workers == 0 && pool.shutdown {
            self.terminated.notify_all();
        }
    }

    fn lock_pool(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
