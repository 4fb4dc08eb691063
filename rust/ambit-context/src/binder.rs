//! Carrying ambient contexts across thread hand-offs.
//!
//! A [`ContextBinder`] knows a set of trackers. [`ContextBinder::capture_snapshot`]
//! records, for each of them, the value current on the calling thread (or its
//! absence). The resulting [`ContextSnapshot`] can be installed later on any
//! thread; while installed, every tracker sees exactly the captured state, and
//! the thread's previous state is restored when the installation ends, whether
//! normally or by unwinding.

use std::fmt;
use std::sync::Arc;

use crate::tracker::{CapturedContext, ContextTracker, ErasedTracker, Restore, TrackerId};

/// Captures the contexts of a fixed set of trackers.
#[derive(Clone, Default)]
pub struct ContextBinder {
    trackers: Arc<Vec<Arc<dyn ErasedTracker>>>,
}

impl ContextBinder {
    /// Creates a binder over the given type-erased trackers.
    pub fn new(trackers: impl IntoIterator<Item = Arc<dyn ErasedTracker>>) -> Self {
        ContextBinder {
            trackers: Arc::new(trackers.into_iter().collect()),
        }
    }

    /// Returns a binder that additionally tracks `tracker`.
    pub fn with<T>(self, tracker: &ContextTracker<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut trackers = Arc::unwrap_or_clone(self.trackers);
        trackers.push(Arc::new(tracker.clone()));
        ContextBinder {
            trackers: Arc::new(trackers),
        }
    }

    pub fn tracker_ids(&self) -> impl Iterator<Item = TrackerId> + '_ {
        self.trackers.iter().map(|t| t.tracker_id())
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Records the current value, or absence, of every tracker on the calling thread.
    pub fn capture_snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            entries: self.trackers.iter().map(|t| t.capture()).collect(),
        }
    }

    /// Captures the calling thread's contexts and pairs them with `task`.
    pub fn bind<F>(&self, task: F) -> BoundTask<F> {
        BoundTask {
            snapshot: self.capture_snapshot(),
            task,
        }
    }
}

impl fmt::Debug for ContextBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.trackers.iter().map(|t| t.tracker_name()))
            .finish()
    }
}

/// The contexts captured on one thread at one point in time.
///
/// A snapshot may be installed any number of times, on any thread.
pub struct ContextSnapshot {
    entries: Vec<Box<dyn CapturedContext>>,
}

impl ContextSnapshot {
    /// Installs every captured context on the calling thread until the
    /// returned guard is dropped.
    pub fn install(&self) -> InstalledSnapshot {
        log::trace!("installing {} captured contexts", self.entries.len());
        InstalledSnapshot {
            guards: self.entries.iter().map(|e| e.install()).collect(),
        }
    }

    /// Runs `body` with the captured contexts installed.
    pub fn run<R>(&self, body: impl FnOnce() -> R) -> R {
        let _installed = self.install();
        body()
    }

    /// The captured value of `tracker`, if it was captured and set.
    pub fn value_of<T: Clone + 'static>(&self, tracker: &ContextTracker<T>) -> Option<&T> {
        self.entries
            .iter()
            .find(|e| e.tracker_id() == tracker.id())
            .and_then(|e| e.value())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|e| (e.tracker_name(), e.value().is_some())),
            )
            .finish()
    }
}

/// Guard of an installed snapshot; restores the prior contexts when dropped.
#[must_use = "the snapshot is uninstalled as soon as the guard is dropped"]
pub struct InstalledSnapshot {
    guards: Vec<Box<dyn Restore>>,
}

impl Drop for InstalledSnapshot {
    fn drop(&mut self) {
        // Last installed, first restored.
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
        log::trace!("restored prior contexts");
    }
}

/// A task paired with the contexts that were current when it was bound.
pub struct BoundTask<F> {
    snapshot: ContextSnapshot,
    task: F,
}

impl<F> BoundTask<F> {
    pub fn task(&self) -> &F {
        &self.task
    }

    pub fn snapshot(&self) -> &ContextSnapshot {
        &self.snapshot
    }

    /// Hands the task to `run` with the captured contexts installed.
    pub fn run_with<R>(self, run: impl FnOnce(F) -> R) -> R {
        let BoundTask { snapshot, task } = self;
        snapshot.run(|| run(task))
    }

    pub fn into_parts(self) -> (ContextSnapshot, F) {
        (self.snapshot, self.task)
    }
}

impl<F, R> BoundTask<F>
where
    F: FnOnce() -> R,
{
    /// Invokes the task with the captured contexts installed.
    pub fn call(self) -> R {
        self.run_with(|task| task())
    }

    /// Turns the bound task back into a plain closure.
    pub fn into_fn(self) -> impl FnOnce() -> R {
        move || self.call()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::thread;

    fn binder() -> (ContextTracker<u32>, ContextTracker<String>, ContextBinder) {
        let numbers = ContextTracker::<u32>::new("numbers");
        let labels = ContextTracker::<String>::new("labels");
        let binder = ContextBinder::default().with(&numbers).with(&labels);
        (numbers, labels, binder)
    }

    #[test]
    fn test_bound_task_runs_with_captured_contexts() {
        let (numbers, labels, binder) = binder();
        let bound = numbers.execute_within(3, || {
            labels.execute_within("three".to_string(), || {
                binder.bind({
                    let numbers = numbers.clone();
                    let labels = labels.clone();
                    move || (numbers.current(), labels.current())
                })
            })
        });
        assert_eq!(bound.snapshot().value_of(&numbers), Some(&3));

        let seen = thread::spawn(move || bound.call()).join().unwrap();
        assert_eq!(seen, (Some(3), Some("three".to_string())));
    }

    #[test]
    fn test_captured_absence_masks_current_value() {
        let (numbers, _labels, binder) = binder();
        let snapshot = binder.capture_snapshot();
        numbers.execute_within(5, || {
            snapshot.run(|| assert_eq!(numbers.current(), None));
            assert_eq!(numbers.current(), Some(5));
        });
    }

    #[test]
    fn test_prior_contexts_restored_after_panic() {
        let (numbers, labels, binder) = binder();
        let bound = numbers.execute_within(1, || binder.bind(|| -> u32 { panic!("task failed") }));

        numbers.execute_within(2, || {
            let result = catch_unwind(AssertUnwindSafe(|| bound.call()));
            assert!(result.is_err());
            assert_eq!(numbers.current(), Some(2));
            assert_eq!(labels.current(), None);
        });
    }

    #[test]
    fn test_nested_binding() {
        let (numbers, _labels, binder) = binder();
        let outer = numbers.execute_within(10, || {
            let binder = binder.clone();
            let numbers = numbers.clone();
            binder.clone().bind(move || {
                let inner = numbers.execute_within(11, || binder.bind(|| ()));
                let seen = inner.snapshot().value_of(&numbers).copied();
                inner.call();
                (seen, numbers.current())
            })
        });
        let (inner_seen, after) = thread::spawn(move || outer.call()).join().unwrap();
        assert_eq!(inner_seen, Some(11));
        assert_eq!(after, Some(10));
    }

    #[test]
    fn test_snapshot_can_be_installed_repeatedly() {
        let (numbers, _labels, binder) = binder();
        let snapshot = numbers.execute_within(8, || binder.capture_snapshot());
        for _ in 0..3 {
            let _installed = snapshot.install();
            assert_eq!(numbers.current(), Some(8));
        }
        assert_eq!(numbers.current(), None);
        assert_eq!(snapshot.len(), 2);
    }
}
