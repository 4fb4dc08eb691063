//! Per-thread "current context" slots.
//!
//! A [`ContextTracker<T>`] names one kind of ambient context (e.g. the current
//! call, the current event). Each execution thread holds at most one current
//! value per tracker. Values are installed with strict push/pop discipline:
//! [`ContextTracker::execute_within`] (or the RAII [`ContextTracker::enter`])
//! installs a value and restores the previous one, possibly none, on every exit
//! path including unwinding panics.
//!
//! Trackers are explicitly constructed and handed to every collaborator that
//! needs them. A tracker is a cheap copyable handle: clones share the tracker's
//! identity and therefore its per-thread slot.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

static TRACKER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// The slot map of the executing thread, keyed by tracker identity.
    static SLOTS: RefCell<AHashMap<u64, Box<dyn Any>>> = RefCell::new(AHashMap::new());
}

/// Process-unique identity of a tracker.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TrackerId(u64);

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-thread current-value slot for one context kind.
pub struct ContextTracker<T> {
    id: TrackerId,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ContextTracker<T> {
    fn clone(&self) -> Self {
        ContextTracker {
            id: self.id,
            name: self.name,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ContextTracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextTracker")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl<T: Clone + 'static> ContextTracker<T> {
    /// Creates a tracker with a fresh identity. `name` is used for diagnostics only.
    pub fn new(name: &'static str) -> Self {
        ContextTracker {
            id: TrackerId(TRACKER_ID.fetch_add(1, Ordering::Relaxed)),
            name,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> TrackerId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the value installed on the calling thread, if any.
    pub fn current(&self) -> Option<T> {
        SLOTS
            .try_with(|slots| {
                slots
                    .borrow()
                    .get(&self.id.0)
                    .and_then(|value| value.downcast_ref::<T>())
                    .cloned()
            })
            .ok()
            .flatten()
    }

    /// Returns `true` if a value is installed on the calling thread.
    pub fn is_set(&self) -> bool {
        SLOTS
            .try_with(|slots| slots.borrow().contains_key(&self.id.0))
            .unwrap_or(false)
    }

    /// Installs `context` as current for the calling thread, runs `body`, and
    /// restores the prior value (possibly absent) when `body` returns or unwinds.
    pub fn execute_within<R>(&self, context: T, body: impl FnOnce() -> R) -> R {
        let _guard = self.enter(context);
        body()
    }

    /// Installs `context` as current until the returned guard is dropped.
    ///
    /// Guards of one tracker must be dropped in reverse order of creation.
    pub fn enter(&self, context: T) -> TrackerGuard<T> {
        self.enter_opt(Some(context))
    }

    /// Like [`enter`](Self::enter), but `None` clears the slot for the guard's lifetime.
    pub fn enter_opt(&self, context: Option<T>) -> TrackerGuard<T> {
        let prior = self.replace(context);
        TrackerGuard {
            tracker: self.clone(),
            prior,
            _not_send: PhantomData,
        }
    }

    /// Swaps the slot's value and returns the previous one. The previous value
    /// is returned out of the slot borrow, so its destructor may freely touch
    /// trackers.
    fn replace(&self, value: Option<T>) -> Option<T> {
        let prior = SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            match value {
                Some(value) => slots.insert(self.id.0, Box::new(value)),
                None => slots.remove(&self.id.0),
            }
        });
        prior
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Restores a tracker's previous value when dropped.
///
/// The guard is bound to the thread that created it.
#[must_use = "the context is uninstalled as soon as the guard is dropped"]
pub struct TrackerGuard<T: Clone + 'static> {
    tracker: ContextTracker<T>,
    prior: Option<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T: Clone + 'static> Drop for TrackerGuard<T> {
    fn drop(&mut self) {
        let prior = self.prior.take();
        // Thread-local storage may already be gone during thread teardown.
        if SLOTS.try_with(|_| ()).is_ok() {
            drop(self.tracker.replace(prior));
        }
    }
}

/// Marker for type-erased guards held by an installed snapshot.
pub trait Restore {}

impl<T: Clone + 'static> Restore for TrackerGuard<T> {}

/// Type-erased view of a tracker, used to capture the ambient contexts of a
/// thread without knowing their types.
pub trait ErasedTracker: Send + Sync {
    fn tracker_id(&self) -> TrackerId;

    fn tracker_name(&self) -> &'static str;

    /// Records the calling thread's current value (or absence).
    fn capture(&self) -> Box<dyn CapturedContext>;
}

impl<T> ErasedTracker for ContextTracker<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn tracker_id(&self) -> TrackerId {
        self.id
    }

    fn tracker_name(&self) -> &'static str {
        self.name
    }

    fn capture(&self) -> Box<dyn CapturedContext> {
        Box::new(Captured {
            tracker: self.clone(),
            value: self.current(),
        })
    }
}

/// A captured tracker value that can be reinstalled on any thread, any number of times.
pub trait CapturedContext: Send + Sync {
    fn tracker_id(&self) -> TrackerId;

    fn tracker_name(&self) -> &'static str;

    /// The captured value, `None` if nothing was current at capture time.
    fn value(&self) -> Option<&(dyn Any + Send + Sync)>;

    /// Installs the captured value (or absence) on the calling thread.
    fn install(&self) -> Box<dyn Restore>;
}

struct Captured<T> {
    tracker: ContextTracker<T>,
    value: Option<T>,
}

impl<T> CapturedContext for Captured<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn tracker_id(&self) -> TrackerId {
        self.tracker.id
    }

    fn tracker_name(&self) -> &'static str {
        self.tracker.name
    }

    fn value(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.value.as_ref().map(|v| v as &(dyn Any + Send + Sync))
    }

    fn install(&self) -> Box<dyn Restore> {
        Box::new(self.tracker.enter_opt(self.value.clone()))
    }
}

/// Captures the calling thread's current value of every tracker in `trackers`.
pub fn capture_all<'a>(
    trackers: impl IntoIterator<Item = &'a dyn ErasedTracker>,
) -> Vec<Box<dyn CapturedContext>> {
    trackers.into_iter().map(|t| t.capture()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::thread;

    #[test]
    fn test_current_is_empty_by_default() {
        let tracker = ContextTracker::<u32>::new("numbers");
        assert_eq!(tracker.current(), None);
        assert!(!tracker.is_set());
    }

    #[test]
    fn test_execute_within_restores_absence() {
        let tracker = ContextTracker::<&'static str>::new("labels");
        let seen = tracker.execute_within("outer", || tracker.current());
        assert_eq!(seen, Some("outer"));
        assert_eq!(tracker.current(), None);
    }

    #[test]
    fn test_nested_execute_within() {
        let tracker = ContextTracker::<u32>::new("depth");
        tracker.execute_within(1, || {
            assert_eq!(tracker.current(), Some(1));
            tracker.execute_within(2, || {
                assert_eq!(tracker.current(), Some(2));
                tracker.execute_within(3, || assert_eq!(tracker.current(), Some(3)));
                assert_eq!(tracker.current(), Some(2));
            });
            assert_eq!(tracker.current(), Some(1));
        });
        assert_eq!(tracker.current(), None);
    }

    #[test]
    fn test_restores_on_panic() {
        let tracker = ContextTracker::<u32>::new("panics");
        tracker.execute_within(10, || {
            let result = catch_unwind(AssertUnwindSafe(|| {
                tracker.execute_within::<()>(20, || panic!("inner failure"));
            }));
            assert!(result.is_err());
            assert_eq!(tracker.current(), Some(10));
        });
        assert_eq!(tracker.current(), None);
    }

    #[test]
    fn test_trackers_are_independent() {
        let a = ContextTracker::<u32>::new("a");
        let b = ContextTracker::<u32>::new("b");
        assert_ne!(a.id(), b.id());
        a.execute_within(1, || {
            assert_eq!(b.current(), None);
            b.execute_within(2, || {
                assert_eq!(a.current(), Some(1));
                assert_eq!(b.current(), Some(2));
            });
        });
    }

    #[test]
    fn test_clones_share_identity() {
        let tracker = ContextTracker::<u32>::new("shared");
        let clone = tracker.clone();
        tracker.execute_within(5, || assert_eq!(clone.current(), Some(5)));
    }

    #[test]
    fn test_per_thread_isolation() {
        let tracker = ContextTracker::<u32>::new("threads");
        tracker.execute_within(1, || {
            let other = tracker.clone();
            let seen = thread::spawn(move || other.current()).join().unwrap();
            assert_eq!(seen, None);
        });
    }

    #[test]
    fn test_enter_opt_none_clears_temporarily() {
        let tracker = ContextTracker::<u32>::new("clear");
        tracker.execute_within(9, || {
            {
                let _guard = tracker.enter_opt(None);
                assert_eq!(tracker.current(), None);
            }
            assert_eq!(tracker.current(), Some(9));
        });
    }

    #[test]
    fn test_capture_all_and_reinstall() {
        let numbers = ContextTracker::<u32>::new("numbers");
        let labels = ContextTracker::<String>::new("labels");

        let captured = numbers.execute_within(7, || {
            capture_all([&numbers as &dyn ErasedTracker, &labels as &dyn ErasedTracker])
        });
        assert_eq!(captured.len(), 2);
        assert_eq!(
            captured[0].value().and_then(|v| v.downcast_ref::<u32>()),
            Some(&7)
        );
        assert!(captured[1].value().is_none());

        let handle = thread::spawn(move || {
            let _restore: Vec<_> = captured.iter().map(|c| c.install()).collect();
            (numbers.current(), labels.current())
        });
        assert_eq!(handle.join().unwrap(), (Some(7), None));
    }
}
