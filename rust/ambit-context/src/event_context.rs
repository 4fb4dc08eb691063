//! Per-event ambient state.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ambit_common::{Result, verify_usage};

use crate::call_context::CallContext;
use crate::scoped_cache::{InjectionContext, ScopedCache};
use crate::tracker::ContextTracker;

static EVENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event-{}", self.0)
    }
}

/// The context of a single event invocation of a call.
///
/// Every event gets a fresh `EventContext` with a private scoped cache that is
/// never joined to the call's cache, so event-scoped objects are not shared
/// between two events of the same call. An event context backs exactly one
/// invocation: [`run`](Self::run) succeeds once.
#[derive(Clone)]
pub struct EventContext(Arc<EventCore>);

struct EventCore {
    id: EventId,
    call: CallContext,
    tracker: ContextTracker<EventContext>,
    cache: ScopedCache,
    invoked: AtomicBool,
}

impl EventContext {
    pub fn new(call: CallContext, tracker: &ContextTracker<EventContext>) -> EventContext {
        EventContext(Arc::new(EventCore {
            id: EventId(EVENT_ID.fetch_add(1, Ordering::Relaxed)),
            call,
            tracker: tracker.clone(),
            cache: ScopedCache::standalone(),
            invoked: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> EventId {
        self.0.id
    }

    pub fn owning_call(&self) -> &CallContext {
        &self.0.call
    }

    pub fn tracker(&self) -> &ContextTracker<EventContext> {
        &self.0.tracker
    }

    /// Returns `true` once the event has been run.
    pub fn is_consumed(&self) -> bool {
        self.0.invoked.load(Ordering::Acquire)
    }

    /// Runs `body` with this event installed as current on its tracker.
    ///
    /// Fails with a usage error if the event has already been run.
    pub fn run<R>(&self, body: impl FnOnce() -> R) -> Result<R> {
        let first = !self.0.invoked.swap(true, Ordering::AcqRel);
        verify_usage!(
            "EventContext::run",
            first,
            "{} of {} has already been run",
            self.0.id,
            self.0.call.id()
        );
        Ok(self.0.tracker.execute_within(self.clone(), body))
    }
}

impl InjectionContext for EventContext {
    fn scoped_cache(&self) -> &ScopedCache {
        &self.0.cache
    }
}

impl PartialEq for EventContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for EventContext {}

impl fmt::Debug for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("id", &self.0.id)
            .field("call", &self.0.call.id())
            .field("consumed", &self.is_consumed())
            .finish()
    }
}
