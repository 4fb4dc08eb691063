//! The process-wide set of ambient context trackers.

use ambit_common::Result;
use ambit_context::{
    CallContext, ContextBinder, ContextTracker, EventContext, Metadata,
};
use ambit_executor::{ContextTrackingExecutor, ExecutorOptions};
use serde::{Deserialize, Serialize};

/// Whether a call started while another call is current joins it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Always start a standalone call.
    #[default]
    Isolate,
    /// Nest under the current call, sharing its call-scoped objects. Falls
    /// back to a standalone call when no call is current.
    Join,
}

/// The call and event trackers of a process, and a binder over both.
///
/// Create one `Ambient` at startup and hand clones to every collaborator;
/// clones share tracker identities.
#[derive(Clone, Debug)]
pub struct Ambient {
    calls: ContextTracker<CallContext>,
    events: ContextTracker<EventContext>,
    binder: ContextBinder,
}

impl Ambient {
    pub fn new() -> Self {
        let calls = ContextTracker::new("call");
        let events = ContextTracker::new("event");
        let binder = ContextBinder::default().with(&calls).with(&events);
        Ambient {
            calls,
            events,
            binder,
        }
    }

    /// Also carries `tracker` across executor hand-offs.
    pub fn with_tracker<T>(mut self, tracker: &ContextTracker<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.binder = self.binder.with(tracker);
        self
    }

    pub fn calls(&self) -> &ContextTracker<CallContext> {
        &self.calls
    }

    pub fn events(&self) -> &ContextTracker<EventContext> {
        &self.events
    }

    pub fn binder(&self) -> &ContextBinder {
        &self.binder
    }

    pub fn current_call(&self) -> Option<CallContext> {
        self.calls.current()
    }

    pub fn current_event(&self) -> Option<EventContext> {
        self.events.current()
    }

    /// Creates the context of a new call according to `policy`.
    pub fn start_call(&self, metadata: Metadata, policy: JoinPolicy) -> CallContext {
        let call = match (policy, self.current_call()) {
            (JoinPolicy::Join, Some(parent)) => CallContext::nested(metadata, &parent),
            _ => CallContext::standalone(metadata),
        };
        log::debug!(
            "started {} (depth {}, policy {policy:?})",
            call.id(),
            call.depth()
        );
        call
    }

    /// Creates a fresh event context of `call`.
    pub fn new_event(&self, call: &CallContext) -> EventContext {
        EventContext::new(call.clone(), &self.events)
    }

    /// Runs `body` as a new event of `call`, with both the call and the event
    /// installed as current.
    pub fn dispatch<R>(&self, call: &CallContext, body: impl FnOnce() -> R) -> Result<R> {
        let event = self.new_event(call);
        self.calls.execute_within(call.clone(), || event.run(body))
    }

    /// Creates an executor whose tasks observe this process's ambient contexts.
    pub fn executor(&self, options: ExecutorOptions) -> Result<ContextTrackingExecutor> {
        ContextTrackingExecutor::new(options, self.binder.clone())
    }
}

impl Default for Ambient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ambit_context::{InjectionContext, ScopedKey};

    #[test]
    fn test_join_policy() {
        let ambient = Ambient::new();
        let outer = ambient.start_call(Metadata::new(), JoinPolicy::Join);
        assert!(!outer.is_joined());

        ambient.calls().execute_within(outer.clone(), || {
            let joined = ambient.start_call(Metadata::new(), JoinPolicy::Join);
            assert_eq!(joined.parent(), Some(&outer));

            let isolated = ambient.start_call(Metadata::new(), JoinPolicy::Isolate);
            assert!(isolated.parent().is_none());
            assert!(!isolated.scoped_cache().shares_store_with(outer.scoped_cache()));
        });
    }

    #[test]
    fn test_dispatch_installs_call_and_fresh_event() {
        let ambient = Ambient::new();
        let call = ambient.start_call(Metadata::new(), JoinPolicy::Isolate);
        let key = ScopedKey::<u32>::new("event-counter");

        let mut events = Vec::new();
        for i in 0..2 {
            let (event, produced) = ambient
                .dispatch(&call, || {
                    let event = ambient.current_event().unwrap();
                    assert_eq!(ambient.current_call().as_ref(), Some(&call));
                    let produced = *event.produce_if_absent(&key, || i);
                    (event, produced)
                })
                .unwrap();
            assert_eq!(produced, i);
            events.push(event);
        }
        assert_ne!(events[0], events[1]);
        assert!(ambient.current_call().is_none());
        assert!(ambient.current_event().is_none());
    }

    #[test]
    fn test_extra_tracker_is_bound() {
        let tenant = ContextTracker::<String>::new("tenant");
        let ambient = Ambient::new().with_tracker(&tenant);
        assert_eq!(ambient.binder().len(), 3);

        let executor = ambient.executor(ExecutorOptions::fixed(1)).unwrap();
        let handle = tenant.execute_within("acme".to_string(), || {
            let tenant = tenant.clone();
            executor.spawn(move || tenant.current()).unwrap()
        });
        assert_eq!(handle.join().unwrap().as_deref(), Some("acme"));
    }
}
