//! Ambient per-call and per-event contexts.
//!
//! A *call* is one logical unit of work that is delivered as a sequence of
//! *events*, each of which may run on a different worker thread. This crate
//! provides the building blocks that let handler code reach "the current call"
//! and "the current event" without threading them through every signature:
//!
//! - [`ContextTracker`]: the per-thread current value of one context kind.
//! - [`ScopedCache`]: lazily produced singletons scoped to a context.
//! - [`CallContext`] and [`EventContext`]: the two context kinds.
//! - [`ContextBinder`]: captures the current contexts and reinstalls them on
//!   another thread.

pub mod binder;
pub mod call_context;
pub mod event_context;
pub mod metadata;
pub mod scoped_cache;
pub mod status;
pub mod tracker;

pub use binder::{BoundTask, ContextBinder, ContextSnapshot, InstalledSnapshot};
pub use call_context::{CallContext, CallId};
pub use event_context::{EventContext, EventId};
pub use metadata::Metadata;
pub use scoped_cache::{InjectionContext, ScopedCache, ScopedKey};
pub use status::{Status, StatusCode, TerminalOutcome};
pub use tracker::{ContextTracker, ErasedTracker, TrackerGuard, TrackerId};
