//! Ambient per-call and per-event contexts for thread-pooled request pipelines.
//!
//! This crate bundles the pieces of [`ambit_context`] and [`ambit_executor`]
//! into the shape a server uses them in: one [`Ambient`] per process, one
//! [`ContextualListener`] per call, and executors that carry the current call
//! and event into the tasks they run.

pub mod ambient;
pub mod listener;

pub use ambient::{Ambient, JoinPolicy};
pub use listener::{CallEvent, CallListener, ContextualListener};

pub use ambit_common as common;
pub use ambit_context as context;
pub use ambit_executor as executor;
