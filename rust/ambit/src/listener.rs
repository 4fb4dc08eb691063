//! Delivering call events to handlers inside their ambient contexts.
//!
//! The transport reports the progress of a call as a sequence of
//! [`CallEvent`]s. A [`ContextualListener`] wraps the user's
//! [`CallListener`] and delivers each event as a separate event invocation:
//! the call is installed as current, a fresh [`EventContext`] is created and
//! installed, and the handler runs inside both.

use std::fmt;

use ambit_common::{Result, verify_usage};
use ambit_context::{CallContext, EventContext, Metadata, Status};

use crate::ambient::Ambient;

/// One notification in the life of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent<M> {
    /// A request message arrived.
    Message(M),
    /// The client will send no more messages.
    HalfClose,
    /// The call can accept more outbound messages.
    Ready,
    /// The call was cancelled. Terminal.
    Cancel,
    /// The call completed normally. Terminal.
    Complete,
}

impl<M> CallEvent<M> {
    pub fn kind(&self) -> &'static str {
        match self {
            CallEvent::Message(_) => "message",
            CallEvent::HalfClose => "half_close",
            CallEvent::Ready => "ready",
            CallEvent::Cancel => "cancel",
            CallEvent::Complete => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallEvent::Cancel | CallEvent::Complete)
    }
}

/// A handler of call events.
pub trait CallListener<M> {
    fn on_event(&mut self, event: CallEvent<M>);
}

impl<M, F> CallListener<M> for F
where
    F: FnMut(CallEvent<M>),
{
    fn on_event(&mut self, event: CallEvent<M>) {
        self(event)
    }
}

/// Runs every event of one call inside that call's ambient contexts.
pub struct ContextualListener<L> {
    ambient: Ambient,
    call: CallContext,
    inner: L,
    finished: bool,
}

impl<L> ContextualListener<L> {
    pub fn new(ambient: Ambient, call: CallContext, inner: L) -> Self {
        ContextualListener {
            ambient,
            call,
            inner,
            finished: false,
        }
    }

    pub fn call(&self) -> &CallContext {
        &self.call
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn into_inner(self) -> L {
        self.inner
    }

    /// Returns `true` once a terminal event has been delivered.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Delivers `event` to the wrapped listener as a new event invocation.
    ///
    /// Fails with a usage error after a terminal event has been delivered. A
    /// cancellation settles the call's terminal outcome as cancelled unless
    /// the outcome was already set.
    pub fn deliver<M>(&mut self, event: CallEvent<M>) -> Result<EventContext>
    where
        L: CallListener<M>,
    {
        verify_usage!(
            "ContextualListener::deliver",
            !self.finished,
            "{} event delivered after {} finished",
            event.kind(),
            self.call.id()
        );
        let cancelled = matches!(event, CallEvent::Cancel);
        self.finished = event.is_terminal();

        let event_context = self.ambient.new_event(&self.call);
        log::trace!(
            "delivering {} as {} of {}",
            event.kind(),
            event_context.id(),
            self.call.id()
        );
        let inner = &mut self.inner;
        self.ambient
            .calls()
            .execute_within(self.call.clone(), || {
                event_context.run(|| inner.on_event(event))
            })?;

        if cancelled && !self.call.is_completed() {
            // A concurrent completion may win the race; either outcome stands.
            let _ = self
                .call
                .set_terminal_outcome(Status::cancelled("call cancelled"), Metadata::new());
        }
        Ok(event_context)
    }
}

impl<L> fmt::Debug for ContextualListener<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextualListener")
            .field("call", &self.call.id())
            .field("finished", &self.finished)
            .finish()
    }
}
