//! Per-call ambient state.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use ambit_common::{Result, verify_usage};

use crate::metadata::Metadata;
use crate::scoped_cache::{InjectionContext, ScopedCache};
use crate::status::{Status, TerminalOutcome};

static CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    fn next() -> CallId {
        CallId(CALL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// The context of one logical call.
///
/// Holds the request metadata captured when the call started, an optional
/// parent call, and a terminal outcome that can be settled exactly once.
///
/// A standalone call owns its scoped cache. A nested call is joined to its
/// parent: its cache resolves to the cache of the outermost standalone
/// ancestor, so call-scoped objects are shared along the whole chain.
///
/// `CallContext` is a cheap handle; clones refer to the same call and compare
/// equal.
#[derive(Clone)]
pub struct CallContext(Arc<CallCore>);

struct CallCore {
    id: CallId,
    metadata: Metadata,
    parent: Option<CallContext>,
    depth: usize,
    cache: ScopedCache,
    outcome: OnceLock<TerminalOutcome>,
}

impl CallContext {
    /// Starts a call with a cache of its own.
    pub fn standalone(metadata: Metadata) -> CallContext {
        CallContext(Arc::new(CallCore {
            id: CallId::next(),
            metadata,
            parent: None,
            depth: 0,
            cache: ScopedCache::standalone(),
            outcome: OnceLock::new(),
        }))
    }

    /// Starts a call joined to `parent`.
    pub fn nested(metadata: Metadata, parent: &CallContext) -> CallContext {
        CallContext(Arc::new(CallCore {
            id: CallId::next(),
            metadata,
            parent: Some(parent.clone()),
            depth: parent.0.depth + 1,
            cache: ScopedCache::joined(&parent.0.cache),
            outcome: OnceLock::new(),
        }))
    }

    pub fn id(&self) -> CallId {
        self.0.id
    }

    /// Request metadata captured when the call started.
    pub fn metadata(&self) -> &Metadata {
        &self.0.metadata
    }

    pub fn parent(&self) -> Option<&CallContext> {
        self.0.parent.as_ref()
    }

    /// The outermost ancestor of this call; `self` for a standalone call.
    pub fn root(&self) -> &CallContext {
        let mut call = self;
        while let Some(parent) = call.parent() {
            call = parent;
        }
        call
    }

    /// Number of ancestors.
    pub fn depth(&self) -> usize {
        self.0.depth
    }

    pub fn is_joined(&self) -> bool {
        self.0.parent.is_some()
    }

    /// Settles how the call finished.
    ///
    /// Fails with a usage error if the outcome has already been set; the
    /// first outcome is kept.
    pub fn set_terminal_outcome(&self, status: Status, trailers: Metadata) -> Result<()> {
        let code = status.code;
        let settled = self.0.outcome.set(TerminalOutcome { status, trailers }).is_ok();
        verify_usage!(
            "set_terminal_outcome",
            settled,
            "terminal outcome of {} is already set",
            self.0.id
        );
        log::debug!("{} finished with {code}", self.0.id);
        Ok(())
    }

    /// The terminal outcome, absent until set.
    pub fn terminal_outcome(&self) -> Option<&TerminalOutcome> {
        self.0.outcome.get()
    }

    pub fn is_completed(&self) -> bool {
        self.0.outcome.get().is_some()
    }
}

impl InjectionContext for CallContext {
    fn scoped_cache(&self) -> &ScopedCache {
        &self.0.cache
    }
}

impl PartialEq for CallContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CallContext {}

impl Hash for CallContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("id", &self.0.id)
            .field("parent", &self.0.parent.as_ref().map(|p| p.id()))
            .field("metadata", &self.0.metadata)
            .field("outcome", &self.0.outcome.get())
            .finish()
    }
}
