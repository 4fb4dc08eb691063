//! Lazily produced, context-scoped singletons.
//!
//! A [`ScopedCache`] maps opaque [`ScopedKey`]s to values produced on first
//! use. Every key is produced at most once per cache: concurrent callers of
//! [`ScopedCache::produce_if_absent`] for the same key block on a per-key cell
//! while one of them runs the factory, and all of them observe the published
//! value.
//!
//! A cache handle is either standalone or joined. A joined handle shares the
//! store of the handle it was joined to, so every operation resolves to the
//! root store of the chain. The root is resolved once, when the handle is
//! created; chains are therefore never walked and never cyclic.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use ahash::AHashMap;

static KEY_ID: AtomicU64 = AtomicU64::new(1);
static STORE_ID: AtomicU64 = AtomicU64::new(1);

type Slot = Arc<OnceLock<Arc<dyn Any + Send + Sync>>>;

/// Typed, opaque identity of a scoped object.
///
/// Two keys created by separate calls to [`ScopedKey::new`] never collide,
/// even when they share a name.
pub struct ScopedKey<T> {
    id: u64,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ScopedKey<T> {
    pub fn new(name: &'static str) -> Self {
        ScopedKey {
            id: KEY_ID.fetch_add(1, Ordering::Relaxed),
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ScopedKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ScopedKey<T> {}

impl<T> fmt::Debug for ScopedKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopedKey({}#{})", self.name, self.id)
    }
}

/// A handle to a scoped object store.
#[derive(Clone)]
pub struct ScopedCache {
    store: Arc<CacheStore>,
}

struct CacheStore {
    id: u64,
    slots: Mutex<AHashMap<u64, Slot>>,
}

impl ScopedCache {
    /// Creates a cache with its own, empty store.
    pub fn standalone() -> Self {
        ScopedCache {
            store: Arc::new(CacheStore {
                id: STORE_ID.fetch_add(1, Ordering::Relaxed),
                slots: Mutex::new(AHashMap::new()),
            }),
        }
    }

    /// Creates a handle that resolves to the root store of `parent`.
    pub fn joined(parent: &ScopedCache) -> Self {
        ScopedCache {
            store: parent.store.clone(),
        }
    }

    /// Identity of the (root) store this handle resolves to.
    pub fn store_id(&self) -> u64 {
        self.store.id
    }

    /// Returns `true` if both handles resolve to the same root store.
    pub fn shares_store_with(&self, other: &ScopedCache) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }

    /// Returns the value for `key`, producing it with `factory` if absent.
    ///
    /// The factory runs at most once per key while the entry is present;
    /// concurrent callers wait for it and receive the same `Arc`. If the factory
    /// panics, the entry stays unpublished and a later call retries.
    ///
    /// A factory must not produce the key it is producing.
    pub fn produce_if_absent<T, F>(&self, key: &ScopedKey<T>, factory: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let slot = self.slot(key.id);
        let value = slot
            .get_or_init(|| Arc::new(factory()) as Arc<dyn Any + Send + Sync>)
            .clone();
        downcast(key, value)
    }

    /// Returns the published value for `key`, if any.
    pub fn get<T>(&self, key: &ScopedKey<T>) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let slot = self.lock().get(&key.id).cloned()?;
        slot.get().cloned().map(|value| downcast(key, value))
    }

    pub fn contains<T>(&self, key: &ScopedKey<T>) -> bool {
        self.lock()
            .get(&key.id)
            .is_some_and(|slot| slot.get().is_some())
    }

    /// Removes the entry for `key` from the root store.
    ///
    /// Returns `true` if a published value was removed. A subsequent
    /// [`produce_if_absent`](Self::produce_if_absent) runs its factory again.
    pub fn remove_scoped_object<T>(&self, key: &ScopedKey<T>) -> bool {
        let removed = self.lock().remove(&key.id);
        removed.is_some_and(|slot| slot.get().is_some())
    }

    /// Number of published values.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry. Values are dropped outside the store lock.
    pub fn clear(&self) {
        let slots = std::mem::take(&mut *self.lock());
        drop(slots);
    }

    fn slot(&self, key_id: u64) -> Slot {
        self.lock().entry(key_id).or_default().clone()
    }

    fn lock(&self) -> MutexGuard<'_, AHashMap<u64, Slot>> {
        self.store.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ScopedCache {
    fn default() -> Self {
        Self::standalone()
    }
}

impl fmt::Debug for ScopedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCache")
            .field("store_id", &self.store.id)
            .field("len", &self.len())
            .finish()
    }
}

fn downcast<T>(key: &ScopedKey<T>, value: Arc<dyn Any + Send + Sync>) -> Arc<T>
where
    T: Send + Sync + 'static,
{
    match value.downcast::<T>() {
        Ok(value) => value,
        // Slots are keyed by the typed key's id, so the stored type always matches.
        Err(_) => unreachable!("scoped key {key:?} holds a value of another type"),
    }
}

/// A context that owns (or joins) a scoped object cache.
pub trait InjectionContext {
    fn scoped_cache(&self) -> &ScopedCache;

    /// See [`ScopedCache::produce_if_absent`].
    fn produce_if_absent<T, F>(&self, key: &ScopedKey<T>, factory: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        self.scoped_cache().produce_if_absent(key, factory)
    }

    /// See [`ScopedCache::remove_scoped_object`].
    fn remove_scoped_object<T>(&self, key: &ScopedKey<T>) -> bool {
        self.scoped_cache().remove_scoped_object(key)
    }

    fn scoped_object<T>(&self, key: &ScopedKey<T>) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.scoped_cache().get(key)
    }
}
