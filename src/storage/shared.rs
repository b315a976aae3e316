use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::store::Store;

/// Cloneable handle to one explicitly owned [`Store`].
///
/// The submit flow and the sync engine both hold a clone. Each closure runs
/// under a single lock acquisition, so a sequence of store calls inside one
/// closure is observed atomically by everyone else. The lock is synchronous;
/// never `.await` inside the closure.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    inner: Arc<Mutex<Store>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_store(store: Store) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Run a read-only query against the store.
    pub fn read<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        f(&self.lock())
    }

    /// Run a command against the store.
    pub fn write<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        f(&mut self.lock())
    }

    // Store methods validate before mutating, so a poisoned store is still consistent.
    fn lock(&self) -> MutexGuard<'_, Store> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
