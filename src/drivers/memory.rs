use crate::driver::Driver;
use crate::error::LockError;
use log::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

type Store = Arc<Mutex<HashMap<String, String>>>;

/// Driver over an in-process key-value store.
///
/// Every handle obtained through [`MemoryDriver::connect`] talks to the same
/// store, the way several clients would talk to one single-node server.
/// Each key maps to the id of the handle that created it; `clone` keeps the
/// id as well as the store.
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    id: String,
    store: Store,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        MemoryDriver::new()
    }
}

impl MemoryDriver {
    /// Creates a driver over a fresh, empty store.
    pub fn new() -> MemoryDriver {
        MemoryDriver {
            id: Uuid::new_v4().to_string(),
            store: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Opens another handle to the same store with its own holder id.
    pub fn connect(&self) -> MemoryDriver {
        MemoryDriver {
            id: Uuid::new_v4().to_string(),
            store: Arc::clone(&self.store),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store().contains_key(key)
    }

    /// Id of the handle that currently holds `key`, if any.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.store().get(key).cloned()
    }

    /// Removes `key` behind every lock's back, as an operator clearing an
    /// orphaned entry would. Returns whether the key was present.
    pub fn evict(&self, key: &str) -> bool {
        self.store().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.store().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every map update is a single insert or remove, so the map is consistent
    // even if a holder of the mutex panicked.
    fn store(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Driver for MemoryDriver {
    fn acquire(&self, key: &str) -> Result<(), LockError> {
        let mut store = self.store();
        if store.contains_key(key) {
            return Err(LockError::acquire(key));
        }

        store.insert(key.to_string(), self.id.clone());
        debug!("[{}] created {key}", self.id);
        Ok(())
    }

    fn release(&self, key: &str) -> Result<(), LockError> {
        let mut store = self.store();
        match store.remove(key) {
            Some(_) => {
                debug!("[{}] deleted {key}", self.id);
                Ok(())
            }
            None => Err(LockError::release(key)),
        }
    }
}
