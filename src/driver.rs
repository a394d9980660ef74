use crate::error::LockError;
use std::sync::Arc;

/// Capability every backend binding provides to a [`Lock`](crate::Lock).
///
/// Holding a lock is represented by the presence of `key` in the backing
/// store, so a driver only needs two atomic operations:
///
/// - `acquire` writes a sentinel under `key` if and only if the key is
///   absent. It must return `Ok(())` only when this call created the key;
///   an existing key and any other backend failure both map to
///   [`LockError::Acquire`].
/// - `release` deletes `key`. It must return `Ok(())` only when the key
///   existed and was removed; otherwise [`LockError::Release`].
///
/// Both are single synchronous round-trips and must not consult local state.
/// Retrying is not the driver's concern.
pub trait Driver {
    fn acquire(&self, key: &str) -> Result<(), LockError>;

    fn release(&self, key: &str) -> Result<(), LockError>;
}

impl<D: Driver + ?Sized> Driver for &D {
    fn acquire(&self, key: &str) -> Result<(), LockError> {
        (**self).acquire(key)
    }

    fn release(&self, key: &str) -> Result<(), LockError> {
        (**self).release(key)
    }
}

impl<D: Driver + ?Sized> Driver for Box<D> {
    fn acquire(&self, key: &str) -> Result<(), LockError> {
        (**self).acquire(key)
    }

    fn release(&self, key: &str) -> Result<(), LockError> {
        (**self).release(key)
    }
}

impl<D: Driver + ?Sized> Driver for Arc<D> {
    fn acquire(&self, key: &str) -> Result<(), LockError> {
        (**self).acquire(key)
    }

    fn release(&self, key: &str) -> Result<(), LockError> {
        (**self).release(key)
    }
}
