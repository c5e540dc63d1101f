//! Lock helpers for consistent poison handling
//!
//! Locks that guard broker state convert poisoning into an error of the
//! caller's type. Locks that guard only counters and timestamps recover
//! the inner value, since a half-written counter is still usable.

use std::sync::{LockResult, MutexGuard, PoisonError, RwLockReadGuard, RwLockWriteGuard};

/// Convert a poisoned lock result into an application error
///
/// # Examples
/// ```
/// use std::sync::Mutex;
/// use streamload::core::sync::handle_mutex_poison;
/// use streamload::broker::BrokerError;
///
/// let mutex = Mutex::new(42);
/// let guard = handle_mutex_poison(mutex.lock(), |message| BrokerError::Internal { message })
///     .unwrap();
/// assert_eq!(*guard, 42);
/// ```
pub fn handle_mutex_poison<T, E>(
    result: LockResult<T>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<T, E> {
    result.map_err(|poison_err| {
        error_constructor(format!(
            "Internal synchronisation error (lock poisoned): {:?}",
            poison_err
        ))
    })
}

/// RwLock read variant of [`handle_mutex_poison`]
pub fn handle_rwlock_read<T, E>(
    result: LockResult<RwLockReadGuard<T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<RwLockReadGuard<T>, E> {
    handle_mutex_poison(result, error_constructor)
}

/// RwLock write variant of [`handle_mutex_poison`]
pub fn handle_rwlock_write<T, E>(
    result: LockResult<RwLockWriteGuard<T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<RwLockWriteGuard<T>, E> {
    handle_mutex_poison(result, error_constructor)
}

/// Take the guard even if a previous holder panicked
pub fn lock_recover<T>(result: LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}
