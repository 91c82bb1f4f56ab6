//! Mutex access shared by the table, the handler registry and the session.

use std::sync::{Mutex, MutexGuard};

/// Acquire a mutex guard, intentionally ignoring poisoning.
///
/// Every critical section guarded this way is a single map or `Option`
/// operation, so a panic while holding the lock cannot leave the value
/// half-updated.
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // ---
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_poisoned_lock_is_still_usable() {
        // ---
        let shared = Arc::new(Mutex::new(vec![1]));

        let inner = Arc::clone(&shared);
        let result = std::thread::spawn(move || {
            let _guard = inner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(result.is_err());
        assert!(shared.is_poisoned());

        lock_ignore_poison(&shared).push(2);
        assert_eq!(*lock_ignore_poison(&shared), vec![1, 2]);
    }
}
