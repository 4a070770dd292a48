//! Mutex locking that shrugs off poisoning.
//!
//! The registry state, the session arena, and the virtual transport all guard
//! plain collections. A panic in a subscriber or a test thread leaves them in
//! a consistent state, so a poisoned lock is taken over instead of propagated.

use std::sync::{Mutex, MutexGuard};

pub trait IgnorePoison<T> {
    /// Locks the mutex, recovering the guard if a previous holder panicked.
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> IgnorePoison<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}
