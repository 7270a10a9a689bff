//! Ref — a hook-slot-stable mutable cell with no tracking.
//!
//! A [`Ref`] is the non-reactive counterpart to [`super::signal::Signal`]:
//! component code can stash a mutable value across renders (a DOM-handle
//! analogue, a timer id, a previous-value cache for manual diffing)
//! without paying for or triggering dependency tracking. Reading or
//! writing a `Ref` never subscribes the current listener and never
//! notifies anyone — it is plain shared mutable state, scoped to an
//! owner's hook slots the same way a `Signal` hook is.

use std::sync::Arc;

use parking_lot::Mutex;

/// A mutable cell that survives across an owner's re-renders via
/// [`super::owner::Owner::hook_slot`] but carries none of `Signal`'s
/// dependency-tracking machinery.
pub struct Ref<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> Ref<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    /// Read the current value without subscribing anything.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.lock().clone()
    }

    /// Overwrite the value. No equality check, no notification.
    pub fn set(&self, value: T) {
        *self.inner.lock() = value;
    }

    /// Mutate the value in place under the lock.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.lock());
    }

    /// Run `f` against a borrow of the current value, returning its
    /// result, without cloning `T`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.lock())
    }
}
