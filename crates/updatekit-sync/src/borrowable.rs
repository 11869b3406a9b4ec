//! Lock-guarded shared access to a mutable object.
//!
//! A [`Borrowable`] pairs an object with the mutex that protects it. Any
//! holder of a clone can [`acquire`](Borrowable::acquire) the object; the
//! returned [`BorrowedPointer`] gives exclusive access and releases the lock
//! when it goes out of scope.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

/// Shared handle to a lock-protected object.
pub struct Borrowable<T: ?Sized> {
    inner: Arc<Mutex<T>>,
}

impl<T> Borrowable<T> {
    /// Wrap `value` in a new lock.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }
}

impl<T: ?Sized> Borrowable<T> {
    /// Share an existing lock-protected object, e.g. an
    /// `Arc<Mutex<dyn Trait>>` created by the caller.
    pub fn from_arc(inner: Arc<Mutex<T>>) -> Self {
        Self { inner }
    }

    /// Block until the object is free and borrow it.
    pub fn acquire(&self) -> BorrowedPointer<'_, T> {
        BorrowedPointer {
            guard: self.inner.lock(),
        }
    }

    /// Borrow the object if nobody else holds it.
    pub fn try_acquire(&self) -> Option<BorrowedPointer<'_, T>> {
        self.inner
            .try_lock()
            .map(|guard| BorrowedPointer { guard })
    }

    /// Borrow the object, waiting at most `timeout`.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<BorrowedPointer<'_, T>> {
        self.inner
            .try_lock_for(timeout)
            .map(|guard| BorrowedPointer { guard })
    }

    /// Whether the object is currently borrowed.
    pub fn is_borrowed(&self) -> bool {
        self.inner.is_locked()
    }

    /// The underlying shared lock.
    pub fn as_arc(&self) -> &Arc<Mutex<T>> {
        &self.inner
    }
}

impl<T: ?Sized> Clone for Borrowable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for Borrowable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> fmt::Debug for Borrowable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Borrowable")
            .field("borrowed", &self.is_borrowed())
            .finish()
    }
}

/// Exclusive, scope-limited access to a [`Borrowable`] object.
///
/// The lock is released when the pointer is dropped.
pub struct BorrowedPointer<'a, T: ?Sized> {
    guard: MutexGuard<'a, T>,
}

impl<T: ?Sized> Deref for BorrowedPointer<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: ?Sized> DerefMut for BorrowedPointer<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for BorrowedPointer<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.guard, f)
    }
}
