use core::{
    cell::UnsafeCell,
    fmt,
    hint::spin_loop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// A named test-and-test-and-set spin lock.
///
/// Critical sections guarded by a `SpinLock` must be short and must never
/// block: waiters burn CPU until the holder drops its [`SpinLockGuard`].
///
/// The lock carries a static name for diagnostics and counts how many
/// acquisitions found it already held, which is a cheap way to see which
/// lock domain is hot.
pub struct SpinLock<T> {
    name: &'static str,
    /// lock state
    /// * `false`: unlocked
    /// * `true`: locked
    locked: AtomicBool,
    /// Number of `lock()` calls that had to spin.
    contended: AtomicUsize,
    inner: UnsafeCell<T>,
}

// Safety: mutual exclusion; only T: Send may cross threads.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(name: &'static str, inner: T) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            contended: AtomicUsize::new(0),
            inner: UnsafeCell::new(inner),
        }
    }

    /// The name given at construction.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Snapshot of the lock state. Only meaningful for diagnostics.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// How many acquisitions found the lock held and had to spin.
    #[inline]
    #[must_use]
    pub fn contention_count(&self) -> usize {
        self.contended.load(Ordering::Relaxed)
    }

    /// Try once; returns immediately.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Spin until acquired (TATAS), then return a guard.
    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        if let Some(guard) = self.try_lock() {
            return guard;
        }

        self.contended.fetch_add(1, Ordering::Relaxed);
        loop {
            // Spin on a plain load until the holder lets go, then race for it.
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }
            if let Some(guard) = self.try_lock() {
                return guard;
            }
        }
    }

    /// Closure convenience, built on the guard.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Consumes the lock and returns the protected value.
    #[inline]
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .field("contended", &self.contention_count())
            .finish_non_exhaustive()
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLockGuard<'_, T> {
    /// Name of the lock this guard holds.
    #[inline]
    #[must_use]
    pub const fn lock_name(&self) -> &'static str {
        self.lock.name
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release publishes the critical section.
        self.lock.locked.store(false, Ordering::Release);
    }
}
