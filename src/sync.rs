// Unified synchronization primitive shim.
//
// Under `cfg(loom)`, re-exports from the `loom` crate. Otherwise, re-exports
// from `std`.
//
// **Every** file in the crate must import sync primitives through this module.
// A single direct `use std::sync::atomic::*` would bypass loom's scheduler and
// silently break exhaustive testing.
#![allow(unused_imports)]

// ---------------------------------------------------------------------------
// atomic
// ---------------------------------------------------------------------------
pub(crate) mod atomic {
    #[cfg(loom)]
    pub(crate) use loom::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};

    #[cfg(not(loom))]
    pub(crate) use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
}

// ---------------------------------------------------------------------------
// sync (Arc, RwLock)
//
// `Arc` stays std under loom: loom's Arc cannot hold `dyn HeapDevice`, and
// the public constructors take std `Arc`s. Reference counts are not what the
// models check; the locks and atomics they guard are.
// ---------------------------------------------------------------------------
pub(crate) use std::sync::Arc;

#[cfg(loom)]
pub(crate) use loom::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[cfg(not(loom))]
pub(crate) use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use std::sync::{PoisonError, TryLockError};

// ---------------------------------------------------------------------------
// ConfigRwLock
//
// The allocator decides at construction time whether its internal locks are
// real. A lock that is "off" still has to be sound behind `&self`, so it keeps
// the RwLock but acquires it with `try_*`: in single-threaded mode a failed
// acquisition means two threads raced on an allocator that promised not to,
// which is a contract violation and panics.
// ---------------------------------------------------------------------------
pub(crate) struct ConfigRwLock<T> {
    inner: RwLock<T>,
    use_lock: bool,
}

impl<T> ConfigRwLock<T> {
    pub(crate) fn new(value: T, use_lock: bool) -> Self {
        Self {
            inner: RwLock::new(value),
            use_lock,
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, T> {
        if self.use_lock {
            return self.inner.read().unwrap_or_else(PoisonError::into_inner);
        }
        match self.inner.try_read() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                panic!("single-threaded allocator state accessed from two threads at once")
            }
        }
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, T> {
        if self.use_lock {
            return self.inner.write().unwrap_or_else(PoisonError::into_inner);
        }
        match self.inner.try_write() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                panic!("single-threaded allocator state accessed from two threads at once")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// thread
// ---------------------------------------------------------------------------
pub(crate) mod thread {
    #[cfg(loom)]
    pub(crate) use loom::thread::spawn;

    #[cfg(not(loom))]
    pub(crate) use std::thread::spawn;
}

// ---------------------------------------------------------------------------
// Barrier: loom does not provide Barrier; we shim an atomic countdown.
// Standard tests keep std::sync::Barrier.
// ---------------------------------------------------------------------------
pub(crate) mod barrier {
    #[cfg(not(loom))]
    pub(crate) use std::sync::Barrier;

    /// Under loom, Barrier is not available. Minimal spin-barrier built on
    /// loom atomics so tests compile unmodified.
    #[cfg(loom)]
    #[allow(dead_code)]
    pub(crate) struct Barrier {
        total: usize,
        count: super::atomic::AtomicUsize,
    }

    #[cfg(loom)]
    #[allow(dead_code)]
    impl Barrier {
        pub(crate) fn new(n: usize) -> Self {
            Self {
                total: n,
                count: super::atomic::AtomicUsize::new(0),
            }
        }

        pub(crate) fn wait(&self) {
            use super::atomic::Ordering;
            let arrived = self.count.fetch_add(1, Ordering::AcqRel) + 1;
            if arrived < self.total {
                while self.count.load(Ordering::Acquire) < self.total {
                    loom::thread::yield_now();
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// OnceLock
//
// Only the real platform VM layer caches page sizes in statics; the loom/miri
// mock returns constants, so no loom shim is needed.
// ---------------------------------------------------------------------------
#[cfg(not(any(loom, miri)))]
pub(crate) use std::sync::OnceLock;
