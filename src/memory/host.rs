//! Host (CPU) memory for the allocator's own bookkeeping.
//!
//! Every internal node an allocator or virtual block creates (suballocation
//! ranges, the free-size index, block records, dedicated-allocation entries,
//! pool records) is allocated through the [`HostAllocator`] given at
//! construction. The default forwards to the global allocator.

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;

use allocator_api2::alloc::{AllocError, Allocator, Global};

use crate::sync::Arc;

/// Shared handle to a host allocator.
///
/// Cheap to clone. Any [`allocator_api2::alloc::Allocator`] that is
/// `Send + Sync` can back it.
#[derive(Clone)]
pub struct HostAllocator(Arc<dyn Allocator + Send + Sync>);

impl HostAllocator {
    pub fn new(allocator: impl Allocator + Send + Sync + 'static) -> Self {
        Self(Arc::new(allocator))
    }
}

impl Default for HostAllocator {
    fn default() -> Self {
        Self::new(Global)
    }
}

impl fmt::Debug for HostAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostAllocator").finish_non_exhaustive()
    }
}

// Safety: Every call forwards to the wrapped allocator, which upholds the
// contract. Clones share that allocator, so memory from one clone may be
// released through another.
unsafe impl Allocator for HostAllocator {
    #[inline]
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.0.allocate(layout)
    }

    #[inline]
    fn allocate_zeroed(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.0.allocate_zeroed(layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // Safety: Caller guarantees `ptr` came from this allocator with `layout`.
        unsafe { self.0.deallocate(ptr, layout) }
    }

    #[inline]
    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        // Safety: Forwarded caller contract.
        unsafe { self.0.grow(ptr, old_layout, new_layout) }
    }

    #[inline]
    unsafe fn shrink(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_layout: Layout,
    ) -> Result<NonNull<[u8]>, AllocError> {
        // Safety: Forwarded caller contract.
        unsafe { self.0.shrink(ptr, old_layout, new_layout) }
    }
}

#[cfg(all(test, not(loom)))]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

    use super::*;

    /// Forwards to the global allocator and tracks what passes through.
    #[derive(Debug, Default)]
    pub(crate) struct CountingAllocator {
        allocations: AtomicUsize,
        live_bytes: AtomicIsize,
    }

    impl CountingAllocator {
        pub(crate) fn allocations(&self) -> usize {
            self.allocations.load(Ordering::Relaxed)
        }

        pub(crate) fn live_bytes(&self) -> isize {
            self.live_bytes.load(Ordering::Relaxed)
        }
    }

    fn signed(bytes: usize) -> isize {
        isize::try_from(bytes).unwrap_or(isize::MAX)
    }

    // Safety: Forwards to `Global`.
    unsafe impl Allocator for CountingAllocator {
        fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
            self.allocations.fetch_add(1, Ordering::Relaxed);
            self.live_bytes.fetch_add(signed(layout.size()), Ordering::Relaxed);
            Global.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            self.live_bytes.fetch_sub(signed(layout.size()), Ordering::Relaxed);
            // Safety: Test code. `ptr` came from `Global` through `allocate`.
            unsafe { Global.deallocate(ptr, layout) }
        }
    }

    /// A [`HostAllocator`] backed by a shared counter the test keeps a handle to.
    pub(crate) fn counting() -> (HostAllocator, std::sync::Arc<CountingAllocator>) {
        let counter = std::sync::Arc::new(CountingAllocator::default());
        (HostAllocator::new(SharedCounter(std::sync::Arc::clone(&counter))), counter)
    }

    struct SharedCounter(std::sync::Arc<CountingAllocator>);

    // Safety: Forwards to the shared `CountingAllocator`.
    unsafe impl Allocator for SharedCounter {
        fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
            self.0.allocate(layout)
        }

        unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
            // Safety: Forwarded caller contract.
            unsafe { self.0.deallocate(ptr, layout) }
        }
    }
}
