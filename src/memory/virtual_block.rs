//! Sub-allocation over an abstract range with no heap behind it.
//!
//! A `VirtualBlock` runs the same free-space algorithm as a memory block, for
//! callers carving up a buffer they own themselves.

use crate::memory::error::{AllocError, AllocResult, invalid_arg};
use crate::memory::host::HostAllocator;
use crate::memory::stats::StatInfo;
use crate::memory::tracker::FreeSpaceTracker;
use crate::sync::ConfigRwLock;

#[derive(Clone, Debug, Default)]
pub struct VirtualBlockDesc {
    /// Total size of the range. Must be non-zero.
    pub size: u64,
    /// Concurrent use panics instead of blocking. Default: `false`.
    pub single_threaded: bool,
    /// Guard bytes kept free around every allocation. Default: 0.
    pub debug_margin: u64,
    /// Backs the range bookkeeping. Default: the global allocator.
    pub host_allocator: HostAllocator,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VirtualAllocationDesc {
    pub size: u64,
    /// Power of two. Default: 1.
    pub alignment: u64,
    pub user_data: u64,
}

impl Default for VirtualAllocationDesc {
    fn default() -> Self {
        Self {
            size: 0,
            alignment: 1,
            user_data: 0,
        }
    }
}

/// Handle to a live range of a [`VirtualBlock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VirtualAllocation {
    pub offset: u64,
    /// The range was never handed out before.
    pub zero_initialized: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VirtualAllocationInfo {
    pub offset: u64,
    pub size: u64,
    pub user_data: u64,
}

pub struct VirtualBlock {
    tracker: ConfigRwLock<FreeSpaceTracker<HostAllocator>>,
}

impl VirtualBlock {
    /// # Errors
    /// [`AllocError::InvalidArgument`] if `desc.size` is 0.
    pub fn new(desc: &VirtualBlockDesc) -> AllocResult<Self> {
        if desc.size == 0 {
            return Err(invalid_arg!("virtual block size must be non-zero"));
        }
        let tracker = FreeSpaceTracker::new_in(desc.size, desc.debug_margin, desc.host_allocator.clone());
        Ok(Self {
            tracker: ConfigRwLock::new(tracker, !desc.single_threaded),
        })
    }

    /// # Errors
    /// - [`AllocError::InvalidArgument`] for a zero size or a non-power-of-two
    ///   alignment.
    /// - [`AllocError::OutOfMemory`] if no free range fits.
    pub fn allocate(&self, desc: &VirtualAllocationDesc) -> AllocResult<VirtualAllocation> {
        if desc.size == 0 {
            return Err(invalid_arg!("allocation size must be non-zero"));
        }
        if !desc.alignment.is_power_of_two() {
            return Err(invalid_arg!("alignment {} is not a power of two", desc.alignment));
        }
        let mut tracker = self.tracker.write();
        let request = tracker.search(desc.size, desc.alignment).ok_or(AllocError::OutOfMemory)?;
        tracker.commit(&request, desc.size, desc.user_data);
        Ok(VirtualAllocation {
            offset: request.offset,
            zero_initialized: request.zero_initialized,
        })
    }

    /// # Panics
    /// In debug builds, if `allocation` is not live in this block.
    pub fn free(&self, allocation: VirtualAllocation) {
        self.tracker.write().release(allocation.offset);
    }

    /// Frees every allocation at once. Outstanding handles become invalid.
    pub fn clear(&self) {
        self.tracker.write().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.read().is_empty()
    }

    pub fn size(&self) -> u64 {
        self.tracker.read().size()
    }

    pub fn sum_free_size(&self) -> u64 {
        self.tracker.read().sum_free_size()
    }

    /// `None` if `allocation` is not live in this block.
    pub fn info(&self, allocation: VirtualAllocation) -> Option<VirtualAllocationInfo> {
        self.tracker
            .read()
            .get(allocation.offset)
            .filter(|sub| !sub.is_free())
            .map(|sub| VirtualAllocationInfo {
                offset: sub.offset,
                size: sub.size,
                user_data: sub.user_data,
            })
    }

    /// Returns `false` if `allocation` is not live in this block.
    pub fn set_user_data(&self, allocation: VirtualAllocation, user_data: u64) -> bool {
        self.tracker.write().set_user_data(allocation.offset, user_data)
    }

    pub fn statistics(&self) -> StatInfo {
        let mut info = self.tracker.read().calc_stat_info();
        info.post_process();
        info
    }

    /// # Errors
    /// Returns the first violated tracker invariant.
    pub fn validate(&self) -> Result<(), &'static str> {
        self.tracker.read().validate()
    }
}

impl Drop for VirtualBlock {
    fn drop(&mut self) {
        let live = self.tracker.read().allocation_count();
        if live > 0 {
            tracing::warn!(live, "virtual block dropped with live allocations");
        }
    }
}
