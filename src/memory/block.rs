use std::fmt;

use crate::memory::device::{DeviceHeap, HeapProperties};
use crate::memory::host::HostAllocator;
use crate::memory::tracker::FreeSpaceTracker;
use crate::sync::Arc;

/// One device heap that placed allocations are carved out of.
///
/// Immutable once created and shared through an `Arc` by the owning
/// collection and every allocation placed in it. The heap is destroyed when
/// the last reference goes away.
pub struct MemoryBlock {
    id: u32,
    size: u64,
    properties: HeapProperties,
    heap: Box<dyn DeviceHeap>,
}

impl MemoryBlock {
    pub(crate) fn new(id: u32, size: u64, properties: HeapProperties, heap: Box<dyn DeviceHeap>) -> Self {
        Self {
            id,
            size,
            properties,
            heap,
        }
    }

    /// Unique within the owning collection.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn properties(&self) -> HeapProperties {
        self.properties
    }

    #[inline]
    pub fn heap(&self) -> &dyn DeviceHeap {
        self.heap.as_ref()
    }
}

impl fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// A block together with its free-space bookkeeping. Lives inside the
/// collection's lock; only the `block` half escapes to allocations.
#[derive(Debug)]
pub(crate) struct BlockEntry {
    pub(crate) block: Arc<MemoryBlock>,
    pub(crate) tracker: FreeSpaceTracker<HostAllocator>,
}

impl BlockEntry {
    pub(crate) fn new(block: MemoryBlock, margin: u64, host: HostAllocator) -> Self {
        let tracker = FreeSpaceTracker::new_in(block.size(), margin, host);
        Self {
            block: Arc::new(block),
            tracker,
        }
    }
}

impl Drop for BlockEntry {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert!(
                self.tracker.is_empty(),
                "memory block {} destroyed with {} live allocations",
                self.block.id(),
                self.tracker.allocation_count()
            );
        }
    }
}
