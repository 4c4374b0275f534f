use std::fmt;

use bitflags::bitflags;

use crate::memory::block::MemoryBlock;
use crate::memory::budget::BudgetTracker;
use crate::memory::collection::BlockCollection;
use crate::memory::committed::{CommittedAllocationRegistry, RegistryKey};
use crate::memory::device::{DeviceHeap, HeapFlags, HeapType, ResourceClass};
use crate::memory::pool::Pool;
use crate::sync::Arc;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AllocationFlags: u32 {
        /// Always give the allocation its own heap.
        const COMMITTED = 1 << 0;
        /// Only place into existing blocks; never create a heap.
        const NEVER_ALLOCATE = 1 << 1;
        /// Fail instead of creating heaps past the heap type's budget.
        const WITHIN_BUDGET = 1 << 2;
    }
}

/// Parameters shared by every allocation request.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllocationDesc<'a> {
    pub flags: AllocationFlags,
    /// Ignored when `pool` is set.
    pub heap_type: HeapType,
    /// For memory-only requests on resource heap tier 1: the deny flags that
    /// select a resource class. Ignored when `pool` is set.
    pub heap_flags: HeapFlags,
    pub pool: Option<&'a Pool>,
    /// Opaque caller tag.
    pub user_data: u64,
}

/// Size and alignment of a memory-only request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationInfo {
    pub size: u64,
    pub alignment: u64,
}

/// Size, alignment and class of a resource to allocate memory for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceInfo {
    pub class: ResourceClass,
    pub size: u64,
    pub alignment: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationType {
    /// Dedicated implicit heap behind a committed resource.
    Committed,
    /// A range inside a shared memory block.
    Placed,
    /// Dedicated heap for a memory-only request.
    StandaloneHeap,
}

pub(crate) struct Dedicated {
    pub(crate) registry: Arc<CommittedAllocationRegistry>,
    pub(crate) key: Option<RegistryKey>,
    pub(crate) heap: Box<dyn DeviceHeap>,
}

pub(crate) struct Placed {
    pub(crate) collection: Arc<BlockCollection>,
    pub(crate) block: Arc<MemoryBlock>,
    pub(crate) offset: u64,
}

pub(crate) enum AllocationKind {
    Committed(Dedicated),
    Placed(Placed),
    StandaloneHeap(Dedicated),
}

/// An allocation handed out by the [`Allocator`](crate::Allocator).
///
/// Dropping it releases the memory: placed ranges return to their block,
/// dedicated heaps are destroyed.
pub struct Allocation {
    kind: AllocationKind,
    size: u64,
    alignment: u64,
    heap_type: HeapType,
    creation_frame_index: u32,
    zero_initialized: bool,
    user_data: u64,
    name: Option<String>,
    budget: Arc<BudgetTracker>,
}

pub(crate) struct AllocationParts {
    pub(crate) kind: AllocationKind,
    pub(crate) size: u64,
    pub(crate) alignment: u64,
    pub(crate) heap_type: HeapType,
    pub(crate) creation_frame_index: u32,
    pub(crate) zero_initialized: bool,
    pub(crate) user_data: u64,
}

impl Allocation {
    /// Wraps already-accounted memory. The caller has added `size` to the
    /// budget's allocation bytes (and block bytes for dedicated kinds).
    pub(crate) fn new(parts: AllocationParts, budget: Arc<BudgetTracker>) -> Self {
        Self {
            kind: parts.kind,
            size: parts.size,
            alignment: parts.alignment,
            heap_type: parts.heap_type,
            creation_frame_index: parts.creation_frame_index,
            zero_initialized: parts.zero_initialized,
            user_data: parts.user_data,
            name: None,
            budget,
        }
    }

    pub fn allocation_type(&self) -> AllocationType {
        match self.kind {
            AllocationKind::Committed(_) => AllocationType::Committed,
            AllocationKind::Placed(_) => AllocationType::Placed,
            AllocationKind::StandaloneHeap(_) => AllocationType::StandaloneHeap,
        }
    }

    /// Offset within [`heap`](Self::heap). Always 0 for dedicated heaps.
    pub fn offset(&self) -> u64 {
        match &self.kind {
            AllocationKind::Placed(p) => p.offset,
            AllocationKind::Committed(_) | AllocationKind::StandaloneHeap(_) => 0,
        }
    }

    /// The heap this allocation lives in.
    pub fn heap(&self) -> &dyn DeviceHeap {
        match &self.kind {
            AllocationKind::Placed(p) => p.block.heap(),
            AllocationKind::Committed(d) | AllocationKind::StandaloneHeap(d) => d.heap.as_ref(),
        }
    }

    /// Id of the memory block for placed allocations.
    pub fn block_id(&self) -> Option<u32> {
        match &self.kind {
            AllocationKind::Placed(p) => Some(p.block.id()),
            AllocationKind::Committed(_) | AllocationKind::StandaloneHeap(_) => None,
        }
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    #[inline]
    pub fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    #[inline]
    pub fn creation_frame_index(&self) -> u32 {
        self.creation_frame_index
    }

    /// The memory was never handed out before, so it still reads as zero.
    #[inline]
    pub fn was_zero_initialized(&self) -> bool {
        self.zero_initialized
    }

    #[inline]
    pub fn user_data(&self) -> u64 {
        self.user_data
    }

    pub fn set_user_data(&mut self, user_data: u64) {
        if let AllocationKind::Placed(p) = &self.kind {
            p.collection.set_user_data(&p.block, p.offset, user_data);
        }
        self.user_data = user_data;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("type", &self.allocation_type())
            .field("heap_type", &self.heap_type)
            .field("block_id", &self.block_id())
            .field("offset", &self.offset())
            .field("size", &self.size)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        match &mut self.kind {
            AllocationKind::Placed(p) => p.collection.free(&p.block, p.offset),
            AllocationKind::Committed(d) | AllocationKind::StandaloneHeap(d) => {
                if let Some(key) = d.key.take() {
                    d.registry.unregister(key);
                }
                self.budget.remove_block(self.heap_type, self.size);
            }
        }
        self.budget.remove_allocation(self.heap_type, self.size);
        tracing::trace!(
            allocation_type = ?self.allocation_type(),
            size = self.size,
            name = self.name.as_deref(),
            "released allocation"
        );
    }
}
