#[cfg(not(target_pointer_width = "64"))]
compile_error!("qen-heap supports only 64-bit targets.");

pub(crate) mod sync;

// public module: implementation details stay pub(crate) inside
pub mod memory;

// allocator
pub use memory::allocation::{
    Allocation, AllocationDesc, AllocationFlags, AllocationInfo, AllocationType, ResourceInfo,
};
pub use memory::allocator::{Allocator, AllocatorConfig, DEFAULT_BLOCK_SIZE};
pub use memory::pool::{Pool, PoolDesc};
pub use memory::virtual_block::{
    VirtualAllocation, VirtualAllocationDesc, VirtualAllocationInfo, VirtualBlock, VirtualBlockDesc,
};

// building blocks
pub use memory::block::MemoryBlock;
pub use memory::budget::{Budget, BudgetTracker};
pub use memory::collection::{BlockCollection, NEW_BLOCK_SIZE_SHIFT_MAX};
pub use memory::committed::CommittedAllocationRegistry;
pub use memory::host::HostAllocator;
pub use memory::tracker::{
    AllocationRequest, FreeSpaceTracker, MIN_FREE_SIZE_TO_REGISTER, Suballocation, SuballocationKind,
};
pub use memory::zero_range::ZeroRange;

// device
pub use memory::device::{
    BudgetSnapshot, DeviceHeap, HEAP_ALIGNMENT_DEFAULT, HEAP_ALIGNMENT_MSAA, HEAP_TYPE_COUNT, HeapDesc,
    HeapDevice, HeapFlags, HeapProperties, HeapType, ResourceClass, ResourceHeapTier, SystemHeap,
    SystemHeapDevice,
};

// stats
pub use memory::stats::{StatInfo, Statistics};

// errors
pub use memory::error::{AllocError, AllocResult, DeviceError};
pub use memory::vm::VmError;
