//! The host graphics API seen by the allocator: heap creation, budget queries
//! and heap-tier capability.
//!
//! Heaps are owned handles. Dropping a [`DeviceHeap`] destroys the heap.

use std::any::Any;
use std::fmt;
use std::ptr::NonNull;

use bitflags::bitflags;

use crate::memory::error::DeviceError;
use crate::memory::stats::Counter;
use crate::memory::vm::{PlatformVmOps, VmOps, page_rounded_len};
use crate::sync::Arc;

/// Number of budget/statistics categories, one per [`HeapType`].
pub const HEAP_TYPE_COUNT: usize = 4;

/// Placement alignment of heaps that may hold MSAA textures.
pub const HEAP_ALIGNMENT_MSAA: u64 = 4 * 1024 * 1024;
/// Placement alignment of every other heap.
pub const HEAP_ALIGNMENT_DEFAULT: u64 = 64 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// Device-local memory.
    #[default]
    Default,
    /// CPU-writable memory for uploads.
    Upload,
    /// CPU-readable memory for readbacks.
    Readback,
    /// Application-described memory. Only reachable through an explicit pool.
    Custom,
}

impl HeapType {
    pub const ALL: [HeapType; HEAP_TYPE_COUNT] =
        [HeapType::Default, HeapType::Upload, HeapType::Readback, HeapType::Custom];

    /// The three heap types the allocator keeps default pools for.
    pub const STANDARD: [HeapType; 3] = [HeapType::Default, HeapType::Upload, HeapType::Readback];

    /// Budget and statistics slot of this heap type.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            HeapType::Default => 0,
            HeapType::Upload => 1,
            HeapType::Readback => 2,
            HeapType::Custom => 3,
        }
    }

    #[inline]
    pub const fn is_standard(self) -> bool {
        !matches!(self, HeapType::Custom)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HeapFlags: u32 {
        const SHARED = 1 << 0;
        const DENY_BUFFERS = 1 << 2;
        const DENY_RT_DS_TEXTURES = 1 << 6;
        const DENY_NON_RT_DS_TEXTURES = 1 << 7;
    }
}

/// Resource class a heap may be restricted to under resource heap tier 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Buffer,
    /// Textures that are neither render targets nor depth-stencil.
    Texture,
    RenderTargetOrDepthStencil,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 3] = [
        ResourceClass::Buffer,
        ResourceClass::Texture,
        ResourceClass::RenderTargetOrDepthStencil,
    ];

    /// Deny flags that leave only this class allowed.
    pub const fn exclusive_heap_flags(self) -> HeapFlags {
        match self {
            ResourceClass::Buffer => {
                HeapFlags::DENY_RT_DS_TEXTURES.union(HeapFlags::DENY_NON_RT_DS_TEXTURES)
            }
            ResourceClass::Texture => HeapFlags::DENY_BUFFERS.union(HeapFlags::DENY_RT_DS_TEXTURES),
            ResourceClass::RenderTargetOrDepthStencil => {
                HeapFlags::DENY_BUFFERS.union(HeapFlags::DENY_NON_RT_DS_TEXTURES)
            }
        }
    }

    /// The single class `flags` still allows, if exactly one remains.
    pub fn from_heap_flags(flags: HeapFlags) -> Option<Self> {
        let allowed: Vec<_> = Self::ALL
            .into_iter()
            .filter(|class| !flags.contains(class.deny_flag()))
            .collect();
        match allowed.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    const fn deny_flag(self) -> HeapFlags {
        match self {
            ResourceClass::Buffer => HeapFlags::DENY_BUFFERS,
            ResourceClass::Texture => HeapFlags::DENY_NON_RT_DS_TEXTURES,
            ResourceClass::RenderTargetOrDepthStencil => HeapFlags::DENY_RT_DS_TEXTURES,
        }
    }
}

/// Whether one heap may mix resource classes (tier 2) or not (tier 1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResourceHeapTier {
    Tier1,
    #[default]
    Tier2,
}

/// What a heap is made of, shared by every heap in a block collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct HeapProperties {
    pub heap_type: HeapType,
    pub heap_flags: HeapFlags,
}

impl HeapProperties {
    pub const fn new(heap_type: HeapType, heap_flags: HeapFlags) -> Self {
        Self { heap_type, heap_flags }
    }

    /// 4 MiB unless the heap can never hold render targets or depth-stencil
    /// textures (the only MSAA-capable resources).
    pub fn placement_alignment(&self) -> u64 {
        if self.heap_flags.contains(HeapFlags::DENY_RT_DS_TEXTURES) {
            HEAP_ALIGNMENT_DEFAULT
        } else {
            HEAP_ALIGNMENT_MSAA
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapDesc {
    pub size: u64,
    pub properties: HeapProperties,
    pub alignment: u64,
}

/// Device-reported usage and budget for one heap type, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BudgetSnapshot {
    pub usage: u64,
    pub budget: u64,
}

impl Default for BudgetSnapshot {
    fn default() -> Self {
        Self {
            usage: 0,
            budget: u64::MAX,
        }
    }
}

/// A heap created by a [`HeapDevice`]. Dropping it destroys the heap.
pub trait DeviceHeap: Send + Sync + fmt::Debug {
    fn size(&self) -> u64;

    /// Access to the concrete handle type.
    fn as_any(&self) -> &dyn Any;
}

/// The host graphics API capability the allocator is built on.
pub trait HeapDevice: Send + Sync {
    /// Creates a heap for a memory block or a standalone allocation.
    ///
    /// # Errors
    /// Any device failure. The allocator reports it as
    /// [`AllocError::HostAllocationFailed`](crate::AllocError::HostAllocationFailed).
    fn create_heap(&self, desc: &HeapDesc) -> Result<Box<dyn DeviceHeap>, DeviceError>;

    /// Creates the implicit heap behind a committed resource.
    ///
    /// # Errors
    /// Same as [`create_heap`](Self::create_heap).
    fn create_committed_heap(&self, desc: &HeapDesc) -> Result<Box<dyn DeviceHeap>, DeviceError> {
        self.create_heap(desc)
    }

    /// Current process usage and budget for `heap_type`.
    ///
    /// # Errors
    /// Devices that cannot report a budget return an error; the allocator
    /// then keeps its previous snapshot.
    fn query_budget(&self, heap_type: HeapType) -> Result<BudgetSnapshot, DeviceError>;

    fn resource_heap_tier(&self) -> ResourceHeapTier {
        ResourceHeapTier::Tier2
    }
}

// ---------------------------------------------------------------------------
// SystemHeapDevice
// ---------------------------------------------------------------------------

/// Device whose heaps are zero-filled host memory mappings.
///
/// Useful for CPU-side resource staging, tooling and tests. Per-heap-type
/// limits are reported as the budget and, with
/// [`with_hard_limit`](Self::with_hard_limit), enforced on heap creation.
#[derive(Debug)]
pub struct SystemHeapDevice {
    tier: ResourceHeapTier,
    limits: [u64; HEAP_TYPE_COUNT],
    hard_limit: bool,
    usage: Arc<[Counter; HEAP_TYPE_COUNT]>,
}

impl Default for SystemHeapDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemHeapDevice {
    pub fn new() -> Self {
        Self {
            tier: ResourceHeapTier::Tier2,
            limits: [u64::MAX; HEAP_TYPE_COUNT],
            hard_limit: false,
            usage: Arc::new([Counter::new(), Counter::new(), Counter::new(), Counter::new()]),
        }
    }

    #[must_use]
    pub fn with_tier(mut self, tier: ResourceHeapTier) -> Self {
        self.tier = tier;
        self
    }

    /// Reports `bytes` as the budget of `heap_type`.
    #[must_use]
    pub fn with_budget(mut self, heap_type: HeapType, bytes: u64) -> Self {
        self.limits[heap_type.index()] = bytes;
        self
    }

    /// Refuse heap creation that would exceed the budget.
    #[must_use]
    pub fn with_hard_limit(mut self, hard_limit: bool) -> Self {
        self.hard_limit = hard_limit;
        self
    }

    /// Bytes currently mapped for `heap_type`.
    pub fn usage(&self, heap_type: HeapType) -> u64 {
        self.usage[heap_type.index()].get()
    }

    fn map(&self, desc: &HeapDesc) -> Result<Box<dyn DeviceHeap>, DeviceError> {
        if desc.size == 0 {
            return Err(DeviceError::Unsupported("zero-size heap".into()));
        }
        let slot = desc.properties.heap_type.index();
        let len = page_rounded_len(desc.size)?;
        // usize -> u64 is lossless on the 64-bit targets this crate supports.
        let mapped = len as u64;
        if self.hard_limit && self.usage[slot].get().saturating_add(mapped) > self.limits[slot] {
            return Err(DeviceError::OutOfDeviceMemory);
        }
        let ptr = PlatformVmOps::map_zeroed(len)?;
        self.usage[slot].add(mapped);
        Ok(Box::new(SystemHeap {
            ptr,
            len,
            size: desc.size,
            properties: desc.properties,
            usage: Arc::clone(&self.usage),
        }))
    }
}

impl HeapDevice for SystemHeapDevice {
    fn create_heap(&self, desc: &HeapDesc) -> Result<Box<dyn DeviceHeap>, DeviceError> {
        self.map(desc)
    }

    fn query_budget(&self, heap_type: HeapType) -> Result<BudgetSnapshot, DeviceError> {
        Ok(BudgetSnapshot {
            usage: self.usage(heap_type),
            budget: self.limits[heap_type.index()],
        })
    }

    fn resource_heap_tier(&self) -> ResourceHeapTier {
        self.tier
    }
}

/// A heap created by [`SystemHeapDevice`].
pub struct SystemHeap {
    ptr: NonNull<u8>,
    len: usize,
    size: u64,
    properties: HeapProperties,
    usage: Arc<[Counter; HEAP_TYPE_COUNT]>,
}

// Safety: the mapping is owned exclusively by this handle; the allocator hands
// out disjoint ranges of it and never dereferences the pointer itself.
unsafe impl Send for SystemHeap {}
// Safety: see above. `&SystemHeap` only exposes the base address.
unsafe impl Sync for SystemHeap {}

impl SystemHeap {
    /// Base address of the mapping. Valid until the heap is dropped.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn properties(&self) -> HeapProperties {
        self.properties
    }
}

impl fmt::Debug for SystemHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemHeap")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .field("heap_type", &self.properties.heap_type)
            .finish_non_exhaustive()
    }
}

impl DeviceHeap for SystemHeap {
    fn size(&self) -> u64 {
        self.size
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for SystemHeap {
    fn drop(&mut self) {
        // Safety: ptr/len describe the mapping created in `map`, released once.
        if let Err(e) = unsafe { PlatformVmOps::release(self.ptr, self.len) } {
            tracing::error!(error = %e, size = self.size, "failed to release system heap");
        }
        self.usage[self.properties.heap_type.index()].sub(self.len as u64);
    }
}
