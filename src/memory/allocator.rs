//! The allocation orchestrator: routes each request to a pool and decides
//! between a placed range and a dedicated heap.

use crate::memory::allocation::{
    Allocation, AllocationDesc, AllocationFlags, AllocationInfo, AllocationKind, AllocationParts,
    Dedicated, Placed, ResourceInfo,
};
use crate::memory::budget::{Budget, BudgetTracker};
use crate::memory::committed::CommittedEntry;
use crate::memory::device::{HeapDesc, HeapDevice, HeapType, ResourceClass, ResourceHeapTier};
use crate::memory::error::{AllocError, AllocResult, invalid_arg};
use crate::memory::host::HostAllocator;
use crate::memory::pool::{Pool, PoolDesc, PoolEnv, PoolRegistry};
use crate::memory::stats::Statistics;
use crate::sync::atomic::{AtomicU32, Ordering};
use crate::sync::Arc;

/// Block size used when [`AllocatorConfig::preferred_block_size`] is 0.
pub const DEFAULT_BLOCK_SIZE: u64 = 256 * 1024 * 1024;

/// Allocator-wide settings, fixed at construction.
#[derive(Clone, Debug)]
pub struct AllocatorConfig {
    /// Size of blocks in default pools. 0 selects [`DEFAULT_BLOCK_SIZE`].
    /// Default: 0.
    pub preferred_block_size: u64,
    /// Promise that the allocator is only ever used from one thread at a
    /// time, so its internal locks are never contended. Concurrent use
    /// panics. Default: `false`.
    pub single_threaded: bool,
    /// Give every allocation its own heap. Default: `false`.
    pub always_committed: bool,
    /// Guard bytes kept free before and after every placed allocation.
    /// Default: 0.
    pub debug_margin: u64,
    /// Minimum alignment applied to every request. Must be a power of two.
    /// Default: 1.
    pub debug_alignment: u64,
    /// Allocation operations between device budget queries. Default: 30.
    pub budget_refresh_interval: u32,
    /// Source of host memory for block records, free-range nodes and other
    /// bookkeeping. Default: the global allocator.
    pub host_allocator: HostAllocator,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            preferred_block_size: 0,
            single_threaded: false,
            always_committed: false,
            debug_margin: 0,
            debug_alignment: 1,
            budget_refresh_interval: 30,
            host_allocator: HostAllocator::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DedicatedKind {
    Committed,
    StandaloneHeap,
}

pub struct Allocator {
    device: Arc<dyn HeapDevice>,
    config: AllocatorConfig,
    tier: ResourceHeapTier,
    env: PoolEnv,
    budget: Arc<BudgetTracker>,
    default_pools: Vec<Pool>,
    custom_pools: Arc<PoolRegistry>,
    current_frame_index: AtomicU32,
}

impl Allocator {
    /// # Errors
    /// [`AllocError::InvalidArgument`] if `debug_alignment` is not a power of two.
    pub fn new(device: Arc<dyn HeapDevice>, mut config: AllocatorConfig) -> AllocResult<Self> {
        if !config.debug_alignment.is_power_of_two() {
            return Err(invalid_arg!(
                "debug_alignment {} is not a power of two",
                config.debug_alignment
            ));
        }
        if config.preferred_block_size == 0 {
            config.preferred_block_size = DEFAULT_BLOCK_SIZE;
        }
        let use_lock = !config.single_threaded;
        let tier = device.resource_heap_tier();
        let budget = Arc::new(BudgetTracker::new(
            Arc::clone(&device),
            config.budget_refresh_interval,
            use_lock,
        ));
        let env = PoolEnv {
            preferred_block_size: config.preferred_block_size,
            margin: config.debug_margin,
            use_lock,
            host: config.host_allocator.clone(),
        };

        let default_descs: Vec<PoolDesc> = match tier {
            ResourceHeapTier::Tier2 => HeapType::STANDARD
                .into_iter()
                .map(|heap_type| PoolDesc {
                    heap_type,
                    ..PoolDesc::default()
                })
                .collect(),
            ResourceHeapTier::Tier1 => HeapType::STANDARD
                .into_iter()
                .flat_map(|heap_type| {
                    ResourceClass::ALL.into_iter().map(move |class| PoolDesc {
                        heap_type,
                        heap_flags: class.exclusive_heap_flags(),
                        ..PoolDesc::default()
                    })
                })
                .collect(),
        };
        let default_pools = default_descs
            .into_iter()
            .map(|desc| Pool::new(desc, &env, Arc::clone(&device), Arc::clone(&budget)))
            .collect::<AllocResult<Vec<_>>>()?;

        tracing::debug!(
            ?tier,
            default_pools = default_pools.len(),
            preferred_block_size = config.preferred_block_size,
            single_threaded = config.single_threaded,
            "created allocator"
        );

        let custom_pools = Arc::new(PoolRegistry::new(use_lock, env.host.clone()));
        Ok(Self {
            device,
            config,
            tier,
            env,
            budget,
            default_pools,
            custom_pools,
            current_frame_index: AtomicU32::new(0),
        })
    }

    #[inline]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    #[inline]
    pub fn resource_heap_tier(&self) -> ResourceHeapTier {
        self.tier
    }

    /// 3 on resource heap tier 2, 9 on tier 1.
    #[inline]
    pub fn default_pool_count(&self) -> usize {
        self.default_pools.len()
    }

    pub fn set_current_frame_index(&self, frame_index: u32) {
        self.current_frame_index.store(frame_index, Ordering::Relaxed);
    }

    pub fn current_frame_index(&self) -> u32 {
        self.current_frame_index.load(Ordering::Relaxed)
    }

    /// Creates a custom pool. It stays part of [`statistics`](Self::statistics)
    /// until dropped.
    ///
    /// # Errors
    /// - [`AllocError::InvalidArgument`] for an inconsistent descriptor.
    /// - [`AllocError::HostAllocationFailed`] if a minimum block cannot be created.
    pub fn create_pool(&self, desc: &PoolDesc) -> AllocResult<Pool> {
        let mut pool = Pool::new(*desc, &self.env, Arc::clone(&self.device), Arc::clone(&self.budget))?;
        pool.register_in(&self.custom_pools);
        tracing::debug!(
            heap_type = ?desc.heap_type,
            block_size = desc.block_size,
            min_block_count = desc.min_block_count,
            max_block_count = desc.max_block_count,
            "created pool"
        );
        Ok(pool)
    }

    /// Allocates heap memory. When a dedicated heap is needed, the result is
    /// a [`StandaloneHeap`](crate::AllocationType::StandaloneHeap) allocation.
    ///
    /// On resource heap tier 1 without a pool, `desc.heap_flags` must leave
    /// exactly one resource class allowed.
    ///
    /// # Errors
    /// - [`AllocError::InvalidArgument`] for a zero size, a non-power-of-two
    ///   alignment, conflicting flags or an unresolvable pool.
    /// - [`AllocError::OutOfMemory`] if nothing fits and no heap may be created.
    /// - [`AllocError::HostAllocationFailed`] if the device refuses a heap.
    pub fn allocate_memory(&self, desc: &AllocationDesc<'_>, info: &AllocationInfo) -> AllocResult<Allocation> {
        let class = match (desc.pool, self.tier) {
            (None, ResourceHeapTier::Tier1) => Some(ResourceClass::from_heap_flags(desc.heap_flags).ok_or_else(|| {
                invalid_arg!(
                    "heap flags {:?} must select exactly one resource class on resource heap tier 1",
                    desc.heap_flags
                )
            })?),
            _ => None,
        };
        self.allocate(desc, info.size, info.alignment, class, DedicatedKind::StandaloneHeap)
    }

    /// Allocates memory for a resource. When a dedicated heap is needed, the
    /// result is a [`Committed`](crate::AllocationType::Committed) allocation.
    ///
    /// # Errors
    /// Same as [`allocate_memory`](Self::allocate_memory).
    pub fn allocate_resource(&self, desc: &AllocationDesc<'_>, info: &ResourceInfo) -> AllocResult<Allocation> {
        self.allocate(desc, info.size, info.alignment, Some(info.class), DedicatedKind::Committed)
    }

    fn default_pool(&self, heap_type: HeapType, class: Option<ResourceClass>) -> AllocResult<&Pool> {
        if !heap_type.is_standard() {
            return Err(invalid_arg!("heap type {heap_type:?} requires an explicit pool"));
        }
        let idx = match self.tier {
            ResourceHeapTier::Tier2 => heap_type.index(),
            ResourceHeapTier::Tier1 => {
                let class = class.ok_or_else(|| invalid_arg!("resource class required on resource heap tier 1"))?;
                let class_idx = ResourceClass::ALL
                    .iter()
                    .position(|&c| c == class)
                    .unwrap_or_default();
                heap_type.index() * ResourceClass::ALL.len() + class_idx
            }
        };
        self.default_pools
            .get(idx)
            .ok_or_else(|| invalid_arg!("no default pool for {heap_type:?}"))
    }

    fn allocate(
        &self,
        desc: &AllocationDesc<'_>,
        size: u64,
        alignment: u64,
        class: Option<ResourceClass>,
        dedicated: DedicatedKind,
    ) -> AllocResult<Allocation> {
        if size == 0 {
            return Err(invalid_arg!("allocation size must be non-zero"));
        }
        if !alignment.is_power_of_two() {
            return Err(invalid_arg!("alignment {alignment} is not a power of two"));
        }
        let flags = desc.flags;
        if flags.contains(AllocationFlags::COMMITTED | AllocationFlags::NEVER_ALLOCATE) {
            return Err(invalid_arg!("COMMITTED and NEVER_ALLOCATE are mutually exclusive"));
        }
        let alignment = alignment.max(self.config.debug_alignment);
        let pool = match desc.pool {
            Some(pool) => pool,
            None => self.default_pool(desc.heap_type, class)?,
        };

        let collection = pool.collection();
        let committed_allowed = !flags.contains(AllocationFlags::NEVER_ALLOCATE);
        let must_commit = self.config.always_committed || flags.contains(AllocationFlags::COMMITTED);
        let prefer_committed = must_commit
            || (!collection.has_explicit_block_size() && size > collection.preferred_block_size() / 2);

        let mut tried_committed = false;
        if committed_allowed && prefer_committed {
            match self.allocate_dedicated(pool, desc, size, alignment, dedicated) {
                Ok(allocation) => return Ok(allocation),
                Err(e) if must_commit => return Err(e),
                Err(e) => {
                    tracing::trace!(error = %e, size, "dedicated heap failed, trying placement");
                    tried_committed = true;
                }
            }
        }

        match self.allocate_placed(pool, desc, size, alignment) {
            Ok(allocation) => Ok(allocation),
            Err(e) if !committed_allowed || tried_committed => Err(e),
            Err(_) => self.allocate_dedicated(pool, desc, size, alignment, dedicated),
        }
    }

    fn allocate_placed(&self, pool: &Pool, desc: &AllocationDesc<'_>, size: u64, alignment: u64) -> AllocResult<Allocation> {
        let collection = pool.collection();
        let placed = collection.allocate(size, alignment, desc.flags, desc.user_data)?;
        let heap_type = pool.heap_type();
        self.budget.add_allocation(heap_type, size);
        Ok(Allocation::new(
            AllocationParts {
                kind: AllocationKind::Placed(Placed {
                    collection: Arc::clone(collection),
                    block: placed.block,
                    offset: placed.offset,
                }),
                size,
                alignment,
                heap_type,
                creation_frame_index: self.current_frame_index(),
                zero_initialized: placed.zero_initialized,
                user_data: desc.user_data,
            },
            Arc::clone(&self.budget),
        ))
    }

    fn allocate_dedicated(
        &self,
        pool: &Pool,
        desc: &AllocationDesc<'_>,
        size: u64,
        alignment: u64,
        kind: DedicatedKind,
    ) -> AllocResult<Allocation> {
        let heap_type = pool.heap_type();
        if desc.flags.contains(AllocationFlags::WITHIN_BUDGET) && !self.budget.within_budget(heap_type, size) {
            return Err(AllocError::OutOfMemory);
        }
        let properties = pool.properties();
        let heap_desc = HeapDesc {
            size,
            properties,
            alignment: alignment.max(properties.placement_alignment()),
        };
        let heap = match kind {
            DedicatedKind::Committed => self.device.create_committed_heap(&heap_desc)?,
            DedicatedKind::StandaloneHeap => self.device.create_heap(&heap_desc)?,
        };

        let registry = pool.committed();
        let key = registry.register(CommittedEntry { size });
        self.budget.add_block(heap_type, size);
        self.budget.add_allocation(heap_type, size);
        tracing::trace!(?kind, ?heap_type, size, "created dedicated allocation");

        let dedicated = Dedicated {
            registry: Arc::clone(registry),
            key: Some(key),
            heap,
        };
        Ok(Allocation::new(
            AllocationParts {
                kind: match kind {
                    DedicatedKind::Committed => AllocationKind::Committed(dedicated),
                    DedicatedKind::StandaloneHeap => AllocationKind::StandaloneHeap(dedicated),
                },
                size,
                alignment,
                heap_type,
                creation_frame_index: self.current_frame_index(),
                zero_initialized: true,
                user_data: desc.user_data,
            },
            Arc::clone(&self.budget),
        ))
    }

    /// Totals over default pools, live custom pools and their dedicated
    /// allocations. Takes only read locks.
    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics::default();
        for pool in &self.default_pools {
            pool.add_stats(&mut stats);
        }
        self.custom_pools.add_stats(&mut stats);
        stats.post_process();
        stats
    }

    /// Current budget estimate for `heap_type`.
    pub fn budget(&self, heap_type: HeapType) -> Budget {
        self.budget.get(heap_type)
    }

    /// Re-queries the device budget immediately.
    pub fn refresh_budget(&self) {
        self.budget.refresh();
    }

    /// Number of custom pools currently alive.
    pub fn custom_pool_count(&self) -> usize {
        self.custom_pools.len()
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        let live: usize = self.default_pools.iter().map(Pool::allocation_count).sum();
        if live > 0 {
            tracing::error!(live, "allocator dropped with live allocations");
            if !std::thread::panicking() {
                debug_assert!(false, "allocator dropped with {live} live allocations");
            }
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::memory::allocation::AllocationType;
    use crate::memory::device::{HeapFlags, SystemHeapDevice};

    const KB: u64 = 1024;

    fn allocator_with(config: AllocatorConfig) -> Allocator {
        Allocator::new(Arc::new(SystemHeapDevice::new()), config).unwrap()
    }

    fn small_blocks() -> AllocatorConfig {
        AllocatorConfig {
            preferred_block_size: 1024 * KB,
            ..AllocatorConfig::default()
        }
    }

    fn mem(size: u64) -> AllocationInfo {
        AllocationInfo { size, alignment: 256 }
    }

    #[test]
    fn test_default_config_block_size() {
        let a = allocator_with(AllocatorConfig::default());
        assert_eq!(a.config().preferred_block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(a.default_pool_count(), 3);
    }

    #[test]
    fn test_tier1_has_nine_default_pools() {
        let device = Arc::new(SystemHeapDevice::new().with_tier(ResourceHeapTier::Tier1));
        let a = Allocator::new(device, small_blocks()).unwrap();
        assert_eq!(a.default_pool_count(), 9);
    }

    #[test]
    fn test_small_request_is_placed() {
        let a = allocator_with(small_blocks());
        let alloc = a.allocate_memory(&AllocationDesc::default(), &mem(4 * KB)).unwrap();
        assert_eq!(alloc.allocation_type(), AllocationType::Placed);
        assert!(alloc.block_id().is_some());
        assert!(alloc.was_zero_initialized());
        assert_eq!(alloc.offset() % 256, 0);
    }

    #[test]
    fn test_large_request_prefers_dedicated() {
        // More than half the preferred block size gets its own heap.
        let a = allocator_with(small_blocks());
        let heap = a.allocate_memory(&AllocationDesc::default(), &mem(600 * KB)).unwrap();
        assert_eq!(heap.allocation_type(), AllocationType::StandaloneHeap);
        assert_eq!(heap.offset(), 0);
        let info = ResourceInfo {
            class: ResourceClass::Buffer,
            size: 600 * KB,
            alignment: 256,
        };
        let committed = a.allocate_resource(&AllocationDesc::default(), &info).unwrap();
        assert_eq!(committed.allocation_type(), AllocationType::Committed);
        assert_eq!(committed.heap().size(), 600 * KB);
    }

    #[test]
    fn test_committed_flag_and_always_committed() {
        let a = allocator_with(small_blocks());
        let desc = AllocationDesc {
            flags: AllocationFlags::COMMITTED,
            ..AllocationDesc::default()
        };
        let alloc = a.allocate_memory(&desc, &mem(KB)).unwrap();
        assert_eq!(alloc.allocation_type(), AllocationType::StandaloneHeap);
        drop(alloc);

        let a = allocator_with(AllocatorConfig {
            always_committed: true,
            ..small_blocks()
        });
        let alloc = a.allocate_memory(&AllocationDesc::default(), &mem(KB)).unwrap();
        assert_eq!(alloc.allocation_type(), AllocationType::StandaloneHeap);
    }

    #[test]
    fn test_never_allocate_without_blocks_is_oom() {
        // With dedicated heaps ruled out and no block to place into.
        let a = allocator_with(small_blocks());
        let desc = AllocationDesc {
            flags: AllocationFlags::NEVER_ALLOCATE,
            ..AllocationDesc::default()
        };
        assert!(matches!(a.allocate_memory(&desc, &mem(KB)), Err(AllocError::OutOfMemory)));
        assert!(matches!(
            a.allocate_memory(&desc, &mem(2048 * KB)),
            Err(AllocError::OutOfMemory)
        ));
    }

    #[test]
    fn test_invalid_requests() {
        let a = allocator_with(small_blocks());
        let d = AllocationDesc::default();
        assert!(matches!(a.allocate_memory(&d, &mem(0)), Err(AllocError::InvalidArgument(_))));
        assert!(matches!(
            a.allocate_memory(&d, &AllocationInfo { size: 64, alignment: 3 }),
            Err(AllocError::InvalidArgument(_))
        ));
        let both = AllocationDesc {
            flags: AllocationFlags::COMMITTED | AllocationFlags::NEVER_ALLOCATE,
            ..AllocationDesc::default()
        };
        assert!(matches!(a.allocate_memory(&both, &mem(64)), Err(AllocError::InvalidArgument(_))));
        let custom = AllocationDesc {
            heap_type: HeapType::Custom,
            ..AllocationDesc::default()
        };
        assert!(matches!(a.allocate_memory(&custom, &mem(64)), Err(AllocError::InvalidArgument(_))));
    }

    #[test]
    fn test_tier1_memory_request_needs_single_class() {
        let device = Arc::new(SystemHeapDevice::new().with_tier(ResourceHeapTier::Tier1));
        let a = Allocator::new(device, small_blocks()).unwrap();
        assert!(matches!(
            a.allocate_memory(&AllocationDesc::default(), &mem(KB)),
            Err(AllocError::InvalidArgument(_))
        ));
        let buffers = AllocationDesc {
            heap_flags: ResourceClass::Buffer.exclusive_heap_flags(),
            ..AllocationDesc::default()
        };
        let alloc = a.allocate_memory(&buffers, &mem(KB)).unwrap();
        assert_eq!(alloc.allocation_type(), AllocationType::Placed);
        let texture = ResourceInfo {
            class: ResourceClass::Texture,
            size: KB,
            alignment: 256,
        };
        let tex = a.allocate_resource(&AllocationDesc::default(), &texture).unwrap();
        // Different classes never share a block on tier 1.
        assert!(!std::ptr::addr_eq(alloc.heap(), tex.heap()));
    }

    #[test]
    fn test_custom_heap_type_through_pool() {
        let a = allocator_with(small_blocks());
        let pool = a
            .create_pool(&PoolDesc {
                heap_type: HeapType::Custom,
                heap_flags: HeapFlags::SHARED,
                block_size: 64 * KB,
                ..PoolDesc::default()
            })
            .unwrap();
        let desc = AllocationDesc {
            pool: Some(&pool),
            ..AllocationDesc::default()
        };
        let alloc = a.allocate_memory(&desc, &mem(KB)).unwrap();
        assert_eq!(alloc.heap_type(), HeapType::Custom);
        assert_eq!(pool.block_count(), 1);
        drop(alloc);
    }

    #[test]
    fn test_frame_index_recorded() {
        let a = allocator_with(small_blocks());
        a.set_current_frame_index(41);
        let first = a.allocate_memory(&AllocationDesc::default(), &mem(KB)).unwrap();
        a.set_current_frame_index(42);
        let second = a.allocate_memory(&AllocationDesc::default(), &mem(KB)).unwrap();
        assert_eq!(first.creation_frame_index(), 41);
        assert_eq!(second.creation_frame_index(), 42);
    }

    #[test]
    fn test_debug_alignment_applies_minimum() {
        let a = allocator_with(AllocatorConfig {
            debug_alignment: 4096,
            ..small_blocks()
        });
        let x = a.allocate_memory(&AllocationDesc::default(), &mem(100)).unwrap();
        let y = a.allocate_memory(&AllocationDesc::default(), &mem(100)).unwrap();
        assert_eq!(x.alignment(), 4096);
        assert_eq!(y.offset() % 4096, 0);
        assert!(matches!(
            Allocator::new(
                Arc::new(SystemHeapDevice::new()),
                AllocatorConfig {
                    debug_alignment: 3,
                    ..AllocatorConfig::default()
                }
            ),
            Err(AllocError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_budget_counters_follow_allocations() {
        let a = allocator_with(small_blocks());
        let placed = a.allocate_memory(&AllocationDesc::default(), &mem(4 * KB)).unwrap();
        let dedicated = a.allocate_memory(&AllocationDesc::default(), &mem(600 * KB)).unwrap();
        let b = a.budget(HeapType::Default);
        assert_eq!(b.allocation_bytes, 604 * KB);
        assert!(b.block_bytes >= 600 * KB + 4 * KB);
        drop(dedicated);
        drop(placed);
        let b = a.budget(HeapType::Default);
        assert_eq!(b.allocation_bytes, 0);
    }

    #[test]
    fn test_within_budget_rejects_dedicated() {
        let device = Arc::new(SystemHeapDevice::new().with_budget(HeapType::Default, 512 * KB));
        let a = Allocator::new(device, small_blocks()).unwrap();
        let desc = AllocationDesc {
            flags: AllocationFlags::WITHIN_BUDGET,
            ..AllocationDesc::default()
        };
        assert!(matches!(
            a.allocate_memory(&desc, &mem(600 * KB)),
            Err(AllocError::OutOfMemory)
        ));
        // Without the flag the budget is advisory.
        let alloc = a.allocate_memory(&AllocationDesc::default(), &mem(600 * KB)).unwrap();
        assert_eq!(alloc.allocation_type(), AllocationType::StandaloneHeap);
    }

    #[test]
    fn test_name_and_user_data() {
        let a = allocator_with(small_blocks());
        let desc = AllocationDesc {
            user_data: 5,
            ..AllocationDesc::default()
        };
        let mut alloc = a.allocate_memory(&desc, &mem(KB)).unwrap();
        assert_eq!(alloc.user_data(), 5);
        alloc.set_user_data(6);
        assert_eq!(alloc.user_data(), 6);
        assert_eq!(alloc.name(), None);
        alloc.set_name("vertex buffer");
        assert_eq!(alloc.name(), Some("vertex buffer"));
    }

    #[test]
    fn test_bookkeeping_uses_host_allocator() {
        let (host, counter) = crate::memory::host::testing::counting();
        let a = allocator_with(AllocatorConfig {
            host_allocator: host,
            ..small_blocks()
        });
        let after_new = counter.allocations();

        let pool = a.create_pool(&PoolDesc::default()).unwrap();
        let placed = a.allocate_memory(&AllocationDesc::default(), &mem(4 * KB)).unwrap();
        let dedicated = a
            .allocate_memory(
                &AllocationDesc {
                    pool: Some(&pool),
                    ..AllocationDesc::default()
                },
                &mem(600 * KB),
            )
            .unwrap();
        assert_eq!(placed.allocation_type(), AllocationType::Placed);
        assert_eq!(dedicated.allocation_type(), AllocationType::StandaloneHeap);
        assert!(counter.allocations() > after_new);

        drop(placed);
        drop(dedicated);
        drop(pool);
        drop(a);
        assert_eq!(counter.live_bytes(), 0);
    }

    #[test]
    fn test_desc_with_pool_formats() {
        let a = allocator_with(small_blocks());
        let pool = a
            .create_pool(&PoolDesc {
                block_size: 64 * KB,
                min_block_count: 1,
                ..PoolDesc::default()
            })
            .unwrap();
        let desc = AllocationDesc {
            pool: Some(&pool),
            ..AllocationDesc::default()
        };
        let text = format!("{desc:?}");
        assert!(text.contains("Pool"), "{text}");
        assert!(text.contains("block_count: 1, .."), "{text}");
    }
}
