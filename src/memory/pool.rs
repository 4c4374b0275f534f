//! Pools: one block collection plus one committed registry for a fixed heap
//! configuration.
//!
//! The allocator keeps a fixed set of default pools; applications create
//! custom pools with [`Allocator::create_pool`](crate::Allocator::create_pool)
//! to control block size and count.

use std::fmt;

use crate::memory::budget::BudgetTracker;
use crate::memory::collection::{BlockCollection, CollectionDesc};
use crate::memory::committed::CommittedAllocationRegistry;
use crate::memory::device::{HeapDevice, HeapFlags, HeapProperties, HeapType};
use crate::memory::error::{AllocResult, invalid_arg};
use crate::memory::host::HostAllocator;
use crate::memory::stats::{StatInfo, Statistics};
use crate::sync::atomic::{AtomicU64, Ordering};
use crate::sync::{Arc, ConfigRwLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolDesc {
    /// Default: [`HeapType::Default`].
    pub heap_type: HeapType,
    /// Default: empty.
    pub heap_flags: HeapFlags,
    /// Exact size of every block. 0 uses the allocator's preferred block size
    /// and lets the pool start with smaller blocks. Default: 0.
    pub block_size: u64,
    /// Blocks created up front and never released. Default: 0.
    pub min_block_count: usize,
    /// Default: `usize::MAX`.
    pub max_block_count: usize,
}

impl Default for PoolDesc {
    fn default() -> Self {
        Self {
            heap_type: HeapType::Default,
            heap_flags: HeapFlags::empty(),
            block_size: 0,
            min_block_count: 0,
            max_block_count: usize::MAX,
        }
    }
}

/// Settings a pool inherits from its allocator.
#[derive(Clone, Debug)]
pub(crate) struct PoolEnv {
    pub(crate) preferred_block_size: u64,
    pub(crate) margin: u64,
    pub(crate) use_lock: bool,
    pub(crate) host: HostAllocator,
}

pub struct Pool {
    desc: PoolDesc,
    collection: Arc<BlockCollection>,
    committed: Arc<CommittedAllocationRegistry>,
    registration: Option<(Arc<PoolRegistry>, u64)>,
}

impl Pool {
    /// Builds the pool and its minimum blocks.
    ///
    /// # Errors
    /// - [`AllocError::InvalidArgument`](crate::AllocError::InvalidArgument)
    ///   for an inconsistent block count range.
    /// - [`AllocError::HostAllocationFailed`](crate::AllocError::HostAllocationFailed)
    ///   if a minimum block cannot be created.
    pub(crate) fn new(
        desc: PoolDesc,
        env: &PoolEnv,
        device: Arc<dyn HeapDevice>,
        budget: Arc<BudgetTracker>,
    ) -> AllocResult<Self> {
        if desc.max_block_count == 0 {
            return Err(invalid_arg!("pool max_block_count must be at least 1"));
        }
        if desc.min_block_count > desc.max_block_count {
            return Err(invalid_arg!(
                "pool min_block_count {} exceeds max_block_count {}",
                desc.min_block_count,
                desc.max_block_count
            ));
        }
        let explicit_block_size = desc.block_size != 0;
        let collection = Arc::new(BlockCollection::new(
            device,
            budget,
            env.host.clone(),
            CollectionDesc {
                properties: HeapProperties::new(desc.heap_type, desc.heap_flags),
                preferred_block_size: if explicit_block_size {
                    desc.block_size
                } else {
                    env.preferred_block_size
                },
                min_block_count: desc.min_block_count,
                max_block_count: desc.max_block_count,
                explicit_block_size,
                margin: env.margin,
                use_lock: env.use_lock,
            },
        ));
        collection.create_min_blocks()?;
        Ok(Self {
            desc,
            collection,
            committed: Arc::new(CommittedAllocationRegistry::new(
                desc.heap_type,
                env.use_lock,
                env.host.clone(),
            )),
            registration: None,
        })
    }

    pub(crate) fn register_in(&mut self, registry: &Arc<PoolRegistry>) {
        let id = registry.insert(self.desc.heap_type, &self.collection, &self.committed);
        self.registration = Some((Arc::clone(registry), id));
    }

    #[inline]
    pub fn desc(&self) -> &PoolDesc {
        &self.desc
    }

    #[inline]
    pub fn heap_type(&self) -> HeapType {
        self.desc.heap_type
    }

    #[inline]
    pub fn properties(&self) -> HeapProperties {
        self.collection.properties()
    }

    pub fn block_count(&self) -> usize {
        self.collection.block_count()
    }

    /// Live placed and dedicated allocations.
    pub fn allocation_count(&self) -> usize {
        self.collection.allocation_count() + self.committed.len()
    }

    pub fn statistics(&self) -> StatInfo {
        let mut info = pool_stat_info(&self.collection, &self.committed);
        info.post_process();
        info
    }

    /// # Errors
    /// Returns the first violated block invariant.
    pub fn validate(&self) -> Result<(), &'static str> {
        self.collection.validate()
    }

    #[inline]
    pub(crate) fn collection(&self) -> &Arc<BlockCollection> {
        &self.collection
    }

    #[inline]
    pub(crate) fn committed(&self) -> &Arc<CommittedAllocationRegistry> {
        &self.committed
    }

    pub(crate) fn add_stats(&self, stats: &mut Statistics) {
        add_heap_stats(stats, self.desc.heap_type, &pool_stat_info(&self.collection, &self.committed));
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("desc", &self.desc)
            .field("block_count", &self.block_count())
            .finish_non_exhaustive()
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Some((registry, id)) = self.registration.take() {
            registry.remove(id);
        }
        let live = self.allocation_count();
        if live > 0 {
            tracing::error!(heap_type = ?self.desc.heap_type, live, "pool dropped with live allocations");
        }
    }
}

fn pool_stat_info(collection: &BlockCollection, committed: &CommittedAllocationRegistry) -> StatInfo {
    let mut info = StatInfo::default();
    collection.add_stats(&mut info);
    committed.add_stats(&mut info);
    info
}

fn add_heap_stats(stats: &mut Statistics, heap_type: HeapType, info: &StatInfo) {
    stats.total.add(info);
    stats.heap_type[heap_type.index()].add(info);
}

struct PoolEntry {
    id: u64,
    heap_type: HeapType,
    collection: Arc<BlockCollection>,
    committed: Arc<CommittedAllocationRegistry>,
}

/// Custom pools currently alive, so allocator statistics can include them.
pub(crate) struct PoolRegistry {
    next_id: AtomicU64,
    pools: ConfigRwLock<allocator_api2::vec::Vec<PoolEntry, HostAllocator>>,
}

impl PoolRegistry {
    pub(crate) fn new(use_lock: bool, host: HostAllocator) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pools: ConfigRwLock::new(allocator_api2::vec::Vec::new_in(host), use_lock),
        }
    }

    fn insert(
        &self,
        heap_type: HeapType,
        collection: &Arc<BlockCollection>,
        committed: &Arc<CommittedAllocationRegistry>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pools.write().push(PoolEntry {
            id,
            heap_type,
            collection: Arc::clone(collection),
            committed: Arc::clone(committed),
        });
        id
    }

    fn remove(&self, id: u64) {
        self.pools.write().retain(|entry| entry.id != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub(crate) fn add_stats(&self, stats: &mut Statistics) {
        for entry in self.pools.read().iter() {
            add_heap_stats(stats, entry.heap_type, &pool_stat_info(&entry.collection, &entry.committed));
        }
    }
}
