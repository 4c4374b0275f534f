//! Growable set of memory blocks sharing one heap configuration.
//!
//! Blocks are kept roughly sorted by ascending free space (one bubble step per
//! release), so the forward scan in [`BlockCollection::allocate`] tends to
//! fill the fullest blocks first. At most one fully empty block is kept
//! around as hysteresis against create/destroy churn.

use crate::memory::allocation::AllocationFlags;
use crate::memory::block::{BlockEntry, MemoryBlock};
use crate::memory::budget::BudgetTracker;
use crate::memory::device::{HeapDesc, HeapDevice, HeapProperties};
use crate::memory::error::{AllocError, AllocResult};
use crate::memory::host::HostAllocator;
use crate::memory::stats::StatInfo;
use crate::sync::{Arc, ConfigRwLock};

/// Largest number of times a new block may be halved below the preferred size.
pub const NEW_BLOCK_SIZE_SHIFT_MAX: u32 = 3;

#[derive(Clone, Copy, Debug)]
pub(crate) struct CollectionDesc {
    pub(crate) properties: HeapProperties,
    pub(crate) preferred_block_size: u64,
    pub(crate) min_block_count: usize,
    pub(crate) max_block_count: usize,
    /// Blocks are always exactly `preferred_block_size`.
    pub(crate) explicit_block_size: bool,
    pub(crate) margin: u64,
    pub(crate) use_lock: bool,
}

/// Where a placed allocation landed.
#[derive(Debug)]
pub(crate) struct PlacedRange {
    pub(crate) block: Arc<MemoryBlock>,
    pub(crate) offset: u64,
    pub(crate) zero_initialized: bool,
}

#[derive(Debug)]
struct CollectionState {
    blocks: allocator_api2::vec::Vec<BlockEntry, HostAllocator>,
    has_empty_block: bool,
    next_block_id: u32,
}

pub struct BlockCollection {
    device: Arc<dyn HeapDevice>,
    budget: Arc<BudgetTracker>,
    host: HostAllocator,
    desc: CollectionDesc,
    state: ConfigRwLock<CollectionState>,
}

impl BlockCollection {
    pub(crate) fn new(
        device: Arc<dyn HeapDevice>,
        budget: Arc<BudgetTracker>,
        host: HostAllocator,
        desc: CollectionDesc,
    ) -> Self {
        debug_assert!(desc.preferred_block_size > 0);
        debug_assert!(desc.min_block_count <= desc.max_block_count);
        let state = CollectionState {
            blocks: allocator_api2::vec::Vec::new_in(host.clone()),
            has_empty_block: false,
            next_block_id: 0,
        };
        Self {
            device,
            budget,
            host,
            desc,
            state: ConfigRwLock::new(state, desc.use_lock),
        }
    }

    #[inline]
    pub fn properties(&self) -> HeapProperties {
        self.desc.properties
    }

    #[inline]
    pub fn preferred_block_size(&self) -> u64 {
        self.desc.preferred_block_size
    }

    #[inline]
    pub fn has_explicit_block_size(&self) -> bool {
        self.desc.explicit_block_size
    }

    pub fn block_count(&self) -> usize {
        self.state.read().blocks.len()
    }

    pub fn allocation_count(&self) -> usize {
        self.state
            .read()
            .blocks
            .iter()
            .map(|e| e.tracker.allocation_count())
            .sum()
    }

    /// Creates blocks of the preferred size until `min_block_count` exist.
    ///
    /// # Errors
    /// [`AllocError::HostAllocationFailed`] if the device refuses a heap.
    pub(crate) fn create_min_blocks(&self) -> AllocResult<()> {
        let mut state = self.state.write();
        while state.blocks.len() < self.desc.min_block_count {
            self.create_block(&mut state, self.desc.preferred_block_size)?;
        }
        state.has_empty_block = state.blocks.iter().any(|e| e.tracker.is_empty());
        Ok(())
    }

    /// Places `size` bytes at `alignment` in an existing block, or in a new
    /// one if growth is allowed.
    ///
    /// # Errors
    /// - [`AllocError::OutOfMemory`] if nothing fits and no block may be
    ///   created, or the new block cannot hold the request.
    /// - [`AllocError::HostAllocationFailed`] if every attempted block size was
    ///   refused by the device.
    pub(crate) fn allocate(
        &self,
        size: u64,
        alignment: u64,
        flags: AllocationFlags,
        user_data: u64,
    ) -> AllocResult<PlacedRange> {
        let margin = self.desc.margin;
        let needed = size
            .checked_add(margin.saturating_mul(2))
            .filter(|&n| n <= self.desc.preferred_block_size)
            .ok_or(AllocError::OutOfMemory)?;

        let heap_type = self.desc.properties.heap_type;
        let never_allocate = flags.contains(AllocationFlags::NEVER_ALLOCATE);
        let strict_budget = flags.contains(AllocationFlags::WITHIN_BUDGET);
        let can_fallback_to_dedicated = !self.desc.explicit_block_size && !never_allocate;
        let headroom = self.budget.get(heap_type).headroom();
        // Without a dedicated fallback, going over budget beats failing,
        // unless the caller asked to stay within it.
        let budget_allows = |bytes: u64| bytes <= headroom || (!can_fallback_to_dedicated && !strict_budget);

        let mut state = self.state.write();

        for idx in 0..state.blocks.len() {
            if let Some(placed) = Self::allocate_from_block(&mut state, idx, size, alignment, user_data) {
                tracing::trace!(block_id = placed.block.id(), offset = placed.offset, size, "placed allocation");
                return Ok(placed);
            }
        }

        let can_create = !never_allocate && state.blocks.len() < self.desc.max_block_count && budget_allows(size);
        if !can_create {
            return Err(AllocError::OutOfMemory);
        }

        let mut new_block_size = self.desc.preferred_block_size;
        let mut shift = 0;
        if !self.desc.explicit_block_size {
            // Start small while the collection is small: 1/8, 1/4, 1/2 of preferred.
            let max_existing = Self::calc_max_block_size(&state.blocks, self.desc.preferred_block_size);
            while shift < NEW_BLOCK_SIZE_SHIFT_MAX {
                let smaller = new_block_size / 2;
                if smaller > max_existing && smaller >= size.saturating_mul(2) {
                    new_block_size = smaller;
                    shift += 1;
                } else {
                    break;
                }
            }
        }

        let mut created = self.try_create_block(&mut state, new_block_size, &budget_allows);
        if !self.desc.explicit_block_size {
            while created.is_err() && shift < NEW_BLOCK_SIZE_SHIFT_MAX {
                let smaller = new_block_size / 2;
                if smaller < needed {
                    break;
                }
                new_block_size = smaller;
                shift += 1;
                created = self.try_create_block(&mut state, new_block_size, &budget_allows);
            }
        }
        let idx = created?;

        let Some(placed) = Self::allocate_from_block(&mut state, idx, size, alignment, user_data) else {
            // Alignment plus margin did not fit: the fresh block would be a
            // second, unlatched empty block.
            let unused = state.blocks.remove(idx);
            drop(state);
            self.destroy_block(unused);
            return Err(AllocError::OutOfMemory);
        };
        tracing::trace!(block_id = placed.block.id(), offset = placed.offset, size, "placed allocation in new block");
        Ok(placed)
    }

    fn allocate_from_block(
        state: &mut CollectionState,
        idx: usize,
        size: u64,
        alignment: u64,
        user_data: u64,
    ) -> Option<PlacedRange> {
        let entry = &mut state.blocks[idx];
        let request = entry.tracker.search(size, alignment)?;
        let was_empty = entry.tracker.is_empty();
        entry.tracker.commit(&request, size, user_data);
        let placed = PlacedRange {
            block: Arc::clone(&entry.block),
            offset: request.offset,
            zero_initialized: request.zero_initialized,
        };
        if was_empty {
            state.has_empty_block = state.blocks.iter().any(|e| e.tracker.is_empty());
        }
        Some(placed)
    }

    fn try_create_block(
        &self,
        state: &mut CollectionState,
        size: u64,
        budget_allows: &impl Fn(u64) -> bool,
    ) -> AllocResult<usize> {
        if !budget_allows(size) {
            tracing::warn!(size, heap_type = ?self.desc.properties.heap_type, "new block refused: over budget");
            return Err(AllocError::OutOfMemory);
        }
        self.create_block(state, size)
    }

    fn create_block(&self, state: &mut CollectionState, size: u64) -> AllocResult<usize> {
        let properties = self.desc.properties;
        let desc = HeapDesc {
            size,
            properties,
            alignment: properties.placement_alignment(),
        };
        let id = state.next_block_id;
        state.next_block_id = state.next_block_id.wrapping_add(1);
        let heap = self.device.create_heap(&desc)?;

        let block = MemoryBlock::new(id, size, properties, heap);
        state
            .blocks
            .push(BlockEntry::new(block, self.desc.margin, self.host.clone()));
        self.budget.add_block(properties.heap_type, size);
        tracing::debug!(block_id = id, size, heap_type = ?properties.heap_type, "created memory block");
        Ok(state.blocks.len() - 1)
    }

    /// Largest existing block, stopping early once the preferred size is seen.
    fn calc_max_block_size(blocks: &[BlockEntry], preferred: u64) -> u64 {
        let mut result = 0;
        for entry in blocks.iter().rev() {
            result = result.max(entry.block.size());
            if result >= preferred {
                break;
            }
        }
        result
    }

    /// Releases the allocation at `offset` in `block`, destroying a block if
    /// that leaves more than one empty (or the heap type is over budget).
    pub(crate) fn free(&self, block: &MemoryBlock, offset: u64) {
        let heap_type = self.desc.properties.heap_type;
        let budget_exceeded = self.budget.get(heap_type).is_exceeded();

        let to_delete = {
            let mut state = self.state.write();
            let Some(idx) = state.blocks.iter().position(|e| e.block.id() == block.id()) else {
                #[cfg(debug_assertions)]
                panic!("free: block {} does not belong to this collection", block.id());
                #[cfg(not(debug_assertions))]
                return;
            };

            state.blocks[idx].tracker.release(offset);

            let can_delete = state.blocks.len() > self.desc.min_block_count;
            let mut to_delete = None;
            if state.blocks[idx].tracker.is_empty() {
                if (state.has_empty_block || budget_exceeded) && can_delete {
                    to_delete = Some(state.blocks.remove(idx));
                } else {
                    state.has_empty_block = true;
                }
            } else if state.has_empty_block && can_delete {
                // The earlier empty block sorts last: it has the most free space.
                if state.blocks.last().is_some_and(|e| e.tracker.is_empty()) {
                    to_delete = state.blocks.pop();
                    state.has_empty_block = false;
                }
            }

            Self::incrementally_sort(&mut state.blocks);
            to_delete
        };

        // Heap destruction happens outside the lock.
        if let Some(entry) = to_delete {
            self.destroy_block(entry);
        }
    }

    /// Drops an empty block removed from the state. Call without the lock held.
    fn destroy_block(&self, entry: BlockEntry) {
        let size = entry.block.size();
        tracing::debug!(block_id = entry.block.id(), size, "destroying empty memory block");
        self.budget.remove_block(self.desc.properties.heap_type, size);
        drop(entry);
    }

    /// One bubble-sort step towards ascending free space.
    fn incrementally_sort(blocks: &mut [BlockEntry]) {
        for i in 1..blocks.len() {
            if blocks[i - 1].tracker.sum_free_size() > blocks[i].tracker.sum_free_size() {
                blocks.swap(i - 1, i);
                return;
            }
        }
    }

    pub(crate) fn set_user_data(&self, block: &MemoryBlock, offset: u64, user_data: u64) {
        let mut state = self.state.write();
        let updated = state
            .blocks
            .iter_mut()
            .find(|e| e.block.id() == block.id())
            .is_some_and(|e| e.tracker.set_user_data(offset, user_data));
        debug_assert!(updated, "set_user_data: no allocation at offset {offset}");
    }

    pub(crate) fn add_stats(&self, info: &mut StatInfo) {
        for entry in self.state.read().blocks.iter() {
            info.add(&entry.tracker.calc_stat_info());
        }
    }

    /// Runs [`FreeSpaceTracker::validate`](crate::FreeSpaceTracker::validate)
    /// on every block and checks the empty-block bound.
    ///
    /// # Errors
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), &'static str> {
        let state = self.state.read();
        let mut empty = 0;
        for entry in state.blocks.iter() {
            entry.tracker.validate()?;
            if entry.tracker.is_empty() {
                empty += 1;
            }
        }
        if empty > 1 && state.blocks.len() > self.desc.min_block_count {
            return Err("more than one empty block above the minimum block count");
        }
        Ok(())
    }
}

impl Drop for BlockCollection {
    fn drop(&mut self) {
        let heap_type = self.desc.properties.heap_type;
        for entry in self.state.write().blocks.drain(..) {
            self.budget.remove_block(heap_type, entry.block.size());
        }
    }
}
