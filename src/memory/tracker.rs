//! Free-space bookkeeping for a single heap.
//!
//! The heap is described by an ordered sequence of suballocations that tile
//! `[0, size)` exactly. Free entries of at least
//! [`MIN_FREE_SIZE_TO_REGISTER`] bytes are additionally indexed in a vector
//! sorted by size, which gives a best-fit search by binary search.
//!
//! Callers serialise access: a tracker is owned by a block collection or a
//! virtual block and only touched under that owner's lock.

use allocator_api2::alloc::{Allocator, Global};
use crate::memory::list::{IndexList, NodeId};
use crate::memory::stats::StatInfo;
use crate::memory::zero_range::ZeroRange;

/// Free ranges smaller than this are kept in the sequence but never indexed,
/// so searches skip them.
pub const MIN_FREE_SIZE_TO_REGISTER: u64 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuballocationKind {
    Free,
    Occupied,
}

/// One contiguous range of the heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Suballocation {
    pub offset: u64,
    pub size: u64,
    pub kind: SuballocationKind,
    /// Caller tag. Always 0 for free ranges.
    pub user_data: u64,
}

impl Suballocation {
    #[inline]
    pub fn is_free(&self) -> bool {
        self.kind == SuballocationKind::Free
    }

    #[inline]
    fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Result of a successful [`FreeSpaceTracker::search`], consumed by
/// [`FreeSpaceTracker::commit`]. Valid only until the next mutation.
#[derive(Clone, Copy, Debug)]
pub struct AllocationRequest {
    pub offset: u64,
    /// The whole placed range has never been handed out before.
    pub zero_initialized: bool,
    item: NodeId,
}

#[inline]
pub(crate) const fn align_up(value: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment.is_power_of_two());
    match value.checked_add(alignment - 1) {
        Some(v) => Some(v & !(alignment - 1)),
        None => None,
    }
}

/// Node storage (the range sequence and the free-size index) is allocated
/// from `A`.
#[derive(Debug)]
pub struct FreeSpaceTracker<A: Allocator = Global> {
    size: u64,
    margin: u64,
    free_count: usize,
    sum_free_size: u64,
    suballocations: IndexList<Suballocation, A>,
    /// Free entries with `size >= MIN_FREE_SIZE_TO_REGISTER`, ascending by size.
    free_by_size: allocator_api2::vec::Vec<NodeId, A>,
    zero_range: ZeroRange,
}

impl FreeSpaceTracker {
    /// Creates a tracker for a heap of `size` bytes, keeping `margin` guard
    /// bytes free before and after every placement.
    pub fn new(size: u64, margin: u64) -> Self {
        Self::new_in(size, margin, Global)
    }
}

impl<A: Allocator + Clone> FreeSpaceTracker<A> {
    /// Like [`FreeSpaceTracker::new`], with node storage taken from `alloc`.
    pub fn new_in(size: u64, margin: u64, alloc: A) -> Self {
        let mut tracker = Self {
            size,
            margin,
            free_count: 0,
            sum_free_size: 0,
            suballocations: IndexList::new_in(alloc.clone()),
            free_by_size: allocator_api2::vec::Vec::new_in(alloc),
            zero_range: ZeroRange::new(size),
        };
        tracker.reset();
        tracker
    }

    fn reset(&mut self) {
        self.suballocations.clear();
        self.free_by_size.clear();
        self.free_count = 1;
        self.sum_free_size = self.size;
        let id = self.suballocations.push_back(Suballocation {
            offset: 0,
            size: self.size,
            kind: SuballocationKind::Free,
            user_data: 0,
        });
        self.register_free(id);
    }

    /// Drops every allocation at once. The zero range is not restored: bytes
    /// that were handed out may have been written.
    pub fn clear(&mut self) {
        self.reset();
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn margin(&self) -> u64 {
        self.margin
    }

    #[inline]
    pub fn sum_free_size(&self) -> u64 {
        self.sum_free_size
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_count
    }

    #[inline]
    pub fn allocation_count(&self) -> usize {
        self.suballocations.len() - self.free_count
    }

    /// A single free range covering the whole heap.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.suballocations.len() == 1 && self.free_count == 1
    }

    #[inline]
    pub fn zero_range(&self) -> ZeroRange {
        self.zero_range
    }

    /// Size of the largest indexed free range, or 0.
    pub fn max_free_range(&self) -> u64 {
        self.free_by_size
            .last()
            .map_or(0, |&id| self.suballocations.get(id).size)
    }

    /// Suballocations in offset order.
    pub fn iter(&self) -> impl Iterator<Item = &Suballocation> {
        self.suballocations.iter().map(|(_, s)| s)
    }

    /// The occupied suballocation starting at `offset`, if any.
    pub fn get(&self, offset: u64) -> Option<Suballocation> {
        self.find_occupied(offset)
            .map(|id| *self.suballocations.get(id))
    }

    /// Finds the smallest registered free range that can hold `size` bytes at
    /// `alignment` plus the guard margin on both sides.
    pub fn search(&self, size: u64, alignment: u64) -> Option<AllocationRequest> {
        debug_assert!(size > 0, "search: zero-size request");
        debug_assert!(alignment.is_power_of_two(), "search: alignment {alignment} is not a power of two");

        let needed = size.checked_add(self.margin.checked_mul(2)?)?;
        if self.sum_free_size < needed {
            return None;
        }

        let start = self
            .free_by_size
            .partition_point(|&id| self.suballocations.get(id).size < needed);
        self.free_by_size[start..].iter().find_map(|&id| {
            let offset = self.check_allocation(id, size, alignment)?;
            Some(AllocationRequest {
                offset,
                zero_initialized: self.zero_range.is_zero(offset, offset + size),
                item: id,
            })
        })
    }

    /// Returns the placement offset if `size` fits in free range `id`.
    fn check_allocation(&self, id: NodeId, size: u64, alignment: u64) -> Option<u64> {
        let sub = self.suballocations.get(id);
        debug_assert!(sub.is_free());
        if sub.size < size {
            return None;
        }
        let offset = align_up(sub.offset.checked_add(self.margin)?, alignment)?;
        let padding_begin = offset - sub.offset;
        let required = padding_begin.checked_add(size)?.checked_add(self.margin)?;
        (required <= sub.size).then_some(offset)
    }

    /// Turns the free range chosen by `request` into an occupied range of
    /// `size` bytes, splitting off free padding before and after.
    pub fn commit(&mut self, request: &AllocationRequest, size: u64, user_data: u64) {
        let item = request.item;
        let free = *self.suballocations.get(item);
        debug_assert!(free.is_free(), "commit: target range is not free");
        debug_assert!(request.offset >= free.offset);
        let padding_begin = request.offset - free.offset;
        debug_assert!(free.size >= padding_begin + size);
        let padding_end = free.size - padding_begin - size;

        self.unregister_free(item);
        *self.suballocations.get_mut(item) = Suballocation {
            offset: request.offset,
            size,
            kind: SuballocationKind::Occupied,
            user_data,
        };

        if padding_end > 0 {
            let id = self.suballocations.insert_after(
                item,
                Suballocation {
                    offset: request.offset + size,
                    size: padding_end,
                    kind: SuballocationKind::Free,
                    user_data: 0,
                },
            );
            self.register_free(id);
        }
        if padding_begin > 0 {
            let id = self.suballocations.insert_before(
                item,
                Suballocation {
                    offset: free.offset,
                    size: padding_begin,
                    kind: SuballocationKind::Free,
                    user_data: 0,
                },
            );
            self.register_free(id);
        }

        self.free_count -= 1;
        if padding_begin > 0 {
            self.free_count += 1;
        }
        if padding_end > 0 {
            self.free_count += 1;
        }
        self.sum_free_size -= size;
        self.zero_range.mark_used(request.offset, request.offset + size);
        self.heavy_validate();
    }

    /// Releases the occupied range starting at `offset`, coalescing it with
    /// free neighbours.
    ///
    /// # Panics
    /// In debug builds, if no occupied range starts at `offset`.
    pub fn release(&mut self, offset: u64) {
        let Some(id) = self.find_occupied(offset) else {
            #[cfg(debug_assertions)]
            panic!("release: no allocation at offset {offset}");
            #[cfg(not(debug_assertions))]
            return;
        };
        self.free_suballocation(id);
        self.heavy_validate();
    }

    /// Replaces the tag of the occupied range at `offset`. Returns `false` if
    /// there is none.
    pub fn set_user_data(&mut self, offset: u64, user_data: u64) -> bool {
        match self.find_occupied(offset) {
            Some(id) => {
                self.suballocations.get_mut(id).user_data = user_data;
                true
            }
            None => false,
        }
    }

    fn find_occupied(&self, offset: u64) -> Option<NodeId> {
        self.suballocations
            .iter()
            .find(|(_, s)| s.offset == offset && !s.is_free())
            .map(|(id, _)| id)
    }

    fn free_suballocation(&mut self, id: NodeId) {
        {
            let sub = self.suballocations.get_mut(id);
            sub.kind = SuballocationKind::Free;
            sub.user_data = 0;
        }
        self.free_count += 1;
        self.sum_free_size += self.suballocations.get(id).size;

        if let Some(next) = self.suballocations.next(id)
            && self.suballocations.get(next).is_free()
        {
            self.unregister_free(next);
            self.merge_free_with_next(id);
        }

        match self.suballocations.prev(id) {
            Some(prev) if self.suballocations.get(prev).is_free() => {
                self.unregister_free(prev);
                self.merge_free_with_next(prev);
                self.register_free(prev);
            }
            _ => self.register_free(id),
        }
    }

    /// Absorbs the free range after `id` into `id`. Neither may be registered.
    fn merge_free_with_next(&mut self, id: NodeId) {
        let Some(next) = self.suballocations.next(id) else {
            debug_assert!(false, "merge_free_with_next: no next range");
            return;
        };
        let absorbed = self.suballocations.remove(next);
        debug_assert!(absorbed.is_free());
        self.suballocations.get_mut(id).size += absorbed.size;
        self.free_count -= 1;
    }

    fn register_free(&mut self, id: NodeId) {
        let size = self.suballocations.get(id).size;
        debug_assert!(self.suballocations.get(id).is_free());
        if size < MIN_FREE_SIZE_TO_REGISTER {
            return;
        }
        let pos = self
            .free_by_size
            .partition_point(|&other| self.suballocations.get(other).size < size);
        self.free_by_size.insert(pos, id);
    }

    fn unregister_free(&mut self, id: NodeId) {
        let size = self.suballocations.get(id).size;
        debug_assert!(self.suballocations.get(id).is_free());
        if size < MIN_FREE_SIZE_TO_REGISTER {
            return;
        }
        let start = self
            .free_by_size
            .partition_point(|&other| self.suballocations.get(other).size < size);
        let found = self.free_by_size[start..]
            .iter()
            .take_while(|&&other| self.suballocations.get(other).size == size)
            .position(|&other| other == id);
        match found {
            Some(i) => {
                self.free_by_size.remove(start + i);
            }
            None => debug_assert!(false, "unregister_free: {id:?} is not indexed"),
        }
    }

    #[inline]
    fn heavy_validate(&self) {
        #[cfg(feature = "heavy_assert")]
        if let Err(msg) = self.validate() {
            panic!("free-space tracker corrupted: {msg}");
        }
    }

    /// Checks every structural invariant. Linear in the number of ranges.
    ///
    /// # Errors
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> Result<(), &'static str> {
        let mut calculated_offset = 0u64;
        let mut calculated_free_count = 0usize;
        let mut calculated_sum_free = 0u64;
        let mut registered = 0usize;
        let mut prev_free = false;

        for (_, sub) in self.suballocations.iter() {
            if sub.offset != calculated_offset {
                return Err("ranges are not contiguous");
            }
            if sub.is_free() {
                if prev_free {
                    return Err("two adjacent free ranges");
                }
                if sub.user_data != 0 {
                    return Err("free range carries a tag");
                }
                calculated_free_count += 1;
                calculated_sum_free += sub.size;
                if sub.size >= MIN_FREE_SIZE_TO_REGISTER {
                    registered += 1;
                }
                if sub.size < self.margin {
                    return Err("free range smaller than the guard margin");
                }
            } else if self.margin > 0 && !prev_free {
                return Err("allocation not preceded by a guard margin");
            }
            prev_free = sub.is_free();
            calculated_offset = sub.end();
        }

        if calculated_offset != self.size {
            return Err("ranges do not cover the heap");
        }
        if self.free_by_size.len() != registered {
            return Err("free index size mismatch");
        }
        let mut last_size = 0u64;
        for &id in self.free_by_size.iter() {
            let sub = self.suballocations.get(id);
            if !sub.is_free() {
                return Err("free index references an occupied range");
            }
            if sub.size < last_size {
                return Err("free index not sorted by size");
            }
            last_size = sub.size;
        }
        if calculated_free_count != self.free_count {
            return Err("free count mismatch");
        }
        if calculated_sum_free != self.sum_free_size {
            return Err("free byte total mismatch");
        }
        Ok(())
    }

    /// Statistics for this heap counted as one block.
    pub fn calc_stat_info(&self) -> StatInfo {
        let mut info = StatInfo {
            block_count: 1,
            allocation_count: u32::try_from(self.allocation_count()).unwrap_or(u32::MAX),
            unused_range_count: u32::try_from(self.free_count).unwrap_or(u32::MAX),
            used_bytes: self.size - self.sum_free_size,
            unused_bytes: self.sum_free_size,
            ..StatInfo::default()
        };
        for sub in self.iter() {
            if sub.is_free() {
                info.unused_range_size_min = info.unused_range_size_min.min(sub.size);
                info.unused_range_size_max = info.unused_range_size_max.max(sub.size);
            } else {
                info.allocation_size_min = info.allocation_size_min.min(sub.size);
                info.allocation_size_max = info.allocation_size_max.max(sub.size);
            }
        }
        info
    }
}
