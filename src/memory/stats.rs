//! Byte gauges and aggregated allocation statistics.
//!
//! Gauges use `Relaxed` ordering. Individual values are eventually consistent
//! and cross-gauge snapshots may be transiently inconsistent, which is fine
//! for budget estimates and diagnostic display.

use crate::memory::device::HEAP_TYPE_COUNT;
use crate::sync::atomic::{AtomicI64, Ordering};

/// Byte gauge.
///
/// Under contention, subtract-before-add races are tolerated and the raw value
/// may transiently dip below zero. Readers always go through `get()`/`load()`,
/// which clamp negative values to zero.
#[derive(Debug)]
pub struct Counter(AtomicI64);

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl Counter {
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    #[cfg(loom)]
    pub fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    #[inline]
    fn delta(val: u64) -> i64 {
        // Gauges only: clamp absurd deltas instead of panicking.
        std::cmp::min(val, i64::MAX.cast_unsigned()).cast_signed()
    }

    #[inline]
    pub fn add(&self, val: u64) {
        self.0.fetch_add(Self::delta(val), Ordering::Relaxed);
    }

    #[inline]
    pub fn sub(&self, val: u64) {
        self.0.fetch_sub(Self::delta(val), Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn load(&self, ordering: Ordering) -> u64 {
        self.0.load(ordering).max(0).cast_unsigned()
    }
}

/// Aggregated statistics for a set of blocks and their allocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatInfo {
    /// Number of heaps: blocks plus dedicated allocations.
    pub block_count: u32,
    /// Number of live allocations.
    pub allocation_count: u32,
    /// Number of free ranges between allocations.
    pub unused_range_count: u32,
    /// Bytes occupied by allocations.
    pub used_bytes: u64,
    /// Bytes in free ranges.
    pub unused_bytes: u64,
    pub allocation_size_min: u64,
    pub allocation_size_avg: u64,
    pub allocation_size_max: u64,
    pub unused_range_size_min: u64,
    pub unused_range_size_avg: u64,
    pub unused_range_size_max: u64,
}

impl Default for StatInfo {
    fn default() -> Self {
        Self {
            block_count: 0,
            allocation_count: 0,
            unused_range_count: 0,
            used_bytes: 0,
            unused_bytes: 0,
            allocation_size_min: u64::MAX,
            allocation_size_avg: 0,
            allocation_size_max: 0,
            unused_range_size_min: u64::MAX,
            unused_range_size_avg: 0,
            unused_range_size_max: 0,
        }
    }
}

impl StatInfo {
    /// Contribution of one dedicated (committed or standalone) heap.
    pub(crate) fn dedicated(size: u64) -> Self {
        Self {
            block_count: 1,
            allocation_count: 1,
            used_bytes: size,
            allocation_size_min: size,
            allocation_size_max: size,
            ..Self::default()
        }
    }

    pub(crate) fn add(&mut self, other: &Self) {
        self.block_count += other.block_count;
        self.allocation_count += other.allocation_count;
        self.unused_range_count += other.unused_range_count;
        self.used_bytes += other.used_bytes;
        self.unused_bytes += other.unused_bytes;
        self.allocation_size_min = self.allocation_size_min.min(other.allocation_size_min);
        self.allocation_size_max = self.allocation_size_max.max(other.allocation_size_max);
        self.unused_range_size_min = self.unused_range_size_min.min(other.unused_range_size_min);
        self.unused_range_size_max = self.unused_range_size_max.max(other.unused_range_size_max);
    }

    /// Computes averages and zeroes minimums that nothing contributed to.
    pub(crate) fn post_process(&mut self) {
        if self.allocation_count > 0 {
            self.allocation_size_avg = self.used_bytes / u64::from(self.allocation_count);
        } else {
            self.allocation_size_avg = 0;
            self.allocation_size_min = 0;
        }
        if self.unused_range_count > 0 {
            self.unused_range_size_avg = self.unused_bytes / u64::from(self.unused_range_count);
        } else {
            self.unused_range_size_avg = 0;
            self.unused_range_size_min = 0;
        }
    }
}

/// Allocator-wide statistics: a total plus one entry per heap type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    pub total: StatInfo,
    /// Indexed by [`HeapType::index`](crate::HeapType::index).
    pub heap_type: [StatInfo; HEAP_TYPE_COUNT],
}

impl Statistics {
    pub(crate) fn post_process(&mut self) {
        self.total.post_process();
        for info in &mut self.heap_type {
            info.post_process();
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn test_counter_clamps_negative() {
        let c = Counter::new();
        c.add(10);
        c.sub(25);
        assert_eq!(c.get(), 0);
        c.add(20);
        assert_eq!(c.get(), 5);
    }

    #[test]
    fn test_add_combines_counts_and_extremes() {
        let mut a = StatInfo::dedicated(100);
        let b = StatInfo {
            block_count: 1,
            allocation_count: 2,
            unused_range_count: 1,
            used_bytes: 300,
            unused_bytes: 50,
            allocation_size_min: 60,
            allocation_size_max: 240,
            unused_range_size_min: 50,
            unused_range_size_max: 50,
            ..StatInfo::default()
        };
        a.add(&b);
        a.post_process();
        assert_eq!(a.block_count, 2);
        assert_eq!(a.allocation_count, 3);
        assert_eq!(a.used_bytes, 400);
        assert_eq!(a.allocation_size_min, 60);
        assert_eq!(a.allocation_size_max, 240);
        assert_eq!(a.allocation_size_avg, 133);
        assert_eq!(a.unused_range_size_avg, 50);
    }

    #[test]
    fn test_post_process_empty() {
        let mut s = StatInfo::default();
        s.post_process();
        assert_eq!(s.allocation_size_min, 0);
        assert_eq!(s.allocation_size_avg, 0);
        assert_eq!(s.unused_range_size_min, 0);
    }
}
