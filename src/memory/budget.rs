//! Per-heap-type memory accounting against the device-reported budget.
//!
//! Two local gauges per heap type are updated on every heap and allocation
//! create/destroy: bytes in heaps (`block_bytes`) and bytes handed out
//! (`allocation_bytes`). The device snapshot is refreshed lazily every
//! `refresh_interval` operations, or on demand, under its own lock. Between
//! refreshes, usage is estimated as the snapshot plus the heap bytes created
//! since it was taken.

use crate::memory::device::{BudgetSnapshot, HEAP_TYPE_COUNT, HeapDevice, HeapType};
use crate::memory::stats::Counter;
use crate::sync::atomic::{AtomicU32, Ordering};
use crate::sync::{Arc, ConfigRwLock};

/// Budget view for one heap type, in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Budget {
    /// Bytes in heaps created by this allocator.
    pub block_bytes: u64,
    /// Bytes of those heaps handed out as allocations.
    pub allocation_bytes: u64,
    /// Estimated process-wide usage.
    pub usage: u64,
    /// Device-reported budget.
    pub budget: u64,
}

impl Budget {
    /// Bytes that can still be created before reaching the budget.
    #[inline]
    pub fn headroom(&self) -> u64 {
        self.budget.saturating_sub(self.usage)
    }

    #[inline]
    pub fn is_exceeded(&self) -> bool {
        self.usage >= self.budget
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    valid: bool,
    device: [BudgetSnapshot; HEAP_TYPE_COUNT],
    block_bytes_at_refresh: [u64; HEAP_TYPE_COUNT],
}

pub struct BudgetTracker {
    device: Arc<dyn HeapDevice>,
    block_bytes: [Counter; HEAP_TYPE_COUNT],
    allocation_bytes: [Counter; HEAP_TYPE_COUNT],
    operations_since_refresh: AtomicU32,
    refresh_interval: u32,
    snapshot: ConfigRwLock<Snapshot>,
}

impl BudgetTracker {
    pub(crate) fn new(device: Arc<dyn HeapDevice>, refresh_interval: u32, use_lock: bool) -> Self {
        Self {
            device,
            block_bytes: std::array::from_fn(|_| Counter::new()),
            allocation_bytes: std::array::from_fn(|_| Counter::new()),
            operations_since_refresh: AtomicU32::new(0),
            refresh_interval: refresh_interval.max(1),
            snapshot: ConfigRwLock::new(Snapshot::default(), use_lock),
        }
    }

    #[inline]
    fn tick(&self) {
        self.operations_since_refresh.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_block(&self, heap_type: HeapType, bytes: u64) {
        self.block_bytes[heap_type.index()].add(bytes);
        self.tick();
    }

    pub(crate) fn remove_block(&self, heap_type: HeapType, bytes: u64) {
        self.block_bytes[heap_type.index()].sub(bytes);
        self.tick();
    }

    pub(crate) fn add_allocation(&self, heap_type: HeapType, bytes: u64) {
        self.allocation_bytes[heap_type.index()].add(bytes);
        self.tick();
    }

    pub(crate) fn remove_allocation(&self, heap_type: HeapType, bytes: u64) {
        self.allocation_bytes[heap_type.index()].sub(bytes);
        self.tick();
    }

    /// Queries the device for every heap type and resets the operation count.
    /// A heap type whose query fails keeps its previous snapshot.
    pub fn refresh(&self) {
        let mut snapshot = self.snapshot.write();
        for heap_type in HeapType::ALL {
            let slot = heap_type.index();
            match self.device.query_budget(heap_type) {
                Ok(reported) => snapshot.device[slot] = reported,
                Err(e) => tracing::warn!(?heap_type, error = %e, "budget query failed"),
            }
            snapshot.block_bytes_at_refresh[slot] = self.block_bytes[slot].get();
        }
        snapshot.valid = true;
        self.operations_since_refresh.store(0, Ordering::Relaxed);
    }

    /// Current estimate for `heap_type`, refreshing the snapshot first if it
    /// is stale.
    pub fn get(&self, heap_type: HeapType) -> Budget {
        let stale = self.operations_since_refresh.load(Ordering::Relaxed) >= self.refresh_interval
            || !self.snapshot.read().valid;
        if stale {
            self.refresh();
        }

        let slot = heap_type.index();
        let block_bytes = self.block_bytes[slot].get();
        let snapshot = self.snapshot.read();
        let reported = snapshot.device[slot];
        let grown = block_bytes.saturating_sub(snapshot.block_bytes_at_refresh[slot]);
        Budget {
            block_bytes,
            allocation_bytes: self.allocation_bytes[slot].get(),
            usage: reported.usage.saturating_add(grown),
            budget: reported.budget,
        }
    }

    /// Advisory check: would `additional` more heap bytes still fit?
    pub fn within_budget(&self, heap_type: HeapType, additional: u64) -> bool {
        let budget = self.get(heap_type);
        budget.usage.saturating_add(additional) <= budget.budget
    }
}
