//! Registry of dedicated (committed or standalone-heap) allocations belonging
//! to one pool, kept for statistics and teardown checks.

use crate::memory::device::HeapType;
use crate::memory::host::HostAllocator;
use crate::memory::list::{IndexList, NodeId};
use crate::memory::stats::StatInfo;
use crate::sync::ConfigRwLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CommittedEntry {
    pub(crate) size: u64,
}

/// Membership token returned by [`CommittedAllocationRegistry::register`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RegistryKey(NodeId);

pub struct CommittedAllocationRegistry {
    heap_type: HeapType,
    entries: ConfigRwLock<IndexList<CommittedEntry, HostAllocator>>,
}

impl CommittedAllocationRegistry {
    pub(crate) fn new(heap_type: HeapType, use_lock: bool, host: HostAllocator) -> Self {
        Self {
            heap_type,
            entries: ConfigRwLock::new(IndexList::new_in(host), use_lock),
        }
    }

    #[inline]
    pub fn heap_type(&self) -> HeapType {
        self.heap_type
    }

    pub(crate) fn register(&self, entry: CommittedEntry) -> RegistryKey {
        RegistryKey(self.entries.write().push_back(entry))
    }

    pub(crate) fn unregister(&self, key: RegistryKey) -> Option<CommittedEntry> {
        let mut entries = self.entries.write();
        if !entries.contains(key.0) {
            debug_assert!(false, "committed allocation {key:?} is not registered");
            return None;
        }
        Some(entries.remove(key.0))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Bytes held by registered allocations.
    pub fn total_bytes(&self) -> u64 {
        self.entries.read().iter().map(|(_, e)| e.size).sum()
    }

    pub(crate) fn add_stats(&self, info: &mut StatInfo) {
        for (_, entry) in self.entries.read().iter() {
            info.add(&StatInfo::dedicated(entry.size));
        }
    }
}
