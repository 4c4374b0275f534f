pub(crate) mod allocation;
pub(crate) mod allocator;
pub(crate) mod block;
pub(crate) mod budget;
pub(crate) mod collection;
pub(crate) mod committed;
pub(crate) mod device;
pub(crate) mod error;
pub(crate) mod host;
pub(crate) mod list;
pub(crate) mod pool;
pub(crate) mod stats;
pub(crate) mod tracker;
pub(crate) mod virtual_block;
pub(crate) mod vm;
pub(crate) mod zero_range;
