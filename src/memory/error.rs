use thiserror::Error;

use crate::memory::vm::VmError;

/// Failure reported by a [`HeapDevice`](crate::HeapDevice).
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error("device is out of memory for this heap type")]
    OutOfDeviceMemory,
    #[error("unsupported heap request: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum AllocError {
    /// No placement fits and no new heap could be created.
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The host graphics API refused to create a heap.
    #[error("host heap allocation failed: {0}")]
    HostAllocationFailed(#[from] DeviceError),
}

pub type AllocResult<T> = Result<T, AllocError>;

macro_rules! invalid_arg {
    ($($arg:tt)*) => {
        $crate::memory::error::AllocError::InvalidArgument(format!($($arg)*))
    };
}
pub(crate) use invalid_arg;
