//! Platform virtual-memory primitives backing [`SystemHeapDevice`] heaps.
//!
//! [`SystemHeapDevice`]: crate::SystemHeapDevice

use std::ptr::NonNull;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("VM reservation failed: {0}")]
    ReservationFailed(#[source] std::io::Error),
    #[error("VM commit failed: {0}")]
    CommitFailed(#[source] std::io::Error),
    #[error("VM release failed: {0}")]
    ReleaseFailed(#[source] std::io::Error),
    #[error("heap size {size} does not fit the host address space")]
    SizeOverflow { size: u64 },
}

/// Abstract interface for virtual memory operations.
pub(crate) trait VmOps {
    /// Reserve address space without committing physical pages.
    /// Returns a pointer to the start of the reserved range.
    unsafe fn reserve(size: usize) -> Result<NonNull<u8>, VmError>;

    /// Commit (back with physical pages) a range within a reservation.
    unsafe fn commit(ptr: NonNull<u8>, size: usize) -> Result<(), VmError>;

    /// Release address space entirely (after which pointers are invalid).
    unsafe fn release(ptr: NonNull<u8>, size: usize) -> Result<(), VmError>;

    /// OS page size (default/minimum).
    fn page_size() -> usize;

    /// Reserve and commit `size` bytes of zero-filled, read-write memory.
    /// On commit failure the reservation is released again.
    fn map_zeroed(size: usize) -> Result<NonNull<u8>, VmError> {
        // Safety: a fresh reservation is owned exclusively by this call.
        unsafe {
            let ptr = Self::reserve(size)?;
            if let Err(e) = Self::commit(ptr, size) {
                // Best effort: the commit error is the one worth reporting.
                let _ = Self::release(ptr, size);
                return Err(e);
            }
            Ok(ptr)
        }
    }
}

pub(crate) struct PlatformVmOps;

/// Rounds `size` up to whole pages, as a host-sized length.
pub(crate) fn page_rounded_len(size: u64) -> Result<usize, VmError> {
    let page = PlatformVmOps::page_size();
    usize::try_from(size)
        .ok()
        .and_then(|s| s.checked_next_multiple_of(page))
        .ok_or(VmError::SizeOverflow { size })
}

#[cfg(all(any(target_os = "macos", target_os = "linux"), not(any(loom, miri))))]
mod unix {
    use super::{NonNull, PlatformVmOps, VmError, VmOps};
    use std::io;

    impl VmOps for PlatformVmOps {
        unsafe fn reserve(size: usize) -> Result<NonNull<u8>, VmError> {
            // Safety: FFI call to mmap.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size,
                    libc::PROT_NONE,
                    libc::MAP_PRIVATE | libc::MAP_ANON,
                    -1,
                    0,
                )
            };

            if ptr == libc::MAP_FAILED {
                return Err(VmError::ReservationFailed(io::Error::last_os_error()));
            }

            NonNull::new(ptr.cast::<u8>())
                .ok_or_else(|| VmError::ReservationFailed(io::Error::other("mmap returned null")))
        }

        unsafe fn commit(ptr: NonNull<u8>, size: usize) -> Result<(), VmError> {
            // Safety: FFI call to mprotect.
            if unsafe {
                libc::mprotect(
                    ptr.as_ptr().cast::<libc::c_void>(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                )
            } != 0
            {
                return Err(VmError::CommitFailed(io::Error::last_os_error()));
            }
            // Fresh anonymous pages are zero-filled by the kernel, which is
            // what the heap zero range relies on.
            Ok(())
        }

        unsafe fn release(ptr: NonNull<u8>, size: usize) -> Result<(), VmError> {
            // Safety: FFI call to munmap.
            if unsafe { libc::munmap(ptr.as_ptr().cast::<libc::c_void>(), size) } != 0 {
                return Err(VmError::ReleaseFailed(io::Error::last_os_error()));
            }
            Ok(())
        }

        fn page_size() -> usize {
            use crate::sync::OnceLock;
            static CACHED: OnceLock<usize> = OnceLock::new();
            *CACHED.get_or_init(|| {
                // Safety: FFI call to sysconf.
                let raw = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
                assert!(
                    raw > 0,
                    "sysconf(_SC_PAGESIZE) failed: {}",
                    io::Error::last_os_error()
                );
                // This crate supports only 64-bit targets; page size fits in usize there.
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                {
                    raw as usize
                }
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Heap-backed mock (loom, Miri, and hosts without an mmap path)
//
// Every "reservation" is a zeroed heap allocation. `commit` is a no-op because
// the memory is accessible as soon as it exists; `release` frees it. This is
// enough to exercise the allocator's bookkeeping and synchronization; real
// page behaviour is covered by the platform implementation.
// ---------------------------------------------------------------------------
#[cfg(any(loom, miri, not(any(target_os = "macos", target_os = "linux"))))]
const MOCK_PAGE_SIZE: usize = 4096;

#[cfg(any(loom, miri, not(any(target_os = "macos", target_os = "linux"))))]
impl VmOps for PlatformVmOps {
    unsafe fn reserve(size: usize) -> Result<NonNull<u8>, VmError> {
        if size == 0 {
            return Err(VmError::ReservationFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "zero-size reservation",
            )));
        }
        let layout = std::alloc::Layout::from_size_align(size, MOCK_PAGE_SIZE)
            .map_err(|e| VmError::ReservationFailed(std::io::Error::other(e)))?;
        // Safety: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| {
            VmError::ReservationFailed(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "alloc returned null",
            ))
        })
    }

    unsafe fn commit(_ptr: NonNull<u8>, _size: usize) -> Result<(), VmError> {
        Ok(())
    }

    unsafe fn release(ptr: NonNull<u8>, size: usize) -> Result<(), VmError> {
        let layout = std::alloc::Layout::from_size_align(size, MOCK_PAGE_SIZE)
            .map_err(|e| VmError::ReleaseFailed(std::io::Error::other(e)))?;
        // Safety: ptr was allocated with the same layout via `reserve`.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        Ok(())
    }

    fn page_size() -> usize {
        MOCK_PAGE_SIZE
    }
}

#[cfg(all(test, not(any(loom, miri))))]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_commit_release() {
        let size = PlatformVmOps::page_size();
        // Safety: Test code.
        unsafe {
            let ptr = PlatformVmOps::reserve(size).expect("Reserve failed");
            PlatformVmOps::commit(ptr, size).expect("Commit failed");

            let slice = std::slice::from_raw_parts_mut(ptr.as_ptr(), size);
            slice[0] = 42;
            assert_eq!(slice[0], 42);

            PlatformVmOps::release(ptr, size).expect("Release failed");
        }
    }

    #[test]
    fn test_reserve_zero_size() {
        // V1: mmap with 0 size fails with EINVAL.
        // Safety: Test code.
        let result = unsafe { PlatformVmOps::reserve(0) };
        assert!(result.is_err(), "Reserving 0 bytes should fail");
    }

    #[test]
    fn test_map_zeroed_is_zero_filled() {
        // V2: heaps rely on fresh mappings reading as zero.
        let size = PlatformVmOps::page_size() * 4;
        let ptr = PlatformVmOps::map_zeroed(size).expect("map_zeroed failed");
        // Safety: Test code; the mapping is committed read-write.
        unsafe {
            let slice = std::slice::from_raw_parts(ptr.as_ptr(), size);
            assert!(slice.iter().all(|&b| b == 0));
            PlatformVmOps::release(ptr, size).expect("Release failed");
        }
    }

    #[test]
    fn test_page_size_is_power_of_two() {
        let size = PlatformVmOps::page_size();
        assert!(size.is_power_of_two(), "Page size {size} is not power of two");
    }

    #[test]
    fn test_page_rounded_len() {
        let page = PlatformVmOps::page_size();
        assert_eq!(page_rounded_len(1).unwrap(), page);
        assert_eq!(page_rounded_len(page as u64).unwrap(), page);
        assert_eq!(page_rounded_len(page as u64 + 1).unwrap(), 2 * page);
        assert!(matches!(
            page_rounded_len(u64::MAX),
            Err(VmError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn test_multiple_reservations() {
        // V3: independent mappings do not interfere.
        let page_size = PlatformVmOps::page_size();
        let ptr1 = PlatformVmOps::map_zeroed(page_size).expect("Map 1 failed");
        let ptr2 = PlatformVmOps::map_zeroed(page_size).expect("Map 2 failed");
        assert_ne!(ptr1, ptr2);

        // Safety: Test code.
        unsafe {
            *(ptr1.as_ptr()) = 1;
            *(ptr2.as_ptr()) = 2;

            PlatformVmOps::release(ptr1, page_size).expect("Release 1 failed");

            // ptr2 should still be valid
            assert_eq!(*(ptr2.as_ptr()), 2);

            PlatformVmOps::release(ptr2, page_size).expect("Release 2 failed");
        }
    }

    #[test]
    fn test_reserve_very_large() {
        // V4: reserving 1GB of address space without committing succeeds.
        let size = 1024 * 1024 * 1024;
        // Safety: Test code.
        unsafe {
            let ptr = PlatformVmOps::reserve(size).expect("Failed to reserve 1GB");
            PlatformVmOps::release(ptr, size).expect("Release failed");
        }
    }
}
