//! Anonymous-mapping primitive.
//!
//! `reserve_aligned` over-allocates by one chunk alignment, then trims the
//! head and tail with `munmap` so the surviving region is naturally aligned.
//! This is the allocator's only interaction with the OS.

use crate::config::{CHUNK_ALIGN, CHUNK_SIZE};
use core::ptr;

/// Map `size` bytes (a multiple of [`CHUNK_SIZE`]) aligned to
/// [`CHUNK_ALIGN`]. Returns null if the OS refuses.
pub(crate) fn reserve_aligned(size: usize) -> *mut u8 {
    debug_assert!(size > 0 && size % CHUNK_SIZE == 0);

    let over_alloc = size + CHUNK_ALIGN;

    // SAFETY: plain anonymous private mapping; no file descriptor involved.
    let raw = unsafe {
        libc::mmap(
            ptr::null_mut(),
            over_alloc,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == libc::MAP_FAILED {
        return ptr::null_mut();
    }

    let raw_addr = raw as usize;
    let aligned_addr = (raw_addr + CHUNK_ALIGN - 1) & !(CHUNK_ALIGN - 1);
    let aligned_end = aligned_addr + size;
    let raw_end = raw_addr + over_alloc;

    let head = aligned_addr - raw_addr;
    if head > 0 {
        // SAFETY: trims a prefix of the mapping we just created.
        unsafe { libc::munmap(raw, head) };
    }

    let tail = raw_end - aligned_end;
    if tail > 0 {
        // SAFETY: trims a suffix of the mapping we just created.
        unsafe { libc::munmap(aligned_end as *mut libc::c_void, tail) };
    }

    aligned_addr as *mut u8
}

/// Unmap a region previously returned by [`reserve_aligned`].
pub(crate) fn release(ptr: *mut u8, size: usize) {
    debug_assert!(!ptr.is_null() && size > 0);
    // SAFETY: caller passes a region obtained from reserve_aligned with its
    // original size.
    let rc = unsafe { libc::munmap(ptr as *mut libc::c_void, size) };
    debug_assert_eq!(rc, 0, "munmap failed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CHUNK_ALIGN;

    #[test]
    fn test_mapping_is_naturally_aligned() {
        let ptr = reserve_aligned(CHUNK_SIZE);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize & (CHUNK_ALIGN - 1), 0);

        // The whole region must be writable.
        unsafe {
            ptr.write(0xAB);
            ptr.add(CHUNK_SIZE - 1).write(0xCD);
        }
        release(ptr, CHUNK_SIZE);
    }

    #[test]
    fn test_multi_chunk_mapping() {
        let size = 3 * CHUNK_SIZE;
        let ptr = reserve_aligned(size);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize & (CHUNK_ALIGN - 1), 0);
        release(ptr, size);
    }
}
