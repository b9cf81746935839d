//! Global allocator configuration.

/// Allocation unit acquired from the OS: 2 MiB, huge-page compatible.
pub const CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Chunks are naturally aligned so interior pointers can find the header.
pub const CHUNK_ALIGN: usize = CHUNK_SIZE;

/// `ptr & CHUNK_MASK` yields the start of the enclosing chunk.
pub const CHUNK_MASK: usize = !(CHUNK_SIZE - 1);

/// Chunks kept in the central heap's free list before spilling to the OS.
pub const MAX_CENTRAL_CACHE: usize = 64;

/// Chunks kept in each thread's local cache before spilling to the central
/// heap.
pub const MAX_THREAD_CACHE: usize = 8;

/// How many full-list slabs a pool inspects for reclaimable remote frees
/// before giving up and fetching a fresh chunk.
pub const MAX_RESCUE_CHECKS: usize = 4;

/// Assumed cache-line size for header padding.
pub const CACHE_LINE: usize = 64;

/// Round `n` up to a multiple of `align` (a power of two).
#[inline]
pub(crate) const fn round_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}
