//! The thread heap façade.
//!
//! Routes allocations to the right size-class pool or to the span path, and
//! routes deallocations to the owning pool (local), the slab's remote list
//! (cross-thread), or the OS (spans). All state is thread-local; the only
//! shared structures behind it are the central heap and the slabs' remote
//! lists.

use crate::chunk_cache::ThreadChunkCache;
use crate::large::Span;
use crate::pool::SizeClassPool;
use crate::size_class::{self, CLASS_COUNT, MAX_ALLOC, MIN_ALLOC};
use crate::slab::{ChunkKind, Slab};
use core::cell::UnsafeCell;

/// Per-thread allocator state: one pool per size class plus a chunk cache.
///
/// Not constructed directly; use the static entry points, which go through
/// the thread-local instance.
pub struct ThreadHeap {
    pools: [SizeClassPool; CLASS_COUNT],
    chunk_cache: ThreadChunkCache,
}

thread_local! {
    static HEAP: UnsafeCell<ThreadHeap> = UnsafeCell::new(ThreadHeap::new());
}

/// Run `f` against the thread's heap. None during TLS teardown.
#[inline]
fn with_heap<R>(f: impl FnOnce(&mut ThreadHeap) -> R) -> Option<R> {
    HEAP.try_with(|cell| {
        // SAFETY: the heap is only ever touched from its own thread, and
        // nothing in the allocator re-enters these entry points.
        f(unsafe { &mut *cell.get() })
    })
    .ok()
}

impl ThreadHeap {
    fn new() -> Self {
        Self {
            pools: core::array::from_fn(|class| {
                SizeClassPool::new(size_class::class_to_size(class) as u32)
            }),
            chunk_cache: ThreadChunkCache::new(),
        }
    }

    /// Allocate `nbytes` with the default 8-byte alignment guarantee.
    ///
    /// Returns null only when the OS refuses more memory.
    pub fn allocate(nbytes: usize) -> *mut u8 {
        if nbytes > MAX_ALLOC {
            return Span::allocate(nbytes, MIN_ALLOC);
        }

        let class = size_class::size_to_class(nbytes);
        match with_heap(|heap| heap.alloc_small(class)) {
            Some(ptr) => ptr,
            // TLS teardown: no pools to carve from. A span works for any
            // size and its deallocation path needs no thread state.
            None => Span::allocate(nbytes.max(MIN_ALLOC), MIN_ALLOC),
        }
    }

    /// Allocate `nbytes` aligned to `align` (a power of two).
    ///
    /// Blocks start at a cache-line-aligned offset and advance in steps of
    /// the block size, so a block is `align`-aligned whenever its class
    /// size is a multiple of `align`; for `align > 8` the request is bumped
    /// to the first such class.
    pub fn allocate_aligned(nbytes: usize, align: usize) -> *mut u8 {
        debug_assert!(align.is_power_of_two());
        if align <= MIN_ALLOC {
            return Self::allocate(nbytes);
        }
        if nbytes > MAX_ALLOC || align > crate::config::CACHE_LINE {
            return Span::allocate(nbytes, align);
        }

        let mut class = size_class::size_to_class(crate::config::round_up(nbytes, align));
        while class < CLASS_COUNT && size_class::class_to_size(class) % align != 0 {
            class += 1;
        }
        if class >= CLASS_COUNT {
            return Span::allocate(nbytes, align);
        }

        match with_heap(|heap| heap.alloc_small(class)) {
            Some(ptr) => ptr,
            None => Span::allocate(nbytes, align),
        }
    }

    /// Return a block or span obtained from [`allocate`](Self::allocate) /
    /// [`allocate_aligned`](Self::allocate_aligned).
    ///
    /// Works from any thread: blocks owned by another thread's heap are
    /// parked on their slab's remote free list.
    pub fn deallocate(ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        // SAFETY: `ptr` came from this allocator, so the enclosing chunk
        // has a live header.
        match unsafe { Slab::kind_of(ptr) } {
            ChunkKind::Span => unsafe { Span::release(ptr) },
            ChunkKind::Slab => {
                let slab = Slab::from_ptr(ptr);
                let handled = with_heap(|heap| {
                    if heap.owns_slab(slab) {
                        let class =
                            size_class::size_to_class(unsafe { (*slab).block_size() } as usize);
                        let Self { pools, chunk_cache } = heap;
                        // SAFETY: ownership verified; local path.
                        unsafe { pools[class].deallocate(slab, ptr, chunk_cache) };
                    } else {
                        // SAFETY: live block of a foreign (or orphaned) slab.
                        unsafe { (*slab).free_remote(ptr) };
                    }
                })
                .is_some();

                if !handled {
                    // TLS teardown: the remote list needs no thread state.
                    // SAFETY: as above.
                    unsafe { (*slab).free_remote(ptr) };
                }
            }
        }
    }

    fn alloc_small(&mut self, class: usize) -> *mut u8 {
        let Self { pools, chunk_cache } = self;
        pools[class].allocate(chunk_cache)
    }

    fn owns_slab(&self, slab: *mut Slab) -> bool {
        // SAFETY: slab headers stay readable for the chunk's lifetime.
        let owner = unsafe { (*slab).owner() };
        if owner.is_null() {
            return false;
        }
        let class = size_class::size_to_class(unsafe { (*slab).block_size() } as usize);
        core::ptr::eq(owner, &self.pools[class])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_allocations_are_distinct_and_aligned() {
        let mut ptrs = Vec::new();
        for size in [1usize, 8, 9, 24, 100, 128, 1000, 4096, MAX_ALLOC] {
            let ptr = ThreadHeap::allocate(size);
            assert!(!ptr.is_null(), "allocation of {size} failed");
            assert_eq!(ptr as usize % MIN_ALLOC, 0);
            unsafe { ptr.write_bytes(0xA5, size.max(1)) };
            ptrs.push(ptr);
        }
        ptrs.sort_unstable();
        ptrs.dedup();
        assert_eq!(ptrs.len(), 9);
        for ptr in ptrs {
            ThreadHeap::deallocate(ptr);
        }
    }

    #[test]
    fn test_freed_blocks_are_reused() {
        let a = ThreadHeap::allocate(48);
        ThreadHeap::deallocate(a);
        let b = ThreadHeap::allocate(48);
        assert_eq!(a, b);
        ThreadHeap::deallocate(b);
    }

    #[test]
    fn test_aligned_allocations() {
        for align in [16usize, 32, 64] {
            let ptr = ThreadHeap::allocate_aligned(24, align);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % align, 0, "alignment {align} violated");
            ThreadHeap::deallocate(ptr);
        }

        // Over-aligned requests fall through to the span path.
        let ptr = ThreadHeap::allocate_aligned(100, 4096);
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % 4096, 0);
        ThreadHeap::deallocate(ptr);
    }

    #[test]
    fn test_large_path_round_trip() {
        let size = MAX_ALLOC + 1;
        let ptr = ThreadHeap::allocate(size);
        assert!(!ptr.is_null());
        unsafe {
            ptr.write_bytes(0x11, size);
        }
        ThreadHeap::deallocate(ptr);
    }
}
