//! Per-thread, per-size-class slab pools.
//!
//! A pool owns one `current` slab plus partial and full lists. Allocation
//! prefers `current`, then a partial slab, then a "rescue" pass over the
//! full list (remote frees may have refilled a full slab), and finally a
//! fresh chunk. Deallocation moves slabs between the lists as their
//! occupancy transitions.

use crate::central;
use crate::chunk_cache::ThreadChunkCache;
use crate::config::MAX_RESCUE_CHECKS;
use crate::slab::{Slab, SlabList};

pub(crate) struct SizeClassPool {
    block_size: u32,
    current: *mut Slab,
    partial_list: SlabList,
    full_list: SlabList,
}

impl SizeClassPool {
    pub(crate) const fn new(block_size: u32) -> Self {
        Self {
            block_size,
            current: core::ptr::null_mut(),
            partial_list: SlabList::new(),
            full_list: SlabList::new(),
        }
    }

    #[inline]
    pub(crate) fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Hand out one block. Null only when the OS refuses a new chunk.
    pub(crate) fn allocate(&mut self, chunks: &mut ThreadChunkCache) -> *mut u8 {
        if !self.current.is_null() {
            // SAFETY: `current` is a live slab owned by this pool.
            let slab = unsafe { &mut *self.current };
            let ptr = slab.allocate();
            if !ptr.is_null() {
                return ptr;
            }
            unsafe { self.full_list.push_back(self.current) };
            self.current = core::ptr::null_mut();
        }

        if !self.partial_list.is_empty() {
            return self.alloc_from_partial();
        }

        if !self.full_list.is_empty() {
            let ptr = self.alloc_from_rescue();
            if !ptr.is_null() {
                return ptr;
            }
        }

        self.alloc_from_new(chunks)
    }

    /// Owner-side free of `ptr` belonging to `slab`.
    ///
    /// # Safety
    ///
    /// `slab` must be owned by this pool and `ptr` must be one of its live
    /// blocks, freed exactly once.
    pub(crate) unsafe fn deallocate(
        &mut self,
        slab: *mut Slab,
        ptr: *mut u8,
        chunks: &mut ThreadChunkCache,
    ) {
        // SAFETY: caller guarantees the slab is ours and alive.
        let slab_ref = unsafe { &mut *slab };
        let was_full = slab_ref.is_full();
        let now_empty = unsafe { slab_ref.free_local(ptr) };

        if now_empty {
            if slab == self.current {
                self.current = core::ptr::null_mut();
            } else if was_full {
                unsafe { self.full_list.remove(slab) };
            } else {
                unsafe { self.partial_list.remove(slab) };
            }
            slab_ref.destroy_for_reuse();
            chunks.return_chunk(slab as *mut u8);
        } else if was_full && slab != self.current {
            // `current` lives outside the lists; a full current that just
            // got a block back simply serves it on the next allocation.
            unsafe {
                self.full_list.remove(slab);
                self.partial_list.push_front(slab);
            }
        }
    }

    fn alloc_from_partial(&mut self) -> *mut u8 {
        let slab = unsafe { self.partial_list.pop_front() };
        self.current = slab;
        // SAFETY: a partial slab always has room.
        unsafe { (*slab).allocate() }
    }

    /// Inspect up to `MAX_RESCUE_CHECKS` full slabs for remote frees that
    /// arrived since they filled up; rotate misses to the back.
    fn alloc_from_rescue(&mut self) -> *mut u8 {
        let mut checks = 0;
        while !self.full_list.is_empty() && checks < MAX_RESCUE_CHECKS {
            let victim = self.full_list.front();
            // SAFETY: list membership implies a live slab owned by us.
            let victim_ref = unsafe { &mut *victim };

            if victim_ref.reclaim_remote() > 0 {
                unsafe { self.full_list.remove(victim) };
                self.current = victim;
                return victim_ref.allocate();
            }

            unsafe { self.full_list.rotate_front_to_back() };
            checks += 1;
        }
        core::ptr::null_mut()
    }

    fn alloc_from_new(&mut self, chunks: &mut ThreadChunkCache) -> *mut u8 {
        let chunk = chunks.fetch_chunk();
        if chunk.is_null() {
            return core::ptr::null_mut();
        }

        // SAFETY: fresh chunk, exclusively ours.
        let slab = unsafe { Slab::create_at(chunk, self as *mut SizeClassPool, self.block_size) };
        self.current = slab;
        unsafe { (*slab).allocate() }
    }

    fn release_or_orphan(slab: *mut Slab) {
        // SAFETY: called from Drop; the slab is still owned by this pool.
        let slab_ref = unsafe { &mut *slab };
        slab_ref.reclaim_remote();
        if slab_ref.is_empty() {
            slab_ref.destroy_for_reuse();
            central::global().return_chunk(slab as *mut u8);
        } else {
            // Live blocks remain (possibly published to other threads).
            // Orphan the slab: remote frees still land on it, the chunk
            // itself is never reused, so those blocks stay valid.
            tracing::trace!(
                live = slab_ref.allocated_count(),
                block_size = slab_ref.block_size(),
                "orphaning slab with live blocks on thread exit"
            );
            slab_ref.orphan();
        }
    }
}

impl Drop for SizeClassPool {
    fn drop(&mut self) {
        if !self.current.is_null() {
            Self::release_or_orphan(self.current);
            self.current = core::ptr::null_mut();
        }
        loop {
            let slab = unsafe { self.partial_list.pop_front() };
            if slab.is_null() {
                break;
            }
            Self::release_or_orphan(slab);
        }
        loop {
            let slab = unsafe { self.full_list.pop_front() };
            if slab.is_null() {
                break;
            }
            Self::release_or_orphan(slab);
        }
    }
}
