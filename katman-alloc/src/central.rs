//! Central heap: the process-wide chunk source.
//!
//! Keeps a bounded free list of returned chunks; beyond the high-water
//! mark, chunks go straight back to the OS. The list is intrusive (the
//! link lives in each cached chunk's first word) and guarded by a spin
//! flag embedded next to it: the critical section is a two-pointer splice,
//! far too short to be worth a parking lock. Large regions for the span
//! path pass through here as well so the OS interface stays in one place.

use crate::config::{CHUNK_ALIGN, CHUNK_SIZE, MAX_CENTRAL_CACHE};
use crate::free_list::FreeNode;
use crate::sys;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam_utils::Backoff;
use once_cell::race::OnceBox;

/// The cached-chunk list plus the flag that serializes access to it.
///
/// All mutation happens inside [`with`](Self::with); the closure scope is
/// the critical section, so the list never leaks a reference that could
/// outlive the lock.
struct ChunkFreeList {
    busy: AtomicBool,
    head: UnsafeCell<*mut FreeNode>,
    count: UnsafeCell<usize>,
}

// SAFETY: `head` and `count` are only touched while `busy` is held.
unsafe impl Send for ChunkFreeList {}
unsafe impl Sync for ChunkFreeList {}

impl ChunkFreeList {
    const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            head: UnsafeCell::new(core::ptr::null_mut()),
            count: UnsafeCell::new(0),
        }
    }

    /// Run `f` with the flag held. Spins with pause hints, escalating to
    /// yields under contention.
    fn with<R>(&self, f: impl FnOnce(&mut *mut FreeNode, &mut usize) -> R) -> R {
        let backoff = Backoff::new();
        while self.busy.swap(true, Ordering::Acquire) {
            while self.busy.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }

        // SAFETY: the flag is ours; no other thread touches the cells.
        let result = unsafe { f(&mut *self.head.get(), &mut *self.count.get()) };

        self.busy.store(false, Ordering::Release);
        result
    }

    /// Pop one cached chunk, if any.
    fn pop(&self) -> Option<*mut u8> {
        self.with(|head, count| {
            let chunk = *head;
            if chunk.is_null() {
                return None;
            }
            // SAFETY: cached chunks carry the link in their first word.
            *head = unsafe { (*chunk).next };
            *count -= 1;
            Some(chunk as *mut u8)
        })
    }

    /// Cache a chunk unless the high-water mark is reached; false means
    /// the caller must release it to the OS instead.
    fn try_push(&self, chunk: *mut u8) -> bool {
        self.with(|head, count| {
            if *count >= MAX_CENTRAL_CACHE {
                return false;
            }
            let node = chunk as *mut FreeNode;
            // SAFETY: the chunk is dead; its first word becomes the link.
            unsafe { (*node).next = *head };
            *head = node;
            *count += 1;
            true
        })
    }
}

pub(crate) struct CentralHeap {
    free_list: ChunkFreeList,
}

impl CentralHeap {
    fn new() -> Self {
        Self {
            free_list: ChunkFreeList::new(),
        }
    }

    /// Pop a cached chunk or map a fresh one. Null on OS exhaustion.
    pub(crate) fn fetch_chunk(&self) -> *mut u8 {
        if let Some(chunk) = self.free_list.pop() {
            return chunk;
        }

        let chunk = sys::reserve_aligned(CHUNK_SIZE);
        if !chunk.is_null() {
            tracing::trace!(chunk = ?chunk, "mapped fresh chunk");
        }
        chunk
    }

    /// Cache a chunk, or release it to the OS above the high-water mark.
    pub(crate) fn return_chunk(&self, chunk: *mut u8) {
        if chunk.is_null() {
            return;
        }
        debug_assert_eq!(chunk as usize & (CHUNK_ALIGN - 1), 0);

        if !self.free_list.try_push(chunk) {
            sys::release(chunk, CHUNK_SIZE);
        }
    }

    /// Map a naturally aligned multi-chunk region for the span path.
    pub(crate) fn reserve_region(&self, size: usize) -> *mut u8 {
        debug_assert_eq!(size % CHUNK_SIZE, 0);
        sys::reserve_aligned(size)
    }

    /// Unmap a span region.
    pub(crate) fn release_region(&self, ptr: *mut u8, size: usize) {
        sys::release(ptr, size);
    }

    #[cfg(test)]
    pub(crate) fn cached_chunks(&self) -> usize {
        self.free_list.with(|_, count| *count)
    }
}

static CENTRAL: OnceBox<CentralHeap> = OnceBox::new();

#[inline]
pub(crate) fn global() -> &'static CentralHeap {
    CENTRAL.get_or_init(|| Box::new(CentralHeap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_and_return_round_trip() {
        let central = global();
        let chunk = central.fetch_chunk();
        assert!(!chunk.is_null());
        assert_eq!(chunk as usize & (CHUNK_ALIGN - 1), 0);

        // The chunk must be writable end to end.
        unsafe {
            chunk.write(1);
            chunk.add(CHUNK_SIZE - 1).write(2);
        }

        central.return_chunk(chunk);

        let again = central.fetch_chunk();
        assert!(!again.is_null());
        assert_eq!(again as usize & (CHUNK_ALIGN - 1), 0);
        central.return_chunk(again);
    }

    #[test]
    fn test_high_water_mark_spills_to_os() {
        let central = global();
        let mut chunks = Vec::new();
        for _ in 0..MAX_CENTRAL_CACHE + 4 {
            let chunk = central.fetch_chunk();
            assert!(!chunk.is_null());
            chunks.push(chunk);
        }
        for chunk in chunks {
            central.return_chunk(chunk);
        }
        assert!(central.cached_chunks() <= MAX_CENTRAL_CACHE);
    }
}
