//! Per-thread chunk cache.
//!
//! A short LIFO of chunks so hot threads can turn slabs around without
//! taking the central heap's lock. Overflow and thread exit spill to the
//! central heap.

use crate::central;
use crate::config::MAX_THREAD_CACHE;
use crate::free_list::FreeNode;

pub(crate) struct ThreadChunkCache {
    head: *mut FreeNode,
    count: usize,
}

impl ThreadChunkCache {
    pub(crate) const fn new() -> Self {
        Self {
            head: core::ptr::null_mut(),
            count: 0,
        }
    }

    pub(crate) fn fetch_chunk(&mut self) -> *mut u8 {
        if !self.head.is_null() {
            let chunk = self.head;
            // SAFETY: cached chunks carry the link in their first word.
            self.head = unsafe { (*chunk).next };
            self.count -= 1;
            return chunk as *mut u8;
        }
        central::global().fetch_chunk()
    }

    pub(crate) fn return_chunk(&mut self, chunk: *mut u8) {
        if self.count >= MAX_THREAD_CACHE {
            central::global().return_chunk(chunk);
            return;
        }

        let node = chunk as *mut FreeNode;
        // SAFETY: the chunk is dead; its first word becomes the link.
        unsafe { (*node).next = self.head };
        self.head = node;
        self.count += 1;
    }
}

impl Drop for ThreadChunkCache {
    fn drop(&mut self) {
        let central = central::global();
        let mut chunk = self.head;
        while !chunk.is_null() {
            // SAFETY: as above; the list is exclusively ours.
            let next = unsafe { (*chunk).next };
            central.return_chunk(chunk as *mut u8);
            chunk = next;
        }
        self.head = core::ptr::null_mut();
        self.count = 0;
    }
}
