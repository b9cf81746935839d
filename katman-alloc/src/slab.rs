//! Slab headers and the intrusive slab list.
//!
//! A slab is a 2 MiB chunk whose head holds the metadata below; the rest is
//! carved into `max_block_count` fixed-size blocks. `Slab::from_ptr` masks
//! any interior pointer back to the header, which is what makes sized-free
//! unnecessary throughout the allocator.

use crate::config::{CACHE_LINE, CHUNK_MASK, CHUNK_SIZE, round_up};
use crate::free_list::{AtomicFreeList, FreeNode};
use crate::pool::SizeClassPool;
use core::sync::atomic::{AtomicPtr, Ordering};

/// Discriminates the header found at a chunk base.
///
/// Every chunk header type in this crate is `#[repr(C)]` with the kind tag
/// as its first field, so the tag can be read before the concrete header
/// type is known.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub(crate) enum ChunkKind {
    /// Size-class slab carved into uniform blocks.
    Slab = 1,
    /// Large-object span; the payload follows the header directly.
    Span = 2,
}

/// Keeps the remote list on its own cache line, away from the hot
/// owner-side header fields.
#[repr(align(64))]
struct RemoteFree(AtomicFreeList);

/// Slab metadata, resident at the start of its chunk.
///
/// `owner` names the size-class pool the slab belongs to. It is atomic
/// because remote threads read it while the owning thread may be tearing
/// the pool down; a null owner marks an orphaned slab whose blocks can only
/// be returned through the remote list.
#[repr(C, align(64))]
pub(crate) struct Slab {
    kind: ChunkKind,
    block_size: u32,
    max_block_count: u32,
    allocated_count: u32,
    bump: *mut u8,
    end: *mut u8,
    local_free: *mut FreeNode,
    owner: AtomicPtr<SizeClassPool>,
    pub(crate) prev: *mut Slab,
    pub(crate) next: *mut Slab,

    remote_free: RemoteFree,
}

impl Slab {
    /// Initialize a slab header in place at the start of `chunk`.
    ///
    /// # Safety
    ///
    /// `chunk` must be a fresh, chunk-aligned region of [`CHUNK_SIZE`]
    /// bytes with no other live references.
    pub(crate) unsafe fn create_at(
        chunk: *mut u8,
        owner: *mut SizeClassPool,
        block_size: u32,
    ) -> *mut Slab {
        debug_assert!(!chunk.is_null());
        debug_assert_eq!(chunk as usize & !CHUNK_MASK, 0);
        debug_assert!(block_size as usize >= size_of::<*mut u8>());

        let head_size = round_up(size_of::<Slab>(), CACHE_LINE);
        let slab = chunk as *mut Slab;

        // SAFETY: exclusive access to the fresh chunk.
        unsafe {
            slab.write(Slab {
                kind: ChunkKind::Slab,
                block_size,
                max_block_count: ((CHUNK_SIZE - head_size) / block_size as usize) as u32,
                allocated_count: 0,
                bump: chunk.add(head_size),
                end: chunk.add(CHUNK_SIZE),
                local_free: core::ptr::null_mut(),
                owner: AtomicPtr::new(owner),
                prev: core::ptr::null_mut(),
                next: core::ptr::null_mut(),
                remote_free: RemoteFree(AtomicFreeList::new()),
            });
        }
        slab
    }

    /// Recover the chunk header enclosing `ptr`.
    #[inline]
    pub(crate) fn from_ptr(ptr: *const u8) -> *mut Slab {
        (ptr as usize & CHUNK_MASK) as *mut Slab
    }

    /// Read the kind tag at a chunk base.
    ///
    /// # Safety
    ///
    /// `ptr` must point into a live chunk owned by this allocator.
    #[inline]
    pub(crate) unsafe fn kind_of(ptr: *const u8) -> ChunkKind {
        // SAFETY: every chunk header is repr(C) with the kind tag at
        // offset 0, so the tag can be read without knowing which header
        // type lives there.
        unsafe { *((ptr as usize & CHUNK_MASK) as *const ChunkKind) }
    }

    /// Owner-side allocation: local free list, then a remote reclaim, then
    /// the bump pointer. Null when the slab is exhausted.
    pub(crate) fn allocate(&mut self) -> *mut u8 {
        debug_assert_eq!(self.kind, ChunkKind::Slab);
        if !self.local_free.is_null() {
            return self.alloc_from_list();
        }

        if !self.remote_free.0.is_empty() && self.reclaim_remote() > 0 {
            return self.alloc_from_list();
        }

        let next_bump = self.bump as usize + self.block_size as usize;
        if next_bump <= self.end as usize {
            let ptr = self.bump;
            self.bump = next_bump as *mut u8;
            self.allocated_count += 1;
            return ptr;
        }

        core::ptr::null_mut()
    }

    /// Owner-side free. Returns true when the slab became empty.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block of this slab, freed exactly once.
    pub(crate) unsafe fn free_local(&mut self, ptr: *mut u8) -> bool {
        let node = ptr as *mut FreeNode;
        // SAFETY: the block is dead; its first word becomes the link.
        unsafe { (*node).next = self.local_free };
        self.local_free = node;
        self.allocated_count -= 1;
        self.allocated_count == 0
    }

    /// Cross-thread free: park the block on the lock-free remote list.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block of this slab, freed exactly once.
    pub(crate) unsafe fn free_remote(&self, ptr: *mut u8) {
        unsafe { self.remote_free.0.push(ptr) };
    }

    /// Splice everything from the remote list into the local one. Returns
    /// the number of blocks recovered.
    pub(crate) fn reclaim_remote(&mut self) -> u32 {
        let head = self.remote_free.0.steal_all();
        if head.is_null() {
            return 0;
        }

        let mut count = 0u32;
        let mut tail = head;
        loop {
            count += 1;
            // SAFETY: the stolen list is exclusively ours; nodes live in
            // this slab's block area.
            let next = unsafe { (*tail).next };
            if next.is_null() {
                break;
            }
            tail = next;
        }

        unsafe { (*tail).next = self.local_free };
        self.local_free = head;
        self.allocated_count -= count;
        count
    }

    /// Strip the header before the chunk goes back to a chunk cache.
    pub(crate) fn destroy_for_reuse(&mut self) {
        debug_assert!(self.is_empty());
        self.owner.store(core::ptr::null_mut(), Ordering::Release);
    }

    /// Detach from whichever pool owned it; remote frees keep working, the
    /// chunk itself is leaked.
    pub(crate) fn orphan(&self) {
        self.owner.store(core::ptr::null_mut(), Ordering::Release);
    }

    #[inline]
    pub(crate) fn block_size(&self) -> u32 {
        self.block_size
    }

    #[inline]
    pub(crate) fn allocated_count(&self) -> u32 {
        self.allocated_count
    }

    #[inline]
    pub(crate) fn owner(&self) -> *mut SizeClassPool {
        self.owner.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.allocated_count == self.max_block_count
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.allocated_count == 0
    }

    fn alloc_from_list(&mut self) -> *mut u8 {
        let node = self.local_free;
        // SAFETY: non-null head checked by callers; the link is valid.
        self.local_free = unsafe { (*node).next };
        self.allocated_count += 1;
        node as *mut u8
    }
}

/// Intrusive doubly-linked list of slabs, threaded through the headers.
pub(crate) struct SlabList {
    head: *mut Slab,
    tail: *mut Slab,
}

impl SlabList {
    pub(crate) const fn new() -> Self {
        Self {
            head: core::ptr::null_mut(),
            tail: core::ptr::null_mut(),
        }
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    #[inline]
    pub(crate) fn front(&self) -> *mut Slab {
        self.head
    }

    pub(crate) unsafe fn push_front(&mut self, slab: *mut Slab) {
        unsafe {
            (*slab).prev = core::ptr::null_mut();
            (*slab).next = self.head;
            if !self.head.is_null() {
                (*self.head).prev = slab;
            } else {
                self.tail = slab;
            }
        }
        self.head = slab;
    }

    pub(crate) unsafe fn push_back(&mut self, slab: *mut Slab) {
        unsafe {
            (*slab).next = core::ptr::null_mut();
            (*slab).prev = self.tail;
            if !self.tail.is_null() {
                (*self.tail).next = slab;
            } else {
                self.head = slab;
            }
        }
        self.tail = slab;
    }

    pub(crate) unsafe fn remove(&mut self, slab: *mut Slab) {
        unsafe {
            if !(*slab).prev.is_null() {
                (*(*slab).prev).next = (*slab).next;
            } else {
                self.head = (*slab).next;
            }

            if !(*slab).next.is_null() {
                (*(*slab).next).prev = (*slab).prev;
            } else {
                self.tail = (*slab).prev;
            }

            (*slab).prev = core::ptr::null_mut();
            (*slab).next = core::ptr::null_mut();
        }
    }

    pub(crate) unsafe fn pop_front(&mut self) -> *mut Slab {
        let slab = self.head;
        if !slab.is_null() {
            unsafe { self.remove(slab) };
        }
        slab
    }

    /// Rotate the head to the tail; used to cycle rescue candidates.
    pub(crate) unsafe fn rotate_front_to_back(&mut self) {
        if self.head == self.tail {
            return;
        }
        let first = self.head;
        unsafe {
            self.head = (*first).next;
            (*self.head).prev = core::ptr::null_mut();

            (*self.tail).next = first;
            (*first).prev = self.tail;
            (*first).next = core::ptr::null_mut();
        }
        self.tail = first;
    }
}
