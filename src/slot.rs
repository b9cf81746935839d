//! Thread slots and the slot manager.
//!
//! Every thread that pins itself owns a [`ThreadSlot`] holding its locally
//! observed epoch. Slots are allocated from a growing array of segments
//! (initial segment 32 slots, each subsequent segment doubling the total)
//! and recycled through a lock-free reuse stack when a thread exits. Slot
//! memory is never freed for the lifetime of the process, so `&'static`
//! references to slots stay valid across thread lifetimes.

use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Sentinel epoch meaning "this slot is not inside a critical section".
pub(crate) const INACTIVE: u64 = u64::MAX;

/// Slots in the first segment. Each later segment doubles total capacity.
const INITIAL_CAPACITY: usize = 32;

/// One per-thread reservation.
///
/// `local_epoch` is the epoch the owning thread observed when it entered its
/// current critical section, or [`INACTIVE`]. `next_free` threads the slot
/// into the reuse stack while unowned.
pub(crate) struct ThreadSlot {
    pub(crate) local_epoch: AtomicU64,
    pub(crate) in_critical: AtomicBool,
    next_free: AtomicPtr<ThreadSlot>,
}

impl ThreadSlot {
    fn new() -> Self {
        Self {
            local_epoch: AtomicU64::new(INACTIVE),
            in_critical: AtomicBool::new(false),
            next_free: AtomicPtr::new(core::ptr::null_mut()),
        }
    }
}

/// Owns every slot segment plus the reuse stack.
///
/// The segment vector is only mutated under `expand_lock`; iteration also
/// takes the lock so the vector is stable while scanned. The reuse stack is
/// a Treiber stack over `next_free`; slots are immortal, so popped pointers
/// are always dereferenceable.
pub(crate) struct SlotManager {
    free_head: AtomicPtr<ThreadSlot>,
    segments: Mutex<Vec<&'static [ThreadSlot]>>,
    capacity: AtomicUsize,
}

impl SlotManager {
    pub(crate) fn new() -> Self {
        Self {
            free_head: AtomicPtr::new(core::ptr::null_mut()),
            segments: Mutex::new(Vec::new()),
            capacity: AtomicUsize::new(0),
        }
    }

    /// Take a slot, growing the segment array when the reuse stack is empty.
    pub(crate) fn acquire(&self) -> &'static ThreadSlot {
        if let Some(slot) = self.pop_free() {
            return slot;
        }
        self.expand_and_acquire()
    }

    /// Return a slot to the reuse stack. The caller must have cleared the
    /// slot (epoch [`INACTIVE`]) before releasing it.
    pub(crate) fn release(&self, slot: &'static ThreadSlot) {
        debug_assert_eq!(slot.local_epoch.load(Ordering::Relaxed), INACTIVE);
        self.push_free(slot);
    }

    /// Visit every slot ever allocated. Runs under the expansion lock so the
    /// segment array cannot move underneath the closure.
    pub(crate) fn for_each_slot<F: FnMut(&ThreadSlot)>(&self, mut f: F) {
        let segments = self.segments.lock().unwrap();
        for segment in segments.iter() {
            for slot in segment.iter() {
                f(slot);
            }
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    #[cold]
    fn expand_and_acquire(&self) -> &'static ThreadSlot {
        let mut segments = self.segments.lock().unwrap();

        // Double-check: another thread may have expanded while we waited.
        if let Some(slot) = self.pop_free() {
            return slot;
        }

        let current = self.capacity.load(Ordering::Relaxed);
        let grow_by = if current == 0 { INITIAL_CAPACITY } else { current };

        // Slot memory lives for the rest of the process; leaking the
        // segment is what makes the 'static references sound.
        let slots: &'static [ThreadSlot] =
            Box::leak((0..grow_by).map(|_| ThreadSlot::new()).collect());

        for slot in &slots[..grow_by - 1] {
            self.push_free(slot);
        }

        segments.push(slots);
        self.capacity.fetch_add(grow_by, Ordering::Relaxed);

        &slots[grow_by - 1]
    }

    fn push_free(&self, slot: &'static ThreadSlot) {
        let slot_ptr = slot as *const ThreadSlot as *mut ThreadSlot;
        let mut head = self.free_head.load(Ordering::Relaxed);
        loop {
            slot.next_free.store(head, Ordering::Relaxed);
            match self.free_head.compare_exchange_weak(
                head,
                slot_ptr,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => head = observed,
            }
        }
    }

    fn pop_free(&self) -> Option<&'static ThreadSlot> {
        let mut head = self.free_head.load(Ordering::Acquire);
        loop {
            if head.is_null() {
                return None;
            }
            // SAFETY: slots are never freed, so a pointer that was ever on
            // the stack remains dereferenceable.
            let next = unsafe { (*head).next_free.load(Ordering::Relaxed) };
            match self.free_head.compare_exchange_weak(
                head,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(unsafe { &*head }),
                Err(observed) => head = observed,
            }
        }
    }
}
