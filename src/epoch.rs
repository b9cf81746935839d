//! Global epoch state and the advancement rule.
//!
//! The epoch protocol keeps three retired lists. A pointer retired at epoch
//! `e` lands in list `e % 3`; that list is reclaimed when the epoch advances
//! to `e + 3`, which requires every active slot to have observed at least
//! `e + 2`. Any thread that could have loaded the pointer was pinned at an
//! epoch `<= e`, and an active slot blocks advancement past its own epoch,
//! so two full advances separate the last possible reader from the free.

use crate::Deleter;
use crate::retired::RetiredList;
use crate::slot::{INACTIVE, SlotManager, ThreadSlot};
use core::sync::atomic::{AtomicU64, Ordering, fence};
use once_cell::race::OnceBox;

/// Number of retired lists; also the reclamation lag in epochs.
const EPOCH_LISTS: usize = 3;

pub(crate) struct EbrState {
    global_epoch: AtomicU64,
    retired: [RetiredList; EPOCH_LISTS],
    slots: SlotManager,
}

impl EbrState {
    fn new() -> Self {
        Self {
            global_epoch: AtomicU64::new(0),
            retired: [RetiredList::new(), RetiredList::new(), RetiredList::new()],
            slots: SlotManager::new(),
        }
    }

    #[inline]
    pub(crate) fn epoch(&self) -> u64 {
        self.global_epoch.load(Ordering::Acquire)
    }

    pub(crate) fn acquire_slot(&self) -> &'static ThreadSlot {
        self.slots.acquire()
    }

    pub(crate) fn release_slot(&self, slot: &'static ThreadSlot) {
        self.slots.release(slot);
    }

    /// Publish the calling thread's slot for a new critical section.
    pub(crate) fn enter(&self, slot: &ThreadSlot) {
        let epoch = self.epoch();
        // SeqCst: the slot publish must be globally ordered before any
        // shared-pointer load inside the critical section, otherwise a
        // concurrent collector could scan past this slot, advance twice and
        // free what we are about to read.
        slot.local_epoch.store(epoch, Ordering::SeqCst);
        slot.in_critical.store(true, Ordering::Relaxed);
    }

    /// Clear the slot at the end of the outermost critical section and give
    /// the epoch a chance to move.
    pub(crate) fn leave(&self, slot: &ThreadSlot) {
        slot.in_critical.store(false, Ordering::Relaxed);
        slot.local_epoch.store(INACTIVE, Ordering::Release);
        self.try_advance();
    }

    /// Defer reclamation of `ptr` until two epochs after the current one.
    pub(crate) fn retire(&self, ptr: *mut u8, deleter: Deleter) {
        let epoch = self.epoch();
        self.retired[(epoch % EPOCH_LISTS as u64) as usize].push(ptr, deleter);
    }

    /// Attempt one epoch advance; on success reclaim the list that has aged
    /// out. Returns the number of pointers freed (0 on a blocked advance).
    pub(crate) fn try_advance(&self) -> usize {
        let epoch = self.epoch();

        // Pairs with the SeqCst publish in `enter`: after this fence the
        // scan observes every slot store that precedes any load the slot's
        // owner performed inside its critical section.
        fence(Ordering::SeqCst);

        let mut blocked = false;
        self.slots.for_each_slot(|slot| {
            let local = slot.local_epoch.load(Ordering::Acquire);
            if local != INACTIVE && local != epoch {
                blocked = true;
            }
        });
        if blocked {
            return 0;
        }

        if self
            .global_epoch
            .compare_exchange(epoch, epoch + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Someone else advanced first; let them reclaim.
            return 0;
        }

        let freed = self.retired[((epoch + 1) % EPOCH_LISTS as u64) as usize].drain();
        if freed > 0 {
            tracing::trace!(epoch = epoch + 1, freed, "epoch advanced");
        }
        freed
    }

    pub(crate) fn active_slots(&self) -> usize {
        let mut active = 0;
        self.slots.for_each_slot(|slot| {
            if slot.in_critical.load(Ordering::Acquire) {
                active += 1;
            }
        });
        active
    }

    pub(crate) fn slot_capacity(&self) -> usize {
        self.slots.capacity()
    }
}

static GLOBAL: OnceBox<EbrState> = OnceBox::new();

#[inline]
pub(crate) fn global() -> &'static EbrState {
    GLOBAL.get_or_init(|| Box::new(EbrState::new()))
}

/// Attempt to advance the global epoch and reclaim aged-out pointers.
///
/// Reclamation already happens as a side effect of dropping the outermost
/// [`Guard`](crate::Guard); this entry point exists so tests and shutdown
/// paths can drive it deterministically. Three successful calls with no
/// active critical sections are enough to free everything retired earlier.
///
/// Returns the number of pointers freed.
pub fn try_collect() -> usize {
    global().try_advance()
}

/// Number of slots currently inside a critical section.
pub fn active_slots() -> usize {
    global().active_slots()
}

/// Total thread-slot capacity allocated so far.
pub fn slot_capacity() -> usize {
    global().slot_capacity()
}
