//! Global commit clock.

use core::sync::atomic::{AtomicU64, Ordering};

/// 64-bit monotonic transaction clock.
///
/// `now()` bounds a transaction's snapshot; `tick()` mints the commit
/// timestamp stamped onto every version a committing transaction
/// publishes. Ticks are globally unique and strictly increasing; at one
/// tick per nanosecond the counter outlives the hardware by centuries, so
/// wrap-around is not handled.
#[repr(align(64))]
pub struct GlobalClock {
    clock: AtomicU64,
}

impl GlobalClock {
    pub(crate) const fn new() -> Self {
        Self {
            clock: AtomicU64::new(0),
        }
    }

    /// A recent timestamp; never exceeds the latest `tick()` result.
    #[inline]
    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Mint the next timestamp.
    #[inline]
    pub fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::AcqRel) + 1
    }
}
