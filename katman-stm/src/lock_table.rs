//! Striped commit-lock table.
//!
//! A fixed array of 2^20 cache-line-padded spin flags. A `TVar`'s address
//! hashes to a stripe; committing transactions take the stripes of their
//! write targets, in globally sorted index order, for the duration of the
//! publish. Readers never lock; they only ask `is_locked` during
//! commit-time validation. Distinct variables may collide on one stripe;
//! that only serializes their commits, never their data.

use core::sync::atomic::{AtomicBool, Ordering};
use crossbeam_utils::Backoff;
use foldhash::fast::FixedState;
use once_cell::race::OnceBox;
use std::hash::BuildHasher;

/// Number of stripes. At 64 bytes per padded flag the table costs 64 MiB;
/// the tradeoff is a collision rate low enough to ignore.
pub const STRIPE_COUNT: usize = 1 << 20;

const STRIPE_MASK: usize = STRIPE_COUNT - 1;

#[repr(align(64))]
struct Stripe {
    flag: AtomicBool,
}

pub(crate) struct StripedLockTable {
    stripes: Box<[Stripe]>,
    hasher: FixedState,
}

impl StripedLockTable {
    fn new() -> Self {
        Self {
            stripes: (0..STRIPE_COUNT)
                .map(|_| Stripe {
                    flag: AtomicBool::new(false),
                })
                .collect(),
            // Fixed seed: an address must hash to the same stripe every
            // time it is looked up.
            hasher: FixedState::default(),
        }
    }

    /// Stripe index for a variable address.
    #[inline]
    pub(crate) fn stripe_index(&self, addr: *const ()) -> usize {
        self.hasher.hash_one(addr as usize) as usize & STRIPE_MASK
    }

    /// Spin until the stripe is owned.
    ///
    /// Not reentrant: locking an index twice from one thread deadlocks.
    /// Callers dedup their index sets first.
    pub(crate) fn lock_index(&self, index: usize) {
        let stripe = &self.stripes[index];
        let backoff = Backoff::new();
        loop {
            // Test phase: read-only spin keeps the line shared.
            if stripe.flag.load(Ordering::Relaxed) {
                backoff.snooze();
                continue;
            }
            if !stripe.flag.swap(true, Ordering::Acquire) {
                return;
            }
            backoff.snooze();
        }
    }

    #[inline]
    pub(crate) fn unlock_index(&self, index: usize) {
        self.stripes[index].flag.store(false, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_locked_index(&self, index: usize) -> bool {
        self.stripes[index].flag.load(Ordering::Acquire)
    }
}

static TABLE: OnceBox<StripedLockTable> = OnceBox::new();

#[inline]
pub(crate) fn global() -> &'static StripedLockTable {
    TABLE.get_or_init(|| Box::new(StripedLockTable::new()))
}
