//! Katman: epoch-based memory reclamation for concurrent data structures.
//!
//! Threads wrap access to shared pointers in a critical section obtained via
//! [`pin`]. Pointers unlinked from shared structures are handed to [`retire`]
//! (or [`retire_with`] for custom deleters) and are freed only once the global
//! epoch has advanced at least twice past the epoch in which they were
//! retired, so no thread that could still observe them is running inside a
//! critical section.
//!
//! # Design
//!
//! - **Per-thread epoch slots**: each participating thread owns a slot with
//!   its locally observed epoch. Slots live in a segment array that only
//!   grows; a lock-free reuse stack recycles slots across thread lifetimes.
//! - **Three retired lists**: retired pointers go into the list for the
//!   current epoch (mod 3). Advancing the epoch from `g` to `g + 1` reclaims
//!   the list that last received pointers at epoch `g - 2`.
//! - **Counted nesting**: `pin()` may be nested; only the outermost guard
//!   publishes and clears the epoch slot.
//!
//! # Example
//!
//! ```rust
//! use katman::{pin, retire, try_collect};
//!
//! let node = Box::into_raw(Box::new(42u64));
//!
//! {
//!     let _guard = pin();
//!     // Read shared pointers here; anything retired by other threads
//!     // stays alive until this guard is dropped and two epochs pass.
//!     unsafe { retire(node) };
//! }
//!
//! // Drive reclamation (normally happens as a side effect of unpinning).
//! for _ in 0..3 {
//!     try_collect();
//! }
//! ```

#![warn(missing_docs)]

mod epoch;
mod guard;
mod retired;
mod slot;

pub use epoch::{active_slots, slot_capacity, try_collect};
pub use guard::{Guard, pin, retire, retire_with};

/// Type-erased deleter invoked when a retired pointer is reclaimed.
pub type Deleter = unsafe fn(*mut u8);
