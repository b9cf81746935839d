//! katman-alloc: a thread-caching slab allocator.
//!
//! Three tiers, front to back:
//!
//! - **Thread heap** (fast path, no locks): one size-class pool per class,
//!   each pool carving fixed-size blocks out of slabs; plus a small
//!   per-thread cache of recently returned chunks.
//! - **Central heap** (spin-locked): a bounded free list of 2 MiB chunks
//!   shared by all threads.
//! - **OS** (mmap): naturally aligned 2 MiB chunks, over-allocated and
//!   trimmed so any interior pointer recovers its chunk header by masking.
//!
//! Cross-thread deallocation never touches the owning thread's state: the
//! block is pushed onto the slab's lock-free remote free list and reclaimed
//! by the owner during its own allocations.
//!
//! # Usage
//!
//! ```rust
//! use katman_alloc::ThreadHeap;
//!
//! let ptr = ThreadHeap::allocate(24);
//! assert!(!ptr.is_null());
//! ThreadHeap::deallocate(ptr);
//! ```

pub mod config;
mod central;
mod chunk_cache;
mod free_list;
mod heap;
mod large;
mod pool;
pub mod size_class;
mod slab;
mod sys;

pub use heap::ThreadHeap;
pub use size_class::{CLASS_COUNT, MAX_ALLOC, MIN_ALLOC};
