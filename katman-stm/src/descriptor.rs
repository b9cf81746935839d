//! Transaction descriptors.
//!
//! One descriptor per thread, created on first use and reused by every
//! transaction the thread runs. It records the snapshot timestamp, the
//! read/write/lock sets and the transaction-local allocations, all
//! type-erased down to addresses and function pointers.

use crate::var::TVar;
use katman_alloc::ThreadHeap;

/// Validator function: `(tmvar_addr, expected_head, rv) -> still valid?`
pub(crate) type Validator = unsafe fn(*const (), *const (), u64) -> bool;

/// Committer function: `(tmvar_addr, new_node, wv)`.
pub(crate) type Committer = unsafe fn(*mut (), *mut (), u64);

/// Deleter for a staged node that never got published.
pub(crate) type NodeDeleter = unsafe fn(*mut ());

/// Dropper for a transaction-local allocation.
pub(crate) type AllocDropper = unsafe fn(*mut u8);

pub(crate) struct ReadLogEntry {
    pub(crate) tmvar_addr: *const (),
    pub(crate) expected_head: *const (),
    pub(crate) validator: Validator,
}

pub(crate) struct WriteLogEntry {
    pub(crate) tmvar_addr: *mut (),
    /// Exclusively owned until commit publishes it (then null).
    pub(crate) new_node: *mut (),
    pub(crate) committer: Committer,
    pub(crate) deleter: NodeDeleter,
}

pub(crate) struct Allocation {
    pub(crate) ptr: *mut u8,
    pub(crate) dropper: AllocDropper,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum TxState {
    Active,
    Committed,
    Aborted,
}

/// Read sets run long in pointer-chasing workloads; write and lock sets
/// stay short.
const READ_SET_CAPACITY: usize = 64;
const WRITE_SET_CAPACITY: usize = 16;

pub(crate) struct TransactionDescriptor {
    pub(crate) state: TxState,
    pub(crate) read_version: u64,
    pub(crate) read_set: Vec<ReadLogEntry>,
    pub(crate) write_set: Vec<WriteLogEntry>,
    /// Stripe indices currently held, in acquisition (ascending) order.
    pub(crate) lock_set: Vec<usize>,
    allocations: Vec<Allocation>,
}

impl TransactionDescriptor {
    pub(crate) fn new() -> Self {
        Self {
            state: TxState::Active,
            read_version: 0,
            read_set: Vec::with_capacity(READ_SET_CAPACITY),
            write_set: Vec::with_capacity(WRITE_SET_CAPACITY),
            lock_set: Vec::with_capacity(WRITE_SET_CAPACITY),
            allocations: Vec::with_capacity(WRITE_SET_CAPACITY),
        }
    }

    /// Discard every trace of the previous transaction: staged nodes go
    /// back to the heap, recorded allocations are rolled back, the sets
    /// are cleared. Stripes must already be released.
    pub(crate) fn reset(&mut self) {
        debug_assert!(self.lock_set.is_empty());

        for entry in self.write_set.drain(..) {
            if !entry.new_node.is_null() {
                // SAFETY: a non-null staged node is still owned by us.
                unsafe { (entry.deleter)(entry.new_node) };
            }
        }
        for alloc in self.allocations.drain(..) {
            // SAFETY: transaction-local allocations are still owned by us
            // until commit hands them to the user.
            unsafe { (alloc.dropper)(alloc.ptr) };
        }

        self.read_set.clear();
        self.read_version = 0;
        self.state = TxState::Active;
    }

    pub(crate) fn record_read(&mut self, addr: *const (), head: *const (), validator: Validator) {
        self.read_set.push(ReadLogEntry {
            tmvar_addr: addr,
            expected_head: head,
            validator,
        });
    }

    /// Stage a write. A second store to the same variable replaces the
    /// staged node in place, so one commit publishes one node per variable
    /// and timestamps along every chain stay strictly decreasing.
    pub(crate) fn record_write(
        &mut self,
        addr: *mut (),
        new_node: *mut (),
        committer: Committer,
        deleter: NodeDeleter,
    ) {
        for entry in self.write_set.iter_mut().rev() {
            if entry.tmvar_addr == addr {
                if !entry.new_node.is_null() {
                    // SAFETY: the superseded node never left this set.
                    unsafe { (entry.deleter)(entry.new_node) };
                }
                entry.new_node = new_node;
                return;
            }
        }
        self.write_set.push(WriteLogEntry {
            tmvar_addr: addr,
            new_node,
            committer,
            deleter,
        });
    }

    pub(crate) fn record_allocation(&mut self, ptr: *mut u8, dropper: AllocDropper) {
        self.allocations.push(Allocation { ptr, dropper });
    }

    /// The transaction committed: recorded allocations become user-owned.
    pub(crate) fn commit_allocations(&mut self) {
        self.allocations.clear();
    }
}

impl Drop for TransactionDescriptor {
    fn drop(&mut self) {
        self.reset();
    }
}

/// Erased dropper for one `alloc`-ed `T`: run the destructor, return the
/// memory.
pub(crate) unsafe fn drop_allocation<T>(ptr: *mut u8) {
    // SAFETY: `ptr` holds an initialized T from Transaction::alloc.
    unsafe { core::ptr::drop_in_place(ptr as *mut T) };
    ThreadHeap::deallocate(ptr);
}

/// Commit-side ops for staging against a typed variable.
pub(crate) fn erased_ops_for<T: Send + Sync + 'static>() -> (Committer, NodeDeleter) {
    (TVar::<T>::commit_erased, TVar::<T>::delete_erased)
}
