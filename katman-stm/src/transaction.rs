//! The transaction engine.
//!
//! Timestamp-ordered MVCC with commit-time locking: loads walk version
//! chains against the snapshot taken at `begin`, stores stage private
//! nodes, and `commit` locks the write targets' stripes in sorted order,
//! ticks the clock, re-validates every read under a fence and only then
//! publishes.

use crate::clock::GlobalClock;
use crate::descriptor::{self, TransactionDescriptor, TxState};
use crate::errors::StmError;
use crate::lock_table;
use crate::node::{self, VersionNode};
use crate::var::TVar;
use core::alloc::Layout;
use core::sync::atomic::{Ordering, fence};
use katman_alloc::ThreadHeap;

/// Handle passed to the body of an `atomically` block.
///
/// All shared-state access inside a transaction goes through this handle;
/// anything else is invisible to conflict detection.
pub struct Transaction<'a> {
    clock: &'a GlobalClock,
    desc: &'a mut TransactionDescriptor,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(clock: &'a GlobalClock, desc: &'a mut TransactionDescriptor) -> Self {
        Self { clock, desc }
    }

    /// Start a fresh attempt: drop any leftover staged state and snapshot
    /// the clock.
    pub(crate) fn begin(&mut self) {
        self.desc.reset();
        debug_assert_eq!(self.desc.state, TxState::Active);
        self.desc.read_version = self.clock.now();
    }

    /// Read a variable at this transaction's snapshot.
    ///
    /// Own staged writes win over the shared state. Otherwise the head is
    /// recorded for commit-time validation and the chain is walked to the
    /// newest version at or below the snapshot; a chain pruned past the
    /// snapshot raises [`StmError::Retry`].
    pub fn load<T>(&mut self, var: &TVar<T>) -> Result<T, StmError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let addr = var as *const TVar<T> as *const ();

        // Read-your-own-writes: newest staged node for this variable.
        for entry in self.desc.write_set.iter().rev() {
            if entry.tmvar_addr as *const () == addr {
                let staged = entry.new_node as *const VersionNode<T>;
                // SAFETY: staged nodes are owned by this descriptor and
                // typed by the variable they were staged against.
                return Ok(unsafe { (*staged).payload.clone() });
            }
        }

        let head = var.load_head();
        // Recorded even though this load may succeed immediately: commit
        // must notice if the head moves between now and validation.
        self.desc
            .record_read(addr, head as *const (), TVar::<T>::validate_erased);

        let rv = self.desc.read_version;
        let mut curr = head;
        while !curr.is_null() {
            // SAFETY: the enclosing atomically holds an epoch pin, so
            // chain nodes (even concurrently severed ones) stay alive.
            let node = unsafe { &*curr };
            if node.write_ts <= rv {
                return Ok(node.payload.clone());
            }
            curr = node.prev.load(Ordering::Acquire);
        }

        // Every reachable version is newer than the snapshot: the history
        // was pruned past us. Start over with a fresh snapshot.
        Err(StmError::Retry)
    }

    /// Stage a write. Nothing is visible to other transactions until
    /// commit.
    pub fn store<T>(&mut self, var: &TVar<T>, value: T) -> Result<(), StmError>
    where
        T: Send + Sync + 'static,
    {
        let staged = node::alloc_node(0, core::ptr::null_mut(), value);
        let (committer, deleter) = descriptor::erased_ops_for::<T>();
        self.desc.record_write(
            var as *const TVar<T> as *mut (),
            staged as *mut (),
            committer,
            deleter,
        );
        Ok(())
    }

    /// Allocate an object whose lifetime is tied to the transaction's
    /// outcome: dropped and released if the transaction aborts, handed to
    /// the caller if it commits.
    ///
    /// The pointer may be stored into `TVar`s; linked structures built
    /// this way roll back cleanly when the body retries.
    pub fn alloc<T>(&mut self, value: T) -> *mut T {
        let layout = Layout::new::<T>();
        let raw = ThreadHeap::allocate_aligned(layout.size().max(1), layout.align());
        assert!(!raw.is_null(), "out of memory in transactional alloc");

        let ptr = raw as *mut T;
        // SAFETY: fresh block, correctly sized and aligned.
        unsafe { ptr.write(value) };
        self.desc
            .record_allocation(raw, descriptor::drop_allocation::<T>);
        ptr
    }

    /// Destroy an object previously produced by [`alloc`](Self::alloc)
    /// whose transaction has committed.
    ///
    /// # Safety
    ///
    /// The caller asserts that no concurrent reader can still reach `ptr`
    /// (for example because every transaction that could see it has
    /// finished), that it is not freed twice, and that it is not recorded
    /// in the current transaction's allocation list.
    pub unsafe fn free<T>(&mut self, ptr: *mut T) {
        if ptr.is_null() {
            return;
        }
        // SAFETY: per the contract above this is the sole owner.
        unsafe { core::ptr::drop_in_place(ptr) };
        ThreadHeap::deallocate(ptr as *mut u8);
    }

    /// Attempt to make the staged writes visible. True on success; false
    /// means a conflict was detected and the caller should retry.
    pub(crate) fn commit(&mut self) -> bool {
        // Read-only fast path: the snapshot was consistent throughout, no
        // locks, no clock tick.
        if self.desc.write_set.is_empty() {
            self.desc.state = TxState::Committed;
            self.desc.commit_allocations();
            self.desc.reset();
            return true;
        }

        let table = lock_table::global();

        // Lock phase: stripe indices of all write targets, sorted and
        // deduplicated. The global order is what makes two committers
        // with overlapping stripe sets deadlock-free.
        let mut indices: Vec<usize> = self
            .desc
            .write_set
            .iter()
            .map(|entry| table.stripe_index(entry.tmvar_addr as *const ()))
            .collect();
        indices.sort_unstable();
        indices.dedup();
        for index in indices {
            table.lock_index(index);
            self.desc.lock_set.push(index);
        }

        let wv = self.clock.tick();

        if !self.validate_read_set() {
            self.release_stripes();
            self.desc.state = TxState::Aborted;
            self.desc.reset();
            return false;
        }

        // Publish phase: install new heads in staging order; each
        // committer takes ownership of its node.
        for entry in self.desc.write_set.iter_mut() {
            // SAFETY: addresses and nodes were recorded with matching
            // erased ops; the stripe for each target is held.
            unsafe { (entry.committer)(entry.tmvar_addr, entry.new_node, wv) };
            entry.new_node = core::ptr::null_mut();
        }

        self.release_stripes();
        self.desc.commit_allocations();
        self.desc.state = TxState::Committed;
        self.desc.reset();
        true
    }

    /// Abandon the attempt and roll back staged state.
    pub(crate) fn abort(&mut self) {
        self.desc.state = TxState::Aborted;
        self.desc.reset();
    }

    /// Commit-time read validation.
    ///
    /// For each entry: the stripe must not be held by someone else
    /// (pre-check), the head must be the recorded pointer with a
    /// timestamp inside the snapshot, and, after a full fence, the
    /// stripe must still be free (post-check). The fence keeps the two
    /// independent loads from being reordered around the version check.
    fn validate_read_set(&self) -> bool {
        let table = lock_table::global();
        let rv = self.desc.read_version;

        for entry in &self.desc.read_set {
            let index = table.stripe_index(entry.tmvar_addr);
            if table.is_locked_index(index) && self.desc.lock_set.binary_search(&index).is_err() {
                return false;
            }

            // SAFETY: the entry was recorded against a live variable this
            // transaction still references.
            if !unsafe { (entry.validator)(entry.tmvar_addr, entry.expected_head, rv) } {
                return false;
            }

            fence(Ordering::SeqCst);

            if table.is_locked_index(index) && self.desc.lock_set.binary_search(&index).is_err() {
                return false;
            }
        }
        true
    }

    fn release_stripes(&mut self) {
        let table = lock_table::global();
        for &index in self.desc.lock_set.iter().rev() {
            table.unlock_index(index);
        }
        self.desc.lock_set.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stm;

    #[test]
    fn test_read_only_commit_leaves_head_untouched() {
        let stm = Stm::new();
        let var = stm.tvar(5u64);

        let head_before = var.load_head();
        let value = stm.atomically(|tx| tx.load(&var)).unwrap();
        assert_eq!(value, 5);
        assert!(core::ptr::eq(head_before, var.load_head()));

        // And again: two successive read-only commits are invisible.
        stm.atomically(|tx| tx.load(&var)).unwrap();
        assert!(core::ptr::eq(head_before, var.load_head()));
    }

    #[test]
    fn test_double_store_publishes_one_node() {
        let stm = Stm::new();
        let var = stm.tvar(0u64);
        let before = var.history_len();

        stm.atomically(|tx| {
            tx.store(&var, 1)?;
            tx.store(&var, 2)?;
            tx.store(&var, 3)
        })
        .unwrap();

        assert_eq!(var.history_len(), before + 1);
        assert_eq!(stm.atomically(|tx| tx.load(&var)).unwrap(), 3);
    }

    #[test]
    fn test_history_bound_holds_across_commits() {
        let stm = Stm::new();
        let var = stm.tvar(0u64);

        for i in 1..=32u64 {
            stm.atomically(|tx| tx.store(&var, i)).unwrap();
            assert!(var.history_len() <= crate::MAX_HISTORY);
        }
        assert_eq!(var.history_len(), crate::MAX_HISTORY);
        assert_eq!(stm.atomically(|tx| tx.load(&var)).unwrap(), 32);
    }

    #[test]
    fn test_stripes_released_after_every_outcome() {
        let stm = Stm::new();
        let var = stm.tvar(0u64);
        let table = crate::lock_table::global();
        let index = table.stripe_index(&var as *const _ as *const ());

        stm.atomically(|tx| tx.store(&var, 1)).unwrap();
        assert!(!table.is_locked_index(index));

        let result: Result<(), StmError> = stm.atomically(|tx| {
            tx.store(&var, 2)?;
            Err(StmError::user(std::io::Error::other("abort")))
        });
        assert!(result.is_err());
        assert!(!table.is_locked_index(index));
        assert_eq!(stm.atomically(|tx| tx.load(&var)).unwrap(), 1);
    }

    #[test]
    fn test_aborted_alloc_runs_destructor() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let stm = Stm::new();

        let observed = drops.clone();
        let result: Result<(), StmError> = stm.atomically(move |tx| {
            let _leaked = tx.alloc(Tracked(observed.clone()));
            Err(StmError::user(std::io::Error::other("boom")))
        });
        assert!(result.is_err());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
