//! Version nodes.
//!
//! Every value a `TVar` has ever held (up to the history bound) lives in a
//! `VersionNode` allocated from the thread heap. Nodes link newest-first
//! through `prev`; `write_ts` is the commit timestamp of the transaction
//! that published the node, or 0 for a genesis node and for nodes still
//! staged in a write set.

use core::alloc::Layout;
use core::sync::atomic::AtomicPtr;
use katman_alloc::ThreadHeap;

pub(crate) struct VersionNode<T> {
    pub(crate) write_ts: u64,
    pub(crate) prev: AtomicPtr<VersionNode<T>>,
    pub(crate) payload: T,
}

/// Allocate a node on the thread heap.
///
/// Panics when the OS refuses memory: the allocator's invariants are
/// intact at that point, and no caller can make progress without the node.
pub(crate) fn alloc_node<T>(
    write_ts: u64,
    prev: *mut VersionNode<T>,
    payload: T,
) -> *mut VersionNode<T> {
    let layout = Layout::new::<VersionNode<T>>();
    let raw = ThreadHeap::allocate_aligned(layout.size(), layout.align());
    assert!(!raw.is_null(), "out of memory allocating a version node");

    let node = raw as *mut VersionNode<T>;
    // SAFETY: fresh, correctly sized and aligned block.
    unsafe {
        node.write(VersionNode {
            write_ts,
            prev: AtomicPtr::new(prev),
            payload,
        });
    }
    node
}

/// Drop a node's payload and return its memory to the thread heap.
///
/// # Safety
///
/// `node` must have come from [`alloc_node`] and must not be referenced
/// again. Works from any thread; foreign blocks travel the remote path.
pub(crate) unsafe fn dealloc_node<T>(node: *mut VersionNode<T>) {
    // SAFETY: caller guarantees exclusive ownership.
    unsafe { core::ptr::drop_in_place(node) };
    ThreadHeap::deallocate(node as *mut u8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::Ordering;

    #[test]
    fn test_node_round_trip() {
        let node = alloc_node(0, core::ptr::null_mut(), String::from("genesis"));
        unsafe {
            assert_eq!((*node).write_ts, 0);
            assert!((*node).prev.load(Ordering::Relaxed).is_null());
            assert_eq!((*node).payload, "genesis");
            dealloc_node(node);
        }
    }

    #[test]
    fn test_high_alignment_payload() {
        #[repr(align(32))]
        #[derive(Clone, Copy)]
        struct Wide([u8; 32]);

        let node = alloc_node(0, core::ptr::null_mut(), Wide([9; 32]));
        assert_eq!(node as usize % align_of::<VersionNode<Wide>>(), 0);
        unsafe { dealloc_node(node) };
    }
}
