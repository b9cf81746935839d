//! Large-object spans.
//!
//! Requests above [`MAX_ALLOC`](crate::size_class::MAX_ALLOC) bypass the
//! slab machinery: a dedicated, chunk-aligned OS region gets a small span
//! header and the payload follows. Masking the payload pointer recovers the
//! header the same way it does for slabs, because the payload always starts
//! inside the region's first chunk.

use crate::central;
use crate::config::{CACHE_LINE, CHUNK_SIZE, round_up};
use crate::slab::ChunkKind;

/// Span header at the base of a large-object region.
#[repr(C, align(64))]
pub(crate) struct Span {
    kind: ChunkKind,
    /// Total mapped size, including this header.
    size: usize,
}

impl Span {
    const fn header_size(align: usize) -> usize {
        let align = if align > CACHE_LINE { align } else { CACHE_LINE };
        round_up(size_of::<Span>(), align)
    }

    /// Map a region for `nbytes` of payload aligned to `align`.
    /// Returns the payload pointer, or null on OS exhaustion.
    pub(crate) fn allocate(nbytes: usize, align: usize) -> *mut u8 {
        let header = Self::header_size(align);
        let total = round_up(nbytes + header, CHUNK_SIZE);

        let region = central::global().reserve_region(total);
        if region.is_null() {
            return core::ptr::null_mut();
        }

        let span = region as *mut Span;
        // SAFETY: fresh region, exclusively ours.
        unsafe {
            span.write(Span {
                kind: ChunkKind::Span,
                size: total,
            });
            region.add(header)
        }
    }

    /// Release the region containing `ptr` back to the OS.
    ///
    /// # Safety
    ///
    /// `ptr` must be a payload pointer previously returned by
    /// [`Span::allocate`], released exactly once.
    pub(crate) unsafe fn release(ptr: *mut u8) {
        let span = (ptr as usize & crate::config::CHUNK_MASK) as *mut Span;
        // SAFETY: the header lives at the region base; `size` is the
        // original mapping size.
        unsafe {
            debug_assert_eq!((*span).kind, ChunkKind::Span);
            central::global().release_region(span as *mut u8, (*span).size);
        }
    }
}
