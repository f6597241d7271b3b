//! Slab header and embedded free list
//!
//! # Safety
//!
//! A slab is a contiguous byte range with a [`SlabHeader`] at its start and
//! fixed-size element slots packed against its end:
//!
//! ```text
//! base                    base + first_offset                base + slab_size
//! | header | (slack) | slot 0 | slot 1 | ... | slot max_count-1 |
//! ```
//!
//! Vacant slots that were handed out before carry the address of the next
//! vacant slot in their first word. Slots past the bump cursor have never
//! been handed out and are not on the free list.
//!
//! ## Invariants
//!
//! - `allocated <= max_count`
//! - `first_offset <= next_offset <= slab_size`, and the cursor only moves forward
//! - Every free-list entry lies in `[first_offset, next_offset)` on a slot boundary
//! - A slot is either live, on the free list, or past the cursor, never two of these

use core::ptr::{self, NonNull};

use crate::error::{MemoryError, MemoryResult};
use crate::list::ListNode;
use crate::utils::is_aligned;

/// Bytes reserved at the start of every slab for its header
pub const SLAB_HEADER_SIZE: usize = size_of::<SlabHeader>();

/// Vacant slot viewed as a free-list link
#[repr(C)]
struct FreeElement {
    next: *mut FreeElement,
}

/// Bookkeeping stored in the first bytes of every slab
///
/// `node` must stay the first field: list nodes are cast back to headers.
#[repr(C)]
pub struct SlabHeader {
    node: ListNode,
    slab_size: usize,
    element_size: usize,
    max_count: usize,
    allocated: usize,
    next_offset: usize,
    free_head: *mut FreeElement,
}

/// State transition reported by [`Slab::free`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// The last live element was returned; the slab can be retired
    Emptied,
    /// A full slab has room again
    Reopened,
    /// Neither of the above
    Unchanged,
}

/// Handle to a slab header living inside raw memory
///
/// The handle does not own the memory. Whoever carved the slab decides when
/// the backing bytes are released.
#[derive(Debug)]
pub struct Slab {
    header: NonNull<SlabHeader>,
}

impl Slab {
    /// Writes a fresh header at `base` and returns a handle to it
    ///
    /// Returns `None` when the range cannot hold a single element, when
    /// `element_size` is not a multiple of the pointer width, or when
    /// `slab_size` is not pointer-aligned.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `slab_size` bytes,
    /// aligned to at least `align_of::<SlabHeader>()`, and not used for
    /// anything else until the slab is abandoned.
    pub unsafe fn init(base: NonNull<u8>, slab_size: usize, element_size: usize) -> Option<Self> {
        let word = size_of::<usize>();
        if element_size < word
            || !is_aligned(element_size, word)
            || !is_aligned(slab_size, word)
            || slab_size <= SLAB_HEADER_SIZE
        {
            return None;
        }
        debug_assert!(is_aligned(base.as_ptr() as usize, align_of::<SlabHeader>()));

        let max_count = (slab_size - SLAB_HEADER_SIZE) / element_size;
        if max_count == 0 {
            return None;
        }

        let header = base.cast::<SlabHeader>();
        // SAFETY: caller guarantees `base` is writable, aligned and large enough.
        unsafe {
            header.as_ptr().write(SlabHeader {
                node: ListNode::new(),
                slab_size,
                element_size,
                max_count,
                allocated: 0,
                // Slots are packed against the end so `next_offset < slab_size`
                // is an exact "room left" test.
                next_offset: slab_size - max_count * element_size,
                free_head: ptr::null_mut(),
            });
        }
        Some(Self { header })
    }

    /// Recovers the slab that embeds `node`
    ///
    /// # Safety
    ///
    /// `node` must be the link node of a header written by [`Slab::init`]
    /// whose memory is still live.
    pub unsafe fn from_node(node: NonNull<ListNode>) -> Self {
        // `node` is the first field of a #[repr(C)] header.
        Self {
            header: node.cast::<SlabHeader>(),
        }
    }

    /// Recovers the slab whose header sits at `base`
    ///
    /// # Safety
    ///
    /// A header written by [`Slab::init`] must live at `base`.
    pub unsafe fn from_base(base: NonNull<u8>) -> Self {
        Self {
            header: base.cast::<SlabHeader>(),
        }
    }

    /// Hands out one element, or `None` if the slab is exhausted
    ///
    /// Recycled slots are reused most-recently-freed first; otherwise the
    /// bump cursor advances. An exhausted slab is left untouched.
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        let h = self.header_mut();
        if h.allocated == h.max_count {
            return None;
        }

        if let Some(slot) = NonNull::new(h.free_head) {
            // SAFETY: free-list entries are vacant slots inside the slab whose
            // first word was written by `free`.
            h.free_head = unsafe { (*slot.as_ptr()).next };
            h.allocated += 1;
            return Some(slot.cast());
        }

        if h.next_offset < h.slab_size {
            let offset = h.next_offset;
            h.next_offset += h.element_size;
            h.allocated += 1;
            // SAFETY: offset < slab_size, so the slot lies inside the slab.
            return Some(unsafe { self.base().add(offset) });
        }

        None
    }

    /// Returns `element` to the slab's free list
    ///
    /// Rejects pointers outside the slab, off a slot boundary, or past the
    /// bump cursor with [`MemoryError::ForeignPointer`]. A release into a
    /// slab with no live elements, or of the slot already at the head of the
    /// free list, fails with [`MemoryError::DoubleFree`]. A rejected call
    /// leaves the slab untouched.
    pub fn free(&mut self, element: NonNull<u8>) -> MemoryResult<FreeOutcome> {
        let addr = element.as_ptr() as usize;
        let base = self.base_addr();
        let (first, cursor, element_size) = {
            let h = self.header();
            (
                base + h.slab_size - h.max_count * h.element_size,
                base + h.next_offset,
                h.element_size,
            )
        };

        if addr < first || addr >= cursor || (addr - first) % element_size != 0 {
            return Err(MemoryError::foreign_pointer(addr));
        }

        let slot = element.as_ptr().cast::<FreeElement>();
        let h = self.header_mut();
        if h.allocated == 0 || slot == h.free_head {
            return Err(MemoryError::double_free(addr));
        }

        // SAFETY: `slot` is a slot of this slab that the caller no longer uses,
        // and slots are pointer-aligned and at least one word wide.
        unsafe { slot.write(FreeElement { next: h.free_head }) };
        h.free_head = slot;

        let was_full = h.allocated == h.max_count;
        h.allocated -= 1;

        Ok(if h.allocated == 0 {
            FreeOutcome::Emptied
        } else if was_full {
            FreeOutcome::Reopened
        } else {
            FreeOutcome::Unchanged
        })
    }

    /// Link node used to thread the slab onto a [`List`](crate::list::List)
    pub fn node(&self) -> NonNull<ListNode> {
        self.header.cast::<ListNode>()
    }

    /// Start of the slab (the header address)
    pub fn base(&self) -> NonNull<u8> {
        self.header.cast::<u8>()
    }

    /// One past the last byte of the slab
    pub fn end_addr(&self) -> usize {
        self.base_addr() + self.header().slab_size
    }

    /// Whether `ptr` lies inside the slab's element area
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let h = self.header();
        let first = self.base_addr() + h.slab_size - h.max_count * h.element_size;
        addr >= first && addr < self.end_addr()
    }

    pub fn slab_size(&self) -> usize {
        self.header().slab_size
    }

    pub fn element_size(&self) -> usize {
        self.header().element_size
    }

    pub fn max_count(&self) -> usize {
        self.header().max_count
    }

    /// Live elements
    pub fn allocated(&self) -> usize {
        self.header().allocated
    }

    pub fn is_full(&self) -> bool {
        let h = self.header();
        h.allocated == h.max_count
    }

    pub fn is_empty(&self) -> bool {
        self.header().allocated == 0
    }

    fn base_addr(&self) -> usize {
        self.header.as_ptr() as usize
    }

    fn header(&self) -> &SlabHeader {
        // SAFETY: the handle was built from a live header (constructor contracts).
        unsafe { self.header.as_ref() }
    }

    fn header_mut(&mut self) -> &mut SlabHeader {
        // SAFETY: as in `header`; `&mut self` serialises mutation through this handle.
        unsafe { self.header.as_mut() }
    }
}

// SAFETY: a Slab is a pointer into memory owned by whichever pool carved it;
// that pool serialises every access behind its own locks.
unsafe impl Send for Slab {}
