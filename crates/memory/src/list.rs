//! Intrusive circular doubly-linked list
//!
//! # Safety
//!
//! Structures embed a [`ListNode`] and are linked and unlinked in place; the
//! list never allocates per element. The only allocation is the sentinel,
//! boxed once so its address survives moves of the owning [`List`].
//!
//! ## Invariants
//!
//! - An empty list is a sentinel whose `next` and `prev` point at itself
//! - A linked node belongs to exactly one list at a time
//! - A node's memory must stay valid, and must not move, while it is linked
//! - Unlinked nodes carry null `next`/`prev`

use core::ptr::{self, NonNull};

/// Link field embedded in every structure that can be threaded onto a [`List`]
///
/// Place it as the first field of a `#[repr(C)]` struct so a node pointer
/// can be cast back to its container.
#[repr(C)]
#[derive(Debug)]
pub struct ListNode {
    next: *mut ListNode,
    prev: *mut ListNode,
}

impl ListNode {
    /// An unlinked node
    pub const fn new() -> Self {
        Self {
            next: ptr::null_mut(),
            prev: ptr::null_mut(),
        }
    }

    /// Whether the node is currently threaded onto a list
    pub fn is_linked(&self) -> bool {
        !self.next.is_null()
    }
}

impl Default for ListNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Circular list headed by a heap-pinned sentinel
pub struct List {
    sentinel: NonNull<ListNode>,
}

impl List {
    /// Creates an empty list
    pub fn new() -> Self {
        let sentinel = NonNull::from(Box::leak(Box::new(ListNode::new())));
        let raw = sentinel.as_ptr();
        // SAFETY: `raw` comes from a fresh, exclusively owned Box allocation.
        unsafe {
            (*raw).next = raw;
            (*raw).prev = raw;
        }
        Self { sentinel }
    }

    /// Whether the list holds no nodes
    pub fn is_empty(&self) -> bool {
        let raw = self.sentinel.as_ptr();
        // SAFETY: the sentinel lives as long as `self`.
        unsafe { (*raw).next == raw }
    }

    /// First node, if any
    pub fn front(&self) -> Option<NonNull<ListNode>> {
        // SAFETY: the sentinel lives as long as `self`.
        let next = unsafe { (*self.sentinel.as_ptr()).next };
        self.node_or_none(next)
    }

    /// Last node, if any
    pub fn back(&self) -> Option<NonNull<ListNode>> {
        // SAFETY: the sentinel lives as long as `self`.
        let prev = unsafe { (*self.sentinel.as_ptr()).prev };
        self.node_or_none(prev)
    }

    /// Counts the linked nodes by walking the ring
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Iterates nodes from front to back
    ///
    /// Nodes must not be unlinked while the iterator is alive.
    pub fn iter(&self) -> Iter<'_> {
        // SAFETY: the sentinel lives as long as `self`.
        let first = unsafe { (*self.sentinel.as_ptr()).next };
        Iter { list: self, cursor: first }
    }

    /// Links `node` at the front of the list
    ///
    /// # Safety
    ///
    /// `node` must be valid, unlinked, and must stay valid and pinned until
    /// it is unlinked again.
    pub unsafe fn push_front(&mut self, node: NonNull<ListNode>) {
        let head = self.sentinel.as_ptr();
        // SAFETY: caller guarantees `node`; the sentinel ring is well formed.
        unsafe { insert_between(node.as_ptr(), head, (*head).next) }
    }

    /// Links `node` at the back of the list
    ///
    /// # Safety
    ///
    /// Same contract as [`List::push_front`].
    pub unsafe fn push_back(&mut self, node: NonNull<ListNode>) {
        let head = self.sentinel.as_ptr();
        // SAFETY: caller guarantees `node`; the sentinel ring is well formed.
        unsafe { insert_between(node.as_ptr(), (*head).prev, head) }
    }

    /// Removes `node` from whichever list currently holds it
    ///
    /// # Safety
    ///
    /// `node` must be valid and linked, and the list holding it must not be
    /// accessed concurrently.
    pub unsafe fn unlink(node: NonNull<ListNode>) {
        let raw = node.as_ptr();
        // SAFETY: a linked node has valid neighbours (invariant of the ring).
        unsafe {
            let prev = (*raw).prev;
            let next = (*raw).next;
            debug_assert!(!prev.is_null() && !next.is_null(), "unlink of a detached node");
            (*next).prev = prev;
            (*prev).next = next;
            (*raw).next = ptr::null_mut();
            (*raw).prev = ptr::null_mut();
        }
    }

    fn node_or_none(&self, raw: *mut ListNode) -> Option<NonNull<ListNode>> {
        if raw == self.sentinel.as_ptr() {
            None
        } else {
            NonNull::new(raw)
        }
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for List {
    fn drop(&mut self) {
        // Detach any remaining nodes so they never point into freed memory.
        while let Some(node) = self.front() {
            // SAFETY: `node` is linked on this list.
            unsafe { Self::unlink(node) };
        }
        // SAFETY: the sentinel was created by Box::leak in `new` and is freed once.
        drop(unsafe { Box::from_raw(self.sentinel.as_ptr()) });
    }
}

impl core::fmt::Debug for List {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("List").field("len", &self.len()).finish()
    }
}

/// Front-to-back iterator over the nodes of a [`List`]
pub struct Iter<'a> {
    list: &'a List,
    cursor: *mut ListNode,
}

impl Iterator for Iter<'_> {
    type Item = NonNull<ListNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.list.node_or_none(self.cursor)?;
        // SAFETY: `current` is linked on `self.list`, so its `next` is valid.
        self.cursor = unsafe { (*current.as_ptr()).next };
        Some(current)
    }
}

/// # Safety
///
/// `prev` and `next` must be adjacent nodes of a well-formed ring and
/// `node` must be valid and detached.
unsafe fn insert_between(node: *mut ListNode, prev: *mut ListNode, next: *mut ListNode) {
    // SAFETY: upheld by the caller.
    unsafe {
        debug_assert!((*node).next.is_null(), "node is already linked");
        (*next).prev = node;
        (*node).next = next;
        (*node).prev = prev;
        (*prev).next = node;
    }
}
