//! Reverse map from page ID to owning `Span`, as a 3-level radix tree.
//!
//! For 48-bit virtual addresses with a 13-bit page shift there are 35 bits of
//! page ID, split root 12 / mid 12 / leaf 11. The root array is static
//! (32 KiB); mid and leaf nodes are lazily mapped from the OS.
//!
//! Reads are lock-free (`AtomicPtr` with Acquire); the free path looks up
//! spans without holding the page cache lock. Writes must happen under the
//! page cache lock (single writer, many readers).
//!
//! Every span the page cache knows about — free or lent out — is registered
//! over its full page range. A page with no entry belongs to no span.

use crate::config::PAGE_SIZE;
use crate::platform;
use crate::span::Span;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

const ROOT_BITS: usize = 12;
const MID_BITS: usize = 12;
const LEAF_BITS: usize = 11;

const ROOT_LEN: usize = 1 << ROOT_BITS;
const MID_LEN: usize = 1 << MID_BITS;
const LEAF_LEN: usize = 1 << LEAF_BITS;

const MID_SHIFT: usize = LEAF_BITS;
const ROOT_SHIFT: usize = LEAF_BITS + MID_BITS;

const MID_MASK: usize = (1 << MID_BITS) - 1;
const LEAF_MASK: usize = (1 << LEAF_BITS) - 1;

#[repr(C)]
struct MidNode {
    children: [AtomicPtr<LeafNode>; MID_LEN],
}

#[repr(C)]
struct LeafNode {
    spans: [AtomicPtr<Span>; LEAF_LEN],
}

/// 3-level radix tree for `page_id -> *mut Span` lookup.
pub struct PageMap {
    root: [AtomicPtr<MidNode>; ROOT_LEN],
}

unsafe impl Send for PageMap {}
unsafe impl Sync for PageMap {}

/// Const-initialized array of null `AtomicPtr`s.
macro_rules! null_atomic_array {
    ($len:expr, $T:ty) => {{
        // SAFETY: a null AtomicPtr has the same bit pattern as zeroed memory.
        unsafe { core::mem::transmute::<[usize; $len], [AtomicPtr<$T>; $len]>([0usize; $len]) }
    }};
}

impl PageMap {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            root: null_atomic_array!(ROOT_LEN, MidNode),
        }
    }

    /// Look up the span owning `page_id`. Null if no span claims the page.
    /// Lock-free.
    #[inline]
    pub fn get(&self, page_id: usize) -> *mut Span {
        let root_idx = page_id >> ROOT_SHIFT;
        let mid_idx = (page_id >> MID_SHIFT) & MID_MASK;
        let leaf_idx = page_id & LEAF_MASK;

        if root_idx >= ROOT_LEN {
            return ptr::null_mut();
        }

        let mid = self.root[root_idx].load(Ordering::Acquire);
        if mid.is_null() {
            return ptr::null_mut();
        }

        let leaf = unsafe { (*mid).children[mid_idx].load(Ordering::Acquire) };
        if leaf.is_null() {
            return ptr::null_mut();
        }

        unsafe { (*leaf).spans[leaf_idx].load(Ordering::Acquire) }
    }

    /// Point `page_id` at `span` (or clear it with null).
    ///
    /// # Safety
    ///
    /// Must be called under external synchronization (the page cache lock).
    pub unsafe fn set(&self, page_id: usize, span: *mut Span) {
        let root_idx = page_id >> ROOT_SHIFT;
        let mid_idx = (page_id >> MID_SHIFT) & MID_MASK;
        let leaf_idx = page_id & LEAF_MASK;

        assert!(root_idx < ROOT_LEN, "page_id out of range for page map");

        let mut mid = self.root[root_idx].load(Ordering::Acquire);
        if mid.is_null() {
            mid = unsafe { Self::alloc_node::<MidNode>() };
            assert!(!mid.is_null(), "failed to allocate page map mid node");
            // Release so readers see the zeroed node contents.
            self.root[root_idx].store(mid, Ordering::Release);
        }

        let mut leaf = unsafe { (*mid).children[mid_idx].load(Ordering::Acquire) };
        if leaf.is_null() {
            leaf = unsafe { Self::alloc_node::<LeafNode>() };
            assert!(!leaf.is_null(), "failed to allocate page map leaf node");
            unsafe { (*mid).children[mid_idx].store(leaf, Ordering::Release) };
        }

        unsafe { (*leaf).spans[leaf_idx].store(span, Ordering::Release) };
    }

    /// Register `span` for every page it covers.
    ///
    /// # Safety
    ///
    /// Must be called under external synchronization.
    pub unsafe fn register_span(&self, span: *mut Span) {
        let start = unsafe { (*span).page_id };
        let count = unsafe { (*span).page_count };
        for page_id in start..start + count {
            unsafe { self.set(page_id, span) };
        }
    }

    /// Clear every page `span` covers.
    ///
    /// # Safety
    ///
    /// Must be called under external synchronization.
    pub unsafe fn unregister_span(&self, span: *mut Span) {
        let start = unsafe { (*span).page_id };
        let count = unsafe { (*span).page_count };
        for page_id in start..start + count {
            unsafe { self.set(page_id, ptr::null_mut()) };
        }
    }

    unsafe fn alloc_node<T>() -> *mut T {
        let size = core::mem::size_of::<T>();
        let alloc_size = (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        // page_alloc returns zeroed memory, which is valid for AtomicPtr (all null).
        let ptr = unsafe { platform::page_alloc(alloc_size) };
        ptr.cast::<T>()
    }
}
