//! Central cache (middle tier): per-size-class span lists shared by every
//! thread cache.
//!
//! Each size class has its own `SpinMutex<CentralList>`, so classes never
//! contend with each other. A span stays linked in its class's list for as
//! long as it is sliced; `fetch_batch` scans for the first span with free
//! objects and carves a fresh span from the page cache when there is none.
//!
//! Lock discipline: the slot lock is always released before the page cache
//! lock is taken, on both the fetch path (carving) and the release path
//! (returning an empty span). The two locks are never held together.

use crate::config::PAGE_SHIFT;
use crate::page_cache::PageCache;
use crate::pagemap::PageMap;
use crate::size_class::{self, NUM_CLASSES};
use crate::span::{FreeObject, Span, SpanList};
use crate::sync::SpinMutex;
use crate::tally;
use core::ptr;
#[cfg(feature = "debug")]
use std::println;

/// Span list for a single size class. All mutation happens under the
/// per-class lock in [`CentralCache`].
pub struct CentralList {
    /// Every sliced span of this class, whether or not it has free objects.
    spans: SpanList,
}

// SAFETY: only accessed through the enclosing SpinMutex.
unsafe impl Send for CentralList {}

impl CentralList {
    pub const fn new() -> Self {
        Self {
            spans: SpanList::new(),
        }
    }

    /// First span with a non-empty free list, or null.
    fn first_nonempty(&self) -> *mut Span {
        let mut span = self.spans.head;
        while !span.is_null() {
            if !unsafe { (*span).free_list.is_null() } {
                return span;
            }
            span = unsafe { (*span).next };
        }
        ptr::null_mut()
    }
}

/// Array of central lists, one per size class, each individually locked.
pub struct CentralCache {
    lists: [SpinMutex<CentralList>; NUM_CLASSES],
}

impl Default for CentralCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CentralCache {
    pub const fn new() -> Self {
        Self {
            lists: [const { SpinMutex::new(CentralList::new()) }; NUM_CLASSES],
        }
    }

    /// Detach up to `want` objects of class `class` as a null-terminated
    /// chain. Returns `(got, head)` with `got >= 1` unless the OS is out of
    /// memory, in which case `(0, null)`.
    ///
    /// Objects come from a single span (the first one with free objects);
    /// when the class has none, a fresh span is fetched from the page cache
    /// and carved — with the slot lock dropped around the page cache call.
    ///
    /// # Safety
    ///
    /// `class` must be a valid index; `page_cache` must be the instance
    /// every other caller uses.
    pub unsafe fn fetch_batch(
        &self,
        class: usize,
        want: usize,
        page_cache: &SpinMutex<PageCache>,
    ) -> (usize, *mut FreeObject) {
        debug_assert!(want >= 1);
        let object_size = size_class::class_to_size(class);

        loop {
            {
                let list = self.lists[class].lock();
                let span = list.first_nonempty();
                if !span.is_null() {
                    unsafe {
                        // Walk `want` nodes (or to the end) and cut there.
                        let head = (*span).free_list;
                        let mut tail = head;
                        let mut got = 1usize;
                        while got < want && !(*tail).next.is_null() {
                            tail = (*tail).next;
                            got += 1;
                        }
                        (*span).free_list = (*tail).next;
                        (*tail).next = ptr::null_mut();
                        (*span).use_count += got as u32;
                        return (got, head);
                    }
                }
                // No free object anywhere in this class; drop the slot lock
                // before going to the page cache.
            }

            let pages = size_class::pages_per_fetch(object_size);
            let span = unsafe { page_cache.lock().acquire_span(pages) };
            if span.is_null() {
                return (0, ptr::null_mut());
            }

            // The span is not yet published anywhere, so carving needs no lock.
            unsafe { carve_span(span, object_size) };

            let mut list = self.lists[class].lock();
            unsafe { list.spans.push(span) };
        }
    }

    /// Return a chain of `count` objects of class `class` to their owning
    /// spans. A span whose last lent object comes home is handed back to the
    /// page cache, with the slot lock released around that call.
    ///
    /// # Safety
    ///
    /// `head` must be a chain of at least `count` objects previously fetched
    /// from this class.
    pub unsafe fn release_batch(
        &self,
        class: usize,
        mut head: *mut FreeObject,
        count: usize,
        page_cache: &SpinMutex<PageCache>,
        pagemap: &PageMap,
    ) {
        let mut remaining = count;
        let mut guard = self.lists[class].lock();

        while !head.is_null() && remaining > 0 {
            let obj = head;
            unsafe { head = (*obj).next };
            remaining -= 1;

            let page_id = (obj as usize) >> PAGE_SHIFT;
            let span = pagemap.get(page_id);
            // A pointer with no owning span means a caller bug (double free,
            // wrong size, foreign pointer). The structure cannot be trusted
            // past this point.
            assert!(!span.is_null(), "freed pointer belongs to no span");

            unsafe {
                debug_assert_eq!((*span).object_size, size_class::class_to_size(class));
                debug_assert!((*span).use_count > 0, "span use_count underflow");

                (*obj).next = (*span).free_list;
                (*span).free_list = obj;
                (*span).use_count -= 1;

                if (*span).use_count == 0 {
                    // Fully reassembled: give the pages back. The remaining
                    // chain is privately owned, so dropping the slot lock
                    // around the page cache call is safe.
                    guard.spans.remove(span);
                    (*span).free_list = ptr::null_mut();

                    #[cfg(feature = "debug")]
                    println!("[central] class {} span drained, releasing", class);

                    drop(guard);
                    page_cache.lock().release_span(span);
                    guard = self.lists[class].lock();
                }
            }
        }
    }

    /// Number of spans currently sliced for `class`.
    pub fn span_count(&self, class: usize) -> usize {
        self.lists[class].lock().spans.count
    }
}

/// Slice a freshly acquired span into `object_size`-byte objects, chained in
/// address order. The span must not be visible to any other thread yet.
unsafe fn carve_span(span: *mut Span, object_size: usize) {
    tally!(central_carves);
    unsafe {
        let base = (*span).start_addr();
        let num_objects = (*span).byte_size() / object_size;
        debug_assert!(num_objects >= 1);

        (*span).object_size = object_size;
        (*span).use_count = 0;

        let mut chain: *mut FreeObject = ptr::null_mut();
        for i in (0..num_objects).rev() {
            let obj = base.add(i * object_size) as *mut FreeObject;
            (*obj).next = chain;
            chain = obj;
        }
        (*span).free_list = chain;
    }
}
