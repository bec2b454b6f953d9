//! Thread cache (front end): per-thread free lists for lock-free allocation.
//!
//! Each thread owns one `ThreadCache` (wired up in `allocator.rs`). The fast
//! path — pop or push on the thread's own list — takes no lock at all. On a
//! miss the cache pulls a batch from the transfer/central tier, sized by a
//! slow-start rule: start with one object, double the allowance on every
//! miss, cap at the class's batch target. Quiet classes pay one trip per
//! object; hot classes amortize a whole batch per trip. When a list outgrows
//! its allowance, half of it is flushed back down.

use crate::central_cache::CentralCache;
use crate::page_cache::PageCache;
use crate::pagemap::PageMap;
use crate::size_class::{self, NUM_CLASSES};
use crate::span::FreeObject;
use crate::sync::SpinMutex;
use crate::tally;
use crate::transfer_cache::TransferCache;
use core::ptr;

/// Per-size-class free list within the thread cache.
struct FreeList {
    /// Head of the singly-linked intrusive free list.
    head: *mut FreeObject,
    /// Number of objects currently in this list.
    length: u32,
    /// Slow-start allowance: batch size for the next miss, and the length
    /// at which the list is flushed back. Starts at 1, doubles per miss,
    /// capped at the class's batch target.
    max_length: u32,
}

impl FreeList {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            length: 0,
            max_length: 1,
        }
    }

    #[inline]
    fn pop(&mut self) -> *mut FreeObject {
        let obj = self.head;
        if !obj.is_null() {
            self.head = unsafe { (*obj).next };
            self.length -= 1;
        }
        obj
    }

    #[inline]
    fn push(&mut self, obj: *mut FreeObject) {
        unsafe { (*obj).next = self.head };
        self.head = obj;
        self.length += 1;
    }

    /// Push a chain of `count` objects.
    fn push_range(&mut self, head: *mut FreeObject, count: u32) {
        if head.is_null() || count == 0 {
            return;
        }
        let mut tail = head;
        for _ in 1..count {
            let next = unsafe { (*tail).next };
            if next.is_null() {
                break;
            }
            tail = next;
        }
        unsafe { (*tail).next = self.head };
        self.head = head;
        self.length += count;
    }

    /// Pop up to `count` objects as a chain. Returns `(got, head)`.
    fn pop_range(&mut self, count: u32) -> (u32, *mut FreeObject) {
        let mut head: *mut FreeObject = ptr::null_mut();
        let mut popped = 0u32;
        while popped < count && !self.head.is_null() {
            let obj = self.head;
            unsafe {
                self.head = (*obj).next;
                (*obj).next = head;
            }
            head = obj;
            self.length -= 1;
            popped += 1;
        }
        (popped, head)
    }
}

/// Per-thread cache holding one free list per size class.
pub struct ThreadCache {
    lists: [FreeList; NUM_CLASSES],
}

impl Default for ThreadCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadCache {
    /// Const-constructible so it can live in a `thread_local!` / `#[thread_local]`
    /// slot with no lazy-init branch on the fast path.
    pub const fn new() -> Self {
        Self {
            lists: [const { FreeList::new() }; NUM_CLASSES],
        }
    }

    /// Allocate one object of class `class`. Null only on OOM.
    ///
    /// # Safety
    ///
    /// `class` must be a valid index, and the caller must be the sole user
    /// of this `ThreadCache` (it is not synchronized).
    #[inline]
    pub unsafe fn allocate(
        &mut self,
        class: usize,
        transfer: &TransferCache,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) -> *mut u8 {
        let obj = self.lists[class].pop();
        if !obj.is_null() {
            tally!(thread_cache_hits);
            return obj as *mut u8;
        }
        unsafe { self.fill(class, transfer, central, page_cache) }
    }

    /// Free one object of class `class` into this cache, flushing the list
    /// when it reaches its allowance.
    ///
    /// # Safety
    ///
    /// `ptr` must be an object of class `class` previously handed out by the
    /// allocator, and the caller must be the sole user of this `ThreadCache`.
    #[inline]
    pub unsafe fn deallocate(
        &mut self,
        ptr: *mut u8,
        class: usize,
        transfer: &TransferCache,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        pagemap: &PageMap,
    ) {
        let list = &mut self.lists[class];
        list.push(ptr as *mut FreeObject);

        if list.length >= list.max_length {
            unsafe { self.flush(class, transfer, central, page_cache, pagemap) };
        }
    }

    /// Miss path: pull a slow-start-sized batch from the tiers below, keep
    /// the head for the caller, stash the rest.
    #[cold]
    unsafe fn fill(
        &mut self,
        class: usize,
        transfer: &TransferCache,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) -> *mut u8 {
        tally!(thread_cache_misses);

        let target = size_class::batch_target(size_class::class_to_size(class)) as u32;
        let list = &mut self.lists[class];

        let ask = list.max_length.min(target).max(1);
        if list.max_length < target {
            list.max_length = (list.max_length * 2).min(target);
        }

        let (got, head) =
            unsafe { transfer.fetch_batch(class, ask as usize, central, page_cache) };
        if got == 0 {
            return ptr::null_mut();
        }

        let result = head;
        if got > 1 {
            let rest = unsafe { (*head).next };
            list.push_range(rest, (got - 1) as u32);
        }
        result as *mut u8
    }

    /// Return half the allowance (at least one object) to the tiers below.
    unsafe fn flush(
        &mut self,
        class: usize,
        transfer: &TransferCache,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        pagemap: &PageMap,
    ) {
        let list = &mut self.lists[class];
        let return_num = (list.max_length / 2).max(1);
        let (count, head) = list.pop_range(return_num);
        if count > 0 {
            unsafe {
                transfer.release_batch(class, head, count as usize, central, page_cache, pagemap)
            };
        }
    }

    /// Objects currently cached for `class`.
    pub fn cached(&self, class: usize) -> usize {
        self.lists[class].length as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SHIFT;
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    fn make_env() -> (
        &'static PageMap,
        SpinMutex<PageCache>,
        CentralCache,
        TransferCache,
    ) {
        let pm = Box::leak(Box::new(PageMap::new()));
        let page_cache = SpinMutex::new(PageCache::new(pm));
        (pm, page_cache, CentralCache::new(), TransferCache::new())
    }

    #[test]
    fn allocate_and_free_one() {
        let (pm, page_cache, central, transfer) = make_env();
        let mut tc = ThreadCache::new();
        let class = size_class::class_index(8);

        unsafe {
            let ptr = tc.allocate(class, &transfer, &central, &page_cache);
            assert!(!ptr.is_null());
            tc.deallocate(ptr, class, &transfer, &central, &page_cache, pm);
        }
    }

    #[test]
    fn freed_object_is_reused_lifo() {
        let (pm, page_cache, central, transfer) = make_env();
        let mut tc = ThreadCache::new();
        let class = size_class::class_index(48);

        unsafe {
            let p = tc.allocate(class, &transfer, &central, &page_cache);
            tc.deallocate(p, class, &transfer, &central, &page_cache, pm);
            let q = tc.allocate(class, &transfer, &central, &page_cache);
            assert_eq!(p, q);
            tc.deallocate(q, class, &transfer, &central, &page_cache, pm);
        }
    }

    #[test]
    fn slow_start_doubles_the_allowance() {
        let (pm, page_cache, central, transfer) = make_env();
        let mut tc = ThreadCache::new();
        let class = size_class::class_index(64);
        let target = size_class::batch_target(64) as u32;

        unsafe {
            // First miss asks for 1 object and leaves nothing cached.
            let p1 = tc.allocate(class, &transfer, &central, &page_cache);
            assert!(!p1.is_null());
            assert_eq!(tc.cached(class), 0);
            assert_eq!(tc.lists[class].max_length, 2);

            // Second miss pulls 2: one returned, one cached.
            let p2 = tc.allocate(class, &transfer, &central, &page_cache);
            assert_eq!(tc.cached(class), 1);
            assert_eq!(tc.lists[class].max_length, 4);

            // Third allocation is a hit; the fourth misses and pulls 4.
            let p3 = tc.allocate(class, &transfer, &central, &page_cache);
            assert_eq!(tc.cached(class), 0);
            let p4 = tc.allocate(class, &transfer, &central, &page_cache);
            assert_eq!(tc.cached(class), 3);
            assert_eq!(tc.lists[class].max_length, 8);

            for p in [p1, p2, p3, p4] {
                tc.deallocate(p, class, &transfer, &central, &page_cache, pm);
            }
        }

        // The allowance never exceeds the batch target.
        let mut allowance = 1u32;
        for _ in 0..32 {
            allowance = (allowance * 2).min(target);
        }
        assert_eq!(allowance, target);
    }

    #[test]
    fn long_list_flushes_back() {
        let (pm, page_cache, central, transfer) = make_env();
        let mut tc = ThreadCache::new();
        let class = size_class::class_index(32);

        unsafe {
            let mut ptrs = Vec::new();
            for _ in 0..200 {
                let p = tc.allocate(class, &transfer, &central, &page_cache);
                assert!(!p.is_null());
                ptrs.push(p);
            }
            for p in ptrs {
                tc.deallocate(p, class, &transfer, &central, &page_cache, pm);
            }
            // Flushing kept the list below its allowance.
            assert!(tc.cached(class) < tc.lists[class].max_length as usize);
        }
    }

    #[test]
    fn quiesced_spans_are_fully_reassembled() {
        let (pm, page_cache, central, transfer) = make_env();
        let mut tc = ThreadCache::new();
        let class = size_class::class_index(32);

        unsafe {
            let mut ptrs = Vec::new();
            for _ in 0..1000 {
                ptrs.push(tc.allocate(class, &transfer, &central, &page_cache));
            }
            let span = pm.get((ptrs[0] as usize) >> PAGE_SHIFT);
            assert!(!span.is_null());
            for p in ptrs {
                tc.deallocate(p, class, &transfer, &central, &page_cache, pm);
            }

            // Everything still lent out is held by the thread cache or the
            // transfer list; the flushes pushed the rest all the way down.
            let outstanding = tc.cached(class) + transfer.parked(class);
            assert!(outstanding < 1000);

            // The first span is still mapped either way: partially lent and
            // linked in the central list, or drained and free in the page
            // cache (free spans stay in the map).
            let still_mapped = pm.get((*span).page_id);
            assert!(!still_mapped.is_null());
            if outstanding == 0 {
                assert_eq!((*still_mapped).use_count, 0);
            }
        }
    }

    #[test]
    fn mixed_classes_stay_separate() {
        let (pm, page_cache, central, transfer) = make_env();
        let mut tc = ThreadCache::new();

        unsafe {
            let mut allocs: Vec<(usize, *mut u8)> = Vec::new();
            for size in [8usize, 32, 64, 144, 1024, 9 * 1024, 72 * 1024] {
                let class = size_class::class_index(size);
                for _ in 0..20 {
                    let p = tc.allocate(class, &transfer, &central, &page_cache);
                    assert!(!p.is_null());
                    // The pointer's span must be carved for this class.
                    let span = pm.get((p as usize) >> PAGE_SHIFT);
                    assert_eq!((*span).object_size, size_class::class_to_size(class));
                    allocs.push((class, p));
                }
            }
            for (class, p) in allocs {
                tc.deallocate(p, class, &transfer, &central, &page_cache, pm);
            }
        }
    }
}
