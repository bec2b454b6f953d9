//! Transfer cache: a bounded per-size-class buffer between thread caches and
//! the central lists.
//!
//! Each class keeps a LIFO chain of free objects, capped at
//! `max(batch_target * TRANSFER_MULTIPLIER, 2)`. Batches flushed by one
//! thread can be handed to another without walking span free lists, which
//! takes the span-lookup cost off ping-pong workloads.
//!
//! Objects parked here have NOT been returned to their spans: their spans
//! keep them counted in `use_count`, so a span can never be released while
//! the transfer cache still holds one of its objects.
//!
//! Lock order: the transfer lock is always released before the central lock
//! is taken.

use crate::central_cache::CentralCache;
use crate::config::TRANSFER_MULTIPLIER;
use crate::page_cache::PageCache;
use crate::pagemap::PageMap;
use crate::size_class::{self, NUM_CLASSES};
use crate::span::FreeObject;
use crate::sync::SpinMutex;
use crate::tally;
use core::ptr;

/// Bounded object chain for one size class.
struct TransferList {
    head: *mut FreeObject,
    count: usize,
}

// SAFETY: only accessed through the enclosing SpinMutex.
unsafe impl Send for TransferList {}

impl TransferList {
    const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            count: 0,
        }
    }
}

/// Capacity of the transfer list for objects of `size` bytes.
#[inline]
fn capacity(size: usize) -> usize {
    (size_class::batch_target(size) * TRANSFER_MULTIPLIER).max(2)
}

/// Array of transfer lists, one per size class, each with its own lock
/// (separate from the central list locks).
pub struct TransferCache {
    lists: [SpinMutex<TransferList>; NUM_CLASSES],
}

impl Default for TransferCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferCache {
    pub const fn new() -> Self {
        Self {
            lists: [const { SpinMutex::new(TransferList::new()) }; NUM_CLASSES],
        }
    }

    /// Produce up to `want` objects of class `class`, draining the transfer
    /// list first and falling through to the central cache only when it is
    /// empty. Returns `(got, head)`; `got == 0` only on OOM.
    ///
    /// # Safety
    ///
    /// `class` must be a valid index; `central` and `page_cache` must be
    /// the instances every other caller uses.
    pub unsafe fn fetch_batch(
        &self,
        class: usize,
        want: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
    ) -> (usize, *mut FreeObject) {
        debug_assert!(want >= 1);
        {
            let mut tl = self.lists[class].lock();
            if tl.count > 0 {
                tally!(transfer_cache_hits);
                let take = want.min(tl.count);
                let head = tl.head;
                unsafe {
                    let mut tail = head;
                    for _ in 1..take {
                        tail = (*tail).next;
                    }
                    tl.head = (*tail).next;
                    (*tail).next = ptr::null_mut();
                }
                tl.count -= take;
                return (take, head);
            }
        }
        // Transfer lock released before the central lock.
        unsafe { central.fetch_batch(class, want, page_cache) }
    }

    /// Accept a chain of `count` objects of class `class`: park as many as
    /// the remaining capacity allows, hand the rest to the central cache.
    ///
    /// # Safety
    ///
    /// `head` must be a chain of at least `count` objects of this class.
    pub unsafe fn release_batch(
        &self,
        class: usize,
        head: *mut FreeObject,
        count: usize,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        pagemap: &PageMap,
    ) {
        debug_assert!(count >= 1);
        let cap = capacity(size_class::class_to_size(class));

        let mut rest_head = head;
        let mut rest_count = count;
        {
            let mut tl = self.lists[class].lock();
            if tl.count < cap {
                let take = (cap - tl.count).min(count);
                unsafe {
                    let mut tail = head;
                    for _ in 1..take {
                        tail = (*tail).next;
                    }
                    rest_head = (*tail).next;
                    (*tail).next = tl.head;
                }
                tl.head = head;
                tl.count += take;
                rest_count = count - take;
            }
        }
        // Transfer lock released before the central lock.
        if rest_count > 0 {
            unsafe { central.release_batch(class, rest_head, rest_count, page_cache, pagemap) };
        }
    }

    /// Objects currently parked for `class`.
    pub fn parked(&self, class: usize) -> usize {
        self.lists[class].lock().count
    }
}
