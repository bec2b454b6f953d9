//! Top-level allocator: ties the tiers together and exposes the two entry
//! points plus a `GlobalAlloc` façade.
//!
//! All mutable state lives in module statics: the page map, the page cache
//! behind one spinlock, the central cache and transfer cache with per-class
//! locks, and one thread cache per thread. The `HcMalloc` struct itself is
//! zero-sized.
//!
//! Thread cache strategy (fastest to slowest):
//! - `nightly` feature: `#[thread_local]` (single TLS read, no branches)
//! - `std` feature: `std::thread_local!` with const-init
//! - neither: transfer/central tier only (locked)

use crate::central_cache::CentralCache;
use crate::config::{MAX_BYTES, PAGE_SHIFT, PAGE_SIZE};
use crate::page_cache::PageCache;
use crate::pagemap::PageMap;
use crate::platform;
use crate::size_class;
use crate::sync::SpinMutex;
use crate::tally;
use crate::transfer_cache::TransferCache;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

cfg_if::cfg_if! {
    if #[cfg(any(feature = "nightly", feature = "std"))] {
        use crate::thread_cache::ThreadCache;
    } else {
        use crate::span::FreeObject;
    }
}

pub(crate) static PAGE_MAP: PageMap = PageMap::new();
pub(crate) static PAGE_CACHE: SpinMutex<PageCache> = SpinMutex::new(PageCache::new(&PAGE_MAP));
pub(crate) static CENTRAL_CACHE: CentralCache = CentralCache::new();
pub(crate) static TRANSFER_CACHE: TransferCache = TransferCache::new();

cfg_if::cfg_if! {
    if #[cfg(feature = "nightly")] {
        // No teardown: a thread keeps its cache until process exit, so the
        // slot needs no init or destroy protocol — just a raw pointer to it.
        #[thread_local]
        static mut TC: ThreadCache = ThreadCache::new();

        #[inline(always)]
        unsafe fn with_thread_cache<R>(f: impl FnOnce(&mut ThreadCache) -> R) -> Option<R> {
            Some(f(unsafe { &mut *core::ptr::addr_of_mut!(TC) }))
        }
    } else if #[cfg(feature = "std")] {
        std::thread_local! {
            static TC_CELL: core::cell::UnsafeCell<ThreadCache> = const {
                core::cell::UnsafeCell::new(ThreadCache::new())
            };
        }

        /// Runs `f` on this thread's cache; `None` if std's TLS is already
        /// torn down (thread shutdown), in which case the caller falls back
        /// to the shared tiers.
        #[inline(always)]
        unsafe fn with_thread_cache<R>(f: impl FnOnce(&mut ThreadCache) -> R) -> Option<R> {
            TC_CELL
                .try_with(|cell| f(unsafe { &mut *cell.get() }))
                .ok()
        }
    }
}

/// Allocate `size` bytes, 8-byte aligned. A size of 0 is treated as 1.
/// Requests above [`MAX_BYTES`] go straight to the system allocator.
/// Returns null when no memory is available.
///
/// Free the result with [`deallocate`] and the same `size`.
#[inline]
pub fn allocate(size: usize) -> *mut u8 {
    let size = if size == 0 { 1 } else { size };

    tally!(alloc_count);
    tally!(alloc_bytes, size);
    #[cfg(feature = "alloc-histogram")]
    crate::histogram::record(size);

    if size > MAX_BYTES {
        tally!(large_allocs);
        return unsafe { platform::sys_alloc(size, 8) };
    }
    unsafe { alloc_small(size_class::class_index(size)) }
}

/// Free a pointer obtained from [`allocate`] with the same `size`.
/// Null pointers are ignored.
///
/// # Safety
///
/// `ptr` must be null or a live allocation from [`allocate`], and `size`
/// must equal the size passed to that call. The size is how the owning
/// free list is found; a mismatched size corrupts the allocator.
#[inline]
pub unsafe fn deallocate(ptr: *mut u8, size: usize) {
    if ptr.is_null() {
        return;
    }
    let size = if size == 0 { 1 } else { size };

    tally!(dealloc_count);

    if size > MAX_BYTES {
        unsafe { platform::sys_free(ptr) };
        return;
    }
    unsafe { dealloc_small(ptr, size_class::class_index(size)) };
}

cfg_if::cfg_if! {
    if #[cfg(any(feature = "nightly", feature = "std"))] {
        #[inline(always)]
        unsafe fn alloc_small(class: usize) -> *mut u8 {
            let cached = unsafe {
                with_thread_cache(|tc| {
                    tc.allocate(class, &TRANSFER_CACHE, &CENTRAL_CACHE, &PAGE_CACHE)
                })
            };
            match cached {
                Some(ptr) => ptr,
                None => unsafe { alloc_shared(class) },
            }
        }

        #[inline(always)]
        unsafe fn dealloc_small(ptr: *mut u8, class: usize) {
            let cached = unsafe {
                with_thread_cache(|tc| {
                    tc.deallocate(ptr, class, &TRANSFER_CACHE, &CENTRAL_CACHE, &PAGE_CACHE, &PAGE_MAP)
                })
            };
            if cached.is_none() {
                unsafe { dealloc_shared(ptr, class) };
            }
        }

        /// Shared-tier fallback for threads whose TLS is unavailable.
        #[cold]
        unsafe fn alloc_shared(class: usize) -> *mut u8 {
            let (got, head) = unsafe {
                TRANSFER_CACHE.fetch_batch(class, 1, &CENTRAL_CACHE, &PAGE_CACHE)
            };
            if got == 0 { ptr::null_mut() } else { head as *mut u8 }
        }

        #[cold]
        unsafe fn dealloc_shared(ptr: *mut u8, class: usize) {
            let obj = ptr as *mut crate::span::FreeObject;
            unsafe {
                (*obj).next = ptr::null_mut();
                TRANSFER_CACHE.release_batch(class, obj, 1, &CENTRAL_CACHE, &PAGE_CACHE, &PAGE_MAP);
            }
        }
    } else {
        // No TLS available at all: every request goes through the shared tiers.
        #[inline]
        unsafe fn alloc_small(class: usize) -> *mut u8 {
            let (got, head) = unsafe {
                TRANSFER_CACHE.fetch_batch(class, 1, &CENTRAL_CACHE, &PAGE_CACHE)
            };
            if got == 0 { ptr::null_mut() } else { head as *mut u8 }
        }

        #[inline]
        unsafe fn dealloc_small(ptr: *mut u8, class: usize) {
            let obj = ptr as *mut FreeObject;
            unsafe {
                (*obj).next = ptr::null_mut();
                TRANSFER_CACHE.release_batch(class, obj, 1, &CENTRAL_CACHE, &PAGE_CACHE, &PAGE_MAP);
            }
        }
    }
}

/// Thread-caching allocator handle.
///
/// Register as the global allocator with:
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: hcmalloc::HcMalloc = hcmalloc::HcMalloc;
/// ```
pub struct HcMalloc;

unsafe impl GlobalAlloc for HcMalloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        if size == 0 {
            return layout.align() as *mut u8;
        }

        tally!(alloc_count);
        tally!(alloc_bytes, size);
        #[cfg(feature = "alloc-histogram")]
        crate::histogram::record(size);

        let align = layout.align();

        if align <= 8 {
            if size <= MAX_BYTES {
                return unsafe { alloc_small(size_class::class_index(size)) };
            }
        } else {
            // Objects are laid out at multiples of the class size from a
            // page boundary, so a class serves this layout only when its
            // size is a multiple of the alignment.
            let effective_size = size.max(align);
            if effective_size <= MAX_BYTES && align <= PAGE_SIZE {
                let class = size_class::class_index(effective_size);
                if size_class::class_to_size(class) % align == 0 {
                    return unsafe { alloc_small(class) };
                }
            }
        }

        tally!(large_allocs);
        unsafe { platform::sys_alloc(size, align) }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        tally!(dealloc_count);

        // Recover the true size class from span metadata rather than the
        // caller's layout: realloc may shrink in place, leaving the caller
        // with a smaller layout than the object's real class.
        let span = PAGE_MAP.get((ptr as usize) >> PAGE_SHIFT);
        if span.is_null() {
            // Never ours: the system allocator served it.
            unsafe { platform::sys_free(ptr) };
            return;
        }

        let object_size = unsafe { (*span).object_size };
        debug_assert!(object_size > 0, "freed pointer maps to an unsliced span");
        unsafe { dealloc_small(ptr, size_class::class_index(object_size)) };
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() && layout.size() > 0 {
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if ptr.is_null() || layout.size() == 0 {
            let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
            return unsafe { self.alloc(new_layout) };
        }

        if new_size == 0 {
            unsafe { self.dealloc(ptr, layout) };
            return layout.align() as *mut u8;
        }

        tally!(realloc_count);

        // Usable size comes from the span when we own the pointer; system
        // allocations have no span and are sized by the caller's layout.
        let span = PAGE_MAP.get((ptr as usize) >> PAGE_SHIFT);
        let old_usable = if !span.is_null() {
            unsafe { (*span).object_size }
        } else {
            layout.size()
        };

        // Shrink (or same class): stay in place.
        if new_size <= old_usable {
            return ptr;
        }

        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        let new_ptr = unsafe { self.alloc(new_layout) };
        if !new_ptr.is_null() {
            unsafe {
                ptr::copy_nonoverlapping(ptr, new_ptr, old_usable.min(new_size));
                self.dealloc(ptr, layout);
            }
        }
        new_ptr
    }
}

#[cfg(feature = "nightly")]
unsafe impl core::alloc::Allocator for HcMalloc {
    fn allocate(
        &self,
        layout: Layout,
    ) -> Result<core::ptr::NonNull<[u8]>, core::alloc::AllocError> {
        let ptr = unsafe { GlobalAlloc::alloc(self, layout) };
        if ptr.is_null() {
            Err(core::alloc::AllocError)
        } else {
            let slice = core::ptr::slice_from_raw_parts_mut(ptr, layout.size());
            Ok(unsafe { core::ptr::NonNull::new_unchecked(slice) })
        }
    }

    unsafe fn deallocate(&self, ptr: core::ptr::NonNull<u8>, layout: Layout) {
        unsafe { GlobalAlloc::dealloc(self, ptr.as_ptr(), layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sized_roundtrip_smallest_class() {
        let p = allocate(6);
        assert!(!p.is_null());
        unsafe {
            deallocate(p, 6);
            // LIFO thread cache: the same object comes back.
            let q = allocate(6);
            assert_eq!(p, q);
            deallocate(q, 6);
        }

        // The object's span stays mapped after the cache quiesces.
        let span = PAGE_MAP.get((p as usize) >> PAGE_SHIFT);
        assert!(!span.is_null());
    }

    #[test]
    fn zero_size_is_one_byte() {
        let p = allocate(0);
        assert!(!p.is_null());
        unsafe {
            *p = 0xA5;
            deallocate(p, 0);
        }
    }

    #[test]
    fn null_free_is_noop() {
        unsafe { deallocate(ptr::null_mut(), 64) };
    }

    #[test]
    fn large_requests_bypass_the_tiers() {
        let size = 300 * 1024;
        let p = allocate(size);
        assert!(!p.is_null());
        unsafe {
            *p = 1;
            *p.add(size - 1) = 2;
        }
        // No span was created: the page map has never heard of it.
        assert!(PAGE_MAP.get((p as usize) >> PAGE_SHIFT).is_null());
        unsafe { deallocate(p, size) };
    }

    #[test]
    fn boundary_sizes_land_in_their_classes() {
        for size in [
            1usize,
            8,
            9,
            128,
            129,
            1024,
            1025,
            8 * 1024,
            8 * 1024 + 1,
            64 * 1024,
            64 * 1024 + 1,
            MAX_BYTES,
        ] {
            let p = allocate(size);
            assert!(!p.is_null(), "size {}", size);
            let span = PAGE_MAP.get((p as usize) >> PAGE_SHIFT);
            assert!(!span.is_null(), "size {}", size);
            unsafe {
                assert_eq!(
                    (*span).object_size,
                    size_class::round_up(size),
                    "size {}",
                    size
                );
                // Aligned to the object grid within the span.
                let base = (*span).start_addr() as usize;
                assert_eq!((p as usize - base) % (*span).object_size, 0);
                deallocate(p, size);
            }
        }
    }

    #[test]
    fn global_alloc_respects_alignment() {
        unsafe {
            for align in [16usize, 32, 64, 256, 4096] {
                let layout = Layout::from_size_align(align * 2, align).unwrap();
                let p = HcMalloc.alloc(layout);
                assert!(!p.is_null());
                assert_eq!(p as usize % align, 0, "align {}", align);
                HcMalloc.dealloc(p, layout);
            }
        }
    }

    #[test]
    fn global_alloc_zeroed() {
        unsafe {
            let layout = Layout::from_size_align(512, 8).unwrap();
            let p = HcMalloc.alloc_zeroed(layout);
            assert!(!p.is_null());
            for i in 0..512 {
                assert_eq!(*p.add(i), 0);
            }
            HcMalloc.dealloc(p, layout);
        }
    }

    #[test]
    fn realloc_grows_and_preserves() {
        unsafe {
            let layout = Layout::from_size_align(64, 8).unwrap();
            let p = HcMalloc.alloc(layout);
            for i in 0..64 {
                *p.add(i) = i as u8;
            }

            let q = HcMalloc.realloc(p, layout, 4096);
            assert!(!q.is_null());
            for i in 0..64 {
                assert_eq!(*q.add(i), i as u8);
            }

            // Shrinking back stays in place.
            let grown_layout = Layout::from_size_align(4096, 8).unwrap();
            let r = HcMalloc.realloc(q, grown_layout, 32);
            assert_eq!(r, q);

            HcMalloc.dealloc(r, Layout::from_size_align(32, 8).unwrap());
        }
    }

    #[test]
    fn repeated_cycles_reuse_one_span() {
        // A steady alloc/free cadence must not keep carving fresh spans.
        let first = allocate(40);
        unsafe { deallocate(first, 40) };
        let span = PAGE_MAP.get((first as usize) >> PAGE_SHIFT);
        assert!(!span.is_null());

        for _ in 0..10_000 {
            let p = allocate(40);
            let s = PAGE_MAP.get((p as usize) >> PAGE_SHIFT);
            assert_eq!(s, span);
            unsafe { deallocate(p, 40) };
        }
    }
}
