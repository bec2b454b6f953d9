//! Miri-compatible shim backed by std::alloc.
//!
//! Miri can't run real mmap/VirtualAlloc, so page runs come from the system
//! allocator at our page alignment. System allocations carry a one-word size
//! header so `sys_free` can reconstruct the layout. This keeps all the
//! unsafe pointer logic in the allocator checkable under Miri.

extern crate alloc;

use core::alloc::Layout;

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    let layout = Layout::from_size_align(size, crate::config::PAGE_SIZE).unwrap();
    unsafe { alloc::alloc::alloc_zeroed(layout) }
}

pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    let layout = Layout::from_size_align(size, crate::config::PAGE_SIZE).unwrap();
    unsafe { alloc::alloc::dealloc(ptr, layout) };
}

const HEADER: usize = 16;

pub unsafe fn sys_alloc(size: usize, align: usize) -> *mut u8 {
    let align = align.max(HEADER);
    let layout = Layout::from_size_align(size + align, align).unwrap();
    let raw = unsafe { alloc::alloc::alloc(layout) };
    if raw.is_null() {
        return raw;
    }
    unsafe {
        let user = raw.add(align);
        (user.sub(HEADER) as *mut usize).write(size);
        (user.sub(HEADER / 2) as *mut usize).write(align);
        user
    }
}

pub unsafe fn sys_free(ptr: *mut u8) {
    unsafe {
        let size = (ptr.sub(HEADER) as *const usize).read();
        let align = (ptr.sub(HEADER / 2) as *const usize).read();
        let layout = Layout::from_size_align(size + align, align).unwrap();
        alloc::alloc::dealloc(ptr.sub(align), layout);
    }
}
