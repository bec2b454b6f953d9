//! Unix implementation: mmap for page runs, malloc/posix_memalign for the
//! large-object bypass.

use crate::config::PAGE_SIZE;
use core::ffi::c_void;
use core::ptr;

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    // Our page size (8 KiB) exceeds the kernel's (usually 4 KiB), and mmap
    // only guarantees kernel-page alignment. Over-allocate by one of our
    // pages and trim both ends to guarantee the stronger alignment.
    let raw = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size + PAGE_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == libc::MAP_FAILED {
        return ptr::null_mut();
    }

    let raw_addr = raw as usize;
    let aligned_addr = (raw_addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);

    let lead = aligned_addr - raw_addr;
    if lead > 0 {
        unsafe { libc::munmap(raw_addr as *mut c_void, lead) };
    }

    let trail = (raw_addr + size + PAGE_SIZE) - (aligned_addr + size);
    if trail > 0 {
        unsafe { libc::munmap((aligned_addr + size) as *mut c_void, trail) };
    }

    aligned_addr as *mut u8
}

pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    unsafe { libc::munmap(ptr as *mut c_void, size) };
}

pub unsafe fn sys_alloc(size: usize, align: usize) -> *mut u8 {
    // malloc already guarantees 16-byte alignment on every modern Unix.
    if align <= 16 {
        return unsafe { libc::malloc(size) as *mut u8 };
    }
    let mut out: *mut c_void = ptr::null_mut();
    let rc = unsafe { libc::posix_memalign(&mut out, align.max(core::mem::size_of::<usize>()), size) };
    if rc != 0 { ptr::null_mut() } else { out as *mut u8 }
}

pub unsafe fn sys_free(ptr: *mut u8) {
    unsafe { libc::free(ptr as *mut c_void) };
}
