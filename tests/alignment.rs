//! Alignment tests: the allocator must honor every power-of-two alignment a
//! `Layout` can carry, from word-sized up to multiples of the page size.

use hcmalloc::HcMalloc;
use std::alloc::{GlobalAlloc, Layout};

#[global_allocator]
static GLOBAL: HcMalloc = HcMalloc;

fn check_alignment(size: usize, align: usize) {
    let layout = Layout::from_size_align(size, align).unwrap();
    let ptr = unsafe { GLOBAL.alloc(layout) };
    assert!(!ptr.is_null(), "alloc failed: size {size}, align {align}");
    assert_eq!(
        ptr as usize % align,
        0,
        "misaligned: size {size}, align {align}, ptr {:p}",
        ptr
    );
    // The memory must actually be writable across its whole extent.
    unsafe {
        *ptr = 0x11;
        *ptr.add(size - 1) = 0x22;
        assert_eq!(*ptr, 0x11);
        GLOBAL.dealloc(ptr, layout);
    }
}

#[test]
fn word_alignments_small_sizes() {
    for align in [1usize, 2, 4, 8] {
        for size in [1usize, 7, 8, 24, 100, 1000] {
            check_alignment(size.max(align), align);
        }
    }
}

#[test]
fn over_aligned_small_objects() {
    for align in [16usize, 32, 64, 128, 256] {
        for mult in [1usize, 2, 3] {
            check_alignment(align * mult, align);
        }
    }
}

#[test]
fn page_level_alignments() {
    for align in [512usize, 1024, 4096, 8192] {
        check_alignment(align, align);
        check_alignment(align * 2, align);
    }
}

#[test]
fn beyond_page_alignment_goes_large() {
    // align > page size cannot be served from a carved span.
    for align in [16 * 1024usize, 64 * 1024] {
        check_alignment(align, align);
    }
}

#[test]
fn aligned_large_objects() {
    for align in [16usize, 4096] {
        check_alignment(512 * 1024, align);
    }
}

#[test]
fn alignment_mixed_with_plain_allocations() {
    // Interleave aligned and unaligned requests of the same size class and
    // make sure nothing tramples anything.
    let mut live = Vec::new();
    for i in 0..200 {
        let (size, align) = if i % 2 == 0 { (256, 256) } else { (250, 8) };
        let layout = Layout::from_size_align(size, align).unwrap();
        let ptr = unsafe { GLOBAL.alloc(layout) };
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % align, 0);
        unsafe { std::ptr::write_bytes(ptr, i as u8, size) };
        live.push((ptr, layout, i as u8));
    }
    for (ptr, layout, tag) in live {
        unsafe {
            for off in 0..layout.size() {
                assert_eq!(*ptr.add(off), tag);
            }
            GLOBAL.dealloc(ptr, layout);
        }
    }
}

#[test]
fn alignment_via_repr_aligned_type() {
    #[repr(align(64))]
    struct CacheLine([u8; 64]);

    let boxed = Box::new(CacheLine([7; 64]));
    assert_eq!(&*boxed as *const CacheLine as usize % 64, 0);
    assert_eq!(boxed.0[63], 7);
}
