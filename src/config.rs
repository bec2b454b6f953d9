//! Compile-time configuration constants.
//!
//! The raw values come from `hcmalloc.toml` (or the file named by the
//! `HCMALLOC_CONFIG` env var), validated and emitted by `build.rs`.

include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));

// An intrusive free list stores the next pointer in the object itself, so no
// size class may be smaller than a machine word. The smallest bracket is 8.
const _: () = assert!(core::mem::size_of::<usize>() <= 8);
const _: () = assert!(PAGE_SIZE == 1 << PAGE_SHIFT);
const _: () = assert!(MAX_BYTES % 8192 == 0 && MAX_BYTES > 65536);
const _: () = assert!(MAX_SPAN_PAGES >= 2);
const _: () = assert!(BATCH_FLOOR >= 1 && BATCH_CAP >= BATCH_FLOOR);
// The largest span the central cache ever requests must be splittable from
// one OS grow of MAX_SPAN_PAGES - 1 pages.
const _: () = assert!((BATCH_FLOOR * MAX_BYTES) / PAGE_SIZE < MAX_SPAN_PAGES);
