//! Allocation statistics counters and the [`tally!`](crate::tally) macro
//! that feeds them.
//!
//! All counters use `Relaxed` ordering — they are observational only, never
//! synchronization. The allocator's spinlocks provide the ordering that
//! correctness needs; these exist for monitoring.
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual loads are each
//! atomic but the snapshot as a whole is not globally consistent;
//! concurrent allocations may race between loads, which is fine for
//! monitoring.

#[cfg(feature = "stats")]
use core::sync::atomic::{AtomicU64, Ordering};

/// Bump a counter by name: `tally!(alloc_count)` adds one,
/// `tally!(os_alloc_bytes, n)` adds `n`.
///
/// Without the `stats` feature the whole call — including the value
/// expression — compiles to nothing.
#[macro_export]
macro_rules! tally {
    ($counter:ident) => {
        $crate::tally!($counter, 1u64)
    };
    ($counter:ident, $n:expr) => {
        #[cfg(feature = "stats")]
        {
            $crate::stats::STATS
                .$counter
                .fetch_add($n as u64, ::core::sync::atomic::Ordering::Relaxed);
        }
    };
}

#[cfg(feature = "stats")]
pub(crate) struct Stats {
    // ---- Entry points ----
    /// Calls to allocate with size > 0.
    pub alloc_count: AtomicU64,
    /// Calls to deallocate with size > 0.
    pub dealloc_count: AtomicU64,
    /// Calls to realloc (after null/zero-size guards).
    pub realloc_count: AtomicU64,
    /// Sum of requested byte sizes.
    pub alloc_bytes: AtomicU64,

    // ---- Tier breakdown ----
    /// Allocations served by the thread cache (no lock taken).
    pub thread_cache_hits: AtomicU64,
    /// Thread cache misses (batch pulled from the tiers below).
    pub thread_cache_misses: AtomicU64,
    /// Batches served from a transfer list instead of span free lists.
    pub transfer_cache_hits: AtomicU64,
    /// Spans sliced into objects by the central cache.
    pub central_carves: AtomicU64,
    /// Requests above the cache ceiling, sent to the system allocator.
    pub large_allocs: AtomicU64,

    // ---- Page cache / OS ----
    /// Calls to `platform::page_alloc` by the page cache.
    pub os_alloc_count: AtomicU64,
    /// Bytes requested from the OS by the page cache.
    pub os_alloc_bytes: AtomicU64,
    /// Free spans split to satisfy a shorter request.
    pub span_splits: AtomicU64,
    /// Adjacent free spans merged on release.
    pub span_coalesces: AtomicU64,
}

#[cfg(feature = "stats")]
impl Stats {
    const fn new() -> Self {
        Self {
            alloc_count: AtomicU64::new(0),
            dealloc_count: AtomicU64::new(0),
            realloc_count: AtomicU64::new(0),
            alloc_bytes: AtomicU64::new(0),
            thread_cache_hits: AtomicU64::new(0),
            thread_cache_misses: AtomicU64::new(0),
            transfer_cache_hits: AtomicU64::new(0),
            central_carves: AtomicU64::new(0),
            large_allocs: AtomicU64::new(0),
            os_alloc_count: AtomicU64::new(0),
            os_alloc_bytes: AtomicU64::new(0),
            span_splits: AtomicU64::new(0),
            span_coalesces: AtomicU64::new(0),
        }
    }
}

#[cfg(feature = "stats")]
pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of all allocation statistics.
#[cfg(feature = "stats")]
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    /// Calls to allocate with size > 0.
    pub alloc_count: u64,
    /// Calls to deallocate with size > 0.
    pub dealloc_count: u64,
    /// Calls to realloc (after null/zero-size guards).
    pub realloc_count: u64,
    /// Sum of requested byte sizes.
    pub alloc_bytes: u64,
    /// Allocations served by the thread cache (no lock taken).
    pub thread_cache_hits: u64,
    /// Thread cache misses (batch pulled from the tiers below).
    pub thread_cache_misses: u64,
    /// Batches served from a transfer list instead of span free lists.
    pub transfer_cache_hits: u64,
    /// Spans sliced into objects by the central cache.
    pub central_carves: u64,
    /// Requests above the cache ceiling, sent to the system allocator.
    pub large_allocs: u64,
    /// Calls to `platform::page_alloc` by the page cache.
    pub os_alloc_count: u64,
    /// Bytes requested from the OS by the page cache.
    pub os_alloc_bytes: u64,
    /// Free spans split to satisfy a shorter request.
    pub span_splits: u64,
    /// Adjacent free spans merged on release.
    pub span_coalesces: u64,
}

/// Load all counters with `Relaxed` ordering and return a [`Snapshot`].
#[cfg(feature = "stats")]
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        alloc_count: s.alloc_count.load(Ordering::Relaxed),
        dealloc_count: s.dealloc_count.load(Ordering::Relaxed),
        realloc_count: s.realloc_count.load(Ordering::Relaxed),
        alloc_bytes: s.alloc_bytes.load(Ordering::Relaxed),
        thread_cache_hits: s.thread_cache_hits.load(Ordering::Relaxed),
        thread_cache_misses: s.thread_cache_misses.load(Ordering::Relaxed),
        transfer_cache_hits: s.transfer_cache_hits.load(Ordering::Relaxed),
        central_carves: s.central_carves.load(Ordering::Relaxed),
        large_allocs: s.large_allocs.load(Ordering::Relaxed),
        os_alloc_count: s.os_alloc_count.load(Ordering::Relaxed),
        os_alloc_bytes: s.os_alloc_bytes.load(Ordering::Relaxed),
        span_splits: s.span_splits.load(Ordering::Relaxed),
        span_coalesces: s.span_coalesces.load(Ordering::Relaxed),
    }
}
