//! Allocation size histogram.
//!
//! Records the distribution of request sizes in 8-byte buckets up to
//! [`MAX_TRACKED`] bytes, with one overflow counter above that. The report
//! also shows how much padding the bracket-based size classes add for the
//! observed workload.

extern crate std;

use crate::size_class;
use core::sync::atomic::{AtomicU64, Ordering};
use std::println;

/// Maximum allocation size tracked in a bucket (inclusive).
pub const MAX_TRACKED: usize = 4096;
/// Width of each bucket in bytes.
pub const BUCKET_SIZE: usize = 8;
/// Number of buckets: sizes 1–8 → bucket 0, 9–16 → bucket 1, …
pub const NUM_BUCKETS: usize = MAX_TRACKED / BUCKET_SIZE;

struct BucketArray([AtomicU64; NUM_BUCKETS]);
// SAFETY: AtomicU64 is Sync.
unsafe impl Sync for BucketArray {}

#[allow(clippy::declare_interior_mutable_const)]
static BUCKETS: BucketArray = {
    const ZERO: AtomicU64 = AtomicU64::new(0);
    BucketArray([ZERO; NUM_BUCKETS])
};
static OVERFLOW: AtomicU64 = AtomicU64::new(0);

/// Record one allocation of `size` bytes.
///
/// Called from the allocator entry points. Safe on the hot path: one
/// atomic increment, no allocation.
#[inline]
pub fn record(size: usize) {
    if size == 0 {
        return;
    }
    if size > MAX_TRACKED {
        OVERFLOW.fetch_add(1, Ordering::Relaxed);
    } else {
        let idx = (size - 1) / BUCKET_SIZE;
        BUCKETS.0[idx].fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of the histogram counters.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// `counts[i]` = number of allocations whose size falls in `(i*8, (i+1)*8]`.
    pub counts: [u64; NUM_BUCKETS],
    /// Allocations with size > [`MAX_TRACKED`].
    pub overflow: u64,
}

/// Load all counters and return a [`Snapshot`].
pub fn snapshot() -> Snapshot {
    let mut counts = [0u64; NUM_BUCKETS];
    for (i, bucket) in BUCKETS.0.iter().enumerate() {
        counts[i] = bucket.load(Ordering::Relaxed);
    }
    Snapshot {
        counts,
        overflow: OVERFLOW.load(Ordering::Relaxed),
    }
}

/// Estimated internal fragmentation of the tracked workload under the
/// bracket policy: wasted bytes / rounded-up bytes, in `0.0..1.0`.
///
/// Conservative: each bucket is assumed to hold worst-case requests (lower
/// bound + 1 byte).
pub fn fragmentation_ratio(snap: &Snapshot) -> f64 {
    let mut wasted = 0u64;
    let mut total = 0u64;
    for (i, &count) in snap.counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let assumed_size = i * BUCKET_SIZE + 1;
        let rounded = size_class::round_up(assumed_size) as u64;
        wasted += count * (rounded - assumed_size as u64);
        total += count * rounded;
    }
    if total == 0 {
        0.0
    } else {
        wasted as f64 / total as f64
    }
}

/// Print a human-readable histogram report to stdout.
///
/// Shows all non-zero buckets with count, percentage, and cumulative
/// percentage, followed by the fragmentation estimate.
pub fn print_report() {
    let snap = snapshot();
    let total: u64 = snap.counts.iter().sum::<u64>() + snap.overflow;

    println!(
        "\nAllocation size histogram (8-byte buckets, max tracked: {} bytes)",
        MAX_TRACKED
    );
    println!(
        "Total tracked: {}   Overflow (>{} bytes): {} ({:.2}%)\n",
        total,
        MAX_TRACKED,
        snap.overflow,
        if total > 0 {
            snap.overflow as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    );

    if total == 0 {
        println!("  (no allocations recorded)");
        return;
    }

    println!(
        "  {:>6}   {:>12}   {:>7}   {:>10}",
        "Size", "Count", "%", "Cumulative"
    );
    println!("  {:->6}   {:->12}   {:->7}   {:->10}", "", "", "", "");

    let mut cumulative = 0u64;
    for (i, &count) in snap.counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let size = (i + 1) * BUCKET_SIZE;
        cumulative += count;
        println!(
            "  {:>6}   {:>12}   {:>6.2}%   {:>9.2}%",
            size,
            count,
            count as f64 / total as f64 * 100.0,
            cumulative as f64 / total as f64 * 100.0,
        );
    }

    println!(
        "\nEstimated internal fragmentation under the size-class brackets: {:.2}%",
        fragmentation_ratio(&snap) * 100.0
    );
}
