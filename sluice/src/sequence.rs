//! Cache-padded sequence counters.

use core::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Value of a sequence before anything has been published or consumed.
pub const INITIAL_SEQUENCE: i64 = -1;

/// Target cache-line size in bytes.
const CACHE_LINE: usize = 64;

/// Padding to push neighbouring fields onto their own cache line.
const SEQ_PAD: usize = CACHE_LINE - size_of::<AtomicI64>();

/// A cache-padded atomic sequence counter.
///
/// Sequences are the only state shared between the producer and consumers of
/// a [`SequencedRing`](crate::SequencedRing): the producer publishes through
/// the ring cursor and each consumer advances its own `Sequence` to report
/// how far it has processed. Padding keeps one writer per cache line.
#[repr(C)]
pub struct Sequence {
    value: AtomicI64,
    _pad: [u8; SEQ_PAD],
}

impl Sequence {
    /// Create a sequence starting at `initial`.
    #[must_use]
    pub const fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
            _pad: [0; SEQ_PAD],
        }
    }

    /// Load the current value (Acquire).
    #[inline]
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Store a new value (Release).
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Add `n` and return the previous value (AcqRel).
    #[inline]
    pub fn fetch_add(&self, n: i64) -> i64 {
        self.value.fetch_add(n, Ordering::AcqRel)
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(INITIAL_SEQUENCE)
    }
}

impl core::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Sequence").field(&self.get()).finish()
    }
}

/// Minimum value across a set of sequences.
///
/// Returns `i64::MAX` for an empty set, which a producer interprets as
/// "no consumers, no backpressure".
#[must_use]
pub fn minimum_sequence(sequences: &[Arc<Sequence>]) -> i64 {
    sequences
        .iter()
        .map(|s| s.get())
        .min()
        .unwrap_or(i64::MAX)
}
