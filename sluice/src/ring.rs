//! Sequenced single-producer ring buffer.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Arc, Mutex};

use snafu::ensure;

use crate::barrier::SequenceBarrier;
use crate::error::{AlertedSnafu, Result};
use crate::sequence::{INITIAL_SEQUENCE, Sequence};
use crate::wait::{SpinBlockWait, WaitStrategy};

/// Maximum ring capacity (2^20 slots).
pub const MAX_CAPACITY: usize = 1 << 20;

/// Spins in `claim` before degrading to `yield_now`.
const CLAIM_SPIN_LIMIT: u32 = 1 << 10;

/// A single ring slot holding possibly-uninitialized data.
#[repr(transparent)]
struct Slot<T> {
    data: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    const fn new() -> Self {
        Self {
            data: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

// ── Shared state (ring + barriers) ───────────────────────────────────

/// State shared between the ring and its barriers.
pub(crate) struct Shared {
    pub(crate) cursor: Sequence,
    pub(crate) alert: AtomicBool,
    pub(crate) wait: Box<dyn WaitStrategy>,
}

// ── Gating sequences ─────────────────────────────────────────────────

/// Registered consumer sequences, snapshotted for lock-free reads.
///
/// The authoritative set lives behind a mutex; `minimum` reads an immutable
/// snapshot through an atomic pointer so the producer's claim path never
/// locks. Registration must complete before the producer starts claiming.
struct GatingSequences {
    registry: Mutex<Vec<Arc<Sequence>>>,
    snapshot: AtomicPtr<Vec<Arc<Sequence>>>,
}

impl GatingSequences {
    fn new() -> Self {
        Self {
            registry: Mutex::new(Vec::new()),
            snapshot: AtomicPtr::new(Box::into_raw(Box::new(Vec::new()))),
        }
    }

    fn add(&self, sequence: Arc<Sequence>) {
        let mut registry = self.registry.lock().unwrap();
        registry.push(sequence);
        let fresh = Box::into_raw(Box::new(registry.clone()));
        let stale = self.snapshot.swap(fresh, Ordering::AcqRel);
        // SAFETY: snapshots are only replaced under the registry lock, and
        // registration happens before the producer reads them. No reader can
        // still hold the stale pointer.
        drop(unsafe { Box::from_raw(stale) });
    }

    #[inline]
    fn minimum(&self) -> i64 {
        let ptr = self.snapshot.load(Ordering::Acquire);
        // SAFETY: the snapshot pointer is always valid; it is only freed when
        // replaced (see `add`) or when the ring drops.
        let set = unsafe { &*ptr };
        crate::sequence::minimum_sequence(set)
    }
}

impl Drop for GatingSequences {
    fn drop(&mut self) {
        let ptr = self.snapshot.load(Ordering::Acquire);
        // SAFETY: exclusive access in drop; the snapshot was leaked via
        // `Box::into_raw` and is reclaimed exactly once here.
        drop(unsafe { Box::from_raw(ptr) });
    }
}

// SAFETY: the snapshot is an immutable Vec once published; replacement is
// serialized by the registry mutex.
unsafe impl Send for GatingSequences {}
unsafe impl Sync for GatingSequences {}

// ── SequencedRing ────────────────────────────────────────────────────

/// Single-producer ring buffer with sequence-number addressing.
///
/// The producer calls [`claim`](Self::claim) to reserve the next sequence,
/// blocking while the slot is still guarded by a registered consumer
/// sequence, then [`publish`](Self::publish) to write the value and advance
/// the cursor. Consumers create a [`SequenceBarrier`] and read published
/// slots in place with [`get`](Self::get).
///
/// # Contract
///
/// - Exactly one thread claims and publishes at a time; publishes must be
///   in claim order. Handing the producer role to another thread is fine as
///   long as the publishes it observes happened-before.
/// - A reference returned by `get` is valid until every gating sequence has
///   advanced past `sequence`; callers release a slot by advancing their
///   sequence and must not hold the reference beyond that.
/// - A ring with no gating sequences applies no backpressure and will
///   overwrite unconsumed slots.
pub struct SequencedRing<T> {
    shared: Arc<Shared>,
    slots: Box<[Slot<T>]>,
    mask: usize,
    claim: Sequence,
    gating: GatingSequences,
}

// SAFETY: slot access is coordinated through sequences; the producer has
// exclusive write access to a claimed slot and consumers only read published
// slots that gating keeps alive.
unsafe impl<T: Send> Send for SequencedRing<T> {}
unsafe impl<T: Send> Sync for SequencedRing<T> {}

impl<T> SequencedRing<T> {
    /// Create a ring with the given capacity and wait strategy.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero, not a power of two, or exceeds
    /// [`MAX_CAPACITY`].
    #[must_use]
    pub fn new(capacity: usize, wait: Box<dyn WaitStrategy>) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        assert!(capacity.is_power_of_two(), "capacity must be power of two");
        assert!(capacity <= MAX_CAPACITY, "capacity exceeds maximum (2^20)");

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::new);
        Self {
            shared: Arc::new(Shared {
                cursor: Sequence::new(INITIAL_SEQUENCE),
                alert: AtomicBool::new(false),
                wait,
            }),
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            claim: Sequence::new(INITIAL_SEQUENCE),
            gating: GatingSequences::new(),
        }
    }

    /// Create a ring with the default spin-then-block wait strategy.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, Box::new(SpinBlockWait::new()))
    }

    /// Ring capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Highest published sequence, or [`INITIAL_SEQUENCE`] before the first
    /// publish.
    #[inline]
    #[must_use]
    pub fn cursor(&self) -> i64 {
        self.shared.cursor.get()
    }

    /// Register a consumer sequence that gates slot reuse.
    ///
    /// Must be called before the producer starts claiming.
    pub fn add_gating_sequence(&self, sequence: Arc<Sequence>) {
        self.gating.add(sequence);
    }

    /// Minimum of all registered gating sequences.
    #[inline]
    #[must_use]
    pub fn gating_minimum(&self) -> i64 {
        self.gating.minimum()
    }

    /// Create a barrier for a consumer of this ring.
    #[must_use]
    pub fn new_barrier(&self) -> SequenceBarrier {
        SequenceBarrier::new(Arc::clone(&self.shared))
    }

    // ── Producer side ────────────────────────────────────────────────

    /// Claim the next sequence, blocking while its slot is still guarded.
    ///
    /// Backpressure rule: sequence `s` is claimable once every gating
    /// sequence has reached `s - capacity`.
    pub fn claim(&self) -> Result<i64> {
        let next = self.claim.fetch_add(1) + 1;
        let wrap = next - self.slots.len() as i64;
        let mut spins = 0u32;
        loop {
            if wrap <= self.gating.minimum() {
                return Ok(next);
            }
            ensure!(!self.shared.alert.load(Ordering::Acquire), AlertedSnafu);
            if spins < CLAIM_SPIN_LIMIT {
                spins += 1;
                core::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Write `value` into the claimed slot and make it visible to consumers.
    pub fn publish(&self, sequence: i64, value: T) {
        debug_assert_eq!(
            sequence,
            self.shared.cursor.get() + 1,
            "out-of-order publish"
        );
        let idx = (sequence as usize) & self.mask;
        // SAFETY: `claim` granted exclusive ownership of this slot. If the
        // ring has wrapped, the previous occupant was published at
        // `sequence - capacity`, is no longer guarded by any gating
        // sequence, and is dropped before the overwrite.
        unsafe {
            let slot = self.slots[idx].data.get();
            if sequence >= self.slots.len() as i64 {
                (*slot).assume_init_drop();
            }
            (*slot).write(value);
        }
        self.shared.cursor.set(sequence);
        self.shared.wait.signal();
    }

    // ── Consumer side ────────────────────────────────────────────────

    /// Read the published slot at `sequence` in place.
    ///
    /// See the type-level contract: the slot must be published and not yet
    /// recycled, and the reference must be dropped before the caller's
    /// gating sequence advances past `sequence`.
    #[inline]
    #[must_use]
    pub fn get(&self, sequence: i64) -> &T {
        debug_assert!(sequence >= 0, "negative sequence");
        debug_assert!(sequence <= self.shared.cursor.get(), "unpublished sequence");
        let idx = (sequence as usize) & self.mask;
        // SAFETY: published slots hold initialized values until recycled,
        // and gating prevents recycling while any consumer may still read.
        unsafe { (*self.slots[idx].data.get()).assume_init_ref() }
    }

    // ── Alerts ───────────────────────────────────────────────────────

    /// Raise the alert flag, unblocking every waiter with
    /// [`RingError::Alerted`](crate::RingError::Alerted).
    pub fn alert(&self) {
        self.shared.alert.store(true, Ordering::Release);
        self.shared.wait.signal();
    }

    /// Clear the alert flag.
    pub fn clear_alert(&self) {
        self.shared.alert.store(false, Ordering::Release);
    }

    /// True if the alert flag is raised.
    #[inline]
    #[must_use]
    pub fn is_alerted(&self) -> bool {
        self.shared.alert.load(Ordering::Acquire)
    }
}

impl<T> Drop for SequencedRing<T> {
    fn drop(&mut self) {
        let published = self.shared.cursor.get();
        // Only the latest occupant of each slot is live; older occupants
        // were dropped when overwritten in `publish`.
        let live = (published + 1).min(self.slots.len() as i64);
        for back in 0..live {
            let idx = ((published - back) as usize) & self.mask;
            // SAFETY: exclusive access in drop; these slots were published
            // and never overwritten.
            unsafe { (*self.slots[idx].data.get()).assume_init_drop() };
        }
    }
}
