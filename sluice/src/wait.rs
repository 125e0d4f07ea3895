//! Wait strategies for threads blocked on a sequence.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use snafu::ensure;

use crate::error::{AlertedSnafu, Result};
use crate::sequence::Sequence;

/// Upper bound on busy-spinning before falling back to yielding.
const SPIN_LIMIT: u32 = 1 << 14;

/// Spins before a blocking strategy parks the thread.
const PRE_PARK_SPINS: u32 = 10_000;

/// Bounded park interval; waiters re-check the cursor at least this often.
const PARK: Duration = Duration::from_millis(1);

/// How a thread waits for a ring cursor to reach a target sequence.
///
/// Implementations trade CPU for latency: spinning reacts fastest but burns
/// a core, blocking frees the core but pays a wakeup. [`SpinBlockWait`] (the
/// default) spins briefly and then parks.
pub trait WaitStrategy: Send + Sync + 'static {
    /// Block until `cursor` reaches `sequence` or `alert` is raised.
    ///
    /// Returns the cursor value observed, which may be past `sequence`.
    fn wait_for(&self, sequence: i64, cursor: &Sequence, alert: &AtomicBool) -> Result<i64>;

    /// Wake blocked waiters after the cursor advances. No-op for busy
    /// strategies.
    fn signal(&self) {}
}

// ── SpinWait ─────────────────────────────────────────────────────────

/// Busy-spin, degrading to `yield_now` after [`SPIN_LIMIT`] iterations.
pub struct SpinWait {
    spin_limit: u32,
}

impl SpinWait {
    /// Create a spin strategy scaled to the host's parallelism.
    ///
    /// On a single-core host spinning cannot make progress, so the limit
    /// drops to one iteration before yielding.
    #[must_use]
    pub fn new() -> Self {
        let parallel = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            spin_limit: if parallel > 1 { SPIN_LIMIT } else { 1 },
        }
    }
}

impl Default for SpinWait {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SpinWait {
    fn wait_for(&self, sequence: i64, cursor: &Sequence, alert: &AtomicBool) -> Result<i64> {
        let mut spins = 0u32;
        loop {
            let available = cursor.get();
            if available >= sequence {
                return Ok(available);
            }
            ensure!(!alert.load(Ordering::Acquire), AlertedSnafu);
            if spins < self.spin_limit {
                spins += 1;
                core::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }
}

// ── YieldWait ────────────────────────────────────────────────────────

/// Short spin, then `yield_now` on every iteration.
#[derive(Default)]
pub struct YieldWait;

impl YieldWait {
    /// Create a yielding strategy.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl WaitStrategy for YieldWait {
    fn wait_for(&self, sequence: i64, cursor: &Sequence, alert: &AtomicBool) -> Result<i64> {
        let mut spins = 0u32;
        loop {
            let available = cursor.get();
            if available >= sequence {
                return Ok(available);
            }
            ensure!(!alert.load(Ordering::Acquire), AlertedSnafu);
            if spins < 100 {
                spins += 1;
                core::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }
}

// ── BlockWait ────────────────────────────────────────────────────────

/// Park on a condvar until signalled.
///
/// `signal` only takes the lock when a waiter has announced itself through
/// the `sleeping` flag, keeping the publish path lock-free while nobody is
/// parked. Parks are bounded by [`PARK`] so a wakeup lost to the flag race
/// costs at most one tick.
pub struct BlockWait {
    lock: Mutex<()>,
    waiters: Condvar,
    sleeping: AtomicBool,
}

impl BlockWait {
    /// Create a blocking strategy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            waiters: Condvar::new(),
            sleeping: AtomicBool::new(false),
        }
    }
}

impl Default for BlockWait {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BlockWait {
    fn wait_for(&self, sequence: i64, cursor: &Sequence, alert: &AtomicBool) -> Result<i64> {
        loop {
            let available = cursor.get();
            if available >= sequence {
                return Ok(available);
            }
            ensure!(!alert.load(Ordering::Acquire), AlertedSnafu);

            self.sleeping.store(true, Ordering::SeqCst);
            let guard = self.lock.lock().unwrap();
            // Re-check under the lock: a publish may have landed between the
            // flag store and taking the lock.
            let available = cursor.get();
            if available >= sequence {
                return Ok(available);
            }
            let _unused = self.waiters.wait_timeout(guard, PARK).unwrap();
        }
    }

    fn signal(&self) {
        if self.sleeping.swap(false, Ordering::SeqCst) {
            let _guard = self.lock.lock().unwrap();
            self.waiters.notify_all();
        }
    }
}

// ── SpinBlockWait ────────────────────────────────────────────────────

/// Spin a bounded number of times, then park.
pub struct SpinBlockWait {
    spins: u32,
    parked: BlockWait,
}

impl SpinBlockWait {
    /// Create a spin-then-block strategy with the default spin budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_spins(PRE_PARK_SPINS)
    }

    /// Create a spin-then-block strategy with a custom spin budget.
    #[must_use]
    pub fn with_spins(spins: u32) -> Self {
        Self {
            spins,
            parked: BlockWait::new(),
        }
    }
}

impl Default for SpinBlockWait {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for SpinBlockWait {
    fn wait_for(&self, sequence: i64, cursor: &Sequence, alert: &AtomicBool) -> Result<i64> {
        for _ in 0..self.spins {
            let available = cursor.get();
            if available >= sequence {
                return Ok(available);
            }
            ensure!(!alert.load(Ordering::Acquire), AlertedSnafu);
            core::hint::spin_loop();
        }
        self.parked.wait_for(sequence, cursor, alert)
    }

    fn signal(&self) {
        self.parked.signal();
    }
}
