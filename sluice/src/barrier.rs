//! Consumer-side view of a ring's publish cursor.

use std::sync::Arc;

use crate::error::Result;
use crate::ring::Shared;

/// Barrier a consumer blocks on while waiting for published sequences.
///
/// Created by [`SequencedRing::new_barrier`](crate::SequencedRing::new_barrier).
/// Every barrier of a ring shares the ring's cursor, alert flag and wait
/// strategy; a barrier carries no per-consumer state, so creating one per
/// consumer thread is the normal pattern.
pub struct SequenceBarrier {
    shared: Arc<Shared>,
}

impl SequenceBarrier {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Block until `sequence` has been published or the ring is alerted.
    ///
    /// Returns the highest published sequence observed, which may be past
    /// `sequence`.
    pub fn wait_for(&self, sequence: i64) -> Result<i64> {
        self.shared
            .wait
            .wait_for(sequence, &self.shared.cursor, &self.shared.alert)
    }

    /// Highest published sequence without blocking.
    #[inline]
    #[must_use]
    pub fn cursor(&self) -> i64 {
        self.shared.cursor.get()
    }

    /// Raise the ring's alert flag, unblocking every waiter.
    pub fn alert(&self) {
        self.shared
            .alert
            .store(true, core::sync::atomic::Ordering::Release);
        self.shared.wait.signal();
    }

    /// Clear the ring's alert flag.
    pub fn clear_alert(&self) {
        self.shared
            .alert
            .store(false, core::sync::atomic::Ordering::Release);
    }

    /// True if the ring's alert flag is raised.
    #[inline]
    #[must_use]
    pub fn is_alerted(&self) -> bool {
        self.shared.alert.load(core::sync::atomic::Ordering::Acquire)
    }
}
