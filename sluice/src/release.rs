//! In-order release bookkeeping for out-of-order consumers.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use crate::sequence::{INITIAL_SEQUENCE, Sequence};

/// Tracks out-of-order releases and advances a gating [`Sequence`] only
/// through the highest contiguous prefix.
///
/// When several worker threads finish with ring slots in a different order
/// than they were claimed, advancing the gating sequence directly would free
/// slots that earlier, still-in-flight sequences guard. `OrderedRelease`
/// buffers the stragglers in a small heap behind one mutex and publishes
/// only contiguous progress.
pub struct OrderedRelease {
    target: Arc<Sequence>,
    state: Mutex<ReleaseState>,
}

struct ReleaseState {
    /// Highest sequence released without gaps.
    released: i64,
    /// Out-of-order releases waiting for the gap to fill.
    pending: BinaryHeap<Reverse<i64>>,
}

impl OrderedRelease {
    /// Create a tracker advancing `target`, starting from the target's
    /// current value.
    #[must_use]
    pub fn new(target: Arc<Sequence>) -> Self {
        let released = target.get();
        Self {
            target,
            state: Mutex::new(ReleaseState {
                released,
                pending: BinaryHeap::new(),
            }),
        }
    }

    /// Release a single sequence. Duplicate and stale releases are ignored.
    pub fn release(&self, sequence: i64) {
        let mut state = self.state.lock().unwrap();
        state.pending.push(Reverse(sequence));
        Self::drain(&mut state);
        self.target.set(state.released);
    }

    /// Force contiguous release of everything up to and including
    /// `sequence`.
    ///
    /// Only valid when the caller knows no earlier sequence is still in
    /// flight, e.g. after a single-threaded scan.
    pub fn advance_to(&self, sequence: i64) {
        let mut state = self.state.lock().unwrap();
        if sequence > state.released {
            state.released = sequence;
        }
        Self::drain(&mut state);
        self.target.set(state.released);
    }

    /// Highest contiguously released sequence.
    #[must_use]
    pub fn released(&self) -> i64 {
        self.state.lock().unwrap().released
    }

    fn drain(state: &mut ReleaseState) {
        while let Some(&Reverse(next)) = state.pending.peek() {
            if next == state.released + 1 {
                state.pending.pop();
                state.released = next;
            } else if next <= state.released {
                // Duplicate or already covered by an advance_to.
                state.pending.pop();
            } else {
                break;
            }
        }
    }
}

impl Default for OrderedRelease {
    fn default() -> Self {
        Self::new(Arc::new(Sequence::new(INITIAL_SEQUENCE)))
    }
}
