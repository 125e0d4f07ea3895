//! Sequenced single-producer ring buffers with consumer barriers.
//!
//! A [`SequencedRing`] hands out monotonically increasing sequence numbers to
//! its producer and lets any number of consumers follow the publish cursor
//! through a [`SequenceBarrier`]. Consumers report progress by advancing a
//! shared [`Sequence`]; the producer blocks on the minimum of all registered
//! consumer sequences before reusing a slot, so a slow consumer exerts
//! backpressure instead of losing data.
//!
//! Blocking behaviour is pluggable through [`WaitStrategy`]; an alert flag on
//! the ring unblocks every waiter for shutdown.

#![warn(missing_docs)]

mod barrier;
mod error;
mod release;
mod ring;
mod sequence;
mod wait;

#[cfg(test)]
mod tests;

pub use barrier::SequenceBarrier;
pub use error::{Result, RingError};
pub use release::OrderedRelease;
pub use ring::{MAX_CAPACITY, SequencedRing};
pub use sequence::{INITIAL_SEQUENCE, Sequence, minimum_sequence};
pub use wait::{BlockWait, SpinBlockWait, SpinWait, WaitStrategy, YieldWait};
