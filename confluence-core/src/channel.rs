//! Channel interfaces and in-process channel adapters.
//!
//! The engine never talks to a transport directly: an input channel exposes
//! the ring its producer fills, an output channel exposes one ring per build
//! worker. The in-memory adapters here back the tests and in-process
//! pipelines; network transports implement the same traits.

use std::sync::Arc;

use sluice::{INITIAL_SEQUENCE, Sequence, SequenceBarrier, SequencedRing};

use crate::config::WaitKind;
use crate::record::{Record, RecordMeta};

/// Static description of a channel.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    /// Channel name, for diagnostics.
    pub name: String,
    /// Source id expected on records of this channel.
    pub id: u32,
    /// True if the channel carries time-framed streaming data.
    pub streaming: bool,
}

/// A source of records feeding the build pipeline.
pub trait InputChannel: Send + Sync {
    /// Channel metadata.
    fn info(&self) -> &ChannelInfo;

    /// The ring this channel's producer publishes into.
    fn ring(&self) -> &Arc<SequencedRing<Record>>;
}

/// A sink receiving built records.
///
/// Implementations expose one ring per build worker and must register their
/// own consumer sequences on those rings before the session starts, so that
/// a slow downstream exerts backpressure on the workers.
pub trait OutputChannel: Send + Sync {
    /// Channel metadata.
    fn info(&self) -> &ChannelInfo;

    /// Output rings, indexed by build worker.
    fn rings(&self) -> &[Arc<SequencedRing<Record>>];
}

// ── In-memory adapters ───────────────────────────────────────────────

/// In-process input channel; the caller is the producer.
pub struct MemoryInputChannel {
    info: ChannelInfo,
    ring: Arc<SequencedRing<Record>>,
}

impl MemoryInputChannel {
    /// Create a channel with a ring of `capacity` slots.
    #[must_use]
    pub fn new(name: impl Into<String>, id: u32, capacity: usize) -> Self {
        Self::with_wait(name, id, capacity, WaitKind::default())
    }

    /// Create a channel with an explicit wait strategy.
    #[must_use]
    pub fn with_wait(name: impl Into<String>, id: u32, capacity: usize, wait: WaitKind) -> Self {
        Self {
            info: ChannelInfo {
                name: name.into(),
                id,
                streaming: false,
            },
            ring: Arc::new(SequencedRing::new(capacity, wait.strategy())),
        }
    }

    /// Mark the channel as carrying streaming data.
    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.info.streaming = true;
        self
    }

    /// Publish a record, blocking while the ring is full.
    ///
    /// Returns the sequence the record was published at, or
    /// [`RingError::Alerted`](sluice::RingError::Alerted) if the session was
    /// reset while waiting.
    pub fn feed(&self, record: Record) -> sluice::Result<i64> {
        let sequence = self.ring.claim()?;
        self.ring.publish(sequence, record);
        Ok(sequence)
    }
}

impl InputChannel for MemoryInputChannel {
    fn info(&self) -> &ChannelInfo {
        &self.info
    }

    fn ring(&self) -> &Arc<SequencedRing<Record>> {
        &self.ring
    }
}

/// In-process output channel; the caller drains the rings.
pub struct MemoryOutputChannel {
    info: ChannelInfo,
    rings: Vec<Arc<SequencedRing<Record>>>,
    consumers: Vec<Arc<Sequence>>,
}

impl MemoryOutputChannel {
    /// Create a channel with `rings` rings of `capacity` slots each.
    ///
    /// `rings` must equal the session's worker count.
    #[must_use]
    pub fn new(name: impl Into<String>, id: u32, rings: usize, capacity: usize) -> Self {
        let mut ring_set = Vec::with_capacity(rings);
        let mut consumers = Vec::with_capacity(rings);
        for _ in 0..rings {
            let ring = Arc::new(SequencedRing::<Record>::with_capacity(capacity));
            let consumer = Arc::new(Sequence::new(INITIAL_SEQUENCE));
            ring.add_gating_sequence(Arc::clone(&consumer));
            ring_set.push(ring);
            consumers.push(consumer);
        }
        Self {
            info: ChannelInfo {
                name: name.into(),
                id,
                streaming: false,
            },
            rings: ring_set,
            consumers,
        }
    }

    /// Consume everything published on `ring` so far.
    ///
    /// Returns the record summaries paired with copies of their payloads,
    /// in publish order, and releases the slots.
    #[must_use]
    pub fn drain(&self, ring: usize) -> Vec<(RecordMeta, Vec<u8>)> {
        let r = &self.rings[ring];
        let consumer = &self.consumers[ring];
        let cursor = r.cursor();
        let mut out = Vec::new();
        let mut next = consumer.get() + 1;
        while next <= cursor {
            let record = r.get(next);
            out.push((record.meta_of(), record.payload().to_vec()));
            consumer.set(next);
            next += 1;
        }
        out
    }
}

impl OutputChannel for MemoryOutputChannel {
    fn info(&self) -> &ChannelInfo {
        &self.info
    }

    fn rings(&self) -> &[Arc<SequencedRing<Record>>] {
        &self.rings
    }
}

// ── Per-channel consumer cursor ──────────────────────────────────────

/// One worker's read position on one input channel.
///
/// Bundles the ring, a barrier, the worker's gating sequence and the next
/// sequence to inspect. `available` caches the barrier result so the worker
/// only blocks when it has drained everything published.
pub(crate) struct ChannelCursor {
    pub(crate) ring: Arc<SequencedRing<Record>>,
    pub(crate) barrier: SequenceBarrier,
    pub(crate) sequence: Arc<Sequence>,
    pub(crate) next: i64,
    pub(crate) available: i64,
    pub(crate) source_id: u32,
}

impl ChannelCursor {
    pub(crate) fn new(channel: &Arc<dyn InputChannel>, sequence: Arc<Sequence>) -> Self {
        let ring = Arc::clone(channel.ring());
        let barrier = ring.new_barrier();
        Self {
            ring,
            barrier,
            sequence,
            next: 0,
            available: INITIAL_SEQUENCE,
            source_id: channel.info().id,
        }
    }

    /// Block until the record at `next` is published.
    pub(crate) fn wait_next(&mut self) -> sluice::Result<()> {
        if self.available < self.next {
            self.available = self.barrier.wait_for(self.next)?;
        }
        Ok(())
    }

    /// Highest published sequence, without blocking.
    pub(crate) fn produced(&self) -> i64 {
        self.ring.cursor()
    }

    /// The record at `next`. Only valid after `wait_next` (or a `produced`
    /// check) covered it.
    pub(crate) fn record(&self) -> &Record {
        self.ring.get(self.next)
    }

    /// Summary of the record at `next`.
    pub(crate) fn meta(&self) -> RecordMeta {
        self.record().meta_of()
    }

    /// Step past the record at `next` without releasing it.
    pub(crate) fn advance(&mut self) {
        self.next += 1;
    }

    /// Release everything up to and including `next`, then step past it.
    pub(crate) fn release_and_advance(&mut self) {
        self.sequence.set(self.next);
        self.next += 1;
    }
}
