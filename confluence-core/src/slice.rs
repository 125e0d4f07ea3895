//! Slice builders for streaming mode.
//!
//! Each builder drains its own slice queue, accumulates the references of
//! one time frame and composes them into a single record when the next
//! frame begins (or at END). Input slots are handed back through the shared
//! per-channel release bookkeeping, which tolerates builders finishing
//! frames out of order.

use std::sync::Arc;
use std::time::Instant;

use sluice::{OrderedRelease, Sequence, SequenceBarrier, SequencedRing};

use crate::compose::compose_slices;
use crate::config::SessionConfig;
use crate::control::{ControlCoordinator, Phase};
use crate::distribute::OutputDistributor;
use crate::error::{Flow, Interrupt, Result};
use crate::payload::PayloadPool;
use crate::record::{ControlKind, Record};
use crate::session::WorkerStats;
use crate::sorter::SliceItem;

/// Every builder's slice ring paired with its consumer sequence.
pub(crate) type PeerSet = Vec<(Arc<SequencedRing<SliceItem>>, Arc<Sequence>)>;

pub(crate) struct SliceBuilder {
    index: usize,
    workers: usize,
    ring: Arc<SequencedRing<SliceItem>>,
    barrier: SequenceBarrier,
    sequence: Arc<Sequence>,
    inputs: Vec<Arc<SequencedRing<Record>>>,
    ordered: Vec<Arc<OrderedRelease>>,
    peers: Arc<PeerSet>,
    dist: OutputDistributor,
    pool: PayloadPool,
    config: SessionConfig,
    coordinator: Arc<ControlCoordinator>,
    stats: WorkerStats,
    /// (channel, sequence) references of the frame under construction.
    accum: Vec<(usize, i64)>,
    current_frame: Option<u64>,
    next: i64,
}

impl SliceBuilder {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        ring: Arc<SequencedRing<SliceItem>>,
        sequence: Arc<Sequence>,
        inputs: Vec<Arc<SequencedRing<Record>>>,
        ordered: Vec<Arc<OrderedRelease>>,
        peers: Arc<PeerSet>,
        dist: OutputDistributor,
        pool: PayloadPool,
        coordinator: Arc<ControlCoordinator>,
        config: SessionConfig,
    ) -> Self {
        let barrier = ring.new_barrier();
        let workers = config.workers;
        Self {
            index,
            workers,
            ring,
            barrier,
            sequence,
            inputs,
            ordered,
            peers,
            dist,
            pool,
            config,
            coordinator,
            stats: WorkerStats {
                worker: index,
                ..WorkerStats::default()
            },
            accum: Vec::with_capacity(200),
            current_frame: None,
            next: 0,
        }
    }

    pub(crate) fn run(mut self) -> Result<WorkerStats> {
        match self.run_inner() {
            Ok(()) => Ok(self.stats),
            Err(Interrupt::Alerted) => {
                tracing::debug!(worker = self.index, "slice builder interrupted");
                Ok(self.stats)
            }
            Err(Interrupt::Failed(error)) => {
                tracing::error!(worker = self.index, %error, "slice builder failed");
                Err(error)
            }
        }
    }

    fn run_inner(&mut self) -> Flow<()> {
        loop {
            let available = self.barrier.wait_for(self.next)?;
            while self.next <= available {
                let item = *self.ring.get(self.next);
                match item {
                    SliceItem::Slice {
                        channel,
                        sequence,
                        frame,
                    } => {
                        match self.current_frame {
                            None => self.current_frame = Some(frame),
                            Some(current) if current != frame => {
                                self.build_frame(current)?;
                                self.current_frame = Some(frame);
                            }
                            Some(_) => {}
                        }
                        self.accum.push((channel, sequence));
                    }
                    SliceItem::Side { channel, sequence } => {
                        // only builder 0 receives these; side records go out
                        // on its ring, ahead of the frame under construction
                        let copy = self.inputs[channel].get(sequence).duplicate(&self.pool);
                        self.dist.publish_side(copy)?;
                        self.stats.side_forwarded += 1;
                        self.ordered[channel].release(sequence);
                    }
                    SliceItem::End { deliver } => {
                        if let Some(frame) = self.current_frame.take() {
                            self.build_frame(frame)?;
                        }
                        self.sequence.set(self.next);
                        if deliver {
                            self.catch_up()?;
                            self.deliver_end()?;
                        }
                        self.coordinator.advance(Phase::Stopped);
                        return Ok(());
                    }
                }
                self.sequence.set(self.next);
                self.next += 1;
            }
        }
    }

    /// Compose the accumulated frame and hand its input slots back.
    fn build_frame(&mut self, frame: u64) -> Flow<()> {
        let record = compose_slices(&self.accum, &self.inputs, &self.pool, self.config.id, frame);
        self.stats.bytes += record.payload().len() as u64;
        self.dist.publish_built(record)?;
        self.stats.built += 1;
        for &(channel, sequence) in &self.accum {
            self.ordered[channel].release(sequence);
        }
        self.accum.clear();
        Ok(())
    }

    /// Wait until every peer builder has drained its slice queue.
    ///
    /// The sorter has already queued END everywhere, so a drained queue
    /// means the peer flushed its last frame and will publish nothing more.
    fn catch_up(&self) -> Flow<()> {
        for (worker, (ring, sequence)) in self.peers.iter().enumerate() {
            if worker == self.index {
                continue;
            }
            let deadline = Instant::now() + self.config.catchup_timeout;
            while sequence.get() < ring.cursor() {
                if self.ring.is_alerted() {
                    return Err(Interrupt::Alerted);
                }
                if Instant::now() >= deadline {
                    tracing::warn!(
                        worker = self.index,
                        peer = worker,
                        "peer builder did not drain before END placement"
                    );
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
        Ok(())
    }

    /// Place END on every output channel, own slot first, then the slots
    /// the subsequent frames would have used.
    fn deliver_end(&mut self) -> Flow<()> {
        let ev = self.dist.ev_index();
        let out = self.dist.output_count() as u64;
        self.dist
            .publish_control_to((ev % out) as usize, self.index, ControlKind::End)?;
        for i in 1..out {
            let channel = ((ev + i) % out) as usize;
            let ring = ((ev + i) % self.workers as u64) as usize;
            self.dist.publish_control_to(channel, ring, ControlKind::End)?;
        }
        tracing::info!(worker = self.index, frames = ev, "END delivered downstream");
        Ok(())
    }
}
