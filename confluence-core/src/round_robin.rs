//! Round-robin build workers for triggered mode.
//!
//! Every worker sees every input record; per-channel skip counters carve the
//! stream into interleaved shares so worker `w` builds events `w`, `w+W`,
//! `w+2W`, ... without any cross-worker locking. Worker 0 additionally owns
//! the control handshake and side-record forwarding.

use std::sync::Arc;
use std::time::Instant;

use sluice::Sequence;

use crate::channel::ChannelCursor;
use crate::compose::compose_aligned;
use crate::config::SessionConfig;
use crate::control::{
    ControlCoordinator, Phase, ReleaseHandle, SideForwarder, await_control, hop_control,
    search_end,
};
use crate::distribute::OutputDistributor;
use crate::error::{
    Flow, GroupSizeChangedSnafu, Interrupt, MissingEndSnafu, Result, UnexpectedControlSnafu,
    UnexpectedRecordSnafu,
};
use crate::payload::PayloadPool;
use crate::record::{ControlKind, RecordKind, RecordMeta};
use crate::session::WorkerStats;

pub(crate) struct RoundRobinWorker {
    index: usize,
    workers: usize,
    cursors: Vec<ChannelCursor>,
    dist: OutputDistributor,
    pool: PayloadPool,
    /// Gating sequences of every worker, indexed `[worker][channel]`.
    peer_sequences: Arc<Vec<Vec<Arc<Sequence>>>>,
    coordinator: Arc<ControlCoordinator>,
    config: SessionConfig,
    /// Records left to skip on each channel before the next accept.
    skip: Vec<i64>,
    /// Entangled-group size fixed by the first accepted record.
    group_size: u32,
    id_flagged: Vec<bool>,
    stats: WorkerStats,
}

impl RoundRobinWorker {
    pub(crate) fn new(
        index: usize,
        cursors: Vec<ChannelCursor>,
        dist: OutputDistributor,
        pool: PayloadPool,
        peer_sequences: Arc<Vec<Vec<Arc<Sequence>>>>,
        coordinator: Arc<ControlCoordinator>,
        config: SessionConfig,
    ) -> Self {
        let channels = cursors.len();
        let workers = config.workers;
        Self {
            index,
            workers,
            cursors,
            dist,
            pool,
            peer_sequences,
            coordinator,
            config,
            // worker w accepts its (w+1)-th record first, then every W-th
            skip: vec![index as i64 + 1; channels],
            group_size: 0,
            id_flagged: vec![false; channels],
            stats: WorkerStats {
                worker: index,
                ..WorkerStats::default()
            },
        }
    }

    /// Run the worker to completion of one run.
    pub(crate) fn run(mut self) -> Result<WorkerStats> {
        match self.run_inner() {
            Ok(()) => Ok(self.stats),
            Err(Interrupt::Alerted) => {
                tracing::debug!(worker = self.index, "worker interrupted");
                Ok(self.stats)
            }
            Err(Interrupt::Failed(error)) => {
                tracing::error!(worker = self.index, %error, "build worker failed");
                Err(error)
            }
        }
    }

    fn run_inner(&mut self) -> Flow<()> {
        if !self.handshake()? {
            return Ok(());
        }
        self.build_loop()
    }

    /// Consume PRESTART and GO on every channel.
    ///
    /// Returns false when the run ended during the handshake (END in place
    /// of GO), in which case everything is already flushed and released.
    fn handshake(&mut self) -> Flow<bool> {
        if self.index == 0 {
            await_control(
                &mut self.cursors,
                Phase::AwaitingPrestart,
                ControlKind::Prestart,
                Some(SideForwarder {
                    dist: &mut self.dist,
                    pool: &self.pool,
                    stats: &mut self.stats,
                }),
            )?;
            self.dist.broadcast_control(ControlKind::Prestart)?;
            self.coordinator.advance(Phase::AwaitingGo);

            let kind = await_control(
                &mut self.cursors,
                Phase::AwaitingGo,
                ControlKind::Go,
                Some(SideForwarder {
                    dist: &mut self.dist,
                    pool: &self.pool,
                    stats: &mut self.stats,
                }),
            )?;
            if kind == ControlKind::End {
                // run with zero events; deliver END in worker 0's slot
                tracing::info!(worker = self.index, "END before GO, run took no data");
                self.coordinator.advance(Phase::AwaitingEnd);
                let end_seq: Vec<Option<i64>> =
                    self.cursors.iter().map(|c| Some(c.next - 1)).collect();
                self.flush_end(&end_seq)?;
                self.coordinator.advance(Phase::Stopped);
                return Ok(false);
            }
            self.dist.broadcast_control(ControlKind::Go)?;
            self.coordinator.advance(Phase::Running);
            Ok(true)
        } else {
            hop_control(&mut self.cursors, Phase::AwaitingPrestart)?;
            let second = hop_control(&mut self.cursors, Phase::AwaitingGo)?;
            if second == ControlKind::End {
                for cursor in &mut self.cursors {
                    cursor.sequence.set(cursor.next - 1);
                }
                return Ok(false);
            }
            Ok(true)
        }
    }

    fn build_loop(&mut self) -> Flow<()> {
        let channels = self.cursors.len();
        loop {
            let mut end_seq: Vec<Option<i64>> = vec![None; channels];
            let mut deliverer = false;
            let mut saw_end = false;

            for channel in 0..channels {
                if self.accept_next(channel, &mut end_seq, &mut deliverer)? {
                    saw_end = true;
                    break;
                }
            }

            if saw_end {
                self.coordinator.advance(Phase::AwaitingEnd);
                self.align_ends(&mut end_seq)?;
                if deliverer {
                    self.flush_end(&end_seq)?;
                }
                for (cursor, end) in self.cursors.iter_mut().zip(&end_seq) {
                    // every worker releases through its END
                    cursor.sequence.set(end.unwrap_or(cursor.next - 1));
                }
                self.coordinator.advance(Phase::Stopped);
                return Ok(());
            }

            let byte_order = self.cursors[0].record().byte_order();
            let record = compose_aligned(
                &self.cursors,
                &self.pool,
                self.config.id,
                self.group_size,
                byte_order,
            );
            self.stats.bytes += record.payload().len() as u64;
            self.dist.publish_built(record)?;
            self.stats.built += 1;
            for cursor in &mut self.cursors {
                cursor.release_and_advance();
            }
        }
    }

    /// Walk `channel` forward to this worker's next record.
    ///
    /// Leaves the cursor parked on the accepted data record, or on END
    /// (returning true). Side records are forwarded by worker 0 and stepped
    /// past by everyone else.
    fn accept_next(
        &mut self,
        channel: usize,
        end_seq: &mut [Option<i64>],
        deliverer: &mut bool,
    ) -> Flow<bool> {
        loop {
            self.cursors[channel].wait_next()?;
            let meta = self.cursors[channel].meta();
            match meta.kind {
                RecordKind::Meta => {
                    if self.index == 0 {
                        let copy = self.cursors[channel].record().duplicate(&self.pool);
                        self.dist.publish_side(copy)?;
                        self.stats.side_forwarded += 1;
                        self.cursors[channel].release_and_advance();
                    } else {
                        self.cursors[channel].advance();
                    }
                }
                RecordKind::Control => {
                    let Some(kind) = meta.control else {
                        return Err(UnexpectedRecordSnafu {
                            channel,
                            phase: Phase::Running,
                        }
                        .build()
                        .into());
                    };
                    if kind != ControlKind::End {
                        return Err(UnexpectedControlSnafu { got: kind, channel }.build().into());
                    }
                    // the worker whose turn it was delivers END downstream
                    if self.skip[channel] == 1 {
                        *deliverer = true;
                    }
                    end_seq[channel] = Some(self.cursors[channel].next);
                    return Ok(true);
                }
                RecordKind::Data => {
                    if self.skip[channel] > 1 {
                        self.skip[channel] -= 1;
                        self.cursors[channel].advance();
                    } else {
                        self.skip[channel] = self.workers as i64;
                        self.check_record(channel, &meta)?;
                        return Ok(false);
                    }
                }
            }
        }
    }

    fn check_record(&mut self, channel: usize, meta: &RecordMeta) -> Flow<()> {
        let expected = self.cursors[channel].source_id;
        if meta.source_id != expected {
            self.stats.id_mismatches += 1;
            if !self.id_flagged[channel] {
                self.id_flagged[channel] = true;
                tracing::warn!(
                    channel,
                    expected,
                    got = meta.source_id,
                    "record source id does not match its channel"
                );
            }
        }

        let group = meta.group_size;
        if self.group_size == 0 {
            self.group_size = group;
        } else if group != self.group_size {
            if self.workers > 1 {
                return Err(GroupSizeChangedSnafu {
                    from: self.group_size,
                    to: group,
                    workers: self.workers,
                }
                .build()
                .into());
            }
            tracing::warn!(
                channel,
                from = self.group_size,
                to = group,
                "entangled group size changed mid-run"
            );
            self.group_size = group;
        }
        Ok(())
    }

    /// Find END on the channels that have not delivered it yet.
    ///
    /// Producers that saw the run end keep publishing briefly; a settle
    /// delay plus a bounded per-channel search covers that window. Data
    /// records drained on the way are discarded and released.
    fn align_ends(&mut self, end_seq: &mut [Option<i64>]) -> Flow<()> {
        if end_seq.iter().any(Option::is_none) {
            std::thread::sleep(self.config.end_settle);
        }
        for (channel, end) in end_seq.iter_mut().enumerate() {
            if end.is_some() {
                continue;
            }
            let release = ReleaseHandle::Direct(Arc::clone(&self.cursors[channel].sequence));
            let (found, drained) = search_end(&mut self.cursors[channel], &self.config, &release)?;
            if drained > 0 {
                tracing::warn!(
                    worker = self.index,
                    channel,
                    drained,
                    "discarded records while searching for END"
                );
            }
            *end = found;
        }

        let missing: Vec<usize> = end_seq
            .iter()
            .enumerate()
            .filter_map(|(channel, end)| end.is_none().then_some(channel))
            .collect();
        if !missing.is_empty() {
            return Err(MissingEndSnafu {
                channels: missing,
                total: end_seq.len(),
            }
            .build()
            .into());
        }
        Ok(())
    }

    /// Place END on every output channel.
    ///
    /// The first END lands in this worker's own slot; the rest walk ahead
    /// through the channels and rings the subsequent events would have used,
    /// so a round-robin reader downstream meets END on every path. Writing
    /// into peer rings only starts once the peers have drained up to END.
    fn flush_end(&mut self, end_seq: &[Option<i64>]) -> Flow<()> {
        let ev = self.dist.ev_index();
        let out = self.dist.output_count() as u64;

        self.dist
            .publish_control_to((ev % out) as usize, self.index, ControlKind::End)?;
        self.await_peers(end_seq)?;
        for i in 1..out {
            let channel = ((ev + i) % out) as usize;
            let ring = ((ev + i) % self.workers as u64) as usize;
            self.dist.publish_control_to(channel, ring, ControlKind::End)?;
        }
        tracing::info!(worker = self.index, events = ev, "END delivered downstream");
        Ok(())
    }

    /// Wait until every peer has consumed up to END on every channel.
    fn await_peers(&self, end_seq: &[Option<i64>]) -> Flow<()> {
        for (channel, end) in end_seq.iter().enumerate() {
            let Some(end) = *end else { continue };
            let deadline = Instant::now() + self.config.catchup_timeout;
            loop {
                let caught_up = self
                    .peer_sequences
                    .iter()
                    .enumerate()
                    .filter(|(worker, _)| *worker != self.index)
                    .all(|(_, sequences)| sequences[channel].get() >= end - 1);
                if caught_up {
                    break;
                }
                if self.cursors[channel].ring.is_alerted() {
                    return Err(Interrupt::Alerted);
                }
                if Instant::now() >= deadline {
                    tracing::warn!(
                        worker = self.index,
                        channel,
                        "peer workers did not catch up before END placement"
                    );
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        }
        Ok(())
    }
}
