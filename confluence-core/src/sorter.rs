//! Time-frame sorter for streaming mode.
//!
//! A single sorter thread reads every input channel, gathers the records of
//! one time frame at a time and hands the frame to the slice builders
//! round-robin. Records never move: the sorter forwards (channel, sequence)
//! references and the slice builder reads the payloads in place, releasing
//! the slots through shared in-order bookkeeping once the composite is
//! built.

use std::sync::Arc;

use sluice::{OrderedRelease, SequencedRing};

use crate::channel::ChannelCursor;
use crate::config::SessionConfig;
use crate::control::{
    ControlCoordinator, Phase, ReleaseHandle, SideForwarder, await_control, search_end,
};
use crate::distribute::OutputDistributor;
use crate::error::{
    Flow, Interrupt, MissingEndSnafu, Result, TimeFrameGapSnafu, UnexpectedControlSnafu,
    UnexpectedRecordSnafu, UntimedRecordSnafu,
};
use crate::payload::PayloadPool;
use crate::record::{ControlKind, RecordKind};
use crate::session::WorkerStats;

/// One entry on a per-worker slice queue.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SliceItem {
    /// Reference to a data record still sitting in its input ring.
    Slice {
        channel: usize,
        sequence: i64,
        frame: u64,
    },
    /// Reference to a side record; always queued to builder 0, which owns
    /// the output ring side records land on.
    Side { channel: usize, sequence: i64 },
    /// The run ended; `deliver` marks the builder that places END
    /// downstream.
    End { deliver: bool },
}

pub(crate) struct TimeFrameSorter {
    cursors: Vec<ChannelCursor>,
    /// Per-channel in-order release bookkeeping, shared with the builders.
    ordered: Vec<Arc<OrderedRelease>>,
    worker_rings: Vec<Arc<SequencedRing<SliceItem>>>,
    dist: OutputDistributor,
    pool: PayloadPool,
    config: SessionConfig,
    coordinator: Arc<ControlCoordinator>,
    stats: WorkerStats,
    current_worker: usize,
    /// Frame currently being gathered.
    looking_for: Option<u64>,
    prev_frame: Vec<Option<u64>>,
    /// One read-ahead record per channel that belongs to a later frame.
    stash: Vec<Option<(i64, u64)>>,
    /// True while the current frame has slices queued but is not closed.
    group_open: bool,
    id_flagged: Vec<bool>,
}

impl TimeFrameSorter {
    pub(crate) fn new(
        cursors: Vec<ChannelCursor>,
        ordered: Vec<Arc<OrderedRelease>>,
        worker_rings: Vec<Arc<SequencedRing<SliceItem>>>,
        dist: OutputDistributor,
        pool: PayloadPool,
        coordinator: Arc<ControlCoordinator>,
        config: SessionConfig,
    ) -> Self {
        let channels = cursors.len();
        Self {
            cursors,
            ordered,
            worker_rings,
            dist,
            pool,
            coordinator,
            stats: WorkerStats {
                // the sorter reports after the builders
                worker: config.workers,
                ..WorkerStats::default()
            },
            config,
            current_worker: 0,
            looking_for: None,
            prev_frame: vec![None; channels],
            stash: vec![None; channels],
            group_open: false,
            id_flagged: vec![false; channels],
        }
    }

    pub(crate) fn run(mut self) -> Result<WorkerStats> {
        match self.run_inner() {
            Ok(()) => Ok(self.stats),
            Err(Interrupt::Alerted) => {
                tracing::debug!("sorter interrupted");
                Ok(self.stats)
            }
            Err(Interrupt::Failed(error)) => {
                tracing::error!(%error, "time-frame sorter failed");
                Err(error)
            }
        }
    }

    fn run_inner(&mut self) -> Flow<()> {
        if !self.handshake()? {
            return Ok(());
        }
        loop {
            for channel in 0..self.cursors.len() {
                if self.gather_channel(channel)? {
                    return self.finish_end(channel);
                }
            }
            // frame closed on every channel; the stash re-opens the next one
            self.looking_for = None;
            self.group_open = false;
            self.current_worker = (self.current_worker + 1) % self.worker_rings.len();
        }
    }

    /// Consume PRESTART and GO, forwarding side records.
    ///
    /// Returns false on a zero-event run (END in place of GO), with END
    /// already delivered downstream and the builders told to exit.
    fn handshake(&mut self) -> Flow<bool> {
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
        // the handshake released slots directly; rejoin the shared bookkeeping
        for (channel, ordered) in self.ordered.iter().enumerate() {
            ordered.advance_to(self.cursors[channel].next - 1);
        }
        if kind == ControlKind::End {
            tracing::info!("END before GO, run took no data");
            self.coordinator.advance(Phase::AwaitingEnd);
            self.deliver_end_downstream()?;
            for ring in &self.worker_rings {
                let sequence = ring.claim()?;
                ring.publish(sequence, SliceItem::End { deliver: false });
            }
            self.coordinator.advance(Phase::Stopped);
            return Ok(false);
        }
        self.dist.broadcast_control(ControlKind::Go)?;
        self.coordinator.advance(Phase::Running);
        Ok(true)
    }

    /// Feed `channel`'s share of the current frame to the current builder.
    ///
    /// Returns true when the channel delivered END instead.
    fn gather_channel(&mut self, channel: usize) -> Flow<bool> {
        if let Some((sequence, frame)) = self.stash[channel] {
            match self.looking_for {
                None => {
                    self.looking_for = Some(frame);
                    self.group_open = true;
                    self.stash[channel] = None;
                    self.send_slice(channel, sequence, frame)?;
                }
                Some(wanted) if wanted == frame => {
                    self.stash[channel] = None;
                    self.send_slice(channel, sequence, frame)?;
                }
                // stashed record belongs to a later frame; channel is done
                Some(_) => return Ok(false),
            }
        }

        loop {
            self.cursors[channel].wait_next()?;
            let meta = self.cursors[channel].meta();
            match meta.kind {
                RecordKind::Meta => {
                    // builder 0 owns the ring side records land on; routing
                    // through its queue keeps that ring single-producer
                    let sequence = self.cursors[channel].next;
                    let ring = &self.worker_rings[0];
                    let slot = ring.claim()?;
                    ring.publish(slot, SliceItem::Side { channel, sequence });
                    self.cursors[channel].advance();
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
                    return Ok(true);
                }
                RecordKind::Data => {
                    let Some(frame) = meta.time_frame else {
                        return Err(UntimedRecordSnafu { channel }.build().into());
                    };
                    if meta.source_id != self.cursors[channel].source_id {
                        self.stats.id_mismatches += 1;
                        if !self.id_flagged[channel] {
                            self.id_flagged[channel] = true;
                            tracing::warn!(
                                channel,
                                expected = self.cursors[channel].source_id,
                                got = meta.source_id,
                                "record source id does not match its channel"
                            );
                        }
                    }
                    if let Some(previous) = self.prev_frame[channel] {
                        if frame < previous || frame > previous + 1 {
                            return Err(TimeFrameGapSnafu {
                                channel,
                                frame,
                                previous,
                            }
                            .build()
                            .into());
                        }
                    }
                    self.prev_frame[channel] = Some(frame);

                    let sequence = self.cursors[channel].next;
                    match self.looking_for {
                        None => {
                            self.looking_for = Some(frame);
                            self.group_open = true;
                            self.cursors[channel].advance();
                            self.send_slice(channel, sequence, frame)?;
                        }
                        Some(wanted) if wanted == frame => {
                            self.cursors[channel].advance();
                            self.send_slice(channel, sequence, frame)?;
                        }
                        Some(_) => {
                            // read ahead into the next frame; park it
                            self.stash[channel] = Some((sequence, frame));
                            self.cursors[channel].advance();
                            return Ok(false);
                        }
                    }
                }
            }
        }
    }

    fn send_slice(&mut self, channel: usize, sequence: i64, frame: u64) -> Flow<()> {
        let ring = &self.worker_rings[self.current_worker];
        let slot = ring.claim()?;
        ring.publish(
            slot,
            SliceItem::Slice {
                channel,
                sequence,
                frame,
            },
        );
        Ok(())
    }

    /// END seen on `end_channel`: align the rest, pick the delivering
    /// builder and shut the queues down.
    fn finish_end(&mut self, end_channel: usize) -> Flow<()> {
        self.coordinator.advance(Phase::AwaitingEnd);

        let channels = self.cursors.len();
        let mut end_seq: Vec<Option<i64>> = vec![None; channels];
        end_seq[end_channel] = Some(self.cursors[end_channel].next);
        self.cursors[end_channel].advance();

        // read-ahead records that still complete the open frame are kept;
        // anything from a later frame will never form a group
        for channel in 0..channels {
            if let Some((sequence, frame)) = self.stash[channel].take() {
                if self.group_open && self.looking_for == Some(frame) {
                    self.send_slice(channel, sequence, frame)?;
                } else {
                    tracing::warn!(channel, frame, "discarding stashed record at END");
                    self.ordered[channel].release(sequence);
                }
            }
        }

        if end_seq.iter().any(Option::is_none) {
            std::thread::sleep(self.config.end_settle);
        }
        for (channel, end) in end_seq.iter_mut().enumerate() {
            if end.is_some() {
                continue;
            }
            let release = ReleaseHandle::Ordered(Arc::clone(&self.ordered[channel]));
            let (found, drained) = search_end(&mut self.cursors[channel], &self.config, &release)?;
            if drained > 0 {
                tracing::warn!(channel, drained, "discarded records while searching for END");
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
                total: channels,
            }
            .build()
            .into());
        }

        // the builder that would have received the next frame delivers END
        let workers = self.worker_rings.len();
        let deliver_worker = if self.group_open {
            (self.current_worker + 1) % workers
        } else {
            self.current_worker
        };
        for (worker, ring) in self.worker_rings.iter().enumerate() {
            let sequence = ring.claim()?;
            ring.publish(
                sequence,
                SliceItem::End {
                    deliver: worker == deliver_worker,
                },
            );
        }

        // END slots release once the builders drain everything before them
        for (channel, end) in end_seq.iter().enumerate() {
            if let Some(end) = *end {
                self.ordered[channel].release(end);
            }
        }
        self.coordinator.advance(Phase::Stopped);
        Ok(())
    }

    /// Zero-event END placement, using builder 0's event arithmetic.
    fn deliver_end_downstream(&mut self) -> Flow<()> {
        let out = self.dist.output_count() as u64;
        let workers = self.worker_rings.len() as u64;
        for i in 0..out {
            let channel = (i % out) as usize;
            let ring = (i % workers) as usize;
            self.dist.publish_control_to(channel, ring, ControlKind::End)?;
        }
        Ok(())
    }
}

// keep the queue entry small; it is copied through a ring per slice
const _: () = assert!(size_of::<SliceItem>() <= 32);
