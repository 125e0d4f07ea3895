//! Round-robin distribution of built records across output channels.
//!
//! Each worker counts built events globally (worker w builds events
//! w, w+W, w+2W, ...) and lands event `ev` on output channel `ev % out`,
//! always on its own ring. Downstream consumers restore global order by
//! walking the rings round-robin, so the channel/ring arithmetic here is
//! part of the wire contract, not an implementation detail.

use std::sync::Arc;

use crate::channel::OutputChannel;
use crate::error::Flow;
use crate::record::{ControlKind, Record};

pub(crate) struct OutputDistributor {
    outputs: Vec<Arc<dyn OutputChannel>>,
    worker: usize,
    workers: usize,
    ev_index: u64,
}

impl OutputDistributor {
    pub(crate) fn new(outputs: Vec<Arc<dyn OutputChannel>>, worker: usize, workers: usize) -> Self {
        Self {
            outputs,
            worker,
            workers,
            // event counters interleave across workers
            ev_index: worker as u64,
        }
    }

    /// Publish a built record at this worker's next event slot.
    pub(crate) fn publish_built(&mut self, record: Record) -> Flow<()> {
        let channel = (self.ev_index % self.outputs.len() as u64) as usize;
        let ring = &self.outputs[channel].rings()[self.worker];
        let sequence = ring.claim()?;
        ring.publish(sequence, record);
        self.ev_index += self.workers as u64;
        Ok(())
    }

    /// Publish a side record out of band, on channel 0 ring 0.
    pub(crate) fn publish_side(&mut self, record: Record) -> Flow<()> {
        self.publish_to(0, 0, record)
    }

    /// Publish a control record on ring 0 of every output channel.
    pub(crate) fn broadcast_control(&mut self, kind: ControlKind) -> Flow<()> {
        for channel in 0..self.outputs.len() {
            self.publish_to(channel, 0, Record::control(kind))?;
        }
        Ok(())
    }

    /// Publish a control record at an explicit channel/ring position.
    ///
    /// END placement walks channels and rings ahead of the current event
    /// slot; the caller owns that arithmetic.
    pub(crate) fn publish_control_to(
        &mut self,
        channel: usize,
        ring: usize,
        kind: ControlKind,
    ) -> Flow<()> {
        self.publish_to(channel, ring, Record::control(kind))
    }

    fn publish_to(&mut self, channel: usize, ring: usize, record: Record) -> Flow<()> {
        let ring = &self.outputs[channel].rings()[ring];
        let sequence = ring.claim()?;
        ring.publish(sequence, record);
        Ok(())
    }

    pub(crate) fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Global index of the next event this worker will build.
    pub(crate) fn ev_index(&self) -> u64 {
        self.ev_index
    }
}
