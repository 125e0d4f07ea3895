//! Event-building engine: control handshake, round-robin triggered
//! building and time-frame streaming built on `sluice` rings.
//!
//! An [`AggregatorSession`] wires N input channels to M output channels
//! through a set of build worker threads. Triggered mode composes one
//! aligned record per channel into each event, sharding events across
//! workers round-robin; streaming mode sorts time-framed records into
//! frames and composes each frame on a rotating slice builder. Runs are
//! bracketed by a PRESTART/GO/END handshake validated against every input.

#![warn(missing_docs)]

mod channel;
mod compose;
mod config;
mod control;
mod distribute;
mod error;
mod payload;
mod record;
mod round_robin;
mod session;
mod slice;
mod sorter;

#[cfg(test)]
mod tests;

pub use channel::{ChannelInfo, InputChannel, MemoryInputChannel, MemoryOutputChannel, OutputChannel};
pub use config::{BuildMode, SessionConfig, WaitKind};
pub use control::{ControlCoordinator, Phase};
pub use error::{BuildError, Result};
pub use payload::{Payload, PayloadPool};
pub use record::{ByteOrder, ControlKind, Record, RecordKind, RecordMeta};
pub use session::{AggregatorSession, SessionReport, WorkerStats};
