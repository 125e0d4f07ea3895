//! Event-building pipeline for multi-source data acquisition.
//!
//! This facade re-exports the engine crate and the `sluice` ring
//! primitives it is built on:
//!
//! - [`sluice`]: sequenced single-producer rings, barriers and wait
//!   strategies.
//! - `confluence-core` (re-exported at the root): channels, records, the
//!   control handshake and the triggered/streaming build pipelines.

pub use confluence_core::*;
pub use sluice;

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::{
        AggregatorSession, BuildMode, ByteOrder, ControlKind, InputChannel, MemoryInputChannel,
        MemoryOutputChannel, OutputChannel, Payload, PayloadPool, Record, SessionConfig, WaitKind,
    };
}
