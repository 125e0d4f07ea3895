//! Error taxonomy for the build pipeline.

use snafu::Snafu;

use crate::control::Phase;
use crate::record::ControlKind;

/// Fatal error raised by a build worker or the session.
///
/// Interruption through a ring alert is not an error: alerted workers
/// unwind and report their stats normally.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BuildError {
    /// Input channels disagree on a run transition.
    #[snafu(display(
        "control mismatch: expected {expected} on every channel, channel {channel} delivered {got}"
    ))]
    ControlMismatch {
        /// Transition the handshake was waiting for.
        expected: ControlKind,
        /// Transition actually delivered.
        got: ControlKind,
        /// Index of the offending input channel.
        channel: usize,
    },

    /// A data record arrived where only control records are legal.
    #[snafu(display("channel {channel} delivered a data record during the {phase:?} handshake"))]
    UnexpectedRecord {
        /// Index of the offending input channel.
        channel: usize,
        /// Handshake phase that was interrupted.
        phase: Phase,
    },

    /// A run transition arrived in the middle of data taking.
    #[snafu(display("channel {channel} delivered {got} while the run was active"))]
    UnexpectedControl {
        /// Transition actually delivered.
        got: ControlKind,
        /// Index of the offending input channel.
        channel: usize,
    },

    /// The entangled-group size changed mid-run with peers active.
    #[snafu(display("group size changed from {from} to {to} with {workers} workers active"))]
    GroupSizeChanged {
        /// Group size fixed by the first buildable record.
        from: u32,
        /// Group size that arrived instead.
        to: u32,
        /// Number of active build workers.
        workers: usize,
    },

    /// A streaming channel skipped more than one time frame.
    #[snafu(display("time frame gap on channel {channel}: frame {frame} after {previous}"))]
    TimeFrameGap {
        /// Index of the offending input channel.
        channel: usize,
        /// Frame that arrived.
        frame: u64,
        /// Previous frame seen on the same channel.
        previous: u64,
    },

    /// A streaming data record carries no time frame.
    #[snafu(display("channel {channel} delivered a data record without a time frame"))]
    UntimedRecord {
        /// Index of the offending input channel.
        channel: usize,
    },

    /// END never arrived on some channels within the bounded search.
    #[snafu(display(
        "END missing on input channels {channels:?} ({} of {total}) after bounded search",
        channels.len()
    ))]
    MissingEnd {
        /// Indices of the channels that never produced END.
        channels: Vec<usize>,
        /// Total input channels.
        total: usize,
    },

    /// The session was configured inconsistently.
    #[snafu(display("invalid configuration: {message}"))]
    Configuration {
        /// Human-readable description of the problem.
        message: String,
    },

    /// A worker thread panicked.
    #[snafu(display("worker thread {worker} panicked"))]
    WorkerPanicked {
        /// Index of the panicked worker.
        worker: usize,
    },

    /// Spawning a worker thread failed.
    #[snafu(display("failed to spawn worker thread: {source}"))]
    Spawn {
        /// Underlying OS error.
        source: std::io::Error,
    },
}

/// Result type for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Why a worker left its run loop early.
///
/// `Alerted` is the clean shutdown path (reset or a peer failure);
/// `Failed` carries the fatal error.
#[derive(Debug)]
pub(crate) enum Interrupt {
    Alerted,
    Failed(BuildError),
}

impl From<sluice::RingError> for Interrupt {
    fn from(_: sluice::RingError) -> Self {
        Interrupt::Alerted
    }
}

impl From<BuildError> for Interrupt {
    fn from(error: BuildError) -> Self {
        Interrupt::Failed(error)
    }
}

/// Control flow type for worker internals.
pub(crate) type Flow<T> = std::result::Result<T, Interrupt>;
