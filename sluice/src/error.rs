//! Error types for ring operations.

use snafu::Snafu;

/// Error while claiming or waiting on a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum RingError {
    /// The ring was alerted while waiting; the caller should unwind.
    #[snafu(display("ring alerted while waiting"))]
    Alerted,
}

/// Result type for ring operations.
pub type Result<T> = core::result::Result<T, RingError>;
