//! Run-transition handshake and END alignment.
//!
//! A run is bracketed by control records that every input channel must
//! deliver: PRESTART, then GO, then END. Worker 0 (or the sorter, in
//! streaming mode) validates the handshake and forwards side records; peer
//! workers merely hop their cursors past the controls.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use sluice::{OrderedRelease, Sequence};

use crate::channel::ChannelCursor;
use crate::config::SessionConfig;
use crate::distribute::OutputDistributor;
use crate::error::{ControlMismatchSnafu, Flow, Interrupt, UnexpectedRecordSnafu};
use crate::payload::PayloadPool;
use crate::record::{ControlKind, RecordKind};
use crate::session::WorkerStats;

/// Where the session stands in the run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Waiting for PRESTART on every input channel.
    AwaitingPrestart,
    /// PRESTART confirmed, waiting for GO.
    AwaitingGo,
    /// Data taking.
    Running,
    /// END seen on at least one channel, aligning the rest.
    AwaitingEnd,
    /// Run complete or abandoned.
    Stopped,
}

/// Shared, forward-only phase tracker.
///
/// Multiple workers report transitions; the phase only ever moves forward,
/// so late reports from slower workers are no-ops.
pub struct ControlCoordinator {
    phase: Mutex<Phase>,
}

impl ControlCoordinator {
    /// Create a coordinator in [`Phase::AwaitingPrestart`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::AwaitingPrestart),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    /// Advance to `to` if it is ahead of the current phase.
    pub fn advance(&self, to: Phase) {
        let mut phase = self.phase.lock().unwrap();
        if to > *phase {
            tracing::debug!(from = ?*phase, to = ?to, "phase transition");
            *phase = to;
        }
    }
}

impl Default for ControlCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ── Handshake scans ──────────────────────────────────────────────────

/// Side-record forwarding context for the validating scanner.
pub(crate) struct SideForwarder<'a> {
    pub(crate) dist: &'a mut OutputDistributor,
    pub(crate) pool: &'a PayloadPool,
    pub(crate) stats: &'a mut WorkerStats,
}

/// Consume one control record from every channel, validating agreement.
///
/// Side records encountered on the way are forwarded (when `forward` is
/// set) and released. When `expected` is GO, END is also legal: a source
/// may end a run that never took data. All channels must still agree.
pub(crate) fn await_control(
    cursors: &mut [ChannelCursor],
    phase: Phase,
    expected: ControlKind,
    mut forward: Option<SideForwarder<'_>>,
) -> Flow<ControlKind> {
    let allow_end = expected == ControlKind::Go;
    let mut agreed: Option<ControlKind> = None;

    for channel in 0..cursors.len() {
        let kind = loop {
            cursors[channel].wait_next()?;
            let meta = cursors[channel].meta();
            match meta.kind {
                RecordKind::Meta => {
                    if let Some(fwd) = forward.as_mut() {
                        let copy = cursors[channel].record().duplicate(fwd.pool);
                        fwd.dist.publish_side(copy)?;
                        fwd.stats.side_forwarded += 1;
                        cursors[channel].release_and_advance();
                    } else {
                        cursors[channel].advance();
                    }
                }
                RecordKind::Control => {
                    let Some(kind) = meta.control else {
                        return Err(UnexpectedRecordSnafu { channel, phase }.build().into());
                    };
                    if forward.is_some() {
                        cursors[channel].release_and_advance();
                    } else {
                        cursors[channel].advance();
                    }
                    break kind;
                }
                RecordKind::Data => {
                    return Err(UnexpectedRecordSnafu { channel, phase }.build().into());
                }
            }
        };

        if kind != expected && !(allow_end && kind == ControlKind::End) {
            return Err(ControlMismatchSnafu {
                expected,
                got: kind,
                channel,
            }
            .build()
            .into());
        }
        match agreed {
            None => agreed = Some(kind),
            Some(first) if first != kind => {
                return Err(ControlMismatchSnafu {
                    expected: first,
                    got: kind,
                    channel,
                }
                .build()
                .into());
            }
            _ => {}
        }
    }

    Ok(agreed.unwrap_or(expected))
}

/// Hop every cursor past its next control record.
///
/// Peer workers use this during the handshake: the controls are not matched
/// against an expectation (worker 0 does that), but the channels must still
/// agree with each other. Returns the agreed kind.
pub(crate) fn hop_control(cursors: &mut [ChannelCursor], phase: Phase) -> Flow<ControlKind> {
    let mut agreed: Option<ControlKind> = None;

    for channel in 0..cursors.len() {
        let kind = loop {
            cursors[channel].wait_next()?;
            let meta = cursors[channel].meta();
            match meta.kind {
                RecordKind::Meta => cursors[channel].advance(),
                RecordKind::Control => {
                    let Some(kind) = meta.control else {
                        return Err(UnexpectedRecordSnafu { channel, phase }.build().into());
                    };
                    cursors[channel].advance();
                    break kind;
                }
                RecordKind::Data => {
                    return Err(UnexpectedRecordSnafu { channel, phase }.build().into());
                }
            }
        };
        match agreed {
            None => agreed = Some(kind),
            Some(first) if first != kind => {
                return Err(ControlMismatchSnafu {
                    expected: first,
                    got: kind,
                    channel,
                }
                .build()
                .into());
            }
            _ => {}
        }
    }

    Ok(agreed.unwrap_or(ControlKind::Prestart))
}

// ── END alignment ────────────────────────────────────────────────────

/// How drained slots are handed back during an END search.
pub(crate) enum ReleaseHandle {
    /// Advance a worker-owned sequence directly.
    Direct(Arc<Sequence>),
    /// Route through shared in-order bookkeeping.
    Ordered(Arc<OrderedRelease>),
}

impl ReleaseHandle {
    pub(crate) fn release(&self, sequence: i64) {
        match self {
            ReleaseHandle::Direct(seq) => seq.set(sequence),
            ReleaseHandle::Ordered(ordered) => ordered.release(sequence),
        }
    }
}

/// Bounded forward search for END on one channel.
///
/// Polls the producer cursor so the search never blocks on the barrier,
/// releasing (and discarding) whatever data records are still in flight.
/// Returns the END's sequence, or `None` once the bound expires, plus the
/// count of discarded records.
pub(crate) fn search_end(
    cursor: &mut ChannelCursor,
    config: &SessionConfig,
    release: &ReleaseHandle,
) -> Flow<(Option<i64>, u64)> {
    let deadline = Instant::now() + config.end_timeout;
    let mut drained: u64 = 0;

    loop {
        while cursor.produced() >= cursor.next {
            let meta = cursor.meta();
            if meta.kind == RecordKind::Control && meta.control == Some(ControlKind::End) {
                return Ok((Some(cursor.next), drained));
            }
            if meta.kind == RecordKind::Data {
                drained += 1;
            }
            release.release(cursor.next);
            cursor.advance();
        }
        if cursor.ring.is_alerted() {
            return Err(Interrupt::Alerted);
        }
        if Instant::now() >= deadline {
            return Ok((None, drained));
        }
        std::thread::sleep(config.end_poll);
    }
}
