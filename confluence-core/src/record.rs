//! The record model: data, control and side records moving through rings.

use core::fmt;

use crate::payload::{Payload, PayloadPool};

/// Byte order of a record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    /// Little-endian payload words.
    #[default]
    Little,
    /// Big-endian payload words.
    Big,
}

/// Coarse classification of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Buildable payload-bearing record.
    Data,
    /// Run-transition control record.
    Control,
    /// Side (user) record, forwarded but never built.
    Meta,
}

/// Run-transition carried by a control record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Announces an imminent run.
    Prestart,
    /// Marks the start of data.
    Go,
    /// Terminates the run.
    End,
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ControlKind::Prestart => "PRESTART",
            ControlKind::Go => "GO",
            ControlKind::End => "END",
        })
    }
}

/// Copyable summary of a record, safe to hold after the slot is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    /// Record classification.
    pub kind: RecordKind,
    /// Control transition, for control records.
    pub control: Option<ControlKind>,
    /// Identifier of the producing source.
    pub source_id: u32,
    /// Time frame, for streaming data records.
    pub time_frame: Option<u64>,
    /// Entangled-group size, for triggered data records.
    pub group_size: u32,
    /// Payload length in bytes.
    pub payload_len: usize,
}

/// A record occupying one ring slot.
///
/// Records are created by input channels, read in place by build workers and
/// recycled when the slot is overwritten; the payload returns to its pool on
/// drop.
#[derive(Debug)]
pub struct Record {
    kind: RecordKind,
    control: Option<ControlKind>,
    source_id: u32,
    time_frame: Option<u64>,
    group_size: u32,
    byte_order: ByteOrder,
    payload: Payload,
}

impl Record {
    /// Buildable data record for triggered (round-robin) building.
    #[must_use]
    pub fn data(source_id: u32, group_size: u32, payload: Payload) -> Self {
        Self {
            kind: RecordKind::Data,
            control: None,
            source_id,
            time_frame: None,
            group_size,
            byte_order: ByteOrder::default(),
            payload,
        }
    }

    /// Buildable data record tagged with a time frame for streaming.
    #[must_use]
    pub fn timed(source_id: u32, time_frame: u64, payload: Payload) -> Self {
        Self {
            kind: RecordKind::Data,
            control: None,
            source_id,
            time_frame: Some(time_frame),
            group_size: 1,
            byte_order: ByteOrder::default(),
            payload,
        }
    }

    /// Control record carrying a run transition.
    #[must_use]
    pub fn control(kind: ControlKind) -> Self {
        Self {
            kind: RecordKind::Control,
            control: Some(kind),
            source_id: 0,
            time_frame: None,
            group_size: 0,
            byte_order: ByteOrder::default(),
            payload: Payload::empty(),
        }
    }

    /// Side record, forwarded to the output untouched.
    #[must_use]
    pub fn meta(source_id: u32, payload: Payload) -> Self {
        Self {
            kind: RecordKind::Meta,
            control: None,
            source_id,
            time_frame: None,
            group_size: 0,
            byte_order: ByteOrder::default(),
            payload,
        }
    }

    /// Composite record produced by a build worker.
    #[must_use]
    pub(crate) fn composite(
        source_id: u32,
        group_size: u32,
        time_frame: Option<u64>,
        byte_order: ByteOrder,
        payload: Payload,
    ) -> Self {
        Self {
            kind: RecordKind::Data,
            control: None,
            source_id,
            time_frame,
            group_size,
            byte_order,
            payload,
        }
    }

    /// Override the payload byte order.
    #[must_use]
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Record classification.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Control transition, if this is a control record.
    #[inline]
    #[must_use]
    pub fn control_kind(&self) -> Option<ControlKind> {
        self.control
    }

    /// Identifier of the producing source.
    #[inline]
    #[must_use]
    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    /// Time frame, for streaming data records.
    #[inline]
    #[must_use]
    pub fn time_frame(&self) -> Option<u64> {
        self.time_frame
    }

    /// Entangled-group size.
    #[inline]
    #[must_use]
    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    /// Payload byte order.
    #[inline]
    #[must_use]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.payload.as_slice()
    }

    /// Copyable summary of this record.
    #[must_use]
    pub fn meta_of(&self) -> RecordMeta {
        RecordMeta {
            kind: self.kind,
            control: self.control,
            source_id: self.source_id,
            time_frame: self.time_frame,
            group_size: self.group_size,
            payload_len: self.payload.len(),
        }
    }

    /// Copy this record into a fresh pooled payload.
    ///
    /// Used to forward side records downstream while the original stays in
    /// its ring slot.
    #[must_use]
    pub fn duplicate(&self, pool: &PayloadPool) -> Self {
        let mut payload = pool.acquire();
        payload.extend_from_slice(self.payload.as_slice());
        Self {
            kind: self.kind,
            control: self.control,
            source_id: self.source_id,
            time_frame: self.time_frame,
            group_size: self.group_size,
            byte_order: self.byte_order,
            payload,
        }
    }
}
