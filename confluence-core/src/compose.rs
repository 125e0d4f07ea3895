//! Payload composition for built records.

use std::sync::Arc;

use sluice::SequencedRing;

use crate::channel::ChannelCursor;
use crate::payload::PayloadPool;
use crate::record::{ByteOrder, Record};

/// Concatenate one aligned record per channel into a composite.
///
/// Channel order is preserved, so the composite payload layout is stable
/// across events. Every cursor must be parked on a data record.
pub(crate) fn compose_aligned(
    cursors: &[ChannelCursor],
    pool: &PayloadPool,
    source_id: u32,
    group_size: u32,
    byte_order: ByteOrder,
) -> Record {
    let mut payload = pool.acquire();
    for cursor in cursors {
        payload.extend_from_slice(cursor.record().payload());
    }
    Record::composite(source_id, group_size, None, byte_order, payload)
}

/// Concatenate the slice records of one time frame into a composite.
///
/// `items` holds (channel, sequence) references into the input rings; the
/// slots stay gated until the slice builder releases them after this copy.
pub(crate) fn compose_slices(
    items: &[(usize, i64)],
    inputs: &[Arc<SequencedRing<Record>>],
    pool: &PayloadPool,
    source_id: u32,
    frame: u64,
) -> Record {
    let mut payload = pool.acquire();
    let mut byte_order = ByteOrder::default();
    for &(channel, sequence) in items {
        let record = inputs[channel].get(sequence);
        byte_order = record.byte_order();
        payload.extend_from_slice(record.payload());
    }
    Record::composite(
        source_id,
        items.len() as u32,
        Some(frame),
        byte_order,
        payload,
    )
}
