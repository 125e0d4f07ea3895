//! Streaming mode: frame sorting, slice building and END placement.

use crate::config::{BuildMode, SessionConfig};
use crate::error::BuildError;
use crate::payload::Payload;
use crate::record::Record;
use crate::tests::fixtures::{data, end_all, handshake, inputs, kinds, outputs, start, timed};

fn streaming(workers: usize) -> SessionConfig {
    SessionConfig::default()
        .with_mode(BuildMode::Streaming)
        .with_workers(workers)
        .with_id(7)
}

#[test]
fn frames_sorted_across_channels() {
    let ins = inputs(2, 32);
    let outs = outputs(1, 2, 16);
    let session = start(&ins, &outs, streaming(2)).unwrap();

    handshake(&ins);
    ins[0].feed(timed(0, 1, &[1])).unwrap();
    ins[0].feed(timed(0, 1, &[2])).unwrap();
    ins[0].feed(timed(0, 2, &[3])).unwrap();
    ins[0].feed(timed(0, 3, &[4])).unwrap();
    ins[1].feed(timed(1, 1, &[5])).unwrap();
    ins[1].feed(timed(1, 2, &[6])).unwrap();
    ins[1].feed(timed(1, 2, &[7])).unwrap();
    ins[1].feed(timed(1, 3, &[8])).unwrap();
    end_all(&ins);

    let report = session.join().expect("run must complete");
    assert_eq!(report.built(), 3, "three frames, three composites");

    let ring0 = outs[0].drain(0);
    assert_eq!(kinds(&ring0), ["PRESTART", "GO", "DATA", "DATA"]);
    assert_eq!(ring0[2].1, vec![1, 2, 5], "frame 1 gathers both channels");
    assert_eq!(ring0[2].0.time_frame, Some(1));
    assert_eq!(ring0[2].0.group_size, 3);
    assert_eq!(ring0[3].1, vec![4, 8], "frame 3 completes from the stash");
    assert_eq!(ring0[3].0.time_frame, Some(3));

    let ring1 = outs[0].drain(1);
    assert_eq!(kinds(&ring1), ["DATA", "END"]);
    assert_eq!(ring1[0].1, vec![3, 6, 7]);
    assert_eq!(ring1[0].0.time_frame, Some(2));
    assert_eq!(ring1[0].0.source_id, 7, "composites carry the session id");
}

#[test]
fn ordered_input_round_robins_builders() {
    let ins = inputs(1, 16);
    let outs = outputs(1, 2, 16);
    let session = start(&ins, &outs, streaming(2)).unwrap();

    handshake(&ins);
    for frame in 1u64..=3 {
        ins[0].feed(timed(0, frame, &[frame as u8])).unwrap();
    }
    end_all(&ins);
    session.join().expect("run must complete");

    let ring0 = outs[0].drain(0);
    assert_eq!(kinds(&ring0), ["PRESTART", "GO", "DATA", "DATA"]);
    assert_eq!(ring0[2].0.time_frame, Some(1));
    assert_eq!(ring0[3].0.time_frame, Some(3));

    let ring1 = outs[0].drain(1);
    assert_eq!(kinds(&ring1), ["DATA", "END"]);
    assert_eq!(ring1[0].0.time_frame, Some(2));
}

#[test]
fn grouping_is_independent_of_feed_interleaving() {
    // same multiset of (channel, frame, payload) records under two arrival
    // orders; the composites must come out identical
    let ch0 = [(1u64, 1u8), (1, 2), (2, 3), (3, 4)];
    let ch1 = [(1u64, 5u8), (2, 6), (2, 7), (3, 8)];

    let run = |interleaved: bool| {
        let ins = inputs(2, 32);
        let outs = outputs(1, 1, 32);
        let session = start(&ins, &outs, streaming(1)).unwrap();

        handshake(&ins);
        if interleaved {
            for ((f0, b0), (f1, b1)) in ch0.iter().zip(&ch1) {
                ins[0].feed(timed(0, *f0, &[*b0])).unwrap();
                ins[1].feed(timed(1, *f1, &[*b1])).unwrap();
            }
        } else {
            for &(frame, byte) in &ch0 {
                ins[0].feed(timed(0, frame, &[byte])).unwrap();
            }
            for &(frame, byte) in &ch1 {
                ins[1].feed(timed(1, frame, &[byte])).unwrap();
            }
        }
        end_all(&ins);
        session.join().expect("run must complete");

        outs[0]
            .drain(0)
            .into_iter()
            .filter(|(meta, _)| meta.kind == crate::record::RecordKind::Data)
            .map(|(meta, payload)| (meta.time_frame, payload))
            .collect::<Vec<_>>()
    };

    let channel_major = run(false);
    let record_major = run(true);
    assert_eq!(channel_major.len(), 3, "three frames either way");
    assert_eq!(
        channel_major, record_major,
        "grouping must not depend on arrival order"
    );
}

#[test]
fn zero_event_run_delivers_end() {
    let ins = inputs(1, 16);
    let outs = outputs(1, 2, 16);
    let session = start(&ins, &outs, streaming(2)).unwrap();

    ins[0]
        .feed(Record::control(crate::record::ControlKind::Prestart))
        .unwrap();
    ins[0]
        .feed(Record::control(crate::record::ControlKind::End))
        .unwrap();

    let report = session.join().expect("zero-event run must complete");
    assert_eq!(report.built(), 0);
    assert_eq!(kinds(&outs[0].drain(0)), ["PRESTART", "END"]);
    assert_eq!(kinds(&outs[0].drain(1)), [] as [&str; 0]);
}

#[test]
fn frame_gap_is_fatal() {
    let ins = inputs(1, 16);
    let outs = outputs(1, 1, 16);
    let session = start(&ins, &outs, streaming(1)).unwrap();

    handshake(&ins);
    ins[0].feed(timed(0, 1, &[1])).unwrap();
    ins[0].feed(timed(0, 2, &[2])).unwrap();
    ins[0].feed(timed(0, 4, &[4])).unwrap();

    let error = session.join().expect_err("skipping a frame is fatal");
    assert!(
        matches!(
            error,
            BuildError::TimeFrameGap {
                channel: 0,
                frame: 4,
                previous: 2,
            }
        ),
        "unexpected error: {error}"
    );
}

#[test]
fn untimed_record_is_fatal() {
    let ins = inputs(1, 16);
    let outs = outputs(1, 1, 16);
    let session = start(&ins, &outs, streaming(1)).unwrap();

    handshake(&ins);
    ins[0].feed(data(0, 1, &[1])).unwrap();

    let error = session.join().expect_err("frameless data is fatal in streaming");
    assert!(
        matches!(error, BuildError::UntimedRecord { channel: 0 }),
        "unexpected error: {error}"
    );
}

#[test]
fn large_frame_accumulates() {
    let ins = inputs(1, 512);
    let outs = outputs(1, 1, 16);
    let session = start(&ins, &outs, streaming(1)).unwrap();

    handshake(&ins);
    for i in 0..300u64 {
        ins[0].feed(timed(0, 1, &[i as u8])).unwrap();
    }
    ins[0].feed(timed(0, 2, &[0xFF])).unwrap();
    end_all(&ins);

    let report = session.join().expect("run must complete");
    assert_eq!(report.built(), 2);

    let drained = outs[0].drain(0);
    assert_eq!(kinds(&drained), ["PRESTART", "GO", "DATA", "DATA", "END"]);
    assert_eq!(drained[2].0.group_size, 300, "frame size is unbounded");
    assert_eq!(drained[2].1.len(), 300);
    assert_eq!(drained[3].0.time_frame, Some(2));
}

#[test]
fn side_records_forwarded_through_builder_zero() {
    let ins = inputs(1, 16);
    let outs = outputs(1, 1, 16);
    let session = start(&ins, &outs, streaming(1)).unwrap();

    handshake(&ins);
    ins[0].feed(timed(0, 1, &[1])).unwrap();
    ins[0]
        .feed(Record::meta(5, Payload::from_vec(vec![0xCC])))
        .unwrap();
    ins[0].feed(timed(0, 1, &[2])).unwrap();
    end_all(&ins);

    let report = session.join().expect("run must complete");
    let forwarded: u64 = report.workers.iter().map(|w| w.side_forwarded).sum();
    assert_eq!(forwarded, 1);

    let drained = outs[0].drain(0);
    assert_eq!(kinds(&drained), ["PRESTART", "GO", "META", "DATA", "END"]);
    assert_eq!(drained[2].0.source_id, 5);
    assert_eq!(drained[2].1, vec![0xCC]);
    assert_eq!(drained[3].0.group_size, 2, "the frame spans the side record");
}
