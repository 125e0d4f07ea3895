//! Triggered-mode building: sharding, composition and END placement.

use crate::config::SessionConfig;
use crate::error::BuildError;
use crate::payload::Payload;
use crate::record::{ControlKind, Record};
use crate::tests::fixtures::{data, end_all, handshake, inputs, kinds, outputs, quick_end, start};

#[test]
fn single_worker_concatenates_in_channel_order() {
    let ins = inputs(2, 16);
    let outs = outputs(1, 1, 16);
    let config = SessionConfig::default().with_workers(1).with_id(99);
    let session = start(&ins, &outs, config).unwrap();

    handshake(&ins);
    ins[0].feed(data(0, 1, &[1, 2])).unwrap();
    ins[1].feed(data(1, 1, &[3, 4])).unwrap();
    ins[0].feed(data(0, 1, &[5])).unwrap();
    ins[1].feed(data(1, 1, &[6])).unwrap();
    end_all(&ins);

    let report = session.join().expect("run must complete");
    assert_eq!(report.built(), 2);

    let drained = outs[0].drain(0);
    assert_eq!(kinds(&drained), ["PRESTART", "GO", "DATA", "DATA", "END"]);
    assert_eq!(drained[2].1, vec![1, 2, 3, 4], "channel order must hold");
    assert_eq!(drained[3].1, vec![5, 6]);
    assert_eq!(drained[2].0.source_id, 99, "composites carry the session id");
}

#[test]
fn two_workers_partition_events() {
    let ins = inputs(1, 32);
    let outs = outputs(1, 2, 16);
    let session = start(&ins, &outs, SessionConfig::default().with_workers(2)).unwrap();

    handshake(&ins);
    for ev in 0u8..4 {
        ins[0].feed(data(0, 1, &[ev])).unwrap();
    }
    end_all(&ins);

    let report = session.join().expect("run must complete");
    assert_eq!(report.built(), 4);

    let ring0 = outs[0].drain(0);
    assert_eq!(kinds(&ring0), ["PRESTART", "GO", "DATA", "DATA", "END"]);
    assert_eq!(ring0[2].1, vec![0], "worker 0 builds the even events");
    assert_eq!(ring0[3].1, vec![2]);

    let ring1 = outs[0].drain(1);
    assert_eq!(kinds(&ring1), ["DATA", "DATA"]);
    assert_eq!(ring1[0].1, vec![1], "worker 1 builds the odd events");
    assert_eq!(ring1[1].1, vec![3]);
}

#[test]
fn end_walks_channels_and_rings() {
    let ins = inputs(1, 32);
    let outs = outputs(2, 2, 16);
    let session = start(&ins, &outs, SessionConfig::default().with_workers(2)).unwrap();

    handshake(&ins);
    for ev in 0u8..4 {
        ins[0].feed(data(0, 1, &[ev])).unwrap();
    }
    end_all(&ins);
    session.join().expect("run must complete");

    // events 0..4 round-robin over (channel = ev % 2, ring = worker);
    // END continues the walk from event 4
    assert_eq!(
        kinds(&outs[0].drain(0)),
        ["PRESTART", "GO", "DATA", "DATA", "END"]
    );
    assert_eq!(kinds(&outs[0].drain(1)), [] as [&str; 0]);
    assert_eq!(kinds(&outs[1].drain(0)), ["PRESTART", "GO"]);
    assert_eq!(kinds(&outs[1].drain(1)), ["DATA", "DATA", "END"]);
}

#[test]
fn every_record_built_exactly_once() {
    let ins = inputs(2, 64);
    let outs = outputs(1, 2, 64);
    let session = start(&ins, &outs, SessionConfig::default().with_workers(2)).unwrap();

    handshake(&ins);
    for ev in 0u8..20 {
        ins[0].feed(data(0, 1, &[ev])).unwrap();
        ins[1].feed(data(1, 1, &[100 + ev])).unwrap();
    }
    end_all(&ins);

    let report = session.join().expect("run must complete");
    assert_eq!(report.built(), 20);

    let mut seen = Vec::new();
    for ring in 0..2 {
        let mut previous: Option<u8> = None;
        for (meta, payload) in outs[0].drain(ring) {
            if meta.kind != crate::record::RecordKind::Data {
                continue;
            }
            assert_eq!(payload.len(), 2, "one record per channel per composite");
            assert_eq!(payload[1], 100 + payload[0], "channels must stay aligned");
            if let Some(previous) = previous {
                assert!(payload[0] > previous, "ring order must follow event order");
            }
            previous = Some(payload[0]);
            seen.push(payload[0]);
        }
    }
    seen.sort_unstable();
    let expected: Vec<u8> = (0..20).collect();
    assert_eq!(seen, expected, "every event exactly once across the rings");
}

#[test]
fn end_arrives_after_every_data_record() {
    let ins = inputs(2, 64);
    let outs = outputs(2, 2, 32);
    let config = quick_end(SessionConfig::default().with_workers(2));
    let session = start(&ins, &outs, config).unwrap();

    handshake(&ins);
    for ev in 0u8..10 {
        ins[0].feed(data(0, 1, &[ev])).unwrap();
        ins[1].feed(data(1, 1, &[ev])).unwrap();
    }
    end_all(&ins);
    session.join().expect("run must complete");

    for channel in 0..2 {
        for ring in 0..2 {
            let drained = outs[channel].drain(ring);
            let end_positions: Vec<usize> = drained
                .iter()
                .enumerate()
                .filter(|(_, (meta, _))| meta.control == Some(ControlKind::End))
                .map(|(i, _)| i)
                .collect();
            if let Some(&at) = end_positions.first() {
                assert_eq!(end_positions.len(), 1, "END is delivered once per ring");
                assert_eq!(
                    at,
                    drained.len() - 1,
                    "channel {channel} ring {ring}: END must follow every record"
                );
            }
        }
    }
}

#[test]
fn group_size_change_is_fatal_with_peers() {
    let ins = inputs(1, 32);
    let outs = outputs(1, 2, 16);
    let session = start(&ins, &outs, SessionConfig::default().with_workers(2)).unwrap();

    handshake(&ins);
    ins[0].feed(data(0, 2, &[0])).unwrap();
    ins[0].feed(data(0, 2, &[1])).unwrap();
    ins[0].feed(data(0, 3, &[2])).unwrap();

    let error = session.join().expect_err("group size change is fatal");
    assert!(
        matches!(
            error,
            BuildError::GroupSizeChanged {
                from: 2,
                to: 3,
                workers: 2,
            }
        ),
        "unexpected error: {error}"
    );
}

#[test]
fn group_size_change_adopted_single_worker() {
    let ins = inputs(1, 16);
    let outs = outputs(1, 1, 16);
    let session = start(&ins, &outs, SessionConfig::default().with_workers(1)).unwrap();

    handshake(&ins);
    ins[0].feed(data(0, 2, &[0])).unwrap();
    ins[0].feed(data(0, 3, &[1])).unwrap();
    end_all(&ins);

    session.join().expect("single worker adopts the new size");
    let drained = outs[0].drain(0);
    assert_eq!(drained[2].0.group_size, 2);
    assert_eq!(drained[3].0.group_size, 3);
}

#[test]
fn mid_run_side_record_forwarded_once() {
    let ins = inputs(1, 32);
    let outs = outputs(1, 2, 16);
    let session = start(&ins, &outs, SessionConfig::default().with_workers(2)).unwrap();

    handshake(&ins);
    ins[0].feed(data(0, 1, &[0])).unwrap();
    ins[0]
        .feed(Record::meta(5, Payload::from_vec(vec![0xBB])))
        .unwrap();
    ins[0].feed(data(0, 1, &[1])).unwrap();
    end_all(&ins);

    let report = session.join().expect("run must complete");
    let forwarded: u64 = report.workers.iter().map(|w| w.side_forwarded).sum();
    assert_eq!(forwarded, 1, "only worker 0 forwards side records");

    assert_eq!(
        kinds(&outs[0].drain(0)),
        ["PRESTART", "GO", "DATA", "META", "END"]
    );
    assert_eq!(kinds(&outs[0].drain(1)), ["DATA"]);
}

#[test]
fn missing_end_is_fatal() {
    let ins = inputs(2, 16);
    let outs = outputs(1, 1, 16);
    let config = quick_end(SessionConfig::default().with_workers(1));
    let session = start(&ins, &outs, config).unwrap();

    handshake(&ins);
    ins[0].feed(Record::control(ControlKind::End)).unwrap();

    let error = session.join().expect_err("END must arrive on every channel");
    assert!(
        matches!(
            error,
            BuildError::MissingEnd { ref channels, total: 2 } if channels == &[1]
        ),
        "the failure must name the silent channel: {error}"
    );
}

#[test]
fn end_search_drains_trailing_records() {
    let ins = inputs(2, 16);
    let outs = outputs(1, 1, 16);
    let config = quick_end(SessionConfig::default().with_workers(1));
    let session = start(&ins, &outs, config).unwrap();

    handshake(&ins);
    ins[0].feed(Record::control(ControlKind::End)).unwrap();
    ins[1].feed(data(1, 1, &[9])).unwrap();
    ins[1].feed(data(1, 1, &[9])).unwrap();
    ins[1].feed(Record::control(ControlKind::End)).unwrap();

    let report = session.join().expect("late END must still complete the run");
    assert_eq!(report.built(), 0, "unpaired records are discarded, not built");
    assert_eq!(kinds(&outs[0].drain(0)), ["PRESTART", "GO", "END"]);
}
