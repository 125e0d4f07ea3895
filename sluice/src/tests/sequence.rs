use std::sync::Arc;
use std::thread;

use crate::{INITIAL_SEQUENCE, Sequence, minimum_sequence};

#[test]
fn starts_at_initial() {
    let seq = Sequence::default();
    assert_eq!(seq.get(), INITIAL_SEQUENCE);
}

#[test]
fn set_is_visible_across_threads() {
    let seq = Arc::new(Sequence::new(INITIAL_SEQUENCE));

    let writer_seq = Arc::clone(&seq);
    let writer = thread::spawn(move || {
        for i in 0..1_000 {
            writer_seq.set(i);
        }
    });

    let reader_seq = Arc::clone(&seq);
    let reader = thread::spawn(move || {
        let mut last = INITIAL_SEQUENCE;
        while last < 999 {
            let now = reader_seq.get();
            assert!(now >= last, "sequence went backwards: {} after {}", now, last);
            last = now;
        }
    });

    writer.join().expect("writer panicked");
    reader.join().expect("reader panicked");
}

#[test]
fn fetch_add_returns_previous() {
    let seq = Sequence::new(INITIAL_SEQUENCE);
    assert_eq!(seq.fetch_add(1), -1);
    assert_eq!(seq.fetch_add(1), 0);
    assert_eq!(seq.get(), 1);
}

#[test]
fn minimum_of_empty_set_is_unbounded() {
    assert_eq!(minimum_sequence(&[]), i64::MAX);
}

#[test]
fn minimum_picks_slowest() {
    let set = vec![
        Arc::new(Sequence::new(5)),
        Arc::new(Sequence::new(2)),
        Arc::new(Sequence::new(9)),
    ];
    assert_eq!(minimum_sequence(&set), 2);
}
