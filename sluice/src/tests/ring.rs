use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::{INITIAL_SEQUENCE, RingError, Sequence, SequencedRing, SpinWait};

#[test]
fn claim_publish_get_roundtrip() {
    let ring = SequencedRing::<u64>::with_capacity(8);
    let consumer = Arc::new(Sequence::new(INITIAL_SEQUENCE));
    ring.add_gating_sequence(Arc::clone(&consumer));

    for i in 0..8u64 {
        let seq = ring.claim().expect("claim");
        assert_eq!(seq, i as i64);
        ring.publish(seq, i * 10);
    }
    assert_eq!(ring.cursor(), 7);

    for i in 0..8i64 {
        assert_eq!(*ring.get(i), i as u64 * 10);
        consumer.set(i);
    }
}

#[test]
fn wraps_after_consumer_releases() {
    let ring = SequencedRing::<u64>::with_capacity(4);
    let consumer = Arc::new(Sequence::new(INITIAL_SEQUENCE));
    ring.add_gating_sequence(Arc::clone(&consumer));

    for i in 0..4u64 {
        let seq = ring.claim().expect("claim");
        ring.publish(seq, i);
    }
    // Release the first slot; exactly one more claim becomes possible.
    consumer.set(0);
    let seq = ring.claim().expect("claim after release");
    assert_eq!(seq, 4);
    ring.publish(seq, 100);
    assert_eq!(*ring.get(4), 100);
    // Unreleased slots are untouched.
    assert_eq!(*ring.get(1), 1);
}

/// Backpressure property: the producer cannot claim sequence `k` until the
/// slowest consumer has released `k - capacity`.
#[test]
fn claim_blocks_until_gated_slot_is_released() {
    let ring = Arc::new(SequencedRing::<u64>::new(4, Box::new(SpinWait::new())));
    let consumer = Arc::new(Sequence::new(INITIAL_SEQUENCE));
    ring.add_gating_sequence(Arc::clone(&consumer));

    for i in 0..4u64 {
        let seq = ring.claim().expect("claim");
        ring.publish(seq, i);
    }

    let claimed = Arc::new(AtomicBool::new(false));
    let claimed_flag = Arc::clone(&claimed);
    let producer_ring = Arc::clone(&ring);
    let producer = thread::spawn(move || {
        let seq = producer_ring.claim().expect("claim");
        claimed_flag.store(true, Ordering::Release);
        seq
    });

    thread::sleep(Duration::from_millis(50));
    assert!(
        !claimed.load(Ordering::Acquire),
        "claim completed while slot 0 was still guarded"
    );

    consumer.set(0);
    let seq = producer.join().expect("producer panicked");
    assert_eq!(seq, 4);
}

#[test]
fn alert_unblocks_claim() {
    let ring = Arc::new(SequencedRing::<u64>::with_capacity(2));
    let consumer = Arc::new(Sequence::new(INITIAL_SEQUENCE));
    ring.add_gating_sequence(consumer);

    for i in 0..2u64 {
        let seq = ring.claim().expect("claim");
        ring.publish(seq, i);
    }

    let producer_ring = Arc::clone(&ring);
    let producer = thread::spawn(move || producer_ring.claim());

    thread::sleep(Duration::from_millis(20));
    ring.alert();
    assert_eq!(producer.join().expect("producer panicked"), Err(RingError::Alerted));
}

#[test]
fn barrier_returns_highest_published() {
    let ring = SequencedRing::<u64>::with_capacity(8);
    let consumer = Arc::new(Sequence::new(INITIAL_SEQUENCE));
    ring.add_gating_sequence(consumer);
    let barrier = ring.new_barrier();

    for i in 0..5u64 {
        let seq = ring.claim().expect("claim");
        ring.publish(seq, i);
    }
    assert_eq!(barrier.wait_for(2).expect("wait_for"), 4);
}

#[test]
fn alert_unblocks_barrier() {
    let ring = Arc::new(SequencedRing::<u64>::with_capacity(8));
    let barrier = ring.new_barrier();

    let waiter = thread::spawn(move || barrier.wait_for(0));

    thread::sleep(Duration::from_millis(20));
    ring.alert();
    assert_eq!(waiter.join().expect("waiter panicked"), Err(RingError::Alerted));

    // The flag is sticky until cleared.
    assert!(ring.is_alerted());
    ring.clear_alert();
    assert!(!ring.is_alerted());
}

#[test]
fn drops_live_occupants() {
    let ring = SequencedRing::<Arc<u32>>::with_capacity(4);
    let consumer = Arc::new(Sequence::new(INITIAL_SEQUENCE));
    ring.add_gating_sequence(Arc::clone(&consumer));

    let tracked = Arc::new(0u32);
    for _ in 0..6 {
        let seq = ring.claim().expect("claim");
        ring.publish(seq, Arc::clone(&tracked));
        consumer.set(seq);
    }
    assert_eq!(Arc::strong_count(&tracked), 5, "four live slots plus original");

    drop(ring);
    assert_eq!(Arc::strong_count(&tracked), 1, "ring drop must free occupants");
}

#[test]
#[should_panic(expected = "power of two")]
fn rejects_non_power_of_two_capacity() {
    let _ring = SequencedRing::<u64>::with_capacity(6);
}
