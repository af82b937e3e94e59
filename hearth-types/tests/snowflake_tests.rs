use hearth_types::{Error, IdGenerator, MAX_NODE_ID, MAX_SEQUENCE};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

// ── Construction ──────────────────────────────────────────────────

#[test]
fn rejects_out_of_range_node() {
    let err = IdGenerator::new(MAX_NODE_ID).unwrap_err();
    assert!(matches!(err, Error::InvalidNodeId(n) if n == MAX_NODE_ID));
}

#[test]
fn accepts_max_valid_node() {
    let generator = IdGenerator::new(MAX_NODE_ID - 1).unwrap();
    assert_eq!(generator.node_id(), MAX_NODE_ID - 1);
}

// ── Layout ────────────────────────────────────────────────────────

#[test]
fn fields_decode_back() {
    let generator = IdGenerator::new(321).unwrap();
    let id = generator.next_id_at(1_700_000_000_000);
    assert_eq!(IdGenerator::node_of(id), 321);
    assert_eq!(IdGenerator::timestamp_of(id), 1_700_000_000_000);
    assert_eq!(IdGenerator::sequence_of(id), 0);
}

#[test]
fn same_millisecond_increments_sequence() {
    let generator = IdGenerator::new(1).unwrap();
    let a = generator.next_id_at(1_000);
    let b = generator.next_id_at(1_000);
    assert_eq!(IdGenerator::sequence_of(a), 0);
    assert_eq!(IdGenerator::sequence_of(b), 1);
    assert!(b > a);
}

#[test]
fn sequence_overflow_borrows_next_millisecond() {
    let generator = IdGenerator::new(2).unwrap();
    let mut last = generator.next_id_at(5_000);
    for _ in 1..MAX_SEQUENCE {
        last = generator.next_id_at(5_000);
    }
    assert_eq!(IdGenerator::sequence_of(last), MAX_SEQUENCE - 1);

    let borrowed = generator.next_id_at(5_000);
    assert_eq!(IdGenerator::timestamp_of(borrowed), 5_001);
    assert_eq!(IdGenerator::sequence_of(borrowed), 0);
    assert!(borrowed > last);
}

#[test]
fn clock_going_backwards_stays_monotonic() {
    let generator = IdGenerator::new(3).unwrap();
    let a = generator.next_id_at(10_000);
    let b = generator.next_id_at(9_000);
    assert!(b > a);
    assert_eq!(IdGenerator::timestamp_of(b), 10_000);
}

#[test]
fn system_clock_ids_are_unique_across_threads() {
    let generator = Arc::new(IdGenerator::new(4).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let generator = generator.clone();
            thread::spawn(move || (0..2_000).map(|_| generator.next_id()).collect::<Vec<_>>())
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }
    assert_eq!(seen.len(), 8_000);
}

proptest! {
    /// Any sequence of clock readings yields strictly increasing ids.
    #[test]
    fn ids_strictly_increase(readings in prop::collection::vec(1u64..1_000_000, 1..500)) {
        let generator = IdGenerator::new(9).unwrap();
        let mut previous = None;
        for now in readings {
            let id = generator.next_id_at(now);
            prop_assert_eq!(IdGenerator::node_of(id), 9);
            if let Some(prev) = previous {
                prop_assert!(id > prev);
            }
            previous = Some(id);
        }
    }
}
