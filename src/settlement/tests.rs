//! Tests for explicit and implicit settlement in the window.

use proptest::prelude::*;
use rstest::{fixture, rstest};

use super::*;

fn pending(tag: u64) -> PendingTransfer {
    PendingTransfer {
        handle: Handle::new(0),
        delivery_tag: DeliveryTag::new(tag),
        expected: Outcome::Released,
    }
}

/// A window holding transfers 0..5 with delivery tags 1..=5.
#[fixture]
fn window() -> SettlementWindow {
    let mut window = SettlementWindow::new();
    for tag in 1..=5 {
        window.record(pending(tag));
    }
    window
}

fn id(value: u64) -> TransferId { TransferId::new(value) }

#[test]
fn transfer_ids_start_at_zero_without_gaps() {
    let mut window = SettlementWindow::new();
    let ids: Vec<u64> = (0..4)
        .map(|n| {
            if n % 2 == 0 {
                window.record(pending(n)).get()
            } else {
                window.record_settled().get()
            }
        })
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    assert_eq!(window.next_transfer_id(), id(4));
}

#[test]
fn empty_window_tracks_next_transfer_id() {
    let mut window = SettlementWindow::new();
    assert_eq!(window.low_water_mark(), id(0));
    window.record_settled();
    window.record_settled();
    assert_eq!(window.low_water_mark(), id(2));
}

#[rstest]
fn settling_range_removes_pending_in_order(mut window: SettlementWindow) {
    let settled = window.settle_range(id(1), id(3), Some(Outcome::Accepted));
    let tags: Vec<u64> = settled.iter().map(|s| s.delivery_tag.get()).collect();
    assert_eq!(tags, vec![2, 3, 4]);
    assert!(settled.iter().all(|s| s.outcome == Outcome::Accepted));
    window.refresh_low_water_mark();
    assert_eq!(window.low_water_mark(), id(0));
    assert_eq!(window.pending_len(), 2);
}

#[rstest]
fn missing_outcome_uses_expected_outcome(mut window: SettlementWindow) {
    let settled = window.settle_range(id(0), id(0), None);
    assert_eq!(settled[0].outcome, Outcome::Released);
}

#[rstest]
fn range_below_low_water_mark_is_ignored(mut window: SettlementWindow) {
    window.settle_range(id(0), id(2), Some(Outcome::Accepted));
    window.refresh_low_water_mark();
    assert_eq!(window.low_water_mark(), id(3));

    assert!(window.settle_range(id(0), id(2), Some(Outcome::Accepted)).is_empty());
    assert_eq!(window.pending_len(), 2);
}

#[rstest]
fn range_start_is_clamped_to_low_water_mark(mut window: SettlementWindow) {
    window.settle_range(id(0), id(1), None);
    window.refresh_low_water_mark();
    let settled = window.settle_range(id(0), id(3), Some(Outcome::Rejected));
    let ids: Vec<u64> = settled.iter().map(|s| s.transfer_id.get()).collect();
    assert_eq!(ids, vec![2, 3]);
}

#[rstest]
fn resettling_is_a_no_op(mut window: SettlementWindow) {
    assert_eq!(window.settle_range(id(2), id(2), None).len(), 1);
    assert!(window.settle_range(id(2), id(2), None).is_empty());
}

#[rstest]
fn pending_range_reports_links_without_settling(mut window: SettlementWindow) {
    window.settle_range(id(0), id(0), None);
    window.refresh_low_water_mark();
    let ids: Vec<u64> = window
        .pending_range(id(0), id(2))
        .map(|(transfer_id, pending)| {
            assert_eq!(pending.handle, Handle::new(0));
            transfer_id.get()
        })
        .collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(window.pending_len(), 4);
    assert_eq!(window.pending_range(id(3), id(2)).count(), 0);
}

#[test]
fn default_window_matches_new() {
    let window = SettlementWindow::default();
    assert_eq!(window.low_water_mark(), TransferId::default());
    assert_eq!(window.next_transfer_id(), SettlementWindow::new().next_transfer_id());
}

#[rstest]
fn inverted_range_settles_nothing(mut window: SettlementWindow) {
    assert!(window.settle_range(id(3), id(1), None).is_empty());
    assert_eq!(window.pending_len(), 5);
}

#[rstest]
fn advance_settles_below_requested_mark(mut window: SettlementWindow) {
    let settled = window.advance_to(id(3)).expect("forward move");
    let ids: Vec<u64> = settled.iter().map(|s| s.transfer_id.get()).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert!(settled.iter().all(|s| s.outcome == Outcome::Released));
    assert_eq!(window.low_water_mark(), id(3));
}

#[rstest]
fn advance_skips_to_smallest_remaining(mut window: SettlementWindow) {
    window.settle_range(id(2), id(3), None);
    let settled = window.advance_to(id(2)).expect("forward move");
    assert_eq!(settled.len(), 2);
    assert_eq!(window.low_water_mark(), id(4));
}

#[rstest]
fn advance_rejects_rollback(mut window: SettlementWindow) {
    window.advance_to(id(2)).expect("forward move");
    let err = window.advance_to(id(1)).expect_err("rollback");
    assert_eq!(
        err,
        WindowError::Rollback {
            current: id(2),
            requested: id(1),
        }
    );
    assert_eq!(window.pending_len(), 3);
}

#[rstest]
fn advance_rejects_mark_beyond_next(mut window: SettlementWindow) {
    let err = window.advance_to(id(9)).expect_err("beyond next");
    assert!(matches!(err, WindowError::BeyondNext { .. }));
    assert_eq!(window.pending_len(), 5);
}

#[rstest]
#[case("amqp:accepted:list", Some(Outcome::Accepted))]
#[case("amqp:rejected:list", Some(Outcome::Rejected))]
#[case("amqp:released:list", Some(Outcome::Released))]
#[case("amqp:modified:list", None)]
fn outcome_from_symbol(#[case] raw: &str, #[case] expected: Option<Outcome>) {
    assert_eq!(Outcome::try_from(&Symbol::from(raw)).ok(), expected);
}

#[derive(Clone, Debug)]
enum Op {
    Send,
    Settle { first: u64, len: u64 },
    Advance(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Send),
        2 => (0_u64..40, 0_u64..6).prop_map(|(first, len)| Op::Settle { first, len }),
        1 => (0_u64..40).prop_map(Op::Advance),
    ]
}

proptest! {
    #[test]
    fn low_water_mark_never_decreases(ops in prop::collection::vec(op(), 1..80)) {
        let mut window = SettlementWindow::new();
        let mut sent = 0_u64;
        let mut settled_ids = Vec::new();
        for op in ops {
            let before = window.low_water_mark();
            match op {
                Op::Send => {
                    let assigned = window.record(pending(sent));
                    prop_assert_eq!(assigned.get(), sent);
                    sent += 1;
                }
                Op::Settle { first, len } => {
                    for s in window.settle_range(id(first), id(first + len), None) {
                        settled_ids.push(s.transfer_id);
                    }
                    window.refresh_low_water_mark();
                }
                Op::Advance(to) => {
                    match window.advance_to(id(to)) {
                        Ok(settled) => settled_ids.extend(settled.iter().map(|s| s.transfer_id)),
                        Err(_) => prop_assert!(id(to) < before || id(to) > window.next_transfer_id()),
                    }
                }
            }
            prop_assert!(window.low_water_mark() >= before);
            prop_assert!(window.low_water_mark() <= window.next_transfer_id());
            if let Some(smallest) = (0..sent).map(id).find(|i| window.pending(*i).is_some()) {
                prop_assert_eq!(window.low_water_mark(), smallest);
            }
        }
        let mut unique = settled_ids.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), settled_ids.len(), "a transfer was settled twice");
    }
}
