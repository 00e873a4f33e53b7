//! End-to-end sessions through a connection and the in-memory broker.

use amqp_bridge::{
    backend::{BackendMessage, ConsumerTag, DEFAULT_EXCHANGE},
    frame::{Begin, End, Frame, Handle, Role, TransferId},
    message::{Message, MessageAssembler, Properties},
    settlement::Outcome,
    test_helpers::BackendCall,
};
use amqp_bridge_testing::{
    BridgeHarness,
    attach_receiver,
    attach_sender,
    settle,
    transfer,
    with_session_credit,
};
use rstest::{fixture, rstest};

mod common;

use common::{ack_count, attach_reply, dispositions, transfers};

/// A harness with queue `q` and a begun session on channel 0.
#[fixture]
async fn begun() -> BridgeHarness {
    let mut harness = BridgeHarness::new();
    harness.broker.declare_queue("q");
    harness.send(0, Begin::default()).await;
    let replies = harness.expect_frames(1).await;
    assert_eq!(
        replies[0].frame,
        Frame::Begin(Begin {
            remote_channel: Some(0)
        })
    );
    harness
}

fn publish(harness: &BridgeHarness, count: usize) {
    for n in 0..count {
        harness
            .broker
            .publish(DEFAULT_EXCHANGE, "q", BackendMessage::with_body(format!("m{n}")))
            .expect("default exchange routes to q");
    }
}

#[rstest]
#[tokio::test]
async fn credit_and_settlement_round_trip(#[future] begun: BridgeHarness) {
    let mut harness = begun.await;
    harness
        .send(0, with_session_credit(attach_receiver(0, "/queue/q"), 10))
        .await;
    harness.expect_frames(1).await;

    publish(&harness, 3);
    let sent = transfers(&harness.expect_frames(3).await);
    let ids: Vec<u64> = sent.iter().map(|t| t.transfer_id.get()).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    let state = sent[2].flow_state.clone().expect("flow state");
    assert_eq!(state.transfer_count, Some(3));
    assert_eq!(state.session_credit, Some(7));

    harness.send(0, settle(0, 2, false, Outcome::Accepted)).await;
    let replies = dispositions(&harness.expect_frames(1).await);
    assert_eq!(replies[0].role, Role::Sender);
    assert!(replies[0].extents[0].settled);
    assert_eq!(ack_count(&harness.journal.calls()), 3);
    assert_eq!(harness.broker.unacked_count(), 0);

    // The next transfer reports the advanced window.
    publish(&harness, 1);
    let next = transfers(&harness.expect_frames(1).await);
    let state = next[0].flow_state.clone().expect("flow state");
    assert_eq!(next[0].transfer_id, TransferId::new(3));
    assert_eq!(state.unsettled_lwm, Some(TransferId::new(3)));
    assert_eq!(state.session_credit, Some(9));
}

#[rstest]
#[tokio::test]
async fn settlement_happens_exactly_once(#[future] begun: BridgeHarness) {
    let mut harness = begun.await;
    harness
        .send(0, with_session_credit(attach_receiver(0, "/queue/q"), 10))
        .await;
    harness.expect_frames(1).await;
    publish(&harness, 2);
    harness.expect_frames(2).await;

    harness.send(0, settle(0, 1, true, Outcome::Accepted)).await;
    harness.send(0, settle(0, 1, false, Outcome::Accepted)).await;
    harness.send(0, End::default()).await;

    let rest = harness.expect_frames(1).await;
    assert_eq!(rest[0].frame, Frame::End(End::default()));
    assert_eq!(ack_count(&harness.journal.calls()), 2);
}

#[rstest]
#[tokio::test]
async fn end_releases_subscriptions_before_closing(#[future] begun: BridgeHarness) {
    let mut harness = begun.await;
    harness.send(0, attach_receiver(5, "/queue/q")).await;
    harness.expect_frames(1).await;
    publish(&harness, 1);
    harness.expect_frames(1).await;

    harness.send(0, End::default()).await;
    harness.expect_frames(1).await;
    let report = harness.expect_report().await;
    assert_eq!(report.channel, 0);

    let calls = harness.journal.calls();
    let tail = &calls[calls.len() - 2..];
    assert_eq!(
        tail,
        [
            BackendCall::Cancel(ConsumerTag::for_link(Handle::new(5), 1)),
            BackendCall::Close
        ]
    );
    // The unsettled delivery went back to its queue.
    assert_eq!(harness.broker.queue_depth("q"), Some(1));
    assert_eq!(harness.broker.channel_count(), 0);
}

#[rstest]
#[tokio::test]
async fn published_messages_come_back_as_transfers(#[future] begun: BridgeHarness) {
    let mut harness = begun.await;
    harness.send(0, attach_sender(0, "/queue/q")).await;
    harness.send(0, attach_receiver(1, "/queue/q")).await;
    let attaches = harness.expect_frames(2).await;
    assert!(attaches.iter().all(|out| matches!(out.frame, Frame::Attach(_))));

    let mut message = Message::with_body("payload");
    message.properties = Some(Properties {
        content_type: Some("text/plain".into()),
        ..Properties::default()
    });
    message
        .application_properties
        .insert("origin".into(), "test".into());
    harness.send(0, transfer(0, 0, false, &message)).await;

    let frames = harness.expect_frames(2).await;
    let accepted = dispositions(&frames);
    assert_eq!(accepted[0].role, Role::Receiver);
    assert_eq!(
        accepted[0].extents[0].outcome,
        Some(Outcome::Accepted.to_symbol())
    );

    let delivered = transfers(&frames);
    assert_eq!(delivered[0].handle, Handle::new(1));
    let assembler = MessageAssembler::new(
        std::num::NonZeroUsize::new(1024 * 1024).expect("non-zero limit"),
    );
    let received = assembler
        .assemble(&delivered[0].fragments)
        .expect("bridge emits well-formed fragments");
    assert_eq!(received.body, message.body);
    assert_eq!(received.subject(), Some("q"));
    assert_eq!(
        received.application_properties.get("origin").map(String::as_str),
        Some("test")
    );
    assert_eq!(
        received.properties.and_then(|p| p.content_type).as_deref(),
        Some("text/plain")
    );
}

#[rstest]
#[tokio::test]
async fn attach_reply_echoes_link_identity(#[future] begun: BridgeHarness) {
    let mut harness = begun.await;
    harness.send(0, attach_sender(3, "/queue/q")).await;
    let reply = attach_reply(&harness.expect_frames(1).await);
    assert_eq!(reply.handle, Handle::new(3));
    assert_eq!(reply.name, "sender-3");
    assert_eq!(reply.role, Role::Receiver);
}
