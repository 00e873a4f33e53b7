//! Session supervision: failures stay on their own channel.

use amqp_bridge::{
    ConnectionError,
    OutboundFrame,
    SessionConfig,
    SessionExit,
    backend::{BackendMessage, ConsumerTag, DEFAULT_EXCHANGE},
    error::Condition,
    frame::{Begin, End, Frame, Handle},
    message::Message,
    test_helpers::{BackendCall, RecordingConnector},
};
use amqp_bridge_testing::{
    BridgeHarness,
    LoggerHandle,
    attach_receiver,
    attach_sender,
    logger,
    transfer,
};
use rstest::rstest;

mod common;

use common::{end_condition, transfers};

const INTERNAL_ERROR: Option<&str> = Some("amqp:internal-error");

fn internal_error(frames: &[OutboundFrame], channel: u16) -> bool {
    frames
        .iter()
        .any(|out| out.channel == channel && end_condition(out).as_deref() == INTERNAL_ERROR)
}

#[tokio::test]
async fn refused_channel_ends_the_session() {
    let mut harness = BridgeHarness::with_connector(
        |broker| RecordingConnector::new(broker).refuse_open(),
        SessionConfig::default(),
    );
    harness.send(4, Begin::default()).await;

    let frames = harness.expect_frames(1).await;
    assert!(internal_error(&frames, 4));
    let report = harness.expect_report().await;
    assert_eq!(report.channel, 4);
    assert!(matches!(report.exit, SessionExit::Failed(_)));
    assert!(harness.connection.active_channels().is_empty());
}

#[tokio::test]
async fn severed_backend_fails_every_session() {
    let mut harness = BridgeHarness::new();
    harness.broker.declare_queue("q");
    for channel in [0, 1] {
        harness.send(channel, Begin::default()).await;
        harness.send(channel, attach_receiver(0, "/queue/q")).await;
    }
    harness.expect_frames(4).await;

    harness.broker.sever("connection reset");
    let frames = harness.expect_frames(2).await;
    assert!(internal_error(&frames, 0));
    assert!(internal_error(&frames, 1));
    for _ in 0..2 {
        let report = harness.expect_report().await;
        assert_eq!(
            report.exit,
            SessionExit::Failed("backend channel closed: connection reset".into())
        );
    }
}

#[rstest]
#[tokio::test]
async fn panicking_session_leaves_siblings_running(mut logger: LoggerHandle) {
    let mut harness = BridgeHarness::with_connector(
        |broker| RecordingConnector::new(broker).panic_on_publish(),
        SessionConfig::default(),
    );
    harness.broker.declare_queue("q");
    harness.send(0, Begin::default()).await;
    harness.send(0, attach_sender(0, "/queue/q")).await;
    harness.send(1, Begin::default()).await;
    harness.send(1, attach_receiver(0, "/queue/q")).await;
    harness.expect_frames(4).await;

    harness
        .send(0, transfer(0, 0, false, &Message::with_body("boom")))
        .await;
    let frames = harness.expect_frames(1).await;
    assert!(internal_error(&frames, 0));
    let report = harness.expect_report().await;
    assert_eq!(report.channel, 0);
    assert!(matches!(report.exit, SessionExit::Panicked(ref msg) if msg.contains("fault injected")));
    assert_eq!(harness.connection.active_channels(), vec![1]);
    assert!(!logger.drain_matching("session task panicked").is_empty());

    harness
        .broker
        .publish(DEFAULT_EXCHANGE, "q", BackendMessage::with_body("still here"))
        .expect("queue exists");
    let delivered = harness.expect_frames(1).await;
    assert_eq!(delivered[0].channel, 1);
    assert_eq!(transfers(&delivered)[0].handle, Handle::new(0));

    // The panicked channel can be reused.
    harness.send(0, Begin::default()).await;
    let reply = harness.expect_frames(1).await;
    assert_eq!(reply[0].channel, 0);
    assert!(matches!(reply[0].frame, Frame::Begin(_)));
}

#[tokio::test]
async fn shutdown_cancels_sessions_and_releases_the_backend() {
    let mut harness = BridgeHarness::new();
    harness.broker.declare_queue("q");
    harness.send(2, Begin::default()).await;
    harness.send(2, attach_receiver(7, "/queue/q")).await;
    harness.expect_frames(2).await;

    harness.connection.shutdown();
    let report = harness.expect_report().await;
    assert_eq!(report.exit, SessionExit::Cancelled);
    harness.connection.wait().await;

    let calls = harness.journal.calls();
    assert_eq!(
        &calls[calls.len() - 2..],
        [
            BackendCall::Cancel(ConsumerTag::for_link(Handle::new(7), 1)),
            BackendCall::Close
        ]
    );
    assert_eq!(harness.broker.channel_count(), 0);
    // Cancellation is not an error; nothing is sent to the peer.
    assert!(harness.drain_frames().is_empty());
}

#[tokio::test]
async fn frames_for_unknown_channels_are_refused() {
    let harness = BridgeHarness::new();
    let err = harness
        .connection
        .route(3, End::default().into())
        .await
        .expect_err("no session on channel 3");
    assert_eq!(
        err,
        ConnectionError::UnknownChannel {
            channel: 3,
            kind: "end"
        }
    );
}

#[tokio::test]
async fn violations_end_only_the_offending_session() {
    let mut harness = BridgeHarness::new();
    harness.send(0, Begin::default()).await;
    harness.send(1, Begin::default()).await;
    harness.expect_frames(2).await;

    harness.send(0, Begin::default()).await;
    let frames = harness.expect_frames(1).await;
    assert_eq!(
        end_condition(&frames[0]).as_deref(),
        Some(Condition::IllegalState.as_symbol_str())
    );
    harness.expect_report().await;
    assert_eq!(harness.connection.active_channels(), vec![1]);
}
