//! A connection over a recording in-memory broker.

use std::{sync::Arc, time::Duration};

use amqp_bridge::{
    Connection,
    ConnectionOutput,
    SessionConfig,
    SessionReport,
    backend::memory::MemoryBroker,
    frame::{Frame, OutboundFrame},
    test_helpers::{CallJournal, RecordingConnector},
};
use tokio::time::timeout;

/// How long a harness waits for the bridge before failing the test.
pub const WAIT: Duration = Duration::from_secs(2);

/// Connection under test plus the broker behind it.
///
/// ```rust
/// use amqp_bridge::frame::{Begin, Frame};
/// use amqp_bridge_testing::BridgeHarness;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut harness = BridgeHarness::new();
/// harness.send(0, Begin::default()).await;
/// let replies = harness.expect_frames(1).await;
/// assert!(matches!(replies[0].frame, Frame::Begin(_)));
/// # }
/// ```
pub struct BridgeHarness {
    pub broker: MemoryBroker,
    pub journal: CallJournal,
    pub connection: Connection<RecordingConnector<MemoryBroker>>,
    output: ConnectionOutput,
}

impl BridgeHarness {
    /// Harness with default session limits and a well-behaved broker.
    pub fn new() -> Self { Self::with_connector(RecordingConnector::new, SessionConfig::default()) }

    /// Harness whose connector is derived from a fresh broker by `build`.
    pub fn with_connector<F>(build: F, config: SessionConfig) -> Self
    where
        F: FnOnce(MemoryBroker) -> RecordingConnector<MemoryBroker>,
    {
        let broker = MemoryBroker::new();
        let connector = build(broker.clone());
        let journal = connector.journal();
        let (connection, output) = Connection::new(Arc::new(connector), config);
        Self {
            broker,
            journal,
            connection,
            output,
        }
    }

    /// Route `frame` on `channel`.
    ///
    /// # Panics
    ///
    /// Panics if the connection refuses the frame.
    pub async fn send(&self, channel: u16, frame: impl Into<Frame>) {
        self.connection
            .route(channel, frame.into())
            .await
            .expect("connection accepts frame");
    }

    /// Wait for exactly `count` outbound frames.
    ///
    /// # Panics
    ///
    /// Panics if the frames do not arrive within [`WAIT`].
    pub async fn expect_frames(&mut self, count: usize) -> Vec<OutboundFrame> {
        let mut frames = Vec::with_capacity(count);
        while frames.len() < count {
            let next = timeout(WAIT, self.output.frames.recv())
                .await
                .expect("bridge produced frames in time")
                .expect("frame stream open");
            frames.push(next);
        }
        frames
    }

    /// Wait for the next session report.
    ///
    /// # Panics
    ///
    /// Panics if no session stops within [`WAIT`].
    pub async fn expect_report(&mut self) -> SessionReport {
        timeout(WAIT, self.output.reports.recv())
            .await
            .expect("session stopped in time")
            .expect("report stream open")
    }

    /// Frames emitted so far without waiting.
    pub fn drain_frames(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.output.frames.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

impl Default for BridgeHarness {
    fn default() -> Self { Self::new() }
}
