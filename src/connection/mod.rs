//! Connection-level supervision of sessions.
//!
//! A [`Connection`] demultiplexes decoded frames by channel number. A
//! `begin` on an unused channel opens a backend channel through the
//! [`Connector`] and spawns a [`SessionActor`] on a [`TaskTracker`]; every
//! other frame is queued to the session that owns its channel. Sessions run
//! independently: a session that fails or panics is answered with an
//! `internal-error` end on its own channel and reported through
//! [`ConnectionOutput::reports`], while its siblings keep running.

mod registry;

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use log::{error, info, warn};
pub use registry::SessionRegistry;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    backend::{Connector, DeliverySink},
    config::SessionConfig,
    error::Condition,
    frame::{End, Frame, OutboundFrame},
    metrics,
    panic::format_panic,
    session::{Session, SessionActor, SessionEvent, SessionExit},
};

/// Final state of one session, as observed by its connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub channel: u16,
    pub exit: SessionExit,
}

/// Streams produced by a [`Connection`].
#[derive(Debug)]
pub struct ConnectionOutput {
    /// Frames for the peer, tagged with their channel.
    pub frames: mpsc::UnboundedReceiver<OutboundFrame>,
    /// One report per session that stopped.
    pub reports: mpsc::UnboundedReceiver<SessionReport>,
}

/// Errors raised while routing a peer frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    /// The frame names a channel with no session and is not a `begin`.
    #[error("no session on channel {channel} for {kind} frame")]
    UnknownChannel { channel: u16, kind: &'static str },
    /// The session stopped before the frame could be queued.
    #[error("session on channel {0} is no longer running")]
    SessionGone(u16),
}

/// Supervisor for the sessions of one peer connection.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use amqp_bridge::{
///     backend::memory::MemoryBroker,
///     config::SessionConfig,
///     connection::Connection,
///     frame::{Begin, End, Frame},
///     session::SessionExit,
/// };
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (connection, mut output) =
///     Connection::new(Arc::new(MemoryBroker::new()), SessionConfig::default());
/// connection.route(0, Begin::default().into()).await.expect("begin opens a session");
/// connection.route(0, End::default().into()).await.expect("session is running");
///
/// let report = output.reports.recv().await.expect("session report");
/// assert_eq!(report.exit, SessionExit::Ended);
/// let first = output.frames.recv().await.expect("begin reply");
/// assert!(matches!(first.frame, Frame::Begin(_)));
/// # }
/// ```
#[derive(Debug)]
pub struct Connection<C> {
    connector: Arc<C>,
    config: SessionConfig,
    sessions: Arc<SessionRegistry>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    reports: mpsc::UnboundedSender<SessionReport>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl<C: Connector> Connection<C> {
    /// Create a connection whose sessions use `connector` and `config`.
    #[must_use]
    pub fn new(connector: Arc<C>, config: SessionConfig) -> (Self, ConnectionOutput) {
        let (outbound, frames) = mpsc::unbounded_channel();
        let (reports, report_rx) = mpsc::unbounded_channel();
        let connection = Self {
            connector,
            config,
            sessions: Arc::new(SessionRegistry::default()),
            outbound,
            reports,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        };
        let output = ConnectionOutput {
            frames,
            reports: report_rx,
        };
        (connection, output)
    }

    /// Deliver a decoded peer frame received on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::UnknownChannel`] for a non-`begin` frame on
    /// a channel without a session and [`ConnectionError::SessionGone`] if
    /// the session stopped concurrently.
    pub async fn route(&self, channel: u16, frame: Frame) -> Result<(), ConnectionError> {
        if let Some(tx) = self.sessions.get(channel) {
            return tx
                .send(SessionEvent::Frame(frame))
                .map_err(|_| ConnectionError::SessionGone(channel));
        }
        if !matches!(frame, Frame::Begin(_)) {
            warn!(
                "frame for unknown channel dropped: channel={channel}, kind={}",
                frame.kind()
            );
            return Err(ConnectionError::UnknownChannel {
                channel,
                kind: frame.kind(),
            });
        }
        let Some(tx) = self.start_session(channel).await else {
            return Ok(());
        };
        tx.send(SessionEvent::Frame(frame))
            .map_err(|_| ConnectionError::SessionGone(channel))
    }

    /// Open a backend channel and spawn the session for `channel`.
    ///
    /// A backend that cannot open a channel ends the session before it
    /// starts; the failure is reported and `None` returned.
    async fn start_session(&self, channel: u16) -> Option<mpsc::UnboundedSender<SessionEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let backend = match self.connector.open(DeliverySink::new(tx.clone())).await {
            Ok(backend) => backend,
            Err(e) => {
                warn!("backend channel open failed: channel={channel}, error={e}");
                report_abnormal(
                    &self.outbound,
                    &self.reports,
                    channel,
                    SessionExit::Failed(e.to_string()),
                );
                return None;
            }
        };
        self.sessions.insert(channel, tx.clone());

        let session = Session::new(channel, self.config, backend);
        let actor = SessionActor::new(session, rx, self.outbound.clone(), self.shutdown.child_token());
        let sessions = Arc::clone(&self.sessions);
        let outbound = self.outbound.clone();
        let reports = self.reports.clone();
        let registered = tx.clone();
        self.tracker.spawn(async move {
            let exit = match AssertUnwindSafe(actor.run()).catch_unwind().await {
                Ok(exit) => exit,
                Err(panic) => {
                    metrics::inc_session_panics();
                    let panic_msg = format_panic(panic);
                    // Emit via both `log` and `tracing` for tests that capture either.
                    error!("session task panicked: channel={channel}, panic={panic_msg}");
                    tracing::error!(channel, panic = %panic_msg, "session task panicked");
                    SessionExit::Panicked(panic_msg.to_string())
                }
            };
            sessions.remove_if_same(channel, &registered);
            if exit.is_abnormal() {
                report_abnormal(&outbound, &reports, channel, exit);
            } else {
                let _ = reports.send(SessionReport { channel, exit });
            }
        });
        info!("session spawned: channel={channel}");
        Some(tx)
    }

    /// Channels with a running session.
    #[must_use]
    pub fn active_channels(&self) -> Vec<u16> { self.sessions.active_channels() }

    /// Ask every session to stop.
    pub fn shutdown(&self) { self.shutdown.cancel(); }

    /// Wait until every spawned session has stopped.
    ///
    /// No further sessions can be spawned once this is called.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// End `channel` with an internal error and report how its session stopped.
fn report_abnormal(
    outbound: &mpsc::UnboundedSender<OutboundFrame>,
    reports: &mpsc::UnboundedSender<SessionReport>,
    channel: u16,
    exit: SessionExit,
) {
    metrics::inc_errors();
    let description = match &exit {
        SessionExit::Panicked(_) => "session task panicked".to_owned(),
        SessionExit::Failed(reason) => format!("backend failure: {reason}"),
        other => format!("{other:?}"),
    };
    let end = End {
        error: Some(Condition::InternalError.with_description(description)),
    };
    let _ = outbound.send(OutboundFrame {
        channel,
        frame: end.into(),
    });
    let _ = reports.send(SessionReport { channel, exit });
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::rstest;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        backend::memory::MemoryBroker,
        frame::{Attach, Begin, Handle, Linkage, Role, Target, Transfer, TransferId},
        test_helpers::RecordingConnector,
    };

    fn sender(address: &str) -> Attach {
        Attach {
            name: "publisher".into(),
            handle: Handle::new(0),
            role: Role::Sender,
            linkage: Some(Linkage {
                source: None,
                target: Some(Target {
                    address: Some(address.into()),
                    dynamic: false,
                }),
            }),
            flow_state: None,
            transfer_unit: None,
        }
    }

    fn empty_transfer() -> Transfer {
        Transfer {
            handle: Handle::new(0),
            transfer_id: TransferId::zero(),
            delivery_tag: Bytes::from_static(b"t"),
            settled: true,
            flow_state: None,
            fragments: crate::message::Message::with_body("x")
                .to_fragments(SessionConfig::default().max_fragment_size())
                .expect("encodable"),
        }
    }

    /// Panics in session tasks are logged with their channel.
    #[rstest]
    #[traced_test]
    #[tokio::test]
    async fn session_panic_is_logged_and_reported() {
        let broker = MemoryBroker::new();
        broker.declare_queue("q");
        let connector = RecordingConnector::new(broker).panic_on_publish();
        let (connection, mut output) = Connection::new(Arc::new(connector), SessionConfig::default());

        connection.route(9, Begin::default().into()).await.expect("begin");
        connection.route(9, sender("/queue/q").into()).await.expect("attach");
        connection.route(9, empty_transfer().into()).await.expect("transfer");

        let report = output.reports.recv().await.expect("report");
        assert_eq!(report.channel, 9);
        assert!(matches!(report.exit, SessionExit::Panicked(_)));
        connection.wait().await;

        logs_assert(|lines: &[&str]| {
            lines
                .iter()
                .find(|line| {
                    line.contains("session task panicked")
                        && line.contains("channel=9")
                        && line.contains("publish fault injected")
                })
                .map(|_| ())
                .ok_or_else(|| "panic log not found".to_string())
        });
    }

    #[tokio::test]
    async fn refused_open_registers_no_session() {
        let connector = RecordingConnector::new(MemoryBroker::new()).refuse_open();
        let (connection, mut output) = Connection::new(Arc::new(connector), SessionConfig::default());

        connection.route(1, Begin::default().into()).await.expect("begin is answered");
        assert!(connection.active_channels().is_empty());

        let end = output.frames.recv().await.expect("end frame");
        let Frame::End(End { error: Some(error) }) = end.frame else {
            panic!("expected an end with an error, got {end:?}");
        };
        assert_eq!(error.condition.as_str(), Condition::InternalError.as_symbol_str());
        let report = output.reports.recv().await.expect("report");
        assert!(matches!(report.exit, SessionExit::Failed(_)));
    }

    #[tokio::test]
    async fn wait_returns_after_shutdown() {
        let (connection, mut output) =
            Connection::new(Arc::new(MemoryBroker::new()), SessionConfig::default());
        for channel in [0, 1, 2] {
            connection.route(channel, Begin::default().into()).await.expect("begin");
        }
        assert_eq!(connection.active_channels(), vec![0, 1, 2]);

        connection.shutdown();
        connection.wait().await;
        let mut exits = Vec::new();
        while let Ok(report) = output.reports.try_recv() {
            exits.push(report.exit);
        }
        assert_eq!(exits, vec![SessionExit::Cancelled; 3]);
        assert!(connection.active_channels().is_empty());
    }
}
