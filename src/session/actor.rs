//! Task driving one session from its inbound queue.

use log::{debug, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Session, SessionEvent, SessionExit, Step, counter::ActiveSession};
use crate::{
    backend::Backend,
    frame::{Frame, OutboundFrame},
    metrics::{self, Direction},
};

/// Actor owning a [`Session`] and the queues around it.
///
/// Events are handled strictly one at a time in arrival order. The actor
/// stops when the session closes, the connection cancels it, the inbound
/// queue closes, or the outbound stream goes away. The backend channel is
/// torn down on every exit path except a panic; the backend releases an
/// abandoned channel when it is dropped.
///
/// # Examples
///
/// ```
/// use amqp_bridge::{
///     backend::{Connector, DeliverySink, memory::MemoryBroker},
///     config::SessionConfig,
///     frame::{Begin, End},
///     session::{Session, SessionActor, SessionEvent, SessionExit},
/// };
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let broker = MemoryBroker::new();
/// let (events_tx, events_rx) = mpsc::unbounded_channel();
/// let backend = broker
///     .open(DeliverySink::new(events_tx.clone()))
///     .await
///     .expect("open channel");
/// let (out_tx, mut out_rx) = mpsc::unbounded_channel();
/// let session = Session::new(0, SessionConfig::default(), backend);
/// let actor = SessionActor::new(session, events_rx, out_tx, CancellationToken::new());
///
/// events_tx.send(SessionEvent::Frame(Begin::default().into())).expect("queue open");
/// events_tx.send(SessionEvent::Frame(End::default().into())).expect("queue open");
/// assert_eq!(actor.run().await, SessionExit::Ended);
/// assert_eq!(out_rx.recv().await.map(|out| out.frame.kind()), Some("begin"));
/// assert_eq!(out_rx.recv().await.map(|out| out.frame.kind()), Some("end"));
/// # }
/// ```
#[derive(Debug)]
pub struct SessionActor<B> {
    session: Session<B>,
    inbox: mpsc::UnboundedReceiver<SessionEvent>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    shutdown: CancellationToken,
    counter: ActiveSession,
}

impl<B: Backend> SessionActor<B> {
    /// Create an actor for `session`, reading `inbox` and writing `outbound`.
    #[must_use]
    pub fn new(
        session: Session<B>,
        inbox: mpsc::UnboundedReceiver<SessionEvent>,
        outbound: mpsc::UnboundedSender<OutboundFrame>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            session,
            inbox,
            outbound,
            shutdown,
            counter: ActiveSession::new(),
        }
    }

    /// Drive the session until it terminates.
    pub async fn run(mut self) -> SessionExit {
        let channel = self.session.channel();
        info!(
            "session started: channel={channel}, amqp_bridge_active_sessions={}",
            super::active_session_count()
        );
        let exit = loop {
            let Some(event) = self.next_event().await else {
                break SessionExit::Cancelled;
            };
            let Some(event) = event else {
                break SessionExit::Disconnected;
            };
            match self.session.handle(event).await {
                Step::Continue(frames) => {
                    if !self.send(frames) {
                        break SessionExit::Disconnected;
                    }
                }
                Step::Close(frames, exit) => {
                    self.send(frames);
                    break exit;
                }
            }
        };
        self.inbox.close();
        self.session.teardown().await;
        info!("session stopped: channel={channel}, exit={exit:?}");
        drop(self.counter);
        exit
    }

    /// Wait for the next inbound event.
    ///
    /// Returns `None` on cancellation and `Some(None)` once every producer
    /// of the inbound queue has gone away.
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus operations internally"
    )]
    async fn next_event(&mut self) -> Option<Option<SessionEvent>> {
        tokio::select! {
            biased;

            () = self.shutdown.cancelled() => None,
            event = self.inbox.recv() => Some(event),
        }
    }

    /// Queue `frames` for the peer; returns `false` if the stream is gone.
    fn send(&self, frames: Vec<Frame>) -> bool {
        let channel = self.session.channel();
        for frame in frames {
            debug!("frame sent: channel={channel}, kind={}", frame.kind());
            if self.outbound.send(OutboundFrame { channel, frame }).is_err() {
                debug!("outbound stream closed: channel={channel}");
                return false;
            }
            metrics::inc_frames(Direction::Outbound);
        }
        true
    }
}
