//! Per-session protocol state machine.
//!
//! A [`Session`] owns everything one AMQP 1.0 channel needs: its backend
//! channel, its links, the settlement window and the session credit. It
//! handles one [`SessionEvent`] at a time through [`Session::handle`] and
//! answers with a [`Step`]: frames to send and whether to keep going.
//! [`SessionActor`] drives a session from its inbound queue.
//!
//! Frame handlers return [`crate::error::Result`]. A
//! [`SessionError::Protocol`](crate::error::SessionError::Protocol) is the
//! single path to ending the session with an error condition; the dispatcher
//! turns it into an `end` frame.

mod actor;
mod attach;
mod counter;
mod dispatch;
mod event;
mod flow;
mod transfer;

pub use actor::SessionActor;
pub use counter::active_session_count;
pub use event::{SessionEvent, SessionExit, Step};
use log::debug;

use crate::{
    backend::Backend,
    config::SessionConfig,
    credit::SessionCredit,
    frame::TransferId,
    link::LinkRegistry,
    message::MessageAssembler,
    settlement::SettlementWindow,
};

/// State of one session.
///
/// # Examples
///
/// ```
/// use amqp_bridge::{
///     backend::{Connector, DeliverySink, memory::MemoryBroker},
///     config::SessionConfig,
///     frame::{Begin, Frame},
///     session::{Session, SessionEvent, Step},
/// };
/// use tokio::sync::mpsc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let broker = MemoryBroker::new();
/// let (tx, _rx) = mpsc::unbounded_channel();
/// let backend = broker.open(DeliverySink::new(tx)).await.expect("open channel");
/// let mut session = Session::new(3, SessionConfig::default(), backend);
///
/// let step = session.handle(SessionEvent::Frame(Begin::default().into())).await;
/// assert_eq!(
///     step,
///     Step::Continue(vec![Frame::Begin(Begin { remote_channel: Some(3) })])
/// );
/// # }
/// ```
#[derive(Debug)]
pub struct Session<B> {
    channel: u16,
    config: SessionConfig,
    backend: B,
    links: LinkRegistry,
    window: SettlementWindow,
    credit: SessionCredit,
    assembler: MessageAssembler,
    begun: bool,
}

impl<B: Backend> Session<B> {
    /// Create the state for `channel`, using `backend` exclusively.
    pub fn new(channel: u16, config: SessionConfig, backend: B) -> Self {
        Self {
            channel,
            assembler: MessageAssembler::new(config.max_message_size()),
            config,
            backend,
            links: LinkRegistry::new(),
            window: SettlementWindow::new(),
            credit: SessionCredit::new(),
            begun: false,
        }
    }

    #[must_use]
    pub fn channel(&self) -> u16 { self.channel }

    /// Id the next outgoing transfer will receive.
    #[must_use]
    pub fn next_transfer_id(&self) -> TransferId { self.window.next_transfer_id() }

    /// Smallest outgoing transfer-id not yet known to be settled.
    #[must_use]
    pub fn low_water_mark(&self) -> TransferId { self.window.low_water_mark() }

    /// Outgoing transfers that may still be sent.
    #[must_use]
    pub fn session_credit(&self) -> u32 { self.credit.available() }

    /// Outgoing transfers awaiting settlement.
    #[must_use]
    pub fn pending_transfers(&self) -> usize { self.window.pending_len() }

    #[must_use]
    pub fn links(&self) -> &LinkRegistry { &self.links }

    /// Borrow the backend channel.
    #[must_use]
    pub fn backend(&self) -> &B { &self.backend }

    /// Release every backend subscription and close the backend channel.
    ///
    /// Cleanup errors are logged and otherwise ignored.
    pub async fn teardown(&mut self) {
        for tag in self.links.drain_consumer_tags() {
            if let Err(e) = self.backend.cancel(&tag).await {
                debug!(
                    "consumer cancel failed during teardown: channel={}, consumer_tag={tag}, \
                     error={e}",
                    self.channel
                );
            }
        }
        if let Err(e) = self.backend.close().await {
            debug!(
                "backend close failed during teardown: channel={}, error={e}",
                self.channel
            );
        }
    }
}
