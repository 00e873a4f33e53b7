//! Collaborator surface of the AMQP 0-9-1-style messaging backend.
//!
//! A session owns exactly one backend channel, implementing [`Backend`], and
//! awaits every call inline: while a call is outstanding the session makes no
//! other progress. Channels are opened through a [`Connector`], which hands
//! the channel a [`DeliverySink`] feeding the session's inbound queue so that
//! deliveries interleave with peer frames in arrival order.

pub mod memory;

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use bytes::Bytes;
use derive_more::{Display, From};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{frame::Handle, session::SessionEvent, settlement::Outcome};

/// Name of the default exchange, which routes by queue name.
pub const DEFAULT_EXCHANGE: &str = "";

/// Channel-scoped tag identifying one delivery awaiting acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From)]
#[display("{_0}")]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    /// Construct a tag from its numeric value.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Return the underlying numeric value.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }

    /// Big-endian encoding used as the AMQP 1.0 delivery tag.
    #[must_use]
    pub fn to_wire(self) -> Bytes { Bytes::copy_from_slice(&self.0.to_be_bytes()) }
}

const CONSUMER_TAG_PREFIX: &str = "ctag-";

/// Identity of a backend subscription.
///
/// Outgoing links subscribe with a tag naming their handle and a per-session
/// serial, so deliveries route back to the link without a side table and a
/// handle reused after detach subscribes under a new tag.
///
/// # Examples
///
/// ```
/// use amqp_bridge::{backend::ConsumerTag, frame::Handle};
///
/// let tag = ConsumerTag::for_link(Handle::new(2), 7);
/// assert_eq!(tag.as_str(), "ctag-2-7");
/// assert_eq!(tag.handle(), Some(Handle::new(2)));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{_0}")]
pub struct ConsumerTag(String);

impl ConsumerTag {
    /// Create a tag from arbitrary text.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    /// The tag of the `serial`-th subscription, made by a link on `handle`.
    #[must_use]
    pub fn for_link(handle: Handle, serial: u64) -> Self {
        Self(format!("{CONSUMER_TAG_PREFIX}{handle}-{serial}"))
    }

    /// Recover the link handle encoded in the tag, if any.
    #[must_use]
    pub fn handle(&self) -> Option<Handle> {
        let rest = self.0.strip_prefix(CONSUMER_TAG_PREFIX)?;
        let raw = rest.split_once('-').map_or(rest, |(handle, _)| handle);
        raw.parse::<u32>().ok().map(Handle::new)
    }

    /// Borrow the tag text.
    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

/// Content header properties of a backend message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BasicProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// `2` marks the message persistent.
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// Per-message TTL in milliseconds, as a decimal string.
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<u64>,
    pub user_id: Option<String>,
}

/// A message as stored and routed by the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendMessage {
    pub properties: BasicProperties,
    pub body: Bytes,
}

impl BackendMessage {
    /// A message with default properties and the given body.
    #[must_use]
    pub fn with_body(body: impl Into<Bytes>) -> Self {
        Self {
            properties: BasicProperties::default(),
            body: body.into(),
        }
    }
}

/// Notification that the backend delivered a message to a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub consumer_tag: ConsumerTag,
    pub delivery_tag: DeliveryTag,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub message: BackendMessage,
}

/// Kind of backend node named by an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Queue,
    Exchange,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queue => "queue",
            Self::Exchange => "exchange",
        })
    }
}

/// Errors raised by backend calls.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// A passive declare found no such node.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: NodeKind, name: String },
    /// The channel is closed and accepts no further calls.
    #[error("backend channel closed: {0}")]
    ChannelClosed(String),
    /// The backend refused the operation.
    #[error("backend operation failed: {0}")]
    Failed(String),
}

/// Arguments of a queue declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueDeclare {
    /// `None` asks the backend to generate a name.
    pub name: Option<String>,
    /// Only check for existence; never create.
    pub passive: bool,
    /// Delete the queue once its last consumer goes away.
    pub auto_delete: bool,
}

impl QueueDeclare {
    /// Check that `name` exists without creating it.
    #[must_use]
    pub fn passive(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            passive: true,
            auto_delete: false,
        }
    }

    /// Create a fresh auto-deleting queue with a backend-generated name.
    #[must_use]
    pub fn server_named() -> Self {
        Self {
            name: None,
            passive: false,
            auto_delete: true,
        }
    }
}

/// Operations a session performs on its backend channel.
#[async_trait]
pub trait Backend: Send {
    /// Route `message` through `exchange` with `routing_key`.
    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: BackendMessage,
    ) -> Result<(), BackendError>;

    /// Start consuming from `queue`, delivering through the channel's sink.
    async fn subscribe(
        &mut self,
        queue: &str,
        consumer_tag: &ConsumerTag,
        no_ack: bool,
    ) -> Result<(), BackendError>;

    /// Declare or passively check a queue, returning its name.
    async fn declare_queue(&mut self, declare: QueueDeclare) -> Result<String, BackendError>;

    /// Declare or passively check an exchange.
    async fn declare_exchange(&mut self, name: &str, passive: bool) -> Result<(), BackendError>;

    /// Bind `queue` to `exchange` with `routing_key`.
    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BackendError>;

    /// Replace the credit of a subscription.
    ///
    /// Returns the number of messages still available to the subscription,
    /// or `None` when the backend does not know `consumer_tag`.
    async fn set_credit(
        &mut self,
        consumer_tag: &ConsumerTag,
        credit: u32,
        drain: bool,
    ) -> Result<Option<u32>, BackendError>;

    /// Bound the number of unacknowledged deliveries on the channel.
    async fn set_prefetch(&mut self, count: u32) -> Result<(), BackendError>;

    /// Acknowledge a delivery.
    async fn ack(&mut self, delivery_tag: DeliveryTag) -> Result<(), BackendError>;

    /// Reject a delivery, optionally returning it to its queue.
    async fn reject(&mut self, delivery_tag: DeliveryTag, requeue: bool)
    -> Result<(), BackendError>;

    /// Stop a subscription.
    async fn cancel(&mut self, consumer_tag: &ConsumerTag) -> Result<(), BackendError>;

    /// Close the channel, returning unacknowledged deliveries to their queues.
    async fn close(&mut self) -> Result<(), BackendError>;

    /// Apply a settlement outcome to a delivery.
    ///
    /// `Accepted` acknowledges, `Rejected` rejects without requeue and
    /// `Released` rejects with requeue.
    async fn settle(
        &mut self,
        delivery_tag: DeliveryTag,
        outcome: Outcome,
    ) -> Result<(), BackendError> {
        match outcome {
            Outcome::Accepted => self.ack(delivery_tag).await,
            Outcome::Rejected => self.reject(delivery_tag, false).await,
            Outcome::Released => self.reject(delivery_tag, true).await,
        }
    }
}

/// Opens backend channels for new sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Channel type produced by this connector.
    type Channel: Backend + 'static;

    /// Open a channel whose deliveries and failures are pushed into `sink`.
    async fn open(&self, sink: DeliverySink) -> Result<Self::Channel, BackendError>;
}

/// Producer side of a session's inbound queue, held by the backend.
#[derive(Clone, Debug)]
pub struct DeliverySink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl DeliverySink {
    /// Wrap the sender half of a session's inbound queue.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self { Self { tx } }

    /// Push a delivery into the session's queue.
    ///
    /// Returns `false` once the session has gone away; the caller keeps
    /// ownership of the message in that case by re-queuing it.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        self.tx.send(SessionEvent::Delivery(delivery)).is_ok()
    }

    /// Report that the channel failed; the session will terminate.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.tx.send(SessionEvent::BackendFailed(reason.into()));
    }

    /// Returns `true` once the session has dropped its queue.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("ctag-17", Some(17))]
    #[case("ctag-3-12", Some(3))]
    #[case("ctag--4", None)]
    #[case("ctag-", None)]
    #[case("other-3", None)]
    #[case("ctag-x", None)]
    fn consumer_tag_parses_handle(#[case] raw: &str, #[case] expected: Option<u32>) {
        assert_eq!(ConsumerTag::new(raw).handle(), expected.map(Handle::new));
    }

    #[test]
    fn delivery_tag_wire_encoding_is_big_endian() {
        assert_eq!(
            DeliveryTag::new(0x0102).to_wire().as_ref(),
            &[0, 0, 0, 0, 0, 0, 1, 2]
        );
    }

    #[tokio::test]
    async fn sink_reports_closed_queue() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = DeliverySink::new(tx);
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.deliver(Delivery {
            consumer_tag: ConsumerTag::new("ctag-0"),
            delivery_tag: DeliveryTag::new(1),
            exchange: String::new(),
            routing_key: "q".into(),
            redelivered: false,
            message: BackendMessage::with_body("x"),
        }));
    }
}
