#![cfg(any(test, feature = "test-helpers"))]
//! Test-only backend wrappers that record and perturb backend traffic.
//!
//! [`RecordingConnector`] wraps another [`Connector`] and hands out
//! [`RecordingBackend`] channels. Every backend call is appended to a shared
//! [`CallJournal`] before being forwarded, so tests can assert on the exact
//! sequence of acknowledgements, subscriptions and cleanup calls a session
//! performed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::backend::{
    Backend,
    BackendError,
    BackendMessage,
    ConsumerTag,
    Connector,
    DeliverySink,
    DeliveryTag,
    QueueDeclare,
};

/// One call made on a backend channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    Publish { exchange: String, routing_key: String },
    Subscribe { queue: String, consumer_tag: ConsumerTag, no_ack: bool },
    DeclareQueue(QueueDeclare),
    DeclareExchange { name: String, passive: bool },
    BindQueue { queue: String, exchange: String, routing_key: String },
    SetCredit { consumer_tag: ConsumerTag, credit: u32, drain: bool },
    SetPrefetch(u32),
    Ack(DeliveryTag),
    Reject { delivery_tag: DeliveryTag, requeue: bool },
    Cancel(ConsumerTag),
    Close,
}

/// Shared, append-only log of backend calls.
#[derive(Clone, Debug, Default)]
pub struct CallJournal(Arc<Mutex<Vec<BackendCall>>>);

impl CallJournal {
    fn lock(&self) -> MutexGuard<'_, Vec<BackendCall>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, call: BackendCall) { self.lock().push(call); }

    /// Snapshot of the calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> { self.lock().clone() }

    /// Forget all recorded calls.
    pub fn clear(&self) { self.lock().clear(); }
}

/// Backend channel that journals every call before forwarding it.
#[derive(Debug)]
pub struct RecordingBackend<B> {
    inner: B,
    journal: CallJournal,
    panic_on_publish: bool,
}

impl<B> RecordingBackend<B> {
    /// Wrap `inner`, recording into `journal`.
    pub fn new(inner: B, journal: CallJournal) -> Self {
        Self {
            inner,
            journal,
            panic_on_publish: false,
        }
    }
}

#[async_trait]
impl<B: Backend> Backend for RecordingBackend<B> {
    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: BackendMessage,
    ) -> Result<(), BackendError> {
        self.journal.push(BackendCall::Publish {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        });
        if self.panic_on_publish {
            panic!("publish fault injected");
        }
        self.inner.publish(exchange, routing_key, message).await
    }

    async fn subscribe(
        &mut self,
        queue: &str,
        consumer_tag: &ConsumerTag,
        no_ack: bool,
    ) -> Result<(), BackendError> {
        self.journal.push(BackendCall::Subscribe {
            queue: queue.to_owned(),
            consumer_tag: consumer_tag.clone(),
            no_ack,
        });
        self.inner.subscribe(queue, consumer_tag, no_ack).await
    }

    async fn declare_queue(&mut self, declare: QueueDeclare) -> Result<String, BackendError> {
        self.journal.push(BackendCall::DeclareQueue(declare.clone()));
        self.inner.declare_queue(declare).await
    }

    async fn declare_exchange(&mut self, name: &str, passive: bool) -> Result<(), BackendError> {
        self.journal.push(BackendCall::DeclareExchange {
            name: name.to_owned(),
            passive,
        });
        self.inner.declare_exchange(name, passive).await
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BackendError> {
        self.journal.push(BackendCall::BindQueue {
            queue: queue.to_owned(),
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
        });
        self.inner.bind_queue(queue, exchange, routing_key).await
    }

    async fn set_credit(
        &mut self,
        consumer_tag: &ConsumerTag,
        credit: u32,
        drain: bool,
    ) -> Result<Option<u32>, BackendError> {
        self.journal.push(BackendCall::SetCredit {
            consumer_tag: consumer_tag.clone(),
            credit,
            drain,
        });
        self.inner.set_credit(consumer_tag, credit, drain).await
    }

    async fn set_prefetch(&mut self, count: u32) -> Result<(), BackendError> {
        self.journal.push(BackendCall::SetPrefetch(count));
        self.inner.set_prefetch(count).await
    }

    async fn ack(&mut self, delivery_tag: DeliveryTag) -> Result<(), BackendError> {
        self.journal.push(BackendCall::Ack(delivery_tag));
        self.inner.ack(delivery_tag).await
    }

    async fn reject(
        &mut self,
        delivery_tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BackendError> {
        self.journal.push(BackendCall::Reject {
            delivery_tag,
            requeue,
        });
        self.inner.reject(delivery_tag, requeue).await
    }

    async fn cancel(&mut self, consumer_tag: &ConsumerTag) -> Result<(), BackendError> {
        self.journal.push(BackendCall::Cancel(consumer_tag.clone()));
        self.inner.cancel(consumer_tag).await
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.journal.push(BackendCall::Close);
        self.inner.close().await
    }
}

/// Connector producing [`RecordingBackend`] channels over `inner`.
///
/// Faults can be injected: refusing to open channels, or panicking inside
/// `publish` to exercise session panic supervision.
#[derive(Debug)]
pub struct RecordingConnector<C> {
    inner: C,
    journal: CallJournal,
    refuse_open: bool,
    panic_on_publish: bool,
}

impl<C: Connector> RecordingConnector<C> {
    /// Wrap `inner` with a fresh journal.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            journal: CallJournal::default(),
            refuse_open: false,
            panic_on_publish: false,
        }
    }

    /// Fail every channel open.
    #[must_use]
    pub fn refuse_open(mut self) -> Self {
        self.refuse_open = true;
        self
    }

    /// Panic inside every `publish` call.
    #[must_use]
    pub fn panic_on_publish(mut self) -> Self {
        self.panic_on_publish = true;
        self
    }

    /// Journal shared by every channel this connector opens.
    #[must_use]
    pub fn journal(&self) -> CallJournal { self.journal.clone() }
}

#[async_trait]
impl<C: Connector> Connector for RecordingConnector<C> {
    type Channel = RecordingBackend<C::Channel>;

    async fn open(&self, sink: DeliverySink) -> Result<Self::Channel, BackendError> {
        if self.refuse_open {
            return Err(BackendError::Failed("channel open refused".into()));
        }
        let inner = self.inner.open(sink).await?;
        let mut backend = RecordingBackend::new(inner, self.journal.clone());
        backend.panic_on_publish = self.panic_on_publish;
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::backend::memory::MemoryBroker;

    #[tokio::test]
    async fn journal_records_calls_in_order() {
        let connector = RecordingConnector::new(MemoryBroker::new());
        let journal = connector.journal();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut backend = connector
            .open(DeliverySink::new(tx))
            .await
            .expect("memory broker opens channels");
        backend.set_prefetch(4).await.expect("prefetch");
        backend.close().await.expect("close");
        assert_eq!(
            journal.calls(),
            vec![BackendCall::SetPrefetch(4), BackendCall::Close]
        );
    }

    #[tokio::test]
    async fn refused_open_reports_failure() {
        let connector = RecordingConnector::new(MemoryBroker::new()).refuse_open();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(connector.open(DeliverySink::new(tx)).await.is_err());
    }
}
