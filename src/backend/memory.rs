//! In-process broker implementing the backend surface.
//!
//! `MemoryBroker` models just enough of an AMQP 0-9-1 broker to drive a
//! session end to end: the default exchange, direct exchanges with exact-match
//! bindings, queues (optionally auto-deleting), per-channel prefetch and
//! per-consumer credit. It backs the demo binary and the integration tests;
//! it is not a routing engine.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use log::debug;

use super::{
    Backend,
    BackendError,
    BackendMessage,
    ConsumerTag,
    Connector,
    DEFAULT_EXCHANGE,
    Delivery,
    DeliverySink,
    DeliveryTag,
    NodeKind,
    QueueDeclare,
};

#[derive(Clone, Debug)]
struct Stored {
    exchange: String,
    routing_key: String,
    redelivered: bool,
    message: BackendMessage,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<Stored>,
    auto_delete: bool,
    /// Subscriptions in round-robin order.
    consumers: Vec<(u64, ConsumerTag)>,
    next_consumer: usize,
}

#[derive(Debug)]
struct ConsumerState {
    queue: String,
    no_ack: bool,
    /// `None` until the subscription is first credited.
    credit: Option<u32>,
}

#[derive(Debug)]
struct Unacked {
    queue: String,
    stored: Stored,
}

#[derive(Debug)]
struct ChannelState {
    sink: DeliverySink,
    prefetch: u32,
    next_tag: u64,
    unacked: BTreeMap<DeliveryTag, Unacked>,
    consumers: HashMap<ConsumerTag, ConsumerState>,
}

impl ChannelState {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0
            || self.unacked.len() < usize::try_from(self.prefetch).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    /// Exchange name to `(binding key, queue)` pairs.
    exchanges: HashMap<String, Vec<(String, String)>>,
    channels: HashMap<u64, ChannelState>,
    next_channel: u64,
    next_generated: u64,
}

impl BrokerState {
    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, BackendError> {
        if exchange == DEFAULT_EXCHANGE {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_owned())
                .into_iter()
                .collect());
        }
        let bindings = self.exchanges.get(exchange).ok_or_else(|| BackendError::NotFound {
            kind: NodeKind::Exchange,
            name: exchange.to_owned(),
        })?;
        let mut targets: Vec<String> = bindings
            .iter()
            .filter(|(key, _)| key == routing_key)
            .map(|(_, queue)| queue.clone())
            .collect();
        targets.dedup();
        Ok(targets)
    }

    fn enqueue(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: &BackendMessage,
    ) -> Result<(), BackendError> {
        let targets = self.route(exchange, routing_key)?;
        if targets.is_empty() {
            debug!("message unroutable: exchange={exchange:?}, routing_key={routing_key:?}");
        }
        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.messages.push_back(Stored {
                    exchange: exchange.to_owned(),
                    routing_key: routing_key.to_owned(),
                    redelivered: false,
                    message: message.clone(),
                });
            }
        }
        for name in targets {
            self.dispatch(&name);
        }
        Ok(())
    }

    /// Find the next consumer of `queue` allowed to receive a message.
    fn eligible_consumer(&mut self, queue_name: &str) -> Option<(u64, ConsumerTag)> {
        let queue = self.queues.get(queue_name)?;
        let count = queue.consumers.len();
        for offset in 0..count {
            let idx = (queue.next_consumer + offset) % count;
            let (channel_id, tag) = &queue.consumers[idx];
            let Some(channel) = self.channels.get(channel_id) else {
                continue;
            };
            let Some(consumer) = channel.consumers.get(tag) else {
                continue;
            };
            let credited = consumer.credit.is_none_or(|credit| credit > 0);
            if credited && (consumer.no_ack || channel.has_capacity()) {
                let chosen = (*channel_id, tag.clone());
                if let Some(queue) = self.queues.get_mut(queue_name) {
                    queue.next_consumer = (idx + 1) % count;
                }
                return Some(chosen);
            }
        }
        None
    }

    /// Push as many messages from `queue_name` to its consumers as credit and
    /// prefetch allow.
    fn dispatch(&mut self, queue_name: &str) {
        while let Some((channel_id, tag)) = self.eligible_consumer(queue_name) {
            let Some(stored) = self
                .queues
                .get_mut(queue_name)
                .and_then(|queue| queue.messages.pop_front())
            else {
                return;
            };
            let Some(channel) = self.channels.get_mut(&channel_id) else {
                return;
            };
            let Some(consumer) = channel.consumers.get_mut(&tag) else {
                return;
            };
            if let Some(credit) = consumer.credit.as_mut() {
                *credit -= 1;
            }
            let no_ack = consumer.no_ack;
            channel.next_tag += 1;
            let delivery_tag = DeliveryTag::new(channel.next_tag);
            let delivery = Delivery {
                consumer_tag: tag,
                delivery_tag,
                exchange: stored.exchange.clone(),
                routing_key: stored.routing_key.clone(),
                redelivered: stored.redelivered,
                message: stored.message.clone(),
            };
            if !channel.sink.deliver(delivery) {
                if let Some(queue) = self.queues.get_mut(queue_name) {
                    queue.messages.push_front(stored);
                }
                return;
            }
            if !no_ack {
                channel.unacked.insert(
                    delivery_tag,
                    Unacked {
                        queue: queue_name.to_owned(),
                        stored,
                    },
                );
            }
        }
    }

    fn remove_consumer(&mut self, channel_id: u64, tag: &ConsumerTag) -> bool {
        let Some(consumer) = self
            .channels
            .get_mut(&channel_id)
            .and_then(|channel| channel.consumers.remove(tag))
        else {
            return false;
        };
        let delete = if let Some(queue) = self.queues.get_mut(&consumer.queue) {
            queue
                .consumers
                .retain(|(id, existing)| !(*id == channel_id && existing == tag));
            queue.next_consumer = 0;
            queue.auto_delete && queue.consumers.is_empty()
        } else {
            false
        };
        if delete {
            self.delete_queue(&consumer.queue);
        }
        true
    }

    fn delete_queue(&mut self, name: &str) {
        debug!("auto-delete queue removed: queue={name}");
        self.queues.remove(name);
        for bindings in self.exchanges.values_mut() {
            bindings.retain(|(_, queue)| queue != name);
        }
    }

    fn requeue(&mut self, unacked: Unacked) {
        let Unacked { queue, mut stored } = unacked;
        stored.redelivered = true;
        if let Some(state) = self.queues.get_mut(&queue) {
            state.messages.push_front(stored);
            self.dispatch(&queue);
        }
    }

    /// Cancel the channel's consumers, requeue its unacknowledged
    /// deliveries and forget it. Returns `false` if it was already gone.
    fn release_channel(&mut self, channel_id: u64) -> bool {
        let Some(channel) = self.channels.get(&channel_id) else {
            return false;
        };
        let tags: Vec<ConsumerTag> = channel.consumers.keys().cloned().collect();
        for tag in &tags {
            self.remove_consumer(channel_id, tag);
        }
        if let Some(channel) = self.channels.remove(&channel_id) {
            for unacked in channel.unacked.into_values() {
                self.requeue(unacked);
            }
        }
        true
    }

    fn channel_mut(&mut self, channel_id: u64) -> Result<&mut ChannelState, BackendError> {
        self.channels
            .get_mut(&channel_id)
            .ok_or_else(|| BackendError::ChannelClosed(format!("channel {channel_id}")))
    }
}

/// Shared in-process broker.
///
/// # Examples
///
/// ```
/// use amqp_bridge::backend::{BackendMessage, memory::MemoryBroker};
///
/// let broker = MemoryBroker::new();
/// broker.declare_queue("orders");
/// broker
///     .publish("", "orders", BackendMessage::with_body("hi"))
///     .expect("default exchange always exists");
/// assert_eq!(broker.queue_depth("orders"), Some(1));
/// ```
#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a durable queue if it does not exist.
    pub fn declare_queue(&self, name: &str) {
        self.lock().queues.entry(name.to_owned()).or_default();
    }

    /// Create a direct exchange if it does not exist.
    pub fn declare_exchange(&self, name: &str) {
        self.lock().exchanges.entry(name.to_owned()).or_default();
    }

    /// Publish as an external producer.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] if `exchange` does not exist.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: BackendMessage,
    ) -> Result<(), BackendError> {
        self.lock().enqueue(exchange, routing_key, &message)
    }

    /// Number of ready messages in `queue`, or `None` if it does not exist.
    #[must_use]
    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.lock().queues.get(queue).map(|state| state.messages.len())
    }

    /// Drain and return the ready messages of `queue`.
    #[must_use]
    pub fn take_messages(&self, queue: &str) -> Vec<BackendMessage> {
        self.lock()
            .queues
            .get_mut(queue)
            .map(|state| state.messages.drain(..).map(|stored| stored.message).collect())
            .unwrap_or_default()
    }

    /// Names of all queues, sorted.
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Queues bound to `exchange` with `routing_key`.
    #[must_use]
    pub fn bound_queues(&self, exchange: &str, routing_key: &str) -> Vec<String> {
        self.lock().route(exchange, routing_key).unwrap_or_default()
    }

    /// Deliveries awaiting acknowledgement across all channels.
    #[must_use]
    pub fn unacked_count(&self) -> usize {
        self.lock().channels.values().map(|channel| channel.unacked.len()).sum()
    }

    /// Number of open channels.
    #[must_use]
    pub fn channel_count(&self) -> usize { self.lock().channels.len() }

    /// Fail every open channel, as if the broker connection dropped.
    ///
    /// Unacknowledged deliveries return to their queues.
    pub fn sever(&self, reason: &str) {
        let mut state = self.lock();
        let ids: Vec<u64> = state.channels.keys().copied().collect();
        for channel in state.channels.values() {
            channel.sink.fail(reason);
        }
        for id in ids {
            state.release_channel(id);
        }
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    type Channel = MemoryChannel;

    async fn open(&self, sink: DeliverySink) -> Result<Self::Channel, BackendError> {
        let mut state = self.lock();
        state.next_channel += 1;
        let id = state.next_channel;
        state.channels.insert(
            id,
            ChannelState {
                sink,
                prefetch: 0,
                next_tag: 0,
                unacked: BTreeMap::new(),
                consumers: HashMap::new(),
            },
        );
        debug!("memory channel opened: channel={id}");
        Ok(MemoryChannel {
            broker: self.clone(),
            id,
        })
    }
}

/// One session's channel on a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryChannel {
    broker: MemoryBroker,
    id: u64,
}

#[async_trait]
impl Backend for MemoryChannel {
    async fn publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: BackendMessage,
    ) -> Result<(), BackendError> {
        let mut state = self.broker.lock();
        state.channel_mut(self.id)?;
        state.enqueue(exchange, routing_key, &message)
    }

    async fn subscribe(
        &mut self,
        queue: &str,
        consumer_tag: &ConsumerTag,
        no_ack: bool,
    ) -> Result<(), BackendError> {
        let mut state = self.broker.lock();
        let channel = state.channel_mut(self.id)?;
        if channel.consumers.contains_key(consumer_tag) {
            return Err(BackendError::Failed(format!(
                "consumer tag {consumer_tag} already in use"
            )));
        }
        let Some(queue_state) = state.queues.get_mut(queue) else {
            return Err(BackendError::NotFound {
                kind: NodeKind::Queue,
                name: queue.to_owned(),
            });
        };
        queue_state.consumers.push((self.id, consumer_tag.clone()));
        state.channel_mut(self.id)?.consumers.insert(
            consumer_tag.clone(),
            ConsumerState {
                queue: queue.to_owned(),
                no_ack,
                credit: None,
            },
        );
        state.dispatch(queue);
        Ok(())
    }

    async fn declare_queue(&mut self, declare: QueueDeclare) -> Result<String, BackendError> {
        let mut state = self.broker.lock();
        state.channel_mut(self.id)?;
        let name = if let Some(name) = declare.name {
            name
        } else {
            state.next_generated += 1;
            format!("amq.gen-{}", state.next_generated)
        };
        if declare.passive {
            return if state.queues.contains_key(&name) {
                Ok(name)
            } else {
                Err(BackendError::NotFound {
                    kind: NodeKind::Queue,
                    name,
                })
            };
        }
        state.queues.entry(name.clone()).or_insert_with(|| QueueState {
            auto_delete: declare.auto_delete,
            ..QueueState::default()
        });
        Ok(name)
    }

    async fn declare_exchange(&mut self, name: &str, passive: bool) -> Result<(), BackendError> {
        let mut state = self.broker.lock();
        state.channel_mut(self.id)?;
        if name == DEFAULT_EXCHANGE || state.exchanges.contains_key(name) {
            return Ok(());
        }
        if passive {
            return Err(BackendError::NotFound {
                kind: NodeKind::Exchange,
                name: name.to_owned(),
            });
        }
        state.exchanges.insert(name.to_owned(), Vec::new());
        Ok(())
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.broker.lock();
        state.channel_mut(self.id)?;
        if !state.queues.contains_key(queue) {
            return Err(BackendError::NotFound {
                kind: NodeKind::Queue,
                name: queue.to_owned(),
            });
        }
        let bindings = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BackendError::NotFound {
                kind: NodeKind::Exchange,
                name: exchange.to_owned(),
            })?;
        let binding = (routing_key.to_owned(), queue.to_owned());
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
        Ok(())
    }

    async fn set_credit(
        &mut self,
        consumer_tag: &ConsumerTag,
        credit: u32,
        drain: bool,
    ) -> Result<Option<u32>, BackendError> {
        let mut state = self.broker.lock();
        let channel = state.channel_mut(self.id)?;
        let Some(consumer) = channel.consumers.get_mut(consumer_tag) else {
            return Ok(None);
        };
        consumer.credit = Some(credit);
        let queue = consumer.queue.clone();
        state.dispatch(&queue);
        if drain
            && let Some(consumer) = state
                .channels
                .get_mut(&self.id)
                .and_then(|channel| channel.consumers.get_mut(consumer_tag))
        {
            consumer.credit = Some(0);
        }
        let available = state.queues.get(&queue).map_or(0, |q| q.messages.len());
        Ok(Some(u32::try_from(available).unwrap_or(u32::MAX)))
    }

    async fn set_prefetch(&mut self, count: u32) -> Result<(), BackendError> {
        let mut state = self.broker.lock();
        let channel = state.channel_mut(self.id)?;
        channel.prefetch = count;
        let queues: Vec<String> = channel.consumers.values().map(|c| c.queue.clone()).collect();
        for queue in queues {
            state.dispatch(&queue);
        }
        Ok(())
    }

    async fn ack(&mut self, delivery_tag: DeliveryTag) -> Result<(), BackendError> {
        let mut state = self.broker.lock();
        let channel = state.channel_mut(self.id)?;
        let unacked = channel
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| BackendError::Failed(format!("unknown delivery tag {delivery_tag}")))?;
        state.dispatch(&unacked.queue);
        Ok(())
    }

    async fn reject(
        &mut self,
        delivery_tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BackendError> {
        let mut state = self.broker.lock();
        let channel = state.channel_mut(self.id)?;
        let unacked = channel
            .unacked
            .remove(&delivery_tag)
            .ok_or_else(|| BackendError::Failed(format!("unknown delivery tag {delivery_tag}")))?;
        if requeue {
            state.requeue(unacked);
        } else {
            state.dispatch(&unacked.queue);
        }
        Ok(())
    }

    async fn cancel(&mut self, consumer_tag: &ConsumerTag) -> Result<(), BackendError> {
        let mut state = self.broker.lock();
        state.channel_mut(self.id)?;
        if state.remove_consumer(self.id, consumer_tag) {
            Ok(())
        } else {
            Err(BackendError::Failed(format!("unknown consumer tag {consumer_tag}")))
        }
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if !self.broker.lock().release_channel(self.id) {
            return Err(BackendError::ChannelClosed(format!("channel {}", self.id)));
        }
        debug!("memory channel closed: channel={}", self.id);
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if self.broker.lock().release_channel(self.id) {
            debug!("memory channel released on drop: channel={}", self.id);
        }
    }
}
