// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # In-Memory Broker
//!
//! An in-process broker implementing the subset of RabbitMQ semantics the
//! order flow depends on: direct exchanges, the default exchange,
//! durable-style queues with dead-letter arguments, manual acknowledgment and
//! requeue of unacknowledged deliveries when a channel closes.
//!
//! Rejecting a delivery without requeue republishes its body unchanged through
//! the queue's dead-letter exchange and routing key, stamping the
//! `x-first-death-*` headers the way RabbitMQ does. Prefetch limits are
//! accepted but not enforced.

use crate::{
    broker::{BrokerChannel, Delivery, DeliveryStream, OutboundMessage},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition, DEFAULT_EXCHANGE},
};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Header naming why a message was first dead-lettered
pub const X_FIRST_DEATH_REASON: &str = "x-first-death-reason";
/// Header naming the queue a message was first dead-lettered from
pub const X_FIRST_DEATH_QUEUE: &str = "x-first-death-queue";
/// Header naming the exchange a message was originally published to
pub const X_FIRST_DEATH_EXCHANGE: &str = "x-first-death-exchange";

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    redelivered: bool,
    msg: OutboundMessage,
}

#[derive(Debug)]
struct Unacked {
    channel_id: u64,
    queue: String,
    message: StoredMessage,
}

struct ConsumerHandle {
    tag: String,
    channel_id: u64,
    sender: mpsc::UnboundedSender<Result<Delivery, AmqpError>>,
}

struct QueueState {
    def: QueueDefinition,
    ready: VecDeque<StoredMessage>,
    consumers: Vec<ConsumerHandle>,
    next_consumer: usize,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeDefinition>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<QueueBinding>,
    unacked: HashMap<u64, Unacked>,
    closed: HashSet<u64>,
    next_tag: u64,
    next_channel: u64,
}

/// Shared broker state; cheap to clone.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

/// One channel on an [`InMemoryBroker`].
pub struct InMemoryChannel {
    id: u64,
    broker: InMemoryBroker,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new channel.
    pub async fn channel(&self) -> Arc<InMemoryChannel> {
        let mut state = self.state.lock().await;
        state.next_channel += 1;

        Arc::new(InMemoryChannel {
            id: state.next_channel,
            broker: self.clone(),
        })
    }

    /// Messages waiting in `queue`, not counting unacknowledged deliveries.
    pub async fn ready_count(&self, queue: &str) -> Option<usize> {
        let state = self.state.lock().await;
        state.queues.get(queue).map(|q| q.ready.len())
    }

    /// Deliveries handed out on `queue` and not yet settled.
    pub async fn unacked_count(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state.unacked.values().filter(|u| u.queue == queue).count()
    }

    pub async fn queue_count(&self) -> usize {
        self.state.lock().await.queues.len()
    }

    pub async fn exchange_count(&self) -> usize {
        self.state.lock().await.exchanges.len()
    }

    pub async fn binding_count(&self) -> usize {
        self.state.lock().await.bindings.len()
    }

    pub async fn queue_definition(&self, queue: &str) -> Option<QueueDefinition> {
        let state = self.state.lock().await;
        state.queues.get(queue).map(|q| q.def.clone())
    }
}

impl BrokerState {
    fn ensure_open(&self, channel_id: u64) -> Result<(), AmqpError> {
        if self.closed.contains(&channel_id) {
            return Err(AmqpError::ChannelError);
        }
        Ok(())
    }

    /// Queues a message on every queue the exchange routes it to.
    fn route(&mut self, exchange: &str, routing_key: &str, message: StoredMessage) -> usize {
        let targets: Vec<String> = if exchange == DEFAULT_EXCHANGE {
            self.queues
                .contains_key(routing_key)
                .then(|| routing_key.to_owned())
                .into_iter()
                .collect()
        } else {
            if !self.exchanges.contains_key(exchange) {
                return 0;
            }

            let mut names: Vec<String> = self
                .bindings
                .iter()
                .filter(|b| b.exchange_name == exchange && b.routing_key == routing_key)
                .map(|b| b.queue_name.clone())
                .collect();
            names.sort();
            names.dedup();
            names
        };

        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(message.clone());
            }
            self.dispatch(name);
        }

        targets.len()
    }

    /// Pushes ready messages of `queue` to its consumers, round-robin.
    fn dispatch(&mut self, queue_name: &str) {
        loop {
            let Some(queue) = self.queues.get_mut(queue_name) else {
                return;
            };
            if queue.consumers.is_empty() {
                return;
            }
            let Some(message) = queue.ready.pop_front() else {
                return;
            };

            let idx = queue.next_consumer % queue.consumers.len();
            queue.next_consumer = queue.next_consumer.wrapping_add(1);

            self.next_tag += 1;
            let tag = self.next_tag;

            let Some(queue) = self.queues.get_mut(queue_name) else {
                return;
            };
            let consumer = &queue.consumers[idx];
            let delivery = to_delivery(tag, &message);

            if consumer.sender.send(Ok(delivery)).is_err() {
                debug!(consumer = consumer.tag.as_str(), "dropping closed consumer");
                queue.consumers.remove(idx);
                queue.ready.push_front(message);
                continue;
            }

            let channel_id = consumer.channel_id;
            self.unacked.insert(
                tag,
                Unacked {
                    channel_id,
                    queue: queue_name.to_owned(),
                    message,
                },
            );
        }
    }

    fn take_unacked(&mut self, channel_id: u64, tag: u64) -> Result<Unacked, AmqpError> {
        let owned = self
            .unacked
            .get(&tag)
            .is_some_and(|u| u.channel_id == channel_id);
        if !owned {
            return Err(AmqpError::UnknownDeliveryTag(tag));
        }

        self.unacked
            .remove(&tag)
            .ok_or(AmqpError::UnknownDeliveryTag(tag))
    }

    fn requeue(&mut self, unacked: Unacked) {
        let Unacked {
            queue, mut message, ..
        } = unacked;
        message.redelivered = true;

        if let Some(q) = self.queues.get_mut(&queue) {
            q.ready.push_front(message);
        }
        self.dispatch(&queue);
    }

    fn dead_letter(&mut self, unacked: Unacked) {
        let Unacked { queue, message, .. } = unacked;

        let Some(def) = self.queues.get(&queue).map(|q| q.def.clone()) else {
            return;
        };
        let Some(dlx) = def.dead_letter_exchange else {
            debug!(queue = queue.as_str(), "no dead-letter exchange, dropping message");
            return;
        };
        let dlk = def
            .dead_letter_routing_key
            .unwrap_or_else(|| message.routing_key.clone());

        let mut msg = message.msg;
        msg.headers
            .entry(X_FIRST_DEATH_REASON.to_owned())
            .or_insert_with(|| "rejected".to_owned());
        msg.headers
            .entry(X_FIRST_DEATH_QUEUE.to_owned())
            .or_insert_with(|| queue.clone());
        msg.headers
            .entry(X_FIRST_DEATH_EXCHANGE.to_owned())
            .or_insert_with(|| message.exchange.clone());

        let routed = self.route(
            &dlx,
            &dlk,
            StoredMessage {
                exchange: dlx.clone(),
                routing_key: dlk.clone(),
                redelivered: false,
                msg,
            },
        );

        if routed == 0 {
            warn!(
                queue = queue.as_str(),
                exchange = dlx.as_str(),
                routing_key = dlk.as_str(),
                "dead-lettered message was unroutable"
            );
        }
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut state = self.broker.state.lock().await;
        state.ensure_open(self.id)?;

        if let Some(current) = state.exchanges.get(&def.name) {
            return match current.is_compatible(def) {
                true => Ok(()),
                false => Err(AmqpError::TopologyMismatch(def.name.clone())),
            };
        }

        if def.name.is_empty() {
            return Err(AmqpError::DeclareExchangeError(def.name.clone()));
        }

        state.exchanges.insert(def.name.clone(), def.clone());
        Ok(())
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        let mut state = self.broker.state.lock().await;
        state.ensure_open(self.id)?;

        let current = state.queues.get(&def.name);

        if def.passive {
            return match current {
                Some(_) => Ok(()),
                None => Err(AmqpError::DeclareQueueError(def.name.clone())),
            };
        }

        if let Some(current) = current {
            return match current.def.is_compatible(def) {
                true => Ok(()),
                false => Err(AmqpError::TopologyMismatch(def.name.clone())),
            };
        }

        state.queues.insert(
            def.name.clone(),
            QueueState {
                def: def.clone(),
                ready: VecDeque::new(),
                consumers: vec![],
                next_consumer: 0,
            },
        );
        Ok(())
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        let mut state = self.broker.state.lock().await;
        state.ensure_open(self.id)?;

        if !state.queues.contains_key(&binding.queue_name)
            || !state.exchanges.contains_key(&binding.exchange_name)
        {
            return Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.clone(),
                binding.queue_name.clone(),
            ));
        }

        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        msg: &OutboundMessage,
    ) -> Result<(), AmqpError> {
        let mut state = self.broker.state.lock().await;
        state.ensure_open(self.id)?;

        if exchange != DEFAULT_EXCHANGE && !state.exchanges.contains_key(exchange) {
            return Err(AmqpError::PublishingError);
        }

        let routed = state.route(
            exchange,
            routing_key,
            StoredMessage {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
                redelivered: false,
                msg: msg.clone(),
            },
        );
        if routed == 0 {
            debug!(exchange, routing_key, "message was unroutable");
        }

        Ok(())
    }

    async fn qos(&self, _prefetch_count: u16) -> Result<(), AmqpError> {
        self.broker.state.lock().await.ensure_open(self.id)
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError> {
        let mut state = self.broker.state.lock().await;
        state.ensure_open(self.id)?;

        let Some(q) = state.queues.get_mut(queue) else {
            return Err(AmqpError::ConsumerDeclarationError);
        };
        if q.consumers.iter().any(|c| c.tag == consumer_tag) {
            return Err(AmqpError::ConsumerDeclarationError);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        q.consumers.push(ConsumerHandle {
            tag: consumer_tag.to_owned(),
            channel_id: self.id,
            sender,
        });
        state.dispatch(queue);

        Ok(stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        let mut state = self.broker.state.lock().await;
        state.ensure_open(self.id)?;

        let mut found = false;
        for q in state.queues.values_mut() {
            let before = q.consumers.len();
            q.consumers
                .retain(|c| !(c.tag == consumer_tag && c.channel_id == self.id));
            found |= q.consumers.len() != before;
        }

        if found {
            Ok(())
        } else {
            Err(AmqpError::CancelConsumerError(consumer_tag.to_owned()))
        }
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>, AmqpError> {
        let mut state = self.broker.state.lock().await;
        state.ensure_open(self.id)?;

        let Some(q) = state.queues.get_mut(queue) else {
            return Err(AmqpError::FetchError(queue.to_owned()));
        };
        let Some(message) = q.ready.pop_front() else {
            return Ok(None);
        };

        state.next_tag += 1;
        let tag = state.next_tag;
        let delivery = to_delivery(tag, &message);
        state.unacked.insert(
            tag,
            Unacked {
                channel_id: self.id,
                queue: queue.to_owned(),
                message,
            },
        );

        Ok(Some(delivery))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        let mut state = self.broker.state.lock().await;
        state.ensure_open(self.id)?;
        state.take_unacked(self.id, delivery_tag).map(|_| ())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        let mut state = self.broker.state.lock().await;
        state.ensure_open(self.id)?;

        let unacked = state.take_unacked(self.id, delivery_tag)?;
        if requeue {
            state.requeue(unacked);
        } else {
            state.dead_letter(unacked);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.broker.state.lock().await;
        if !state.closed.insert(self.id) {
            return Ok(());
        }

        for q in state.queues.values_mut() {
            q.consumers.retain(|c| c.channel_id != self.id);
        }

        let mut tags: Vec<u64> = state
            .unacked
            .iter()
            .filter(|(_, u)| u.channel_id == self.id)
            .map(|(tag, _)| *tag)
            .collect();
        // newest first so the oldest ends up at the head of its queue
        tags.sort_unstable_by(|a, b| b.cmp(a));

        for tag in tags {
            if let Some(unacked) = state.unacked.remove(&tag) {
                state.requeue(unacked);
            }
        }

        Ok(())
    }
}

fn to_delivery(tag: u64, message: &StoredMessage) -> Delivery {
    Delivery {
        delivery_tag: tag,
        redelivered: message.redelivered,
        exchange: message.exchange.clone(),
        routing_key: message.routing_key.clone(),
        content_type: message.msg.content_type.clone(),
        message_id: message.msg.message_id.clone(),
        correlation_id: message.msg.correlation_id.clone(),
        headers: message.msg.headers.clone(),
        data: message.msg.payload.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &[u8]) -> OutboundMessage {
        OutboundMessage {
            payload: body.to_vec(),
            persistent: true,
            ..OutboundMessage::default()
        }
    }

    async fn broker_with_dlq() -> (InMemoryBroker, Arc<InMemoryChannel>) {
        let broker = InMemoryBroker::new();
        let channel = broker.channel().await;

        channel
            .declare_exchange(&ExchangeDefinition::new("ex").durable())
            .await
            .unwrap();
        channel
            .declare_queue(&QueueDefinition::new("dlq").durable())
            .await
            .unwrap();
        channel
            .declare_queue(&QueueDefinition::new("q").durable().with_dlq("dlq"))
            .await
            .unwrap();
        channel
            .bind_queue(&QueueBinding::new("q").exchange("ex").routing_key("key"))
            .await
            .unwrap();

        (broker, channel)
    }

    #[tokio::test]
    async fn should_route_by_routing_key() {
        let (broker, channel) = broker_with_dlq().await;

        channel.publish("ex", "key", &message(b"a")).await.unwrap();
        channel.publish("ex", "other", &message(b"b")).await.unwrap();

        assert_eq!(broker.ready_count("q").await, Some(1));
    }

    #[tokio::test]
    async fn should_route_default_exchange_by_queue_name() {
        let (broker, channel) = broker_with_dlq().await;

        channel.publish("", "dlq", &message(b"a")).await.unwrap();

        assert_eq!(broker.ready_count("dlq").await, Some(1));
    }

    #[tokio::test]
    async fn should_check_existence_only_on_passive_declare() {
        let (broker, channel) = broker_with_dlq().await;

        // "q" is durable with dead-letter arguments; a bare passive declare
        // must not be compared against them
        channel
            .declare_queue(&QueueDefinition::new("q").passive())
            .await
            .unwrap();

        assert_eq!(
            channel
                .declare_queue(&QueueDefinition::new("missing").passive())
                .await,
            Err(AmqpError::DeclareQueueError("missing".to_owned()))
        );
        assert_eq!(broker.queue_count().await, 2);
    }

    #[tokio::test]
    async fn should_fail_publishing_to_unknown_exchange() {
        let (_broker, channel) = broker_with_dlq().await;

        let err = channel.publish("missing", "key", &message(b"a")).await;
        assert_eq!(err, Err(AmqpError::PublishingError));
    }

    #[tokio::test]
    async fn should_dead_letter_rejected_messages_unchanged() {
        let (broker, channel) = broker_with_dlq().await;
        channel.publish("ex", "key", &message(b"payload")).await.unwrap();

        let delivery = channel.fetch("q").await.unwrap().unwrap();
        channel.reject(delivery.delivery_tag, false).await.unwrap();

        assert_eq!(broker.ready_count("q").await, Some(0));
        let dead = channel.fetch("dlq").await.unwrap().unwrap();
        assert_eq!(dead.data, b"payload".to_vec());
        assert_eq!(dead.header(X_FIRST_DEATH_REASON), Some("rejected"));
        assert_eq!(dead.header(X_FIRST_DEATH_QUEUE), Some("q"));
        assert_eq!(dead.header(X_FIRST_DEATH_EXCHANGE), Some("ex"));
    }

    #[tokio::test]
    async fn should_requeue_rejected_messages_when_asked() {
        let (broker, channel) = broker_with_dlq().await;
        channel.publish("ex", "key", &message(b"a")).await.unwrap();

        let delivery = channel.fetch("q").await.unwrap().unwrap();
        channel.reject(delivery.delivery_tag, true).await.unwrap();

        let again = channel.fetch("q").await.unwrap().unwrap();
        assert!(again.redelivered);
        assert_eq!(broker.ready_count("dlq").await, Some(0));
    }

    #[tokio::test]
    async fn should_not_settle_a_delivery_twice() {
        let (_broker, channel) = broker_with_dlq().await;
        channel.publish("ex", "key", &message(b"a")).await.unwrap();

        let delivery = channel.fetch("q").await.unwrap().unwrap();
        channel.ack(delivery.delivery_tag).await.unwrap();

        assert_eq!(
            channel.reject(delivery.delivery_tag, false).await,
            Err(AmqpError::UnknownDeliveryTag(delivery.delivery_tag))
        );
    }

    #[tokio::test]
    async fn should_only_settle_tags_of_the_same_channel() {
        let (broker, channel) = broker_with_dlq().await;
        let other = broker.channel().await;
        channel.publish("ex", "key", &message(b"a")).await.unwrap();

        let delivery = channel.fetch("q").await.unwrap().unwrap();

        assert!(other.ack(delivery.delivery_tag).await.is_err());
        assert!(channel.ack(delivery.delivery_tag).await.is_ok());
    }

    #[tokio::test]
    async fn should_requeue_unacked_on_close() {
        let (broker, channel) = broker_with_dlq().await;
        let worker = broker.channel().await;
        channel.publish("ex", "key", &message(b"a")).await.unwrap();

        let mut deliveries = worker.consume("q", "c1").await.unwrap();
        let first = deliveries.next().await.unwrap().unwrap();
        assert!(!first.redelivered);
        assert_eq!(broker.unacked_count("q").await, 1);

        worker.close().await.unwrap();

        assert_eq!(broker.unacked_count("q").await, 0);
        assert_eq!(broker.ready_count("q").await, Some(1));
        assert!(channel.fetch("q").await.unwrap().unwrap().redelivered);
        assert_eq!(worker.ack(first.delivery_tag).await, Err(AmqpError::ChannelError));
    }

    #[tokio::test]
    async fn should_reject_incompatible_redeclaration() {
        let (broker, channel) = broker_with_dlq().await;

        let err = channel
            .declare_queue(&QueueDefinition::new("q").durable().with_dlq("elsewhere"))
            .await;

        assert_eq!(err, Err(AmqpError::TopologyMismatch("q".to_owned())));
        assert_eq!(
            broker.queue_definition("q").await.unwrap().arguments(),
            QueueDefinition::new("q").with_dlq("dlq").arguments()
        );
    }

    #[tokio::test]
    async fn should_distribute_between_consumers() {
        let (_broker, channel) = broker_with_dlq().await;
        let mut a = channel.consume("q", "a").await.unwrap();
        let mut b = channel.consume("q", "b").await.unwrap();

        channel.publish("ex", "key", &message(b"1")).await.unwrap();
        channel.publish("ex", "key", &message(b"2")).await.unwrap();

        assert_eq!(a.next().await.unwrap().unwrap().data, b"1".to_vec());
        assert_eq!(b.next().await.unwrap().unwrap().data, b"2".to_vec());
    }
}
