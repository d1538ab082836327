// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Channel Abstraction
//!
//! [`BrokerChannel`] is the set of AMQP channel primitives the order flow
//! relies on: topology declaration, publishing, manual acknowledgment and
//! consumption. [`crate::channel::AmqpChannel`] implements it over lapin and
//! [`crate::memory::InMemoryChannel`] implements it in-process.
//!
//! A channel is owned by one worker at a time; delivery tags are only valid on
//! the channel that produced them.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::collections::BTreeMap;

/// Stream of deliveries pushed by the broker to one consumer.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// A message received from a queue, as handed out by the broker.
///
/// Only string-valued headers are carried over; they are what trace
/// propagation and dead-letter bookkeeping need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub data: Vec<u8>,
}

impl Delivery {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// A message ready to be published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub kind: Option<String>,
    /// Delivery mode 2: the message survives a broker restart while queued.
    pub persistent: bool,
    pub headers: BTreeMap<String, String>,
}

/// The AMQP channel operations used by topology, publisher and consumers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares an exchange; redeclaring an identical one is a no-op.
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Declares a queue; redeclaring an identical one is a no-op.
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        msg: &OutboundMessage,
    ) -> Result<(), AmqpError>;

    /// Limits the number of unacknowledged deliveries pushed to this channel.
    async fn qos(&self, prefetch_count: u16) -> Result<(), AmqpError>;

    /// Starts a manual-ack consumer on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError>;

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    /// Pulls a single message with manual ack, if one is ready.
    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>, AmqpError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    /// Closes the channel; unacknowledged deliveries go back to their queues.
    async fn close(&self) -> Result<(), AmqpError>;
}
