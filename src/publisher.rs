// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Order Publisher
//!
//! Encodes orders and publishes them as persistent messages to the configured
//! exchange and routing key. Business rules are not checked here; an order
//! with a non-positive quantity is published like any other and rejected by
//! the consumer. The publisher does not retry.

use crate::{
    broker::{BrokerChannel, OutboundMessage},
    codec,
    configs::TopologyConfigs,
    errors::PublishError,
    order::Order,
    otel,
};
use opentelemetry::Context;
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::{debug, error, info};
use uuid::Uuid;

/// AMQP `type` property set on every order message
pub const ORDER_MESSAGE_TYPE: &str = "order";

pub struct OrderPublisher {
    channel: Arc<dyn BrokerChannel>,
    exchange: String,
    routing_key: String,
    timeout: Duration,
}

impl OrderPublisher {
    pub fn new(
        channel: Arc<dyn BrokerChannel>,
        topology: &TopologyConfigs,
        timeout: Duration,
    ) -> OrderPublisher {
        OrderPublisher {
            channel,
            exchange: topology.exchange.clone(),
            routing_key: topology.routing_key.clone(),
            timeout,
        }
    }

    /// Publishes one order.
    ///
    /// Returns once the broker accepted the message (or confirmed it, when the
    /// channel runs with publisher confirms). Nothing about the eventual
    /// consumption outcome is reported.
    pub async fn publish(&self, order: &Order) -> Result<(), PublishError> {
        info!(order_id = order.id.as_str(), "publishing order: {}", order);

        let encoded = codec::encode(order).map_err(|err| {
            error!(order_id = order.id.as_str(), error = err.to_string(), "failure to encode order");
            PublishError::Serialization(err.to_string())
        })?;

        let mut headers = BTreeMap::new();
        otel::inject(&Context::current(), &mut headers);

        let msg = OutboundMessage {
            payload: encoded.payload,
            content_type: Some(encoded.content_type.to_owned()),
            message_id: Some(Uuid::new_v4().to_string()),
            correlation_id: Some(order.id.clone()),
            kind: Some(ORDER_MESSAGE_TYPE.to_owned()),
            persistent: true,
            headers,
        };

        let sent = tokio::time::timeout(
            self.timeout,
            self.channel.publish(&self.exchange, &self.routing_key, &msg),
        )
        .await;

        match sent {
            Ok(Ok(())) => {
                debug!(
                    order_id = order.id.as_str(),
                    exchange = self.exchange.as_str(),
                    routing_key = self.routing_key.as_str(),
                    "order published"
                );
                Ok(())
            }
            Ok(Err(err)) => {
                error!(
                    order_id = order.id.as_str(),
                    error = err.to_string(),
                    "error publishing order"
                );
                Err(err.into())
            }
            Err(_) => {
                error!(
                    order_id = order.id.as_str(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "publish timed out"
                );
                Err(PublishError::Transport(format!(
                    "publish timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{broker::MockBrokerChannel, errors::AmqpError};

    fn publisher(channel: MockBrokerChannel, timeout: Duration) -> OrderPublisher {
        OrderPublisher::new(Arc::new(channel), &TopologyConfigs::default(), timeout)
    }

    #[tokio::test]
    async fn should_publish_persistent_json_to_configured_destination() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_publish()
            .withf(|exchange, key, msg| {
                exchange == "orders.exchange"
                    && key == "orders.routingKey"
                    && msg.persistent
                    && msg.content_type.as_deref() == Some("application/json")
                    && msg.correlation_id.as_deref() == Some("789")
                    && msg.kind.as_deref() == Some(ORDER_MESSAGE_TYPE)
                    && msg.message_id.is_some()
                    && msg.payload == br#"{"id":"789","productName":"Monitor","quantity":2}"#
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let result = publisher(channel, Duration::from_secs(1))
            .publish(&Order::new("789", "Monitor", 2))
            .await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn should_publish_invalid_orders_unchanged() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_publish()
            .withf(|_, _, msg| msg.payload == br#"{"id":"456","productName":"Phone","quantity":0}"#)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let result = publisher(channel, Duration::from_secs(1))
            .publish(&Order::new("456", "Phone", 0))
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn should_report_channel_failures_as_transport_errors() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_publish()
            .times(1)
            .returning(|_, _, _| Err(AmqpError::PublishingError));

        let result = publisher(channel, Duration::from_secs(1))
            .publish(&Order::new("1", "Keyboard", 1))
            .await;

        assert_eq!(
            result,
            Err(PublishError::Transport("failure to publish".to_owned()))
        );
    }

    #[tokio::test]
    async fn should_time_out_slow_publishes() {
        struct Stalled;

        #[async_trait::async_trait]
        impl BrokerChannel for Stalled {
            async fn declare_exchange(
                &self,
                _: &crate::exchange::ExchangeDefinition,
            ) -> Result<(), AmqpError> {
                Ok(())
            }
            async fn declare_queue(&self, _: &crate::queue::QueueDefinition) -> Result<(), AmqpError> {
                Ok(())
            }
            async fn bind_queue(&self, _: &crate::queue::QueueBinding) -> Result<(), AmqpError> {
                Ok(())
            }
            async fn publish(&self, _: &str, _: &str, _: &OutboundMessage) -> Result<(), AmqpError> {
                std::future::pending().await
            }
            async fn qos(&self, _: u16) -> Result<(), AmqpError> {
                Ok(())
            }
            async fn consume(
                &self,
                _: &str,
                _: &str,
            ) -> Result<crate::broker::DeliveryStream, AmqpError> {
                Err(AmqpError::ConsumerDeclarationError)
            }
            async fn cancel(&self, _: &str) -> Result<(), AmqpError> {
                Ok(())
            }
            async fn fetch(&self, _: &str) -> Result<Option<crate::broker::Delivery>, AmqpError> {
                Ok(None)
            }
            async fn ack(&self, _: u64) -> Result<(), AmqpError> {
                Ok(())
            }
            async fn reject(&self, _: u64, _: bool) -> Result<(), AmqpError> {
                Ok(())
            }
            async fn close(&self) -> Result<(), AmqpError> {
                Ok(())
            }
        }

        let publisher = OrderPublisher::new(
            Arc::new(Stalled),
            &TopologyConfigs::default(),
            Duration::from_millis(50),
        );

        let result = publisher.publish(&Order::new("1", "Desk", 1)).await;
        assert!(matches!(result, Err(PublishError::Transport(msg)) if msg.contains("timed out")));
    }
}
