// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Dead-Letter Queue
//!
//! The DLQ is a passive durable queue filled by the broker when the primary
//! queue rejects a delivery. Nothing here republishes or retries; the helpers
//! exist for operator tooling that drains and inspects dead letters.

use crate::{
    broker::{BrokerChannel, Delivery},
    codec,
    errors::{AmqpError, CodecError},
    order::Order,
    queue::QueueDefinition,
};
use tracing::{debug, info};

pub struct DeadLetterQueue {
    name: String,
}

impl DeadLetterQueue {
    pub fn new(name: &str) -> Self {
        DeadLetterQueue {
            name: name.to_owned(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Removes up to `max` dead letters and returns them unchanged.
    ///
    /// Each message is acknowledged as soon as it is fetched. The queue is
    /// declared passively first, so draining never creates or alters it.
    pub async fn drain(
        &self,
        channel: &dyn BrokerChannel,
        max: usize,
    ) -> Result<Vec<Delivery>, AmqpError> {
        channel
            .declare_queue(&QueueDefinition::new(&self.name).passive())
            .await?;

        let mut drained = vec![];

        while drained.len() < max {
            let Some(delivery) = channel.fetch(&self.name).await? else {
                break;
            };

            channel.ack(delivery.delivery_tag).await?;
            debug!(
                queue = self.name.as_str(),
                correlation_id = delivery.correlation_id.as_deref().unwrap_or_default(),
                "dead letter drained"
            );
            drained.push(delivery);
        }

        info!(queue = self.name.as_str(), count = drained.len(), "dlq drained");
        Ok(drained)
    }

    /// Reads a dead letter as an order; malformed payloads stay malformed.
    pub fn decode(delivery: &Delivery) -> Result<Order, CodecError> {
        codec::decode(delivery.content_type.as_deref(), &delivery.data)
    }
}
