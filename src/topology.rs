// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! Collects exchange, queue and binding definitions and installs them on a
//! broker channel. Installation is idempotent: redeclaring entities that
//! already exist with the same parameters is a no-op, while an entity that
//! exists with different parameters (for instance another dead-letter target)
//! fails with [`AmqpError::TopologyMismatch`].
//!
//! [`Topology::orders`] builds the fixed order topology: a durable direct
//! exchange, a durable primary queue dead-lettering through the default
//! exchange into the DLQ, the durable DLQ itself, and the binding between
//! exchange and primary queue.

use crate::{
    broker::BrokerChannel,
    configs::TopologyConfigs,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use tracing::{debug, error, info};

/// An ordered set of topology definitions.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    pub(crate) queues: Vec<QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
}

impl Topology {
    pub fn new() -> Topology {
        Topology::default()
    }

    /// The order-intake topology for the configured names.
    pub fn orders(cfg: &TopologyConfigs) -> Topology {
        Topology::new()
            .exchange(ExchangeDefinition::new(&cfg.exchange).durable())
            .queue(QueueDefinition::new(&cfg.dlq).durable())
            .queue(QueueDefinition::new(&cfg.queue).durable().with_dlq(&cfg.dlq))
            .queue_binding(
                QueueBinding::new(&cfg.queue)
                    .exchange(&cfg.exchange)
                    .routing_key(&cfg.routing_key),
            )
    }

    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    /// Adds a queue; queues are declared in insertion order, so a DLQ should
    /// be added before the queues dead-lettering into it.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    pub fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Declares exchanges, then queues, then bindings.
    pub async fn install(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        self.install_exchanges(channel).await?;
        self.install_queues(channel).await?;
        self.binding_queues(channel).await?;

        info!(
            exchanges = self.exchanges.len(),
            queues = self.queues.len(),
            bindings = self.queues_binding.len(),
            "topology installed"
        );
        Ok(())
    }

    async fn install_exchanges(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("declaring exchange: {}", exch.name);

            if let Err(err) = channel.declare_exchange(exch).await {
                error!(
                    error = err.to_string(),
                    name = exch.name.as_str(),
                    "error to declare the exchange"
                );
                return Err(err);
            }
        }

        Ok(())
    }

    async fn install_queues(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        for def in &self.queues {
            debug!("declaring queue: {}", def.name);

            if let Err(err) = channel.declare_queue(def).await {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the queue"
                );
                return Err(err);
            }
        }

        Ok(())
    }

    async fn binding_queues(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            if let Err(err) = channel.bind_queue(binding).await {
                error!(error = err.to_string(), "error to bind queue to exchange");
                return Err(err);
            }
        }

        Ok(())
    }
}
