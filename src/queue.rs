// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! Queue and binding definitions, including the dead-letter arguments that
//! make the broker re-route rejected deliveries without any application
//! publish.

use std::collections::BTreeMap;

/// Queue argument naming the exchange rejected messages are republished to
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Queue argument naming the routing key used when dead-lettering
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// The broker's unnamed default exchange; it routes by queue name.
pub const DEFAULT_EXCHANGE: &str = "";

/// Definition of a queue with its configuration parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
    pub(crate) dead_letter_exchange: Option<String>,
    pub(crate) dead_letter_routing_key: Option<String>,
}

impl QueueDefinition {
    /// Creates a new non-durable queue definition without dead-lettering.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Only checks that the queue exists; the broker neither creates it nor
    /// compares its parameters.
    pub(crate) fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Dead-letters straight into the queue `dlq_name` through the default
    /// exchange.
    pub fn with_dlq(mut self, dlq_name: &str) -> Self {
        self.dead_letter_exchange = Some(DEFAULT_EXCHANGE.to_owned());
        self.dead_letter_routing_key = Some(dlq_name.to_owned());
        self
    }

    /// The `x-` arguments sent with the declaration.
    pub fn arguments(&self) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();

        if let Some(exchange) = &self.dead_letter_exchange {
            args.insert(
                AMQP_HEADERS_DEAD_LETTER_EXCHANGE.to_owned(),
                exchange.to_owned(),
            );
        }

        if let Some(key) = &self.dead_letter_routing_key {
            args.insert(
                AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY.to_owned(),
                key.to_owned(),
            );
        }

        args
    }

    /// Whether `other` may be redeclared over this definition.
    pub(crate) fn is_compatible(&self, other: &QueueDefinition) -> bool {
        self.durable == other.durable && self.arguments() == other.arguments()
    }
}

/// Binds a queue to an exchange by routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new binding for the given queue; exchange and routing key
    /// default to empty strings.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }
}
