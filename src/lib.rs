// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Order intake over RabbitMQ: orders are published durably to a direct
//! exchange, consumed with manual acknowledgment, and rejected deliveries are
//! dead-lettered by the broker into a DLQ.

mod otel;

pub mod broker;
pub mod channel;
pub mod codec;
pub mod configs;
pub mod consumer;
pub mod dispatcher;
pub mod dlq;
pub mod errors;
pub mod exchange;
pub mod intake;
pub mod logging;
pub mod memory;
pub mod order;
pub mod publisher;
pub mod queue;
pub mod topology;
pub mod validation;
