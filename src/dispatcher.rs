// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Order Dispatcher
//!
//! Explicit subscription of an [`OrderHandler`] to the primary queue and the
//! worker pool consuming it.
//!
//! Every worker owns one channel, consumes with manual acknowledgment and
//! settles one delivery before taking the next. On shutdown a worker stops
//! pulling, lets the in-flight delivery reach ack or reject, cancels its
//! consumer and closes its channel; deliveries prefetched but not yet
//! processed are returned to the queue by the broker.

use crate::{
    broker::{BrokerChannel, DeliveryStream},
    configs::ConsumerConfigs,
    consumer::{OrderHandler, OrderProcessor},
    errors::AmqpError,
    validation::ValidationRules,
};
use futures_util::{future::join_all, StreamExt};
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, warn};

pub struct OrderDispatcher {
    queue: String,
    configs: ConsumerConfigs,
    processor: Option<OrderProcessor>,
}

impl OrderDispatcher {
    pub fn new(queue: &str, configs: &ConsumerConfigs) -> Self {
        OrderDispatcher {
            queue: queue.to_owned(),
            configs: configs.clone(),
            processor: None,
        }
    }

    /// Subscribes `handler` to the queue; valid orders reach it after the
    /// `rules` pass.
    pub fn register(mut self, rules: ValidationRules, handler: Arc<dyn OrderHandler>) -> Self {
        self.processor = Some(OrderProcessor::new(rules, handler));
        self
    }

    /// Starts one worker per channel.
    ///
    /// Consumers are declared on every channel before any worker task is
    /// spawned. If one declaration fails, the consumers already declared are
    /// cancelled and their channels closed, so no worker outlives the error.
    pub async fn spawn(
        &self,
        channels: Vec<Arc<dyn BrokerChannel>>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Workers, AmqpError> {
        let Some(processor) = self.processor.clone() else {
            error!(queue = self.queue.as_str(), "no handler registered");
            return Err(AmqpError::ConsumerDeclarationError);
        };

        let mut declared = vec![];

        for (idx, channel) in channels.into_iter().enumerate() {
            let consumer_tag = format!("{}-{}", self.configs.consumer_tag, idx);

            match self.subscribe(channel.as_ref(), &consumer_tag).await {
                Ok(deliveries) => declared.push((consumer_tag, channel, deliveries)),
                Err(err) => {
                    error!(
                        queue = self.queue.as_str(),
                        consumer_tag = consumer_tag.as_str(),
                        error = err.to_string(),
                        "failure to start consumer"
                    );
                    for (tag, channel, _) in declared {
                        release(channel.as_ref(), &tag).await;
                    }
                    return Err(err);
                }
            }
        }

        let handles = declared
            .into_iter()
            .map(|(consumer_tag, channel, deliveries)| {
                info!(
                    queue = self.queue.as_str(),
                    consumer_tag = consumer_tag.as_str(),
                    "consumer started"
                );

                let worker = Worker {
                    consumer_tag,
                    channel,
                    processor: processor.clone(),
                };
                tokio::spawn(worker.run(deliveries, shutdown.clone()))
            })
            .collect();

        Ok(Workers { handles })
    }

    async fn subscribe(
        &self,
        channel: &dyn BrokerChannel,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, AmqpError> {
        channel.qos(self.configs.prefetch).await?;
        channel.consume(&self.queue, consumer_tag).await
    }
}

/// Cancels the consumer and closes its channel; the broker requeues whatever
/// the channel still held unacknowledged.
async fn release(channel: &dyn BrokerChannel, consumer_tag: &str) {
    if let Err(err) = channel.cancel(consumer_tag).await {
        warn!(consumer_tag, error = err.to_string(), "error cancelling consumer");
    }
    if let Err(err) = channel.close().await {
        warn!(consumer_tag, error = err.to_string(), "error closing channel");
    }
}

/// Handles of the running workers.
pub struct Workers {
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to finish.
    pub async fn join(self) -> Result<(), AmqpError> {
        let mut result = Ok(());

        for res in join_all(self.handles).await {
            if let Err(err) = res {
                error!(error = err.to_string(), "worker task failed");
                result = Err(AmqpError::InternalError);
            }
        }

        result
    }
}

struct Worker {
    consumer_tag: String,
    channel: Arc<dyn BrokerChannel>,
    processor: OrderProcessor,
}

impl Worker {
    async fn run(
        self,
        mut deliveries: DeliveryStream,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let tag = self.consumer_tag.as_str();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = tokio::select! {
                biased;
                // a dropped sender stops the worker as well
                _ = shutdown.changed() => break,
                next = deliveries.next() => next,
            };

            let Some(result) = next else {
                warn!(consumer_tag = tag, "delivery stream ended");
                break;
            };

            match result {
                Ok(delivery) => {
                    if let Err(err) = self.processor.process(self.channel.as_ref(), &delivery).await {
                        error!(
                            consumer_tag = tag,
                            delivery_tag = delivery.delivery_tag,
                            error = err.to_string(),
                            "error settling delivery"
                        );
                    }
                }
                Err(err) => error!(consumer_tag = tag, error = err.to_string(), "errors consume msg"),
            }
        }

        debug!(consumer_tag = tag, "stopping consumer");
        release(self.channel.as_ref(), tag).await;

        info!(consumer_tag = tag, "consumer stopped");
    }
}
