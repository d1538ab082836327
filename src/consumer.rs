// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Order Consumer
//!
//! Decides the terminal disposition of each delivery taken from the primary
//! queue and settles it on the channel that delivered it.
//!
//! A delivery moves `Received → Validating → Acknowledged | Rejected`. Decode
//! failures go straight from `Received` to `Rejected`. Rejection is a reject
//! without requeue; the queue's dead-letter arguments make the broker move the
//! unchanged body to the DLQ, the consumer never publishes there itself.
//! Handler errors and panics are rejections too, so a delivery is never left
//! unsettled.

use crate::{
    broker::{BrokerChannel, Delivery},
    codec,
    errors::{AmqpError, CodecError, HandlerError, ValidationError},
    order::Order,
    otel,
    validation::ValidationRules,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use std::{any::Any, borrow::Cow, fmt, panic::AssertUnwindSafe, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// The business step run for every valid order.
///
/// Deliveries are at-least-once: the same order may be handled again after a
/// crash, so implementations must tolerate reprocessing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderHandler: Send + Sync {
    async fn handle(&self, order: &Order) -> Result<(), HandlerError>;
}

/// Handler that only records the order as processed.
pub struct LogOrderHandler;

#[async_trait]
impl OrderHandler for LogOrderHandler {
    async fn handle(&self, order: &Order) -> Result<(), HandlerError> {
        info!(order_id = order.id.as_str(), "successfully processed order");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Received,
    Validating,
    Acknowledged,
    Rejected,
}

impl ProcessingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingState::Acknowledged | ProcessingState::Rejected)
    }
}

/// Why a delivery was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("failure to decode payload: {0}")]
    Decode(#[from] CodecError),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("handler failure: {0}")]
    Handler(#[from] HandlerError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// The decision taken for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Acknowledged { order_id: String },
    Rejected {
        /// Known once the payload decoded
        order_id: Option<String>,
        reason: RejectReason,
    },
}

impl Outcome {
    pub fn state(&self) -> ProcessingState {
        match self {
            Outcome::Acknowledged { .. } => ProcessingState::Acknowledged,
            Outcome::Rejected { .. } => ProcessingState::Rejected,
        }
    }

    pub fn order_id(&self) -> Option<&str> {
        match self {
            Outcome::Acknowledged { order_id } => Some(order_id.as_str()),
            Outcome::Rejected { order_id, .. } => order_id.as_deref(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Acknowledged { order_id } => write!(f, "acknowledged order {order_id}"),
            Outcome::Rejected {
                order_id: Some(id),
                reason,
            } => write!(f, "rejected order {id}: {reason}"),
            Outcome::Rejected {
                order_id: None,
                reason,
            } => write!(f, "rejected delivery: {reason}"),
        }
    }
}

/// Decodes, validates and handles orders, then settles their deliveries.
#[derive(Clone)]
pub struct OrderProcessor {
    rules: ValidationRules,
    handler: Arc<dyn OrderHandler>,
}

impl OrderProcessor {
    pub fn new(rules: ValidationRules, handler: Arc<dyn OrderHandler>) -> Self {
        OrderProcessor { rules, handler }
    }

    /// Decides the disposition of a delivery without settling it.
    pub async fn decide(&self, delivery: &Delivery) -> Outcome {
        let tag = delivery.delivery_tag;
        debug!(delivery_tag = tag, state = ?ProcessingState::Received, "delivery received");

        let order = match codec::decode(delivery.content_type.as_deref(), &delivery.data) {
            Ok(order) => order,
            Err(err) => {
                error!(
                    delivery_tag = tag,
                    error = err.to_string(),
                    "failure to decode order payload"
                );
                return Outcome::Rejected {
                    order_id: None,
                    reason: err.into(),
                };
            }
        };

        debug!(
            delivery_tag = tag,
            order_id = order.id.as_str(),
            state = ?ProcessingState::Validating,
            "processing order: {}",
            order
        );

        if let Err(err) = self.rules.validate(&order) {
            error!(
                order_id = order.id.as_str(),
                error = err.to_string(),
                "failed to process order"
            );
            return Outcome::Rejected {
                order_id: Some(order.id),
                reason: err.into(),
            };
        }

        let handled = AssertUnwindSafe(self.handler.handle(&order))
            .catch_unwind()
            .await;

        match handled {
            Ok(Ok(())) => Outcome::Acknowledged { order_id: order.id },
            Ok(Err(err)) => {
                error!(
                    order_id = order.id.as_str(),
                    error = err.to_string(),
                    "failed to process order"
                );
                Outcome::Rejected {
                    order_id: Some(order.id),
                    reason: err.into(),
                }
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(
                    order_id = order.id.as_str(),
                    panic = msg.as_str(),
                    "order handler panicked"
                );
                Outcome::Rejected {
                    order_id: Some(order.id),
                    reason: RejectReason::Panicked(msg),
                }
            }
        }
    }

    /// Decides and settles a delivery exactly once: ack when acknowledged,
    /// reject without requeue otherwise.
    pub async fn process(
        &self,
        channel: &dyn BrokerChannel,
        delivery: &Delivery,
    ) -> Result<Outcome, AmqpError> {
        let (_ctx, mut span) = otel::new_span(delivery, &global::tracer("order consumer"), "order");

        let outcome = self.decide(delivery).await;

        match &outcome {
            Outcome::Acknowledged { .. } => {
                if let Err(err) = channel.ack(delivery.delivery_tag).await {
                    error!(delivery_tag = delivery.delivery_tag, "error whiling ack msg");
                    span.record_error(&err);
                    span.set_status(Status::Error {
                        description: Cow::from("error to ack msg"),
                    });
                    return Err(err);
                }
                span.set_status(Status::Ok);
            }
            Outcome::Rejected { reason, .. } => {
                if let Err(err) = channel.reject(delivery.delivery_tag, false).await {
                    error!(delivery_tag = delivery.delivery_tag, "error whiling reject msg");
                    span.record_error(&err);
                    span.set_status(Status::Error {
                        description: Cow::from("error to reject msg"),
                    });
                    return Err(err);
                }
                warn!(
                    delivery_tag = delivery.delivery_tag,
                    order_id = outcome.order_id().unwrap_or_default(),
                    "delivery rejected, dead-lettered by the broker"
                );
                span.record_error(reason);
                span.set_status(Status::Error {
                    description: Cow::from(reason.to_string()),
                });
            }
        }

        debug!(
            delivery_tag = delivery.delivery_tag,
            state = ?outcome.state(),
            "{}",
            outcome
        );
        Ok(outcome)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        return (*msg).to_owned();
    }
    if let Some(msg) = panic.downcast_ref::<String>() {
        return msg.clone();
    }
    "unknown panic".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{broker::MockBrokerChannel, codec::JSON_CONTENT_TYPE};
    use mockall::predicate::eq;

    fn delivery(tag: u64, body: &[u8]) -> Delivery {
        Delivery {
            delivery_tag: tag,
            content_type: Some(JSON_CONTENT_TYPE.to_owned()),
            data: body.to_vec(),
            ..Delivery::default()
        }
    }

    fn processor(handler: MockOrderHandler) -> OrderProcessor {
        OrderProcessor::new(ValidationRules::default(), Arc::new(handler))
    }

    fn accepting_handler() -> MockOrderHandler {
        let mut handler = MockOrderHandler::new();
        handler.expect_handle().returning(|_| Ok(()));
        handler
    }

    #[tokio::test]
    async fn should_ack_valid_orders() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_ack().with(eq(7)).times(1).returning(|_| Ok(()));
        channel.expect_reject().never();

        let outcome = processor(accepting_handler())
            .process(
                &channel,
                &delivery(7, br#"{"id":"123","productName":"Laptop","quantity":1}"#),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Acknowledged {
                order_id: "123".to_owned()
            }
        );
        assert!(outcome.state().is_terminal());
    }

    #[tokio::test]
    async fn should_reject_without_requeue_on_invalid_quantity() {
        let mut handler = MockOrderHandler::new();
        handler.expect_handle().never();

        let mut channel = MockBrokerChannel::new();
        channel.expect_ack().never();
        channel
            .expect_reject()
            .with(eq(8), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = processor(handler)
            .process(
                &channel,
                &delivery(8, br#"{"id":"456","productName":"Phone","quantity":0}"#),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Rejected {
                order_id: Some("456".to_owned()),
                reason: RejectReason::Invalid(ValidationError::NonPositiveQuantity(0)),
            }
        );
    }

    #[tokio::test]
    async fn should_reject_undecodable_payloads() {
        let mut handler = MockOrderHandler::new();
        handler.expect_handle().never();

        let mut channel = MockBrokerChannel::new();
        channel.expect_ack().never();
        channel
            .expect_reject()
            .with(eq(9), eq(false))
            .times(1)
            .returning(|_, _| Ok(()));

        let outcome = processor(handler)
            .process(&channel, &delivery(9, b"\x00\x01 definitely not json"))
            .await
            .unwrap();

        assert_eq!(outcome.order_id(), None);
        assert!(matches!(
            outcome,
            Outcome::Rejected {
                reason: RejectReason::Decode(CodecError::Malformed(_)),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn should_reject_unsupported_content_type() {
        let mut d = delivery(3, br#"{"id":"1","productName":"x","quantity":1}"#);
        d.content_type = Some("application/xml".to_owned());

        let outcome = processor(MockOrderHandler::new()).decide(&d).await;

        assert_eq!(
            outcome,
            Outcome::Rejected {
                order_id: None,
                reason: RejectReason::Decode(CodecError::UnsupportedContentType(
                    "application/xml".to_owned()
                )),
            }
        );
    }

    #[tokio::test]
    async fn should_reject_when_handler_fails() {
        let mut handler = MockOrderHandler::new();
        handler
            .expect_handle()
            .times(1)
            .returning(|_| Err(HandlerError::new("inventory unavailable")));

        let mut channel = MockBrokerChannel::new();
        channel.expect_ack().never();
        channel.expect_reject().times(1).returning(|_, _| Ok(()));

        let outcome = processor(handler)
            .process(
                &channel,
                &delivery(1, br#"{"id":"1","productName":"Desk","quantity":3}"#),
            )
            .await
            .unwrap();

        assert_eq!(outcome.state(), ProcessingState::Rejected);
        assert_eq!(outcome.order_id(), Some("1"));
    }

    #[tokio::test]
    async fn should_reject_when_handler_panics() {
        struct Panicking;

        #[async_trait]
        impl OrderHandler for Panicking {
            async fn handle(&self, _: &Order) -> Result<(), HandlerError> {
                panic!("boom")
            }
        }

        let mut channel = MockBrokerChannel::new();
        channel.expect_ack().never();
        channel.expect_reject().times(1).returning(|_, _| Ok(()));

        let outcome = OrderProcessor::new(ValidationRules::default(), Arc::new(Panicking))
            .process(
                &channel,
                &delivery(2, br#"{"id":"2","productName":"Lamp","quantity":1}"#),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Rejected {
                order_id: Some("2".to_owned()),
                reason: RejectReason::Panicked("boom".to_owned()),
            }
        );
    }

    #[tokio::test]
    async fn should_surface_ack_failures_without_rejecting() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_ack()
            .times(1)
            .returning(|_| Err(AmqpError::AckMessageError));
        channel.expect_reject().never();

        let result = processor(accepting_handler())
            .process(
                &channel,
                &delivery(4, br#"{"id":"4","productName":"Pen","quantity":10}"#),
            )
            .await;

        assert_eq!(result, Err(AmqpError::AckMessageError));
    }

    #[test]
    fn should_only_treat_settled_states_as_terminal() {
        assert!(!ProcessingState::Received.is_terminal());
        assert!(!ProcessingState::Validating.is_terminal());
        assert!(ProcessingState::Acknowledged.is_terminal());
        assert!(ProcessingState::Rejected.is_terminal());
    }
}
