// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Order Intake
//!
//! The inbound boundary: accepts an order-creation request, publishes it and
//! reports whether publishing succeeded. The caller never learns the outcome
//! of validation, which happens later on the consumer side.

use crate::{errors::IntakeError, order::Order, publisher::OrderPublisher};
use std::sync::Arc;
use tracing::{error, info};

/// Confirmation returned once an order is on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeReceipt {
    pub order_id: String,
}

impl IntakeReceipt {
    pub fn message(&self) -> String {
        format!("Order received and published: ID {}", self.order_id)
    }
}

pub struct OrderIntake {
    publisher: Arc<OrderPublisher>,
}

impl OrderIntake {
    pub fn new(publisher: Arc<OrderPublisher>) -> Self {
        OrderIntake { publisher }
    }

    pub async fn create_order(&self, order: Order) -> Result<IntakeReceipt, IntakeError> {
        info!(order_id = order.id.as_str(), "received order creation request: {}", order);

        match self.publisher.publish(&order).await {
            Ok(()) => {
                info!(order_id = order.id.as_str(), "order published successfully");
                Ok(IntakeReceipt { order_id: order.id })
            }
            Err(err) => {
                error!(
                    order_id = order.id.as_str(),
                    error = err.to_string(),
                    "error publishing order"
                );
                Err(err.into())
            }
        }
    }

    /// Parses a JSON request body, then behaves like [`Self::create_order`].
    ///
    /// A body that is not an order is a [`IntakeError::BadRequest`].
    pub async fn create_order_from_json(&self, body: &[u8]) -> Result<IntakeReceipt, IntakeError> {
        let order: Order = serde_json::from_slice(body).map_err(|err| {
            error!(error = err.to_string(), "malformed order request");
            IntakeError::BadRequest(err.to_string())
        })?;

        self.create_order(order).await
    }
}
