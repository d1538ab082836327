// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Business-validity rules checked at consumption time.

use crate::{errors::ValidationError, order::Order};

/// Configurable rules an order must satisfy to be acknowledged.
///
/// The default only requires `quantity > 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRules {
    pub min_quantity: i32,
    pub require_product_name: bool,
}

impl Default for ValidationRules {
    fn default() -> Self {
        ValidationRules {
            min_quantity: 1,
            require_product_name: false,
        }
    }
}

impl ValidationRules {
    pub fn validate(&self, order: &Order) -> Result<(), ValidationError> {
        if order.quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity(order.quantity));
        }

        if order.quantity < self.min_quantity {
            return Err(ValidationError::QuantityBelowMinimum {
                quantity: order.quantity,
                minimum: self.min_quantity,
            });
        }

        if self.require_product_name && order.product_name.trim().is_empty() {
            return Err(ValidationError::EmptyProductName);
        }

        Ok(())
    }
}
