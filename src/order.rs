// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Order
//!
//! The only domain entity carried through the broker. An order is never
//! validated on construction or serialization; `quantity <= 0` must stay
//! representable so that it can reach the consumer and be dead-lettered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An order as produced by the intake and consumed by the processor.
///
/// Field names on the wire are `id`, `productName` and `quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Externally supplied identifier, used for correlation only.
    pub id: String,
    pub product_name: String,
    pub quantity: i32,
}

impl Order {
    pub fn new(id: impl Into<String>, product_name: impl Into<String>, quantity: i32) -> Self {
        Order {
            id: id.into(),
            product_name: product_name.into(),
            quantity,
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order(id={}, productName={}, quantity={})",
            self.id, self.product_name, self.quantity
        )
    }
}
