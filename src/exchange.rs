// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Exchanges are the routing entities publishers send to. Orders go through a
//! direct exchange, which routes on an exact routing-key match.

/// Definition of a direct exchange.
///
/// Two definitions with the same name but different durability are
/// incompatible; declaring the second against a broker that holds the first
/// fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
}

impl ExchangeDefinition {
    /// Creates a new non-durable exchange definition.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            durable: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Whether `other` may be redeclared over this definition.
    pub(crate) fn is_compatible(&self, other: &ExchangeDefinition) -> bool {
        self.durable == other.durable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_build_durable_exchange() {
        let def = ExchangeDefinition::new("orders.exchange").durable();

        assert_eq!(def.name(), "orders.exchange");
        assert!(def.durable);
    }

    #[test]
    fn should_detect_incompatible_redeclaration() {
        let durable = ExchangeDefinition::new("ex").durable();

        assert!(durable.is_compatible(&ExchangeDefinition::new("ex").durable()));
        assert!(!durable.is_compatible(&ExchangeDefinition::new("ex")));
    }
}
