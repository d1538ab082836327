// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! Typed settings for the service, read from environment variables with
//! defaults matching a local RabbitMQ and the `orders.*` topology.
//!
//! | Variable | Default |
//! |---|---|
//! | `APP_NAME` | `order-intake` |
//! | `LOG_LEVEL` | `info` |
//! | `LOG_JSON` | `false` |
//! | `RABBITMQ_HOST` / `RABBITMQ_PORT` | `localhost` / `5672` |
//! | `RABBITMQ_USER` / `RABBITMQ_PASSWORD` | `guest` / `guest` |
//! | `RABBITMQ_VHOST` | `/` |
//! | `RABBITMQ_PUBLISH_TIMEOUT_MS` | `5000` |
//! | `RABBITMQ_PUBLISHER_CONFIRMS` | `true` |
//! | `ORDERS_QUEUE` / `ORDERS_DLQ` | `orders.queue` / `orders.dlq` |
//! | `ORDERS_EXCHANGE` / `ORDERS_ROUTING_KEY` | `orders.exchange` / `orders.routingKey` |
//! | `ORDERS_WORKERS` / `ORDERS_PREFETCH` | `1` / `1` |
//! | `ORDERS_MIN_QUANTITY` | `1` |
//! | `ORDERS_REQUIRE_PRODUCT_NAME` | `false` |

use crate::validation::ValidationRules;
use std::{env, str::FromStr, time::Duration};

#[derive(Debug, Clone, Default)]
pub struct AppConfigs {
    pub app: AppSettings,
    pub rabbitmq: RabbitMQConfigs,
    pub topology: TopologyConfigs,
    pub consumer: ConsumerConfigs,
    pub validation: ValidationRules,
}

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub name: String,
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
    pub log_json: bool,
}

/// Broker connection parameters.
#[derive(Debug, Clone)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Upper bound on a single publish round-trip
    pub publish_timeout: Duration,
    pub publisher_confirms: bool,
}

/// Fixed names of the order topology.
#[derive(Debug, Clone)]
pub struct TopologyConfigs {
    pub queue: String,
    pub dlq: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Consumer side settings. Acknowledgment is always manual.
#[derive(Debug, Clone)]
pub struct ConsumerConfigs {
    /// Number of workers, each with its own channel
    pub workers: usize,
    pub prefetch: u16,
    pub consumer_tag: String,
}

impl AppConfigs {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let app = AppSettings::default();
        let rabbitmq = RabbitMQConfigs::default();
        let topology = TopologyConfigs::default();
        let consumer = ConsumerConfigs::default();
        let validation = ValidationRules::default();

        AppConfigs {
            app: AppSettings {
                name: env_or("APP_NAME", app.name),
                log_level: env_or("LOG_LEVEL", app.log_level),
                log_json: env_parse("LOG_JSON", app.log_json),
            },
            rabbitmq: RabbitMQConfigs {
                host: env_or("RABBITMQ_HOST", rabbitmq.host),
                port: env_parse("RABBITMQ_PORT", rabbitmq.port),
                user: env_or("RABBITMQ_USER", rabbitmq.user),
                password: env_or("RABBITMQ_PASSWORD", rabbitmq.password),
                vhost: env_or("RABBITMQ_VHOST", rabbitmq.vhost),
                publish_timeout: Duration::from_millis(env_parse(
                    "RABBITMQ_PUBLISH_TIMEOUT_MS",
                    rabbitmq.publish_timeout.as_millis() as u64,
                )),
                publisher_confirms: env_parse(
                    "RABBITMQ_PUBLISHER_CONFIRMS",
                    rabbitmq.publisher_confirms,
                ),
            },
            topology: TopologyConfigs {
                queue: env_or("ORDERS_QUEUE", topology.queue),
                dlq: env_or("ORDERS_DLQ", topology.dlq),
                exchange: env_or("ORDERS_EXCHANGE", topology.exchange),
                routing_key: env_or("ORDERS_ROUTING_KEY", topology.routing_key),
            },
            consumer: ConsumerConfigs {
                workers: env_parse("ORDERS_WORKERS", consumer.workers).max(1),
                prefetch: env_parse("ORDERS_PREFETCH", consumer.prefetch).max(1),
                consumer_tag: env_or("ORDERS_CONSUMER_TAG", consumer.consumer_tag),
            },
            validation: ValidationRules {
                min_quantity: env_parse("ORDERS_MIN_QUANTITY", validation.min_quantity),
                require_product_name: env_parse(
                    "ORDERS_REQUIRE_PRODUCT_NAME",
                    validation.require_product_name,
                ),
            },
        }
    }
}

impl RabbitMQConfigs {
    /// AMQP URI for these parameters; the vhost `/` is percent-encoded.
    pub fn uri(&self) -> String {
        let vhost = match self.vhost.as_str() {
            "/" => "%2f",
            other => other.trim_start_matches('/'),
        };

        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, vhost
        )
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            name: "order-intake".to_owned(),
            log_level: "info".to_owned(),
            log_json: false,
        }
    }
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            publish_timeout: Duration::from_secs(5),
            publisher_confirms: true,
        }
    }
}

impl Default for TopologyConfigs {
    fn default() -> Self {
        TopologyConfigs {
            queue: "orders.queue".to_owned(),
            dlq: "orders.dlq".to_owned(),
            exchange: "orders.exchange".to_owned(),
            routing_key: "orders.routingKey".to_owned(),
        }
    }
}

impl Default for ConsumerConfigs {
    fn default() -> Self {
        ConsumerConfigs {
            workers: 1,
            prefetch: 1,
            consumer_tag: "order-consumer".to_owned(),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    parse_or(env::var(key).ok(), default)
}

// unparsable values fall back to the default
fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
