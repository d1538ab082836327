// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! Establishes the RabbitMQ connection and wraps lapin channels as
//! [`BrokerChannel`]s. Each worker opens its own channel from the shared
//! connection.

use crate::{
    broker::{BrokerChannel, Delivery, DeliveryStream, OutboundMessage},
    configs::{AppSettings, RabbitMQConfigs},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicGetOptions,
        BasicPublishOptions, BasicQosOptions, BasicRejectOptions, ConfirmSelectOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    protocol::{AMQPErrorKind, AMQPSoftError},
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error};

/// Delivery mode marking a message as persistent
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Opens a connection to RabbitMQ named after the application.
pub async fn new_amqp_connection(
    app: &AppSettings,
    cfg: &RabbitMQConfigs,
) -> Result<Arc<Connection>, AmqpError> {
    debug!("creating amqp connection...");
    let options =
        ConnectionProperties::default().with_connection_name(LongString::from(app.name.clone()));

    match Connection::connect(&cfg.uri(), options).await {
        Ok(conn) => {
            debug!("amqp connected");
            Ok(Arc::new(conn))
        }
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
    }
}

/// Creates a connection and a first channel on it.
pub async fn new_amqp_channel(
    app: &AppSettings,
    cfg: &RabbitMQConfigs,
) -> Result<(Arc<Connection>, Arc<AmqpChannel>), AmqpError> {
    let conn = new_amqp_connection(app, cfg).await?;
    let channel = AmqpChannel::open(&conn, cfg.publisher_confirms).await?;

    Ok((conn, channel))
}

/// A lapin channel used through the [`BrokerChannel`] interface.
pub struct AmqpChannel {
    channel: Channel,
    confirms: bool,
}

impl AmqpChannel {
    /// Creates a channel on `conn`, optionally in publisher-confirm mode.
    pub async fn open(conn: &Connection, confirms: bool) -> Result<Arc<AmqpChannel>, AmqpError> {
        debug!("creating amqp channel...");
        let channel = match conn.create_channel().await {
            Ok(c) => c,
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                return Err(AmqpError::ChannelError);
            }
        };

        if confirms {
            if let Err(err) = channel
                .confirm_select(ConfirmSelectOptions { nowait: false })
                .await
            {
                error!(error = err.to_string(), "error enabling publisher confirms");
                return Err(AmqpError::ChannelError);
            }
        }

        debug!(id = channel.id(), "channel created");
        Ok(Arc::new(AmqpChannel { channel, confirms }))
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.channel
            .exchange_declare(
                &def.name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the exchange"
                );
                if is_precondition_failed(&err) {
                    AmqpError::TopologyMismatch(def.name.clone())
                } else {
                    AmqpError::DeclareExchangeError(def.name.clone())
                }
            })
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        let args = def
            .arguments()
            .into_iter()
            .map(|(k, v)| (ShortString::from(k), AMQPValue::LongString(LongString::from(v))))
            .collect::<BTreeMap<_, _>>();

        self.channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                FieldTable::from(args),
            )
            .await
            .map(|_| ())
            .map_err(|err| {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the queue"
                );
                if is_precondition_failed(&err) {
                    AmqpError::TopologyMismatch(def.name.clone())
                } else {
                    AmqpError::DeclareQueueError(def.name.clone())
                }
            })
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        self.channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to bind queue to exchange");
                AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                )
            })
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        msg: &OutboundMessage,
    ) -> Result<(), AmqpError> {
        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &msg.payload,
                properties(msg),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error publishing message");
                AmqpError::PublishingError
            })?;

        if !self.confirms {
            return Ok(());
        }

        match confirm.await {
            Ok(Confirmation::Nack(_)) => {
                error!(exchange, routing_key, "publish nacked by the broker");
                Err(AmqpError::PublishNotConfirmed)
            }
            Ok(_) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), "error awaiting publisher confirm");
                Err(AmqpError::PublishingError)
            }
        }
    }

    async fn qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to configure qos");
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, AmqpError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to create the consumer");
                AmqpError::ConsumerDeclarationError
            })?;

        Ok(consumer
            .map(|result| {
                result
                    .map(from_lapin_delivery)
                    .map_err(|err| AmqpError::ConsumerError(err.to_string()))
            })
            .boxed())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.channel
            .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error cancelling consumer");
                AmqpError::CancelConsumerError(consumer_tag.to_owned())
            })
    }

    async fn fetch(&self, queue: &str) -> Result<Option<Delivery>, AmqpError> {
        self.channel
            .basic_get(queue, BasicGetOptions { no_ack: false })
            .await
            .map(|msg| msg.map(|m| from_lapin_delivery(m.delivery)))
            .map_err(|err| {
                error!(error = err.to_string(), queue, "error fetching message");
                AmqpError::FetchError(queue.to_owned())
            })
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling reject msg");
                AmqpError::RejectMessageError
            })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.channel.close(200, "OK").await.map_err(|err| {
            error!(error = err.to_string(), "error closing channel");
            AmqpError::CloseChannelError
        })
    }
}

fn properties(msg: &OutboundMessage) -> BasicProperties {
    let headers = msg
        .headers
        .iter()
        .map(|(k, v)| {
            (
                ShortString::from(k.clone()),
                AMQPValue::LongString(LongString::from(v.clone())),
            )
        })
        .collect::<BTreeMap<_, _>>();

    let mut props = BasicProperties::default().with_headers(FieldTable::from(headers));

    if msg.persistent {
        props = props.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
    }
    if let Some(ct) = &msg.content_type {
        props = props.with_content_type(ShortString::from(ct.clone()));
    }
    if let Some(id) = &msg.message_id {
        props = props.with_message_id(ShortString::from(id.clone()));
    }
    if let Some(id) = &msg.correlation_id {
        props = props.with_correlation_id(ShortString::from(id.clone()));
    }
    if let Some(kind) = &msg.kind {
        props = props.with_type(ShortString::from(kind.clone()));
    }

    props
}

fn from_lapin_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let props = &delivery.properties;

    Delivery {
        delivery_tag: delivery.delivery_tag,
        redelivered: delivery.redelivered,
        exchange: delivery.exchange.to_string(),
        routing_key: delivery.routing_key.to_string(),
        content_type: props.content_type().as_ref().map(ToString::to_string),
        message_id: props.message_id().as_ref().map(ToString::to_string),
        correlation_id: props.correlation_id().as_ref().map(ToString::to_string),
        headers: string_headers(props.headers().as_ref()),
        data: delivery.data,
    }
}

// non-string header values (x-death tables, numbers) are not carried over
fn string_headers(table: Option<&FieldTable>) -> BTreeMap<String, String> {
    let Some(table) = table else {
        return BTreeMap::new();
    };

    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                AMQPValue::LongString(v) => std::str::from_utf8(v.as_bytes()).ok()?.to_owned(),
                AMQPValue::ShortString(v) => v.to_string(),
                _ => return None,
            };
            Some((key.to_string(), text))
        })
        .collect()
}

fn is_precondition_failed(err: &lapin::Error) -> bool {
    matches!(
        err,
        lapin::Error::ProtocolError(amqp)
            if matches!(amqp.kind(), AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_mark_persistent_messages() {
        let msg = OutboundMessage {
            payload: b"{}".to_vec(),
            content_type: Some("application/json".to_owned()),
            correlation_id: Some("123".to_owned()),
            persistent: true,
            ..OutboundMessage::default()
        };

        let props = properties(&msg);
        assert_eq!(*props.delivery_mode(), Some(PERSISTENT_DELIVERY_MODE));
        assert_eq!(
            props.content_type().as_ref().map(|c| c.as_str()),
            Some("application/json")
        );
        assert_eq!(props.correlation_id().as_ref().map(|c| c.as_str()), Some("123"));
    }

    #[test]
    fn should_set_message_type() {
        let msg = OutboundMessage {
            kind: Some("order".to_owned()),
            ..OutboundMessage::default()
        };

        let props = properties(&msg);
        assert_eq!(props.kind().as_ref().map(|k| k.as_str()), Some("order"));
        assert_eq!(*props.delivery_mode(), None);
    }

    #[test]
    fn should_keep_only_string_headers() {
        let mut inner = BTreeMap::new();
        inner.insert(
            ShortString::from("x-first-death-reason"),
            AMQPValue::LongString(LongString::from("rejected")),
        );
        inner.insert(ShortString::from("x-count"), AMQPValue::LongInt(3));

        let headers = string_headers(Some(&FieldTable::from(inner)));
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-first-death-reason").unwrap(), "rejected");
    }
}
