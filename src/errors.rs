// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Order Intake Service
//!
//! `AmqpError` covers every channel-level failure (connection, topology
//! declaration, publishing, settlement and consumption). The remaining enums
//! describe failures of the order flow itself: publishing an order, decoding
//! a payload, validating business rules and the intake boundary.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// An entity already exists on the broker with different parameters
    #[error("`{0}` already exists with incompatible parameters")]
    TopologyMismatch(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// The broker negatively confirmed a publish
    #[error("publish was not confirmed by the broker")]
    PublishNotConfirmed,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error rejecting a message
    #[error("failure to reject message")]
    RejectMessageError,

    /// The delivery tag is not outstanding on this channel
    #[error("unknown delivery tag `{0}`")]
    UnknownDeliveryTag(u64),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer
    #[error("consumer declaration error")]
    ConsumerDeclarationError,

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error fetching a single message from a queue
    #[error("failure to fetch from queue `{0}`")]
    FetchError(String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error closing a channel
    #[error("failure to close channel")]
    CloseChannelError,
}

/// Failure to hand an order to the broker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The order could not be encoded; the caller supplied bad input
    #[error("failure to serialize order: {0}")]
    Serialization(String),

    /// The broker was unreachable, the channel failed or the publish timed out
    #[error("transport failure: {0}")]
    Transport(String),
}

impl From<AmqpError> for PublishError {
    fn from(err: AmqpError) -> Self {
        PublishError::Transport(err.to_string())
    }
}

/// Failure to turn a payload into an order or back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unsupported content type `{0}`")]
    UnsupportedContentType(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// A business rule the order did not satisfy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid quantity: {0}")]
    NonPositiveQuantity(i32),

    #[error("quantity {quantity} is below the minimum of {minimum}")]
    QuantityBelowMinimum { quantity: i32, minimum: i32 },

    #[error("product name is empty")]
    EmptyProductName,
}

/// Failure raised by an order handler's business step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        HandlerError(msg.into())
    }
}

/// What the intake boundary reports to its caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    /// The request body is not an order
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The order could not be published
    #[error("Failed to publish order.")]
    Unavailable(String),
}

impl From<PublishError> for IntakeError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Serialization(msg) => IntakeError::BadRequest(msg),
            PublishError::Transport(msg) => IntakeError::Unavailable(msg),
        }
    }
}
