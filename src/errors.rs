// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Pub/Sub Layer
//!
//! Every failure the pub/sub layer can report is a variant of [`AmqpError`].
//! Setup failures (connection, channel, queue declaration, binding, consumer
//! start) surface synchronously to the caller. Per-message failures (decode,
//! settlement) are logged inside the consumption loop and never stop it.

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

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// The queue already exists on the broker with different flags or arguments
    #[error("queue `{0}` already exists with a different configuration")]
    TopologyConflictError(String),

    /// Error binding a queue to an exchange, including a missing exchange
    #[error("failure to bind exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error registering a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// The value could not be serialized; nothing was sent
    #[error("failure to encode payload with `{codec}`: {reason}")]
    EncodeError { codec: String, reason: String },

    /// The payload could not be deserialized with the attempted codec
    #[error("failure to decode payload with `{codec}`: {reason}")]
    DecodeError {
        codec: String,
        reason: String,
        raw: Vec<u8>,
    },

    /// Error publishing a message
    #[error("failure to publish to exchange `{0}` with key `{1}`")]
    PublishingError(String, String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message without requeue
    #[error("failure to nack message")]
    NackMessageError,

    /// Error negative-acknowledging a message with requeue
    #[error("failure to requeuing message")]
    RequeuingMessageError,

    /// Error reported by the delivery stream of a consumer
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error loading the broker configuration
    #[error("failure to load configs: {0}")]
    ConfigError(String),
}
