// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Serializes typed values and sends them to an exchange. The value is encoded
//! before the broker is contacted, so an encode failure never produces a partial
//! message. Publisher confirms are not awaited: an `Ok` means the broker
//! accepted the frame, not that the message reached a queue.

use crate::{codec::ContentType, errors::AmqpError, otel};
use lapin::{options::BasicPublishOptions, types::ShortString, BasicProperties, Channel};
use opentelemetry::Context;
use serde::Serialize;
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, error};
use uuid::Uuid;

/// Publisher bound to one channel, for callers that publish repeatedly.
pub struct RabbitMQPublisher {
    channel: Arc<Channel>,
}

impl RabbitMQPublisher {
    /// Creates a new publisher on `channel`.
    ///
    /// The channel should be dedicated to publishing and not shared with a subscription.
    ///
    /// # Returns
    /// An Arc-wrapped publisher to share between tasks
    pub fn new(channel: Arc<Channel>) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher { channel })
    }

    /// Encodes `value` with `content_type` and sends it to `exchange` under `key`.
    pub async fn publish<T>(
        &self,
        ctx: &Context,
        exchange: &str,
        key: &str,
        value: &T,
        content_type: ContentType,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        publish(&self.channel, ctx, exchange, key, value, content_type).await
    }

    /// Publishes `value` as JSON.
    pub async fn publish_json<T>(
        &self,
        ctx: &Context,
        exchange: &str,
        key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.publish(ctx, exchange, key, value, ContentType::Json).await
    }

    /// Publishes `value` with the bincode codec.
    pub async fn publish_bincode<T>(
        &self,
        ctx: &Context,
        exchange: &str,
        key: &str,
        value: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.publish(ctx, exchange, key, value, ContentType::Bincode).await
    }
}

/// Encodes `value` and publishes it on `channel`.
///
/// # Parameters
/// * `ctx` - trace context injected into the message headers
/// * `exchange` / `key` - destination of the message
/// * `content_type` - codec used for the body and stored as the content-type tag
///
/// # Errors
/// * [`AmqpError::EncodeError`] - the value could not be serialized; nothing was sent
/// * [`AmqpError::PublishingError`] - the channel or connection is closed, or the broker refused the frame
pub async fn publish<T>(
    channel: &Channel,
    ctx: &Context,
    exchange: &str,
    key: &str,
    value: &T,
    content_type: ContentType,
) -> Result<(), AmqpError>
where
    T: Serialize + ?Sized,
{
    let (payload, properties) = prepare(ctx, value, content_type)?;

    match channel
        .basic_publish(
            exchange,
            key,
            BasicPublishOptions {
                immediate: false,
                mandatory: false,
            },
            &payload,
            properties,
        )
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                exchange, key, "error publishing message"
            );
            Err(AmqpError::PublishingError(exchange.to_owned(), key.to_owned()))
        }
        _ => {
            debug!(exchange, key, codec = content_type.name(), "message published");
            Ok(())
        }
    }
}

/// Publishes `value` as JSON, tagged `application/json`.
///
/// # Errors
/// Same as [`publish`].
pub async fn publish_json<T>(
    channel: &Channel,
    ctx: &Context,
    exchange: &str,
    key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    T: Serialize + ?Sized,
{
    publish(channel, ctx, exchange, key, value, ContentType::Json).await
}

/// Publishes `value` with the bincode codec, tagged `application/x-bincode`.
///
/// Only subscribers using this crate can read these messages.
///
/// # Errors
/// Same as [`publish`].
pub async fn publish_bincode<T>(
    channel: &Channel,
    ctx: &Context,
    exchange: &str,
    key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    T: Serialize + ?Sized,
{
    publish(channel, ctx, exchange, key, value, ContentType::Bincode).await
}

/// Body and properties of the message to send.
fn prepare<T>(
    ctx: &Context,
    value: &T,
    content_type: ContentType,
) -> Result<(Vec<u8>, BasicProperties), AmqpError>
where
    T: Serialize + ?Sized,
{
    let payload = content_type.encode(value).map_err(|err| {
        error!(error = err.to_string(), "error encoding message");
        err
    })?;

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let properties = BasicProperties::default()
        .with_content_type(ShortString::from(content_type.content_type()))
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_timestamp(timestamp)
        .with_headers(otel::inject(ctx));

    Ok((payload, properties))
}
