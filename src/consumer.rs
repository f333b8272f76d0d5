// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! Handles one delivery at a time: pick the codec from the content-type tag,
//! decode, run the handler, then settle the delivery with the broker exactly
//! once. Every per-message failure ends in a settlement decision, never in an
//! error that would stop the consumption loop.

use crate::{
    codec::ContentType,
    errors::AmqpError,
    handler::{AckType, Handler},
    otel,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use lapin::{
    acker::Acker,
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions},
    types::FieldTable,
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, panic::AssertUnwindSafe};
use tracing::{debug, error, warn};

#[cfg(test)]
use mockall::automock;

/// The wire unit: a body plus the metadata needed to decode it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub exchange: String,
    pub routing_key: String,
    pub content_type: Option<String>,
    pub redelivered: bool,
    pub headers: FieldTable,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Splits a lapin delivery into its envelope and the handle used to settle it.
    pub(crate) fn from_delivery(delivery: Delivery) -> (Envelope, Acker) {
        let envelope = Envelope {
            exchange: delivery.exchange.as_str().to_owned(),
            routing_key: delivery.routing_key.as_str().to_owned(),
            content_type: delivery
                .properties
                .content_type()
                .as_ref()
                .map(|c| c.as_str().to_owned()),
            redelivered: delivery.redelivered,
            headers: delivery.properties.headers().clone().unwrap_or_default(),
            payload: delivery.data,
        };

        (envelope, delivery.acker)
    }
}

/// Settles a single delivery with the broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Settle: Send + Sync {
    /// Acknowledges the delivery, removing it from the queue.
    async fn ack(&self) -> Result<(), AmqpError>;

    /// Negatively acknowledges the delivery; `requeue` asks the broker to redeliver it.
    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;
}

#[async_trait]
impl Settle for Acker {
    async fn ack(&self) -> Result<(), AmqpError> {
        match Acker::ack(self, BasicAckOptions { multiple: false }).await {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), "error whiling ack msg");
                Err(AmqpError::AckMessageError)
            }
        }
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        match Acker::nack(
            self,
            BasicNackOptions {
                multiple: false,
                requeue,
            },
        )
        .await
        {
            Ok(_) => Ok(()),
            Err(err) if requeue => {
                error!(error = err.to_string(), "error whiling requeuing");
                Err(AmqpError::RequeuingMessageError)
            }
            Err(err) => {
                error!(error = err.to_string(), "error whiling nack msg");
                Err(AmqpError::NackMessageError)
            }
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// The directive applied, or attempted, for the delivery.
    pub directive: AckType,
    /// True when the payload could not be decoded.
    pub decode_failed: bool,
    /// Set when the broker rejected the ack/nack call.
    pub error: Option<AmqpError>,
}

/// Decodes, handles and settles one delivery.
///
/// `fallback` is used when the envelope carries no content-type tag. An
/// unknown tag, a payload that does not decode, or a handler panic settles
/// the delivery with [`AckType::NackDiscard`].
pub(crate) async fn consume<T, H, S>(
    tracer: &BoxedTracer,
    envelope: Envelope,
    acker: &S,
    fallback: ContentType,
    handler: &H,
) -> Settlement
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T> + ?Sized,
    S: Settle + ?Sized,
{
    let (ctx, mut span) = otel::new_span(&envelope.headers, tracer, &envelope.routing_key);

    debug!(
        "received: {} - exchange: {}",
        envelope.routing_key, envelope.exchange,
    );

    let decoded = select_codec(&envelope, fallback).and_then(|ct| ct.decode::<T>(&envelope.payload));

    let (directive, decode_failed) = match decoded {
        Ok(msg) => {
            let handled = AssertUnwindSafe(handler.handle(&ctx, msg))
                .catch_unwind()
                .await;

            match handled {
                Ok(directive) => (directive, false),
                Err(_) => {
                    error!(
                        routing_key = envelope.routing_key,
                        "handler panicked, discarding message"
                    );
                    span.set_status(Status::Error {
                        description: Cow::from("handler panicked"),
                    });
                    (AckType::NackDiscard, false)
                }
            }
        }
        Err(err) => {
            warn!(
                error = err.to_string(),
                routing_key = envelope.routing_key,
                redelivered = envelope.redelivered,
                "removing message from queue - reason: undecodable payload"
            );
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("undecodable payload"),
            });
            (AckType::NackDiscard, true)
        }
    };

    let error = settle(acker, directive).await.err();
    match &error {
        Some(err) => {
            span.record_error(err);
            span.set_status(Status::Error {
                description: Cow::from("error to settle msg"),
            });
        }
        None if !decode_failed && directive == AckType::Ack => span.set_status(Status::Ok),
        None => {}
    }

    Settlement {
        directive,
        decode_failed,
        error,
    }
}

/// Codec named by the envelope's content-type tag, or `fallback` when it has none.
fn select_codec(envelope: &Envelope, fallback: ContentType) -> Result<ContentType, AmqpError> {
    match envelope.content_type.as_deref() {
        None | Some("") => Ok(fallback),
        Some(tag) => ContentType::from_content_type(tag).ok_or_else(|| AmqpError::DecodeError {
            codec: tag.to_owned(),
            reason: "unsupported content type".to_owned(),
            raw: envelope.payload.clone(),
        }),
    }
}

/// Applies `directive` to the delivery.
pub(crate) async fn settle<S>(acker: &S, directive: AckType) -> Result<(), AmqpError>
where
    S: Settle + ?Sized,
{
    match directive {
        AckType::Ack => {
            debug!("message acked");
            acker.ack().await
        }
        AckType::NackRequeue => {
            warn!("message not processed, requeuing for later");
            acker.nack(true).await
        }
        AckType::NackDiscard => {
            debug!("message discarded");
            acker.nack(false).await
        }
    }
}
