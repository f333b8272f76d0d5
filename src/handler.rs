// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers
//!
//! A handler receives each decoded message of a subscription and decides how
//! the delivery is settled with the broker by returning an [`AckType`].

use async_trait::async_trait;
use opentelemetry::Context;
use std::{fmt, marker::PhantomData};

/// Settlement decision for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckType {
    /// Processed; remove the message from the queue.
    Ack,
    /// Not processed now; the broker redelivers it, possibly to another consumer.
    NackRequeue,
    /// Never processable; dead-lettered if configured, otherwise dropped.
    NackDiscard,
}

impl fmt::Display for AckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckType::Ack => write!(f, "ack"),
            AckType::NackRequeue => write!(f, "nack-requeue"),
            AckType::NackDiscard => write!(f, "nack-discard"),
        }
    }
}

/// Receives typed messages from a subscription.
///
/// Handlers run one at a time per subscription, in delivery order. A handler
/// may publish follow-up messages before returning. Redelivered messages can
/// arrive more than once, so side effects must tolerate duplicates.
#[async_trait]
pub trait Handler<T>: Send + Sync
where
    T: Send + 'static,
{
    /// `ctx` carries the trace context propagated by the publisher.
    async fn handle(&self, ctx: &Context, msg: T) -> AckType;
}

/// Adapter turning a plain closure into a [`Handler`].
pub struct FnHandler<T, F> {
    f: F,
    _msg: PhantomData<fn(T)>,
}

/// Wraps `f` so it can be passed wherever a [`Handler`] is expected.
///
/// ```
/// use peril_pubsub::{handler::{handler_fn, AckType}, routing::PlayingState};
///
/// let handler = handler_fn(|state: PlayingState| {
///     if state.is_paused { AckType::Ack } else { AckType::NackRequeue }
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<T, F>(f: F) -> FnHandler<T, F>
where
    F: Fn(T) -> AckType + Send + Sync,
{
    FnHandler {
        f,
        _msg: PhantomData,
    }
}

#[async_trait]
impl<T, F> Handler<T> for FnHandler<T, F>
where
    T: Send + 'static,
    F: Fn(T) -> AckType + Send + Sync,
{
    async fn handle(&self, _ctx: &Context, msg: T) -> AckType {
        (self.f)(msg)
    }
}
