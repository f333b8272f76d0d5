// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Typed publish/subscribe over an AMQP 0-9-1 broker for the Peril game.
//!
//! Queues are declared and bound with [`topology`], values are published with
//! [`publisher`], and [`subscriber`] runs one consumption loop per subscription
//! that decodes each delivery, calls a [`handler::Handler`] and settles the
//! delivery according to the returned [`handler::AckType`].

mod consumer;
mod otel;

pub mod channel;
pub mod codec;
pub mod configs;
pub mod errors;
pub mod handler;
pub mod publisher;
pub mod queue;
pub mod routing;
pub mod subscriber;
pub mod topology;
