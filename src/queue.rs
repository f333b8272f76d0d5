// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! A queue is described by a name and a [`SimpleQueueType`]. The durability
//! mode alone decides the `durable`, `auto_delete` and `exclusive` flags; they
//! can not be set one by one. Optional broker arguments (dead-lettering, TTL,
//! length limits) are added with the builder methods.

use lapin::{
    options::QueueDeclareOptions,
    types::{AMQPValue, FieldTable, LongLongInt, LongString, ShortString},
};
use std::collections::BTreeMap;

/// Constant for the argument used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the argument used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the argument used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the argument used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the argument used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Durability mode of a queue.
///
/// - Durable: survives a broker restart, never auto-deleted, shared.
/// - Transient: auto-deleted and exclusive to the declaring connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SimpleQueueType {
    #[default]
    Durable,
    Transient,
}

impl SimpleQueueType {
    /// Declare options derived from the durability mode.
    pub fn declare_options(self) -> QueueDeclareOptions {
        let durable = self == SimpleQueueType::Durable;

        QueueDeclareOptions {
            passive: false,
            durable,
            exclusive: !durable,
            auto_delete: !durable,
            nowait: false,
        }
    }
}

/// Definition of a queue with its durability mode and broker arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) queue_type: SimpleQueueType,
    pub(crate) dead_letter_exchange: Option<String>,
    pub(crate) dead_letter_routing_key: Option<String>,
    pub(crate) ttl: Option<u32>,
    pub(crate) max_length: Option<u32>,
    pub(crate) max_length_bytes: Option<u32>,
}

impl QueueDefinition {
    /// Creates a new queue definition.
    ///
    /// An empty `name` asks the broker to generate one; the generated name is
    /// reported back through [`crate::topology::DeclaredQueue`].
    pub fn new(name: &str, queue_type: SimpleQueueType) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            queue_type,
            ..QueueDefinition::default()
        }
    }

    /// The requested queue name, empty for a server-named queue.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Durability mode the queue is declared with.
    pub fn queue_type(&self) -> SimpleQueueType {
        self.queue_type
    }

    /// Routes rejected and expired messages to `exchange` instead of dropping them.
    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self
    }

    /// Overrides the routing key used when a message is dead-lettered.
    pub fn dead_letter_routing_key(mut self, key: &str) -> Self {
        self.dead_letter_routing_key = Some(key.to_owned());
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue, in milliseconds.
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the maximum number of messages the queue can hold.
    pub fn max_length(mut self, max: u32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Sets the maximum size in bytes the queue can hold.
    pub fn max_length_bytes(mut self, max_bytes: u32) -> Self {
        self.max_length_bytes = Some(max_bytes);
        self
    }

    pub(crate) fn declare_options(&self) -> QueueDeclareOptions {
        self.queue_type.declare_options()
    }

    /// Broker arguments sent along with the queue declaration.
    ///
    /// Numeric limits go out as signed 64-bit longs, which hold any `u32`.
    pub(crate) fn arguments(&self) -> FieldTable {
        let mut args = BTreeMap::<ShortString, AMQPValue>::new();

        if let Some(exchange) = &self.dead_letter_exchange {
            args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from(exchange.as_str())),
            );
        }

        if let Some(key) = &self.dead_letter_routing_key {
            args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
                AMQPValue::LongString(LongString::from(key.as_str())),
            );
        }

        if let Some(ttl) = self.ttl {
            args.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                AMQPValue::LongLongInt(LongLongInt::from(ttl)),
            );
        }

        if let Some(max) = self.max_length {
            args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH),
                AMQPValue::LongLongInt(LongLongInt::from(max)),
            );
        }

        if let Some(max_bytes) = self.max_length_bytes {
            args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH_BYTES),
                AMQPValue::LongLongInt(LongLongInt::from(max_bytes)),
            );
        }

        FieldTable::from(args)
    }
}

/// Configuration for binding a queue to an exchange.
///
/// A queue may carry several bindings, e.g. two wildcard patterns on the
/// topic exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding<'qeb> {
    pub(crate) queue_name: &'qeb str,
    pub(crate) exchange_name: &'qeb str,
    pub(crate) routing_key: &'qeb str,
}

impl<'qeb> QueueBinding<'qeb> {
    /// Creates a new queue binding for the given queue.
    ///
    /// The exchange name and routing key start empty and are set with
    /// [`QueueBinding::exchange`] and [`QueueBinding::routing_key`].
    pub fn new(queue: &'qeb str) -> QueueBinding<'qeb> {
        QueueBinding {
            queue_name: queue,
            exchange_name: "",
            routing_key: "",
        }
    }

    /// Sets the exchange the queue is bound to.
    pub fn exchange(mut self, exchange: &'qeb str) -> Self {
        self.exchange_name = exchange;
        self
    }

    /// Sets the routing key, or wildcard pattern on a topic exchange.
    pub fn routing_key(mut self, key: &'qeb str) -> Self {
        self.routing_key = key;
        self
    }
}
