// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Topology
//!
//! Declares queues and binds them to the pre-existing exchanges. Declarations
//! are idempotent: declaring an existing queue with the same flags succeeds,
//! declaring it with different flags fails with
//! [`AmqpError::TopologyConflictError`].
//!
//! The main components are:
//! - [`declare_and_bind`]: one queue, one binding, on a fresh channel
//! - [`Topology`] / [`AmqpTopology`]: several queues and bindings installed on one channel

use crate::{
    channel::AmqpConnection,
    errors::AmqpError,
    queue::{QueueBinding, QueueDefinition, SimpleQueueType},
};
use async_trait::async_trait;
use lapin::{
    options::QueueBindOptions,
    protocol::{AMQPErrorKind, AMQPSoftError},
    types::FieldTable,
    Channel, Queue,
};
use tracing::{debug, error};

/// A queue as confirmed by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredQueue {
    pub name: String,
    pub queue_type: SimpleQueueType,
    pub message_count: u32,
    pub consumer_count: u32,
}

impl DeclaredQueue {
    fn new(queue: &Queue, queue_type: SimpleQueueType) -> DeclaredQueue {
        DeclaredQueue {
            name: queue.name().as_str().to_owned(),
            queue_type,
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        }
    }
}

/// Opens a channel, declares `queue_name` with the flags of `queue_type` and
/// binds it to `exchange` under `key`.
///
/// The queue receives matching publications from this point on, whether or not
/// a consumer is attached yet.
pub async fn declare_and_bind(
    conn: &AmqpConnection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    queue_type: SimpleQueueType,
) -> Result<(Channel, DeclaredQueue), AmqpError> {
    let def = QueueDefinition::new(queue_name, queue_type);
    declare_and_bind_queue(conn, exchange, &def, key).await
}

/// Same as [`declare_and_bind`] for a full [`QueueDefinition`], e.g. one with
/// a dead-letter exchange.
pub async fn declare_and_bind_queue(
    conn: &AmqpConnection,
    exchange: &str,
    def: &QueueDefinition,
    key: &str,
) -> Result<(Channel, DeclaredQueue), AmqpError> {
    let channel = conn.open_channel().await?;

    let queue = declare_queue(&channel, def).await?;
    let declared = DeclaredQueue::new(&queue, def.queue_type);

    let binding = QueueBinding::new(&declared.name)
        .exchange(exchange)
        .routing_key(key);
    bind_queue(&channel, &binding).await?;

    Ok((channel, declared))
}

/// Interface for installing a set of queues and bindings.
#[async_trait]
pub trait Topology<'tp> {
    /// Adds a queue definition to the topology.
    fn queue(self, def: &'tp QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: &'tp QueueBinding<'tp>) -> Self;

    /// Declares every queue, then creates every binding.
    ///
    /// # Returns
    /// The broker-confirmed queues, in the order they were added
    ///
    /// # Errors
    /// * [`AmqpError::DeclareQueueError`] - a queue has no name; bindings refer to queues by name
    /// * [`AmqpError::TopologyConflictError`] - a queue exists with different flags
    /// * [`AmqpError::BindingExchangeToQueueError`] - a binding was refused
    async fn install(&self) -> Result<Vec<DeclaredQueue>, AmqpError>;
}

/// Installs queues and bindings on a single channel.
///
/// Queues must be named: a server-named queue can only be bound through
/// [`declare_and_bind`], which binds the name the broker generated.
pub struct AmqpTopology<'tp> {
    channel: Channel,
    pub(crate) queues: Vec<&'tp QueueDefinition>,
    pub(crate) queues_binding: Vec<&'tp QueueBinding<'tp>>,
}

impl<'tp> AmqpTopology<'tp> {
    /// Creates an empty topology to be installed on `channel`.
    pub fn new(channel: Channel) -> AmqpTopology<'tp> {
        AmqpTopology {
            channel,
            queues: vec![],
            queues_binding: vec![],
        }
    }

    /// Gives back the channel the topology was installed on.
    pub fn into_channel(self) -> Channel {
        self.channel
    }
}

#[async_trait]
impl<'tp> Topology<'tp> for AmqpTopology<'tp> {
    fn queue(mut self, def: &'tp QueueDefinition) -> Self {
        self.queues.push(def);
        self
    }

    fn queue_binding(mut self, binding: &'tp QueueBinding<'tp>) -> Self {
        self.queues_binding.push(binding);
        self
    }

    async fn install(&self) -> Result<Vec<DeclaredQueue>, AmqpError> {
        check_named(&self.queues)?;

        let mut declared = Vec::with_capacity(self.queues.len());

        for def in &self.queues {
            let queue = declare_queue(&self.channel, def).await?;
            declared.push(DeclaredQueue::new(&queue, def.queue_type));
        }

        for binding in &self.queues_binding {
            bind_queue(&self.channel, binding).await?;
        }

        Ok(declared)
    }
}

/// Rejects server-named queues before anything is declared.
fn check_named(queues: &[&QueueDefinition]) -> Result<(), AmqpError> {
    match queues.iter().find(|def| def.name.is_empty()) {
        Some(_) => {
            error!("topology queues must be named");
            Err(AmqpError::DeclareQueueError(String::new()))
        }
        None => Ok(()),
    }
}

pub(crate) async fn declare_queue(
    channel: &Channel,
    def: &QueueDefinition,
) -> Result<Queue, AmqpError> {
    debug!(queue = def.name, mode = ?def.queue_type, "creating queue");

    match channel
        .queue_declare(&def.name, def.declare_options(), def.arguments())
        .await
    {
        Ok(queue) => {
            debug!("queue: {} was created", queue.name().as_str());
            Ok(queue)
        }
        Err(err) if is_precondition_failed(&err) => {
            error!(
                error = err.to_string(),
                queue = def.name,
                "queue exists with a different configuration"
            );
            Err(AmqpError::TopologyConflictError(def.name.clone()))
        }
        Err(err) => {
            error!(error = err.to_string(), queue = def.name, "error to declare the queue");
            Err(AmqpError::DeclareQueueError(def.name.clone()))
        }
    }
}

pub(crate) async fn bind_queue(channel: &Channel, binding: &QueueBinding<'_>) -> Result<(), AmqpError> {
    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        binding.queue_name, binding.exchange_name, binding.routing_key
    );

    match channel
        .queue_bind(
            binding.queue_name,
            binding.exchange_name,
            binding.routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            if is_not_found(&err) {
                error!(
                    error = err.to_string(),
                    exchange = binding.exchange_name,
                    "exchange does not exist"
                );
            } else {
                error!(error = err.to_string(), "error to bind queue to exchange");
            }

            Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange_name.to_owned(),
                binding.queue_name.to_owned(),
            ))
        }
        _ => {
            debug!("queue was bounded");
            Ok(())
        }
    }
}

/// The broker refused a declaration that conflicts with the existing queue.
fn is_precondition_failed(err: &lapin::Error) -> bool {
    matches!(
        err,
        lapin::Error::ProtocolError(amqp)
            if matches!(amqp.kind(), AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED))
    )
}

/// The broker refused a binding because the exchange does not exist.
fn is_not_found(err: &lapin::Error) -> bool {
    matches!(
        err,
        lapin::Error::ProtocolError(amqp)
            if matches!(amqp.kind(), AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND))
    )
}
