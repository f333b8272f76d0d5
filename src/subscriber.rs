// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscriptions
//!
//! A subscription declares and binds its queue, limits the number of
//! unacknowledged deliveries with a prefetch window, and then consumes the
//! queue on its own Tokio task. Deliveries are handled and settled strictly
//! one after another, in the order the broker hands them over.
//!
//! The task stops when the delivery stream closes (channel or connection
//! teardown) or when [`Subscription::cancel`] is called. Cancellation is only
//! observed between deliveries, so a message being handled is always settled.

use crate::{
    channel::{AmqpConnection, AMQP_REPLY_SUCCESS},
    codec::ContentType,
    configs::{RabbitMQConfigs, DEFAULT_PREFETCH_COUNT},
    consumer::{consume, Envelope, Settle, Settlement},
    errors::AmqpError,
    handler::{AckType, Handler},
    otel::CONSUMER_TRACER,
    queue::{QueueDefinition, SimpleQueueType},
    topology::{declare_and_bind_queue, DeclaredQueue},
};
use futures_util::{Stream, StreamExt};
use lapin::{
    options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel,
};
use opentelemetry::global;
use serde::de::DeserializeOwned;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info};

/// Everything needed to start a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionDefinition {
    pub(crate) exchange: String,
    pub(crate) queue: QueueDefinition,
    pub(crate) routing_key: String,
    pub(crate) content_type: ContentType,
    pub(crate) prefetch_count: u16,
    pub(crate) consumer_tag: String,
}

impl SubscriptionDefinition {
    /// Subscription of `queue` bound to `exchange` under `routing_key`.
    ///
    /// Defaults: JSON codec, prefetch of [`DEFAULT_PREFETCH_COUNT`], broker-generated consumer tag.
    pub fn new(exchange: &str, queue: QueueDefinition, routing_key: &str) -> Self {
        SubscriptionDefinition {
            exchange: exchange.to_owned(),
            queue,
            routing_key: routing_key.to_owned(),
            content_type: ContentType::Json,
            prefetch_count: DEFAULT_PREFETCH_COUNT,
            consumer_tag: String::new(),
        }
    }

    /// Same as [`SubscriptionDefinition::new`] with the prefetch window taken from `cfg`.
    pub fn from_configs(
        cfg: &RabbitMQConfigs,
        exchange: &str,
        queue: QueueDefinition,
        routing_key: &str,
    ) -> Self {
        SubscriptionDefinition::new(exchange, queue, routing_key).prefetch_count(cfg.prefetch_count)
    }

    /// Codec used when a delivery carries no content-type tag.
    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }

    /// Maximum number of unsettled deliveries in flight. Zero is raised to one.
    pub fn prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = count.max(1);
        self
    }

    /// Consumer tag sent to the broker. Empty lets the broker generate one.
    pub fn consumer_tag(mut self, tag: &str) -> Self {
        self.consumer_tag = tag.to_owned();
        self
    }
}

/// Counters of a finished consumption loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeReport {
    pub delivered: u64,
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
    pub decode_failures: u64,
    pub settlement_failures: u64,
}

impl ConsumeReport {
    fn record(&mut self, settlement: &Settlement) {
        self.delivered += 1;

        if settlement.decode_failed {
            self.decode_failures += 1;
        }

        if settlement.error.is_some() {
            self.settlement_failures += 1;
            return;
        }

        match settlement.directive {
            AckType::Ack => self.acked += 1,
            AckType::NackRequeue => self.requeued += 1,
            AckType::NackDiscard => self.discarded += 1,
        }
    }
}

/// Handle to a running subscription.
///
/// Dropping the handle detaches the task: it keeps consuming until the
/// connection is closed.
#[derive(Debug)]
pub struct Subscription {
    queue: DeclaredQueue,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<ConsumeReport>,
}

impl Subscription {
    /// The queue this subscription consumes.
    pub fn queue(&self) -> &DeclaredQueue {
        &self.queue
    }

    /// Returns true once the consumption task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops consuming after the delivery in progress, if any, is settled.
    ///
    /// Deliveries already prefetched but not yet handled go back to the queue.
    pub async fn cancel(self) -> Result<ConsumeReport, AmqpError> {
        debug!(queue = self.queue.name, "cancelling subscription");
        let _ = self.shutdown.send(true);
        Self::wait(self.task).await
    }

    /// Waits until the delivery stream closes.
    pub async fn join(self) -> Result<ConsumeReport, AmqpError> {
        let Subscription { shutdown, task, .. } = self;
        let report = Self::wait(task).await;
        drop(shutdown);
        report
    }

    async fn wait(task: JoinHandle<ConsumeReport>) -> Result<ConsumeReport, AmqpError> {
        match task.await {
            Ok(report) => Ok(report),
            Err(err) => {
                error!(error = err.to_string(), "consumer task failed");
                Err(AmqpError::InternalError)
            }
        }
    }
}

/// Subscribes `handler` to `queue_name`, bound to `exchange` under `key`.
///
/// Setup runs before this returns: a declare, bind, QoS or consume failure is
/// returned here and no task is started. The prefetch window is the one the
/// connection was configured with.
///
/// # Parameters
/// * `content_type` - codec used for deliveries that carry no content-type tag
/// * `handler` - called once per decoded delivery, in delivery order
///
/// # Returns
/// A [`Subscription`] handle to cancel or join the consumption task
///
/// # Errors
/// * [`AmqpError::ChannelError`] - no channel could be opened
/// * [`AmqpError::TopologyConflictError`] - the queue exists with different flags
/// * [`AmqpError::DeclareQueueError`] / [`AmqpError::BindingExchangeToQueueError`] - topology setup failed
/// * [`AmqpError::QoSDeclarationError`] / [`AmqpError::BindingConsumerError`] - the consumer could not start
pub async fn subscribe<T, H>(
    conn: &AmqpConnection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    queue_type: SimpleQueueType,
    content_type: ContentType,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T> + 'static,
{
    let def = SubscriptionDefinition::new(exchange, QueueDefinition::new(queue_name, queue_type), key)
        .content_type(content_type)
        .prefetch_count(conn.prefetch_count());
    subscribe_with(conn, def, handler).await
}

/// [`subscribe`] with the JSON codec as fallback.
pub async fn subscribe_json<T, H>(
    conn: &AmqpConnection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    queue_type: SimpleQueueType,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T> + 'static,
{
    subscribe(conn, exchange, queue_name, key, queue_type, ContentType::Json, handler).await
}

/// [`subscribe`] with the bincode codec as fallback.
pub async fn subscribe_bincode<T, H>(
    conn: &AmqpConnection,
    exchange: &str,
    queue_name: &str,
    key: &str,
    queue_type: SimpleQueueType,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T> + 'static,
{
    subscribe(conn, exchange, queue_name, key, queue_type, ContentType::Bincode, handler).await
}

/// Subscribes `handler` using a full [`SubscriptionDefinition`].
pub async fn subscribe_with<T, H>(
    conn: &AmqpConnection,
    def: SubscriptionDefinition,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T> + 'static,
{
    let (channel, queue) =
        declare_and_bind_queue(conn, &def.exchange, &def.queue, &def.routing_key).await?;

    if let Err(err) = channel
        .basic_qos(def.prefetch_count, BasicQosOptions { global: false })
        .await
    {
        error!(error = err.to_string(), queue = queue.name, "error to configure qos");
        return Err(AmqpError::QoSDeclarationError(queue.name));
    }

    let consumer = match channel
        .basic_consume(
            &queue.name,
            &def.consumer_tag,
            BasicConsumeOptions {
                no_local: false,
                no_ack: false,
                exclusive: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to create the consumer");
            Err(AmqpError::BindingConsumerError(queue.name.clone()))
        }
        Ok(c) => Ok(c),
    }?;

    let consumer_tag = consumer.tag().as_str().to_owned();
    info!(
        queue = queue.name,
        exchange = def.exchange,
        key = def.routing_key,
        prefetch = def.prefetch_count,
        "subscription started"
    );

    let deliveries = consumer.map(|result| match result {
        Ok(delivery) => Ok(Envelope::from_delivery(delivery)),
        Err(err) => Err(AmqpError::ConsumerError(err.to_string())),
    });

    let (shutdown, shutdown_rx) = watch::channel(false);
    let fallback = def.content_type;
    let queue_name = queue.name.clone();

    let task = tokio::spawn(async move {
        let report =
            run::<T, H, _, _>(Box::pin(deliveries), shutdown_rx, fallback, &handler, &queue_name)
                .await;
        release(&channel, &consumer_tag).await;
        report
    });

    Ok(Subscription {
        queue,
        shutdown,
        task,
    })
}

/// Consumes `deliveries` until the stream ends or `shutdown` turns true.
pub(crate) async fn run<T, H, St, S>(
    mut deliveries: St,
    mut shutdown: watch::Receiver<bool>,
    fallback: ContentType,
    handler: &H,
    queue_name: &str,
) -> ConsumeReport
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T> + ?Sized,
    St: Stream<Item = Result<(Envelope, S), AmqpError>> + Unpin,
    S: Settle,
{
    let tracer = global::tracer(CONSUMER_TRACER);
    let mut report = ConsumeReport::default();
    let mut watching = true;

    loop {
        let next = tokio::select! {
            biased;

            changed = shutdown.changed(), if watching => {
                match changed {
                    Ok(()) if *shutdown.borrow_and_update() => {
                        info!(queue = queue_name, "subscription cancelled");
                        break;
                    }
                    Ok(()) => continue,
                    // Handle dropped: keep consuming until the stream closes.
                    Err(_) => {
                        watching = false;
                        continue;
                    }
                }
            }

            next = deliveries.next() => next,
        };

        let Some(result) = next else {
            info!(queue = queue_name, "delivery stream closed");
            break;
        };

        match result {
            Ok((envelope, acker)) => {
                let settlement = consume::<T, H, S>(&tracer, envelope, &acker, fallback, handler).await;
                report.record(&settlement);
            }
            Err(err) => error!(error = err.to_string(), queue = queue_name, "errors consume msg"),
        }
    }

    debug!(queue = queue_name, ?report, "consumption loop finished");
    report
}

/// Cancels the consumer and closes the subscription's channel.
///
/// Fails quietly when the connection is already gone.
async fn release(channel: &Channel, consumer_tag: &str) {
    if !channel.status().connected() {
        return;
    }

    if let Err(err) = channel
        .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
        .await
    {
        debug!(error = err.to_string(), "failure to cancel the consumer");
    }

    if let Err(err) = channel.close(AMQP_REPLY_SUCCESS, "subscription closed").await {
        debug!(error = err.to_string(), "failure to close the channel");
    }
}
