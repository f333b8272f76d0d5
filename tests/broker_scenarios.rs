// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! End-to-end scenarios against a live broker.
//!
//! Run with `RABBITMQ_*` pointing at a disposable RabbitMQ and
//! `cargo test -- --ignored`.

use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueDeleteOptions},
    types::FieldTable,
    ExchangeKind,
};
use opentelemetry::Context;
use peril_pubsub::{
    channel::AmqpConnection,
    configs::RabbitMQConfigs,
    errors::AmqpError,
    handler::{handler_fn, AckType, Handler},
    publisher::{publish_bincode, publish_json},
    queue::{QueueBinding, QueueDefinition, SimpleQueueType},
    routing::{
        GameLog, PlayingState, EXCHANGE_PERIL_DEAD_LETTER, EXCHANGE_PERIL_DIRECT,
        EXCHANGE_PERIL_TOPIC, PAUSE_KEY,
    },
    subscriber::{subscribe_bincode, subscribe_json, subscribe_with, SubscriptionDefinition},
    topology::{declare_and_bind, AmqpTopology, Topology},
};
use std::{collections::BTreeSet, time::Duration};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

async fn connect() -> AmqpConnection {
    let cfg = RabbitMQConfigs::load().unwrap();
    let conn = AmqpConnection::connect(&cfg).await.unwrap();

    // Exchanges are normally provisioned by the broker administration.
    let admin = conn.open_channel().await.unwrap();
    for (name, kind) in [
        (EXCHANGE_PERIL_DIRECT, ExchangeKind::Direct),
        (EXCHANGE_PERIL_TOPIC, ExchangeKind::Topic),
        (EXCHANGE_PERIL_DEAD_LETTER, ExchangeKind::Fanout),
    ] {
        admin
            .exchange_declare(
                name,
                kind,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .unwrap();
    }

    conn
}

fn unique(prefix: &str) -> String {
    format!("{prefix}.test-{}", Uuid::new_v4())
}

/// Handler that reports each message, then holds it until the gate opens.
struct GatedHandler {
    started: mpsc::UnboundedSender<u32>,
    gate: watch::Receiver<bool>,
}

#[async_trait]
impl Handler<u32> for GatedHandler {
    async fn handle(&self, _ctx: &Context, msg: u32) -> AckType {
        let _ = self.started.send(msg);
        let mut gate = self.gate.clone();
        let _ = gate.wait_for(|open| *open).await;
        AckType::Ack
    }
}

async fn publish_numbers(conn: &AmqpConnection, exchange: &str, key: &str, count: u32) {
    let channel = conn.open_channel().await.unwrap();
    for n in 0..count {
        publish_json(&channel, &Context::new(), exchange, key, &n)
            .await
            .unwrap();
    }
}

async fn delete_queue(conn: &AmqpConnection, name: &str) {
    let channel = conn.open_channel().await.unwrap();
    channel
        .queue_delete(name, QueueDeleteOptions::default())
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn pause_is_delivered_decoded_and_not_redelivered_after_ack() {
    let conn = connect().await;
    let queue = unique(PAUSE_KEY);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = subscribe_json(
        &conn,
        EXCHANGE_PERIL_DIRECT,
        &queue,
        PAUSE_KEY,
        SimpleQueueType::Durable,
        handler_fn(move |state: PlayingState| {
            tx.send(state).unwrap();
            AckType::Ack
        }),
    )
    .await
    .unwrap();

    let publish_channel = conn.open_channel().await.unwrap();
    publish_json(
        &publish_channel,
        &Context::new(),
        EXCHANGE_PERIL_DIRECT,
        PAUSE_KEY,
        &PlayingState { is_paused: true },
    )
    .await
    .unwrap();

    let received = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, PlayingState { is_paused: true });

    let report = subscription.cancel().await.unwrap();
    assert_eq!(report.acked, 1);

    // Same flags again: idempotent, and nothing left to redeliver.
    let (_channel, declared) = declare_and_bind(
        &conn,
        EXCHANGE_PERIL_DIRECT,
        &queue,
        PAUSE_KEY,
        SimpleQueueType::Durable,
    )
    .await
    .unwrap();
    assert_eq!(declared.message_count, 0);

    delete_queue(&conn, &queue).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn requeued_messages_reach_a_reconnecting_subscriber() {
    let conn = connect().await;
    let queue = unique("war");
    let key = format!("{queue}.requeue");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let rejecting = subscribe_json(
        &conn,
        EXCHANGE_PERIL_TOPIC,
        &queue,
        &key,
        SimpleQueueType::Durable,
        handler_fn(move |n: u32| {
            let _ = tx.send(n);
            AckType::NackRequeue
        }),
    )
    .await
    .unwrap();

    let publish_channel = conn.open_channel().await.unwrap();
    for n in 0..5u32 {
        publish_json(&publish_channel, &Context::new(), EXCHANGE_PERIL_TOPIC, &key, &n)
            .await
            .unwrap();
    }

    let mut seen = BTreeSet::new();
    while seen.len() < 5 {
        let n = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        seen.insert(n);
    }
    rejecting.cancel().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let accepting = subscribe_json(
        &conn,
        EXCHANGE_PERIL_TOPIC,
        &queue,
        &key,
        SimpleQueueType::Durable,
        handler_fn(move |n: u32| {
            let _ = tx.send(n);
            AckType::Ack
        }),
    )
    .await
    .unwrap();

    let mut redelivered = BTreeSet::new();
    while redelivered.len() < 5 {
        let n = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        redelivered.insert(n);
    }
    assert_eq!(redelivered, (0..5).collect());

    accepting.cancel().await.unwrap();
    delete_queue(&conn, &queue).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn binary_game_logs_survive_the_round_trip() {
    let conn = connect().await;
    let queue = unique("game_logs");
    let key = format!("{queue}.alice");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = subscribe_bincode(
        &conn,
        EXCHANGE_PERIL_TOPIC,
        &queue,
        &key,
        SimpleQueueType::Transient,
        handler_fn(move |log: GameLog| {
            let _ = tx.send(log);
            AckType::Ack
        }),
    )
    .await
    .unwrap();
    assert_eq!(subscription.queue().queue_type, SimpleQueueType::Transient);

    let log = GameLog {
        current_time: chrono::Utc::now(),
        message: "alice moved 3 units".to_owned(),
        username: "alice".to_owned(),
    };
    let publish_channel = conn.open_channel().await.unwrap();
    publish_bincode(&publish_channel, &Context::new(), EXCHANGE_PERIL_TOPIC, &key, &log)
        .await
        .unwrap();

    let received = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, log);

    subscription.cancel().await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn conflicting_flags_are_reported() {
    let conn = connect().await;
    let queue = unique("conflict");

    declare_and_bind(
        &conn,
        EXCHANGE_PERIL_DIRECT,
        &queue,
        &queue,
        SimpleQueueType::Durable,
    )
    .await
    .unwrap();

    let err = declare_and_bind(
        &conn,
        EXCHANGE_PERIL_DIRECT,
        &queue,
        &queue,
        SimpleQueueType::Transient,
    )
    .await
    .unwrap_err();
    assert_eq!(err, AmqpError::TopologyConflictError(queue.clone()));

    delete_queue(&conn, &queue).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn binding_to_a_missing_exchange_fails() {
    let conn = connect().await;
    let exchange = format!("missing-{}", Uuid::new_v4());

    let err = declare_and_bind(&conn, &exchange, "", "any", SimpleQueueType::Transient)
        .await
        .unwrap_err();
    assert!(matches!(err, AmqpError::BindingExchangeToQueueError(ref ex, _) if *ex == exchange));

    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn unsettled_deliveries_never_exceed_the_prefetch_window() {
    let conn = connect().await;
    let queue = unique("war");
    let key = format!("{queue}.prefetch");
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let (gate_tx, gate_rx) = watch::channel(false);

    let def = SubscriptionDefinition::new(
        EXCHANGE_PERIL_TOPIC,
        QueueDefinition::new(&queue, SimpleQueueType::Durable),
        &key,
    )
    .prefetch_count(10);
    let subscription = subscribe_with(
        &conn,
        def,
        GatedHandler {
            started: started_tx,
            gate: gate_rx,
        },
    )
    .await
    .unwrap();

    publish_numbers(&conn, EXCHANGE_PERIL_TOPIC, &key, 15).await;

    // The first message is held by the handler; give the broker time to fill the window.
    tokio::time::timeout(WAIT, started_rx.recv()).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let (_channel, declared) =
        declare_and_bind(&conn, EXCHANGE_PERIL_TOPIC, &queue, &key, SimpleQueueType::Durable)
            .await
            .unwrap();
    assert_eq!(declared.message_count, 5);

    gate_tx.send(true).unwrap();
    for _ in 1..15 {
        tokio::time::timeout(WAIT, started_rx.recv()).await.unwrap().unwrap();
    }

    let report = subscription.cancel().await.unwrap();
    assert_eq!(report.acked, 15);

    delete_queue(&conn, &queue).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn discarded_messages_are_never_redelivered() {
    let conn = connect().await;
    let queue = unique("war");
    let key = format!("{queue}.discard");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let discarding = subscribe_json(
        &conn,
        EXCHANGE_PERIL_TOPIC,
        &queue,
        &key,
        SimpleQueueType::Durable,
        handler_fn(move |n: u32| {
            let _ = tx.send(n);
            AckType::NackDiscard
        }),
    )
    .await
    .unwrap();

    publish_numbers(&conn, EXCHANGE_PERIL_TOPIC, &key, 3).await;
    for _ in 0..3 {
        tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    }
    let report = discarding.cancel().await.unwrap();
    assert_eq!(report.discarded, 3);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let accepting = subscribe_json(
        &conn,
        EXCHANGE_PERIL_TOPIC,
        &queue,
        &key,
        SimpleQueueType::Durable,
        handler_fn(move |n: u32| {
            let _ = tx.send(n);
            AckType::Ack
        }),
    )
    .await
    .unwrap();
    assert_eq!(accepting.queue().message_count, 0);
    assert!(tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .is_err());

    accepting.cancel().await.unwrap();
    delete_queue(&conn, &queue).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn discarded_messages_reach_the_dead_letter_exchange() {
    let conn = connect().await;
    let queue = unique("war");
    let dead_letters = unique("dead");
    let key = format!("{queue}.dead");

    let (_channel, dlq) = declare_and_bind(
        &conn,
        EXCHANGE_PERIL_DEAD_LETTER,
        &dead_letters,
        "",
        SimpleQueueType::Durable,
    )
    .await
    .unwrap();
    assert_eq!(dlq.message_count, 0);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let def = SubscriptionDefinition::new(
        EXCHANGE_PERIL_TOPIC,
        QueueDefinition::new(&queue, SimpleQueueType::Durable)
            .dead_letter_exchange(EXCHANGE_PERIL_DEAD_LETTER),
        &key,
    );
    let discarding = subscribe_with(
        &conn,
        def,
        handler_fn(move |n: u32| {
            let _ = tx.send(n);
            AckType::NackDiscard
        }),
    )
    .await
    .unwrap();

    publish_numbers(&conn, EXCHANGE_PERIL_TOPIC, &key, 1).await;
    tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    discarding.cancel().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reader = subscribe_json(
        &conn,
        EXCHANGE_PERIL_DEAD_LETTER,
        &dead_letters,
        "",
        SimpleQueueType::Durable,
        handler_fn(move |n: u32| {
            let _ = tx.send(n);
            AckType::Ack
        }),
    )
    .await
    .unwrap();
    let n = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(n, 0);

    reader.cancel().await.unwrap();
    delete_queue(&conn, &queue).await;
    delete_queue(&conn, &dead_letters).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn topology_binds_one_queue_under_two_patterns() {
    let conn = connect().await;
    let queue = unique("moves");
    let war_pattern = format!("{queue}.war.*");
    let moves_pattern = format!("{queue}.army_moves.*");

    let def = QueueDefinition::new(&queue, SimpleQueueType::Durable);
    let war = QueueBinding::new(&queue)
        .exchange(EXCHANGE_PERIL_TOPIC)
        .routing_key(&war_pattern);
    let moves = QueueBinding::new(&queue)
        .exchange(EXCHANGE_PERIL_TOPIC)
        .routing_key(&moves_pattern);

    let channel = conn.open_channel().await.unwrap();
    let topology = AmqpTopology::new(channel)
        .queue(&def)
        .queue_binding(&war)
        .queue_binding(&moves);
    let declared = topology.install().await.unwrap();
    assert_eq!(declared.len(), 1);
    assert_eq!(declared[0].name, queue);

    publish_numbers(&conn, EXCHANGE_PERIL_TOPIC, &format!("{queue}.war.alice"), 1).await;
    let channel = conn.open_channel().await.unwrap();
    publish_json(
        &channel,
        &Context::new(),
        EXCHANGE_PERIL_TOPIC,
        &format!("{queue}.army_moves.bob"),
        &1u32,
    )
    .await
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = subscribe_json(
        &conn,
        EXCHANGE_PERIL_TOPIC,
        &queue,
        &war_pattern,
        SimpleQueueType::Durable,
        handler_fn(move |n: u32| {
            let _ = tx.send(n);
            AckType::Ack
        }),
    )
    .await
    .unwrap();

    let mut seen = BTreeSet::new();
    while seen.len() < 2 {
        seen.insert(tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap());
    }
    assert_eq!(seen, BTreeSet::from([0, 1]));

    subscription.cancel().await.unwrap();
    delete_queue(&conn, &queue).await;
    conn.close().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running RabbitMQ broker"]
async fn topology_rejects_server_named_queues() {
    let conn = connect().await;
    let first = QueueDefinition::new("", SimpleQueueType::Transient);
    let second = QueueDefinition::new("", SimpleQueueType::Transient);

    let channel = conn.open_channel().await.unwrap();
    let err = AmqpTopology::new(channel)
        .queue(&first)
        .queue(&second)
        .install()
        .await
        .unwrap_err();
    assert_eq!(err, AmqpError::DeclareQueueError(String::new()));

    conn.close().await.unwrap();
}
