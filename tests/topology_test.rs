// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use order_intake::{
    broker::BrokerChannel,
    configs::TopologyConfigs,
    errors::AmqpError,
    memory::InMemoryBroker,
    queue::QueueDefinition,
    topology::Topology,
};

#[tokio::test]
async fn should_install_order_topology_idempotently() {
    let broker = InMemoryBroker::new();
    let channel = broker.channel().await;
    let topology = Topology::orders(&TopologyConfigs::default());

    topology.install(channel.as_ref()).await.unwrap();
    topology.install(channel.as_ref()).await.unwrap();

    assert_eq!(broker.exchange_count().await, 1);
    assert_eq!(broker.queue_count().await, 2);
    assert_eq!(broker.binding_count().await, 1);
}

#[tokio::test]
async fn should_fail_on_queue_with_different_dead_letter_target() {
    let broker = InMemoryBroker::new();
    let channel = broker.channel().await;

    channel
        .declare_queue(&QueueDefinition::new("orders.queue").durable().with_dlq("legacy.dlq"))
        .await
        .unwrap();

    let result = Topology::orders(&TopologyConfigs::default())
        .install(channel.as_ref())
        .await;

    assert_eq!(
        result,
        Err(AmqpError::TopologyMismatch("orders.queue".to_owned()))
    );
    assert_eq!(broker.binding_count().await, 0);
}

#[tokio::test]
async fn should_fail_on_non_durable_existing_queue() {
    let broker = InMemoryBroker::new();
    let channel = broker.channel().await;

    channel
        .declare_queue(&QueueDefinition::new("orders.dlq"))
        .await
        .unwrap();

    let result = Topology::orders(&TopologyConfigs::default())
        .install(channel.as_ref())
        .await;

    assert_eq!(
        result,
        Err(AmqpError::TopologyMismatch("orders.dlq".to_owned()))
    );
}
