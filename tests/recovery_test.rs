// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod common;

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use stonemq_client::{
    AppError, Cluster, Consumer, ConsumerConfig, Message, PartitionState, Producer, ProducerConfig,
    StartPosition, StopPosition,
};
use tokio::time;

use common::{
    cluster_config, collect_until, connected_cluster, drain_events, MockCluster, Outcomes,
    NOT_LEADER_FOR_PARTITION, PRODUCE,
};

const WAIT: Duration = Duration::from_secs(15);

fn producer_config(topic: &str) -> ProducerConfig {
    ProducerConfig::new(topic)
        .with_batch_flush_time(Duration::from_millis(5))
        .with_batch_flush_size(20)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_producer_survives_leader_failover() {
    let mock = MockCluster::start(3).await;
    mock.create_topic("orders", 3);
    let cluster = connected_cluster(&mock).await;
    let mut states = cluster.partition_state_changes();
    let (producer, mut events) = Producer::new(cluster.clone(), producer_config("orders"));
    producer.connect().await.unwrap();

    let failed_broker = mock.leader("orders", 1);
    let mut outcomes = Outcomes::default();
    for round in 0..30 {
        for seq in 0..20 {
            producer
                .send(Message::new(format!("{}-{}", round, seq)))
                .unwrap();
        }
        if round == 10 {
            mock.stop_broker(failed_broker);
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    assert!(
        collect_until(&mut events, &mut outcomes, WAIT, |o| {
            o.acked.len() + o.failed_messages() == 600
        })
        .await,
        "acked {} of 600",
        outcomes.acked.len()
    );
    assert!(outcomes.permanent.is_empty(), "{:?}", outcomes.permanent);
    assert_ne!(mock.leader("orders", 1), failed_broker);

    // the broker stops with produce requests in flight, and one appended
    // before its response was lost is sent again after recovery, so the log
    // holds at least every acknowledged message and may hold duplicates
    assert!(mock.total_messages("orders") >= 600);
    let consumer = Consumer::new(
        cluster.clone(),
        ConsumerConfig::new("orders")
            .with_start_position(StartPosition::TopicStart)
            .with_stop_position(StopPosition::TopicEnd),
    );
    let stream = consumer.subscribe().await.unwrap();
    let mut consumed = HashSet::new();
    let mut offsets: BTreeMap<i32, Vec<i64>> = BTreeMap::new();
    while let Some(item) = time::timeout(WAIT, stream.next()).await.unwrap() {
        let message = item.unwrap();
        offsets.entry(message.partition).or_default().push(message.offset);
        consumed.insert(message.value);
    }
    for (partition, offsets) in offsets {
        let expected: Vec<i64> = (0..mock.tail_offset("orders", partition)).collect();
        assert_eq!(offsets, expected, "partition {}", partition);
    }
    for message in &outcomes.acked {
        assert!(consumed.contains(&message.value), "{:?} lost", message.value);
    }

    let mut saw_recovery = false;
    while let Ok(change) = states.try_recv() {
        if change.topic_partition.partition == 1
            && matches!(change.state, PartitionState::Healthy { .. })
        {
            saw_recovery = true;
        }
    }
    assert!(saw_recovery);
    producer.close(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_acked_count_matches_log_across_quiet_failover() {
    let mock = MockCluster::start(3).await;
    mock.create_topic("orders", 3);
    let cluster = connected_cluster(&mock).await;
    let (producer, mut events) = Producer::new(cluster.clone(), producer_config("orders"));
    producer.connect().await.unwrap();
    let mut outcomes = Outcomes::default();

    for seq in 0..200 {
        producer.send(Message::new(format!("before-{}", seq))).unwrap();
    }
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| o.acked.len() == 200).await);

    // nothing is in flight when the leader goes away
    let failed_broker = mock.leader("orders", 0);
    mock.stop_broker(failed_broker);
    for seq in 0..200 {
        producer.send(Message::new(format!("after-{}", seq))).unwrap();
    }
    assert!(
        collect_until(&mut events, &mut outcomes, WAIT, |o| o.acked.len() == 400).await,
        "acked {} of 400",
        outcomes.acked.len()
    );
    producer.close(WAIT).await.unwrap();
    drain_events(&mut events, &mut outcomes);

    assert!(outcomes.permanent.is_empty(), "{:?}", outcomes.permanent);
    assert_ne!(mock.leader("orders", 0), failed_broker);
    let logged: i64 = (0..3)
        .map(|p| mock.tail_offset("orders", p) - mock.head_offset("orders", p))
        .sum();
    assert_eq!(logged, outcomes.acked.len() as i64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_partition_does_not_stop_others() {
    let mock = MockCluster::start(2).await;
    mock.create_topic("orders", 2);
    let config = cluster_config(&mock.bootstrap())
        .with_recovery_backoff(Duration::from_millis(10), Duration::from_millis(50))
        .with_recovery_max_elapsed(Duration::from_millis(400));
    let cluster = Cluster::new(config).unwrap();
    cluster.connect().await.unwrap();
    let mut states = cluster.partition_state_changes();
    let (producer, mut events) = Producer::new(cluster.clone(), producer_config("orders"));
    producer.connect().await.unwrap();

    // partition 1 loses its leader for good
    mock.set_leader("orders", 1, -1);
    mock.inject_error(PRODUCE, "orders", 1, NOT_LEADER_FOR_PARTITION);
    for seq in 0..10 {
        producer
            .send(Message::new(format!("lost-{}", seq)).with_partition(1))
            .unwrap();
        producer
            .send(Message::new(format!("kept-{}", seq)).with_partition(0))
            .unwrap();
    }

    let mut outcomes = Outcomes::default();
    assert!(
        collect_until(&mut events, &mut outcomes, WAIT, |o| {
            o.acked.len() == 10 && o.failed_messages() == 10
        })
        .await
    );
    assert!(outcomes
        .acked
        .iter()
        .all(|m| m.value.starts_with(b"kept-")));
    assert!(outcomes
        .permanent
        .iter()
        .all(|(error, _)| matches!(error, AppError::PartitionFailed { partition: 1, .. })));
    assert_eq!(mock.tail_offset("orders", 0), 10);
    assert_eq!(mock.tail_offset("orders", 1), 0);

    let mut failed = false;
    while let Ok(change) = states.try_recv() {
        assert_eq!(change.topic_partition.partition, 1);
        failed |= matches!(change.state, PartitionState::Failed { .. });
    }
    assert!(failed);
    assert!(!cluster.is_recovering("orders", 1));

    // partition 1 is usable again once it has a leader
    mock.set_leader("orders", 1, 1);
    producer
        .send(Message::new("back").with_partition(1))
        .unwrap();
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| o.acked.len() == 11).await);
    assert_eq!(mock.tail_offset("orders", 1), 1);
    producer.close(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_consumer_follows_new_leader() {
    let mock = MockCluster::start(2).await;
    mock.create_topic("orders", 1);
    let cluster = connected_cluster(&mock).await;
    let (producer, mut events) = Producer::new(cluster.clone(), producer_config("orders"));
    producer.connect().await.unwrap();

    let consumer = Consumer::new(
        cluster.clone(),
        ConsumerConfig::new("orders")
            .with_start_position(StartPosition::TopicStart)
            .with_max_wait_time(Duration::from_millis(20)),
    );
    let stream = consumer.subscribe().await.unwrap();

    let mut outcomes = Outcomes::default();
    for seq in 0..10 {
        producer.send(Message::new(format!("m{}", seq))).unwrap();
    }
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| o.acked.len() == 10).await);
    let mut received = Vec::new();
    while received.len() < 10 {
        received.push(time::timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap());
    }

    mock.stop_broker(mock.leader("orders", 0));
    for seq in 10..20 {
        producer.send(Message::new(format!("m{}", seq))).unwrap();
    }
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| o.acked.len() >= 20).await);
    while (received.len() as i64) < mock.tail_offset("orders", 0) {
        received.push(time::timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap());
    }

    let offsets: Vec<i64> = received.iter().map(|m| m.offset).collect();
    assert_eq!(offsets, (0..received.len() as i64).collect::<Vec<i64>>());
    consumer.close().await;
    producer.close(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_reports_share_one_recovery() {
    let mock = MockCluster::start(2).await;
    mock.create_topic("orders", 1);
    let cluster = connected_cluster(&mock).await;
    cluster.get_or_fetch_meta_for_topic("orders").await.unwrap();
    let mut states = cluster.partition_state_changes();

    let error = AppError::Broker(stonemq_client::ErrorCode::NotLeaderForPartition);
    let (first, second) = tokio::join!(
        cluster.recover_partition("orders", 0, &error),
        cluster.recover_partition("orders", 0, &error),
    );
    let first = first.unwrap();
    assert_eq!(first, second.unwrap());
    assert_eq!(first.id, mock.leader("orders", 0));

    let mut recovering = 0;
    let mut healthy = 0;
    while let Ok(change) = states.try_recv() {
        match change.state {
            PartitionState::Recovering => recovering += 1,
            PartitionState::Healthy { .. } => healthy += 1,
            PartitionState::Failed { .. } => panic!("recovery failed"),
        }
    }
    assert_eq!((recovering, healthy), (1, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_non_recoverable_error_fails_at_once() {
    let mock = MockCluster::start(1).await;
    mock.create_topic("orders", 1);
    let cluster = connected_cluster(&mock).await;

    let error = AppError::Broker(stonemq_client::ErrorCode::TopicAuthorizationFailed);
    let result = cluster.recover_partition("orders", 0, &error).await;
    assert!(matches!(result, Err(AppError::PartitionFailed { partition: 0, .. })), "{:?}", result);
    assert!(!cluster.is_recovering("orders", 0));
}
