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

use std::collections::HashMap;
use std::time::Duration;

use stonemq_client::{
    AppError, CompressionType, ErrorCode, Message, Producer, ProducerConfig,
};

use common::{
    collect_until, connected_cluster, drain_events, MockCluster, Outcomes, NOT_LEADER_FOR_PARTITION,
    PRODUCE, TOPIC_AUTHORIZATION_FAILED,
};

const WAIT: Duration = Duration::from_secs(10);

fn fast_config(topic: &str) -> ProducerConfig {
    ProducerConfig::new(topic)
        .with_batch_flush_time(Duration::from_millis(5))
        .with_batch_flush_size(50)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_send_requires_connect() {
    let mock = MockCluster::start(1).await;
    mock.create_topic("orders", 1);
    let cluster = connected_cluster(&mock).await;
    let (producer, _events) = Producer::new(cluster, fast_config("orders"));

    let result = producer.send(Message::new("early"));
    assert!(matches!(result, Err(AppError::NotConnected(_))), "{:?}", result);
    assert_eq!(producer.partition_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_keyed_messages_keep_their_order() {
    let mock = MockCluster::start(2).await;
    mock.create_topic("orders", 3);
    let cluster = connected_cluster(&mock).await;
    let (producer, mut events) = Producer::new(cluster, fast_config("orders"));
    producer.connect().await.unwrap();
    assert_eq!(producer.partition_count(), 3);

    for seq in 0..300 {
        let key = format!("k{}", seq % 10);
        producer
            .send(Message::with_key(key, format!("{}", seq)))
            .unwrap();
    }
    let mut outcomes = Outcomes::default();
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| o.acked.len() == 300).await);

    let mut last_seen: HashMap<bytes::Bytes, i64> = HashMap::new();
    for message in &outcomes.acked {
        let seq: i64 = std::str::from_utf8(&message.value).unwrap().parse().unwrap();
        let key = message.key.clone().unwrap();
        if let Some(previous) = last_seen.insert(key, seq) {
            assert!(previous < seq, "{} acknowledged after {}", seq, previous);
        }
    }
    assert_eq!(mock.total_messages("orders"), 300);
    producer.close(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_queue_grows_instead_of_blocking() {
    let mock = MockCluster::start(1).await;
    mock.create_topic("orders", 1);
    let cluster = connected_cluster(&mock).await;
    let config = ProducerConfig::new("orders")
        .with_initial_queue_size(1)
        .with_batch_flush_time(Duration::from_millis(50));
    let (producer, mut events) = Producer::new(cluster, config);
    producer.connect().await.unwrap();

    for seq in 0..1000 {
        producer.send(Message::new(format!("m{}", seq))).unwrap();
    }

    let mut outcomes = Outcomes::default();
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| o.acked.len() == 1000).await);
    assert!(outcomes.resized > 0);
    assert!(outcomes.permanent.is_empty());
    assert_eq!(mock.tail_offset("orders", 0), 1000);
    producer.close(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_flushes_lingering_messages() {
    let mock = MockCluster::start(1).await;
    mock.create_topic("orders", 2);
    let cluster = connected_cluster(&mock).await;
    let config = ProducerConfig::new("orders").with_batch_flush_time(Duration::from_secs(60));
    let (producer, mut events) = Producer::new(cluster, config);
    producer.connect().await.unwrap();

    for seq in 0..50 {
        producer.send(Message::new(format!("m{}", seq))).unwrap();
    }
    producer.close(WAIT).await.unwrap();

    let mut outcomes = Outcomes::default();
    drain_events(&mut events, &mut outcomes);
    assert_eq!(outcomes.acked.len(), 50);
    assert!(outcomes.dirty.is_empty());
    assert_eq!(mock.total_messages("orders"), 50);
    assert!(producer.queue_sizes().values().all(|size| *size == 0));

    let result = producer.send(Message::new("late"));
    assert!(matches!(result, Err(AppError::ProducerClosed)), "{:?}", result);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_timeout_reports_unflushed_messages() {
    let mock = MockCluster::start(1).await;
    mock.create_topic("orders", 1);
    let cluster = connected_cluster(&mock).await;
    let (producer, mut events) = Producer::new(cluster, fast_config("orders"));
    producer.connect().await.unwrap();

    mock.stop_broker(1);
    for seq in 0..20 {
        producer.send(Message::new(format!("m{}", seq))).unwrap();
    }
    let mut outcomes = Outcomes::default();
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| o.temporary > 0).await);

    let result = producer.close(Duration::from_millis(200)).await;
    assert!(
        matches!(result, Err(AppError::FlushTimeoutExceeded { unflushed: 20 })),
        "{:?}",
        result
    );
    drain_events(&mut events, &mut outcomes);
    assert!(outcomes.acked.is_empty());
    assert_eq!(outcomes.dirty.len(), 20);
    assert_eq!(outcomes.dirty[0].value.as_ref(), b"m0");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_permanent_broker_error_drops_only_that_batch() {
    let mock = MockCluster::start(1).await;
    mock.create_topic("orders", 1);
    let cluster = connected_cluster(&mock).await;
    let (producer, mut events) = Producer::new(cluster, fast_config("orders"));
    producer.connect().await.unwrap();

    mock.inject_error(PRODUCE, "orders", 0, TOPIC_AUTHORIZATION_FAILED);
    producer.send(Message::new("rejected")).unwrap();
    let mut outcomes = Outcomes::default();
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| !o.permanent.is_empty()).await);
    let (error, messages) = &outcomes.permanent[0];
    assert!(matches!(error, AppError::Broker(ErrorCode::TopicAuthorizationFailed)));
    assert_eq!(messages, &vec![Message::new("rejected")]);

    producer.send(Message::new("accepted")).unwrap();
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| o.acked.len() == 1).await);
    assert_eq!(mock.tail_offset("orders", 0), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_not_leader_is_retried_after_recovery() {
    let mock = MockCluster::start(2).await;
    mock.create_topic("orders", 1);
    let cluster = connected_cluster(&mock).await;
    let mut states = cluster.partition_state_changes();
    let (producer, mut events) = Producer::new(cluster.clone(), fast_config("orders"));
    producer.connect().await.unwrap();

    mock.inject_error(PRODUCE, "orders", 0, NOT_LEADER_FOR_PARTITION);
    for seq in 0..5 {
        producer.send(Message::new(format!("m{}", seq))).unwrap();
    }
    let mut outcomes = Outcomes::default();
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| o.acked.len() == 5).await);
    assert_eq!(outcomes.temporary, 1);
    assert!(outcomes.permanent.is_empty());
    assert_eq!(mock.tail_offset("orders", 0), 5);

    let change = states.recv().await.unwrap();
    assert_eq!(change.topic_partition.partition, 0);
    producer.close(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_compressed_batches_are_rejected() {
    let mock = MockCluster::start(1).await;
    mock.create_topic("orders", 1);
    let cluster = connected_cluster(&mock).await;
    let config = fast_config("orders").with_compression(CompressionType::Gzip);
    let (producer, mut events) = Producer::new(cluster, config);
    producer.connect().await.unwrap();

    producer.send(Message::new("zipped")).unwrap();
    let mut outcomes = Outcomes::default();
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| !o.permanent.is_empty()).await);
    assert!(matches!(outcomes.permanent[0].0, AppError::UnsupportedCompression(_)));
    assert_eq!(mock.request_count(PRODUCE), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_message_is_rejected() {
    let mock = MockCluster::start(1).await;
    mock.create_topic("orders", 1);
    let cluster = connected_cluster(&mock).await;
    let config = fast_config("orders").with_max_batch_bytes(16);
    let (producer, mut events) = Producer::new(cluster, config);
    producer.connect().await.unwrap();

    producer.send(Message::new(vec![7u8; 64])).unwrap();
    producer.send(Message::new("small")).unwrap();
    let mut outcomes = Outcomes::default();
    assert!(
        collect_until(&mut events, &mut outcomes, WAIT, |o| {
            !o.permanent.is_empty() && o.acked.len() == 1
        })
        .await
    );
    assert!(matches!(outcomes.permanent[0].0, AppError::MessageTooLarge(_)));
    assert_eq!(outcomes.acked[0].value.as_ref(), b"small");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_explicit_partition() {
    let mock = MockCluster::start(1).await;
    mock.create_topic("orders", 2);
    let cluster = connected_cluster(&mock).await;
    let (producer, mut events) = Producer::new(cluster, fast_config("orders"));
    producer.connect().await.unwrap();

    let result = producer.send(Message::new("nowhere").with_partition(9));
    assert!(matches!(result, Err(AppError::InvalidValue(_))), "{:?}", result);

    for _ in 0..3 {
        producer.send(Message::new("second").with_partition(1)).unwrap();
    }
    let mut outcomes = Outcomes::default();
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| o.acked.len() == 3).await);
    assert_eq!(mock.tail_offset("orders", 0), 0);
    assert_eq!(mock.tail_offset("orders", 1), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fire_and_forget_acks() {
    let mock = MockCluster::start(1).await;
    mock.create_topic("orders", 1);
    let cluster = connected_cluster(&mock).await;
    let config = fast_config("orders").with_required_acks(0);
    let (producer, mut events) = Producer::new(cluster, config);
    producer.connect().await.unwrap();

    for seq in 0..10 {
        producer.send(Message::new(format!("m{}", seq))).unwrap();
    }
    let mut outcomes = Outcomes::default();
    assert!(collect_until(&mut events, &mut outcomes, WAIT, |o| o.acked.len() == 10).await);
    assert!(common::eventually(WAIT, || mock.tail_offset("orders", 0) == 10).await);
    producer.close(WAIT).await.unwrap();
}
