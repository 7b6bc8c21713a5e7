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

//! Async client for StoneMQ and other Kafka-compatible brokers.
//!
//! A [`Cluster`] owns the broker connections, the metadata cache and the
//! partition recovery monitor. [`Producer`] and [`Consumer`] are bound to a
//! single topic and share one cluster. All network work runs on the cluster's
//! dedicated worker runtime; results reach user code through channels and
//! awaited futures, never on a worker thread.

pub mod cluster;
pub mod consumer;
pub mod message;
pub mod network;
pub mod producer;
pub mod protocol;
pub mod service;
mod utils;

pub use cluster::{
    BrokerMeta, Cluster, ClusterState, PartitionMeta, PartitionState, PartitionStateChange,
    TopicMeta, WorkerRuntime,
};
pub use consumer::{Consumer, MessageStream};
pub use message::{
    Message, OffsetCheckpointFile, OffsetPosition, ReceivedMessage, TopicPartition,
    TopicPartitionOffsets,
};
pub use producer::{
    DefaultPartitioner, PartitionStatus, Partitioner, Producer, ProducerEvent, ProducerEvents,
    QueueResizeInfo,
};
pub use protocol::{Codec, ErrorCode, KafkaCodec};
pub use service::{
    setup_file_tracing, setup_local_tracing, AppError, AppResult, ClientConfig, ClusterConfig,
    CompressionType, ConsumerConfig, ProducerConfig, StartPosition, StopPosition,
};
