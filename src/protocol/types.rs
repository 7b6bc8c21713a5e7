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

//! Typed requests and responses exchanged with a broker.
//!
//! Bodies are keyed by [`TopicPartition`] in ordered maps, the codec groups
//! them by topic on the wire.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::{ApiKey, ErrorCode};
use crate::message::TopicPartition;

/// Sentinel timestamps understood by the list offsets api.
pub const EARLIEST_TIMESTAMP: i64 = -2;
pub const LATEST_TIMESTAMP: i64 = -1;

/// Replica id used by ordinary clients.
pub const CONSUMER_REPLICA_ID: i32 = -1;

#[derive(Debug, Clone)]
pub enum Request {
    Metadata(MetadataRequest),
    Produce(ProduceRequest),
    Fetch(FetchRequest),
    ListOffsets(ListOffsetsRequest),
}

impl Request {
    pub fn api_key(&self) -> ApiKey {
        match self {
            Request::Metadata(_) => ApiKey::Metadata,
            Request::Produce(_) => ApiKey::Produce,
            Request::Fetch(_) => ApiKey::Fetch,
            Request::ListOffsets(_) => ApiKey::ListOffsets,
        }
    }

    /// Produce requests with `acks = 0` get no response from the broker.
    pub fn expects_response(&self) -> bool {
        !matches!(self, Request::Produce(produce) if produce.required_acks == 0)
    }
}

#[derive(Debug, Clone)]
pub enum Response {
    Metadata(MetadataResponse),
    Produce(ProduceResponse),
    Fetch(FetchResponse),
    ListOffsets(ListOffsetsResponse),
}

impl Response {
    pub fn api_key(&self) -> ApiKey {
        match self {
            Response::Metadata(_) => ApiKey::Metadata,
            Response::Produce(_) => ApiKey::Produce,
            Response::Fetch(_) => ApiKey::Fetch,
            Response::ListOffsets(_) => ApiKey::ListOffsets,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRequest {
    /// `None` asks for every topic, an empty list for brokers only
    pub topics: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataBroker {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataPartition {
    pub error_code: ErrorCode,
    pub partition: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTopic {
    pub error_code: ErrorCode,
    pub name: String,
    pub is_internal: bool,
    pub partitions: Vec<MetadataPartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataResponse {
    pub brokers: Vec<MetadataBroker>,
    pub controller_id: i32,
    pub topics: Vec<MetadataTopic>,
}

#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub required_acks: i16,
    pub timeout_ms: i32,
    /// one encoded record batch per partition
    pub partition_data: BTreeMap<TopicPartition, Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducePartitionResponse {
    pub error_code: ErrorCode,
    pub base_offset: i64,
    pub log_append_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProduceResponse {
    pub responses: BTreeMap<TopicPartition, ProducePartitionResponse>,
    pub throttle_time_ms: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFetchData {
    pub fetch_offset: i64,
    pub log_start_offset: i64,
    pub max_bytes: i32,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub replica_id: i32,
    pub max_wait_ms: i32,
    pub min_bytes: i32,
    pub max_bytes: i32,
    pub isolation_level: i8,
    pub fetch_data: BTreeMap<TopicPartition, PartitionFetchData>,
}

#[derive(Debug, Clone)]
pub struct FetchPartitionResponse {
    pub error_code: ErrorCode,
    pub high_watermark: i64,
    pub last_stable_offset: i64,
    pub log_start_offset: i64,
    /// raw record batches, the last one may be truncated
    pub records: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct FetchResponse {
    pub throttle_time_ms: i32,
    pub responses: BTreeMap<TopicPartition, FetchPartitionResponse>,
}

#[derive(Debug, Clone, Default)]
pub struct ListOffsetsRequest {
    pub replica_id: i32,
    /// partition to target timestamp, see [`EARLIEST_TIMESTAMP`] and [`LATEST_TIMESTAMP`]
    pub partitions: BTreeMap<TopicPartition, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsPartitionResponse {
    pub error_code: ErrorCode,
    pub timestamp: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ListOffsetsResponse {
    pub responses: BTreeMap<TopicPartition, ListOffsetsPartitionResponse>,
}

/// Groups a partition keyed map by topic, preserving partition order.
pub(crate) fn group_by_topic<T>(
    data: &BTreeMap<TopicPartition, T>,
) -> BTreeMap<&str, Vec<(i32, &T)>> {
    let mut grouped: BTreeMap<&str, Vec<(i32, &T)>> = BTreeMap::new();
    for (topic_partition, value) in data {
        grouped
            .entry(topic_partition.topic.as_str())
            .or_default()
            .push((topic_partition.partition, value));
    }
    grouped
}
