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

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::message::TopicPartition;
use crate::protocol::{ErrorCode, MetadataResponse};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerMeta {
    pub id: i32,
    pub host: String,
    pub port: i32,
    pub rack: Option<String>,
}

impl BrokerMeta {
    pub fn new(id: i32, host: impl Into<String>, port: i32) -> Self {
        BrokerMeta {
            id,
            host: host.into(),
            port,
            rack: None,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Display for BrokerMeta {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "broker {} ({}:{})", self.id, self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMeta {
    pub partition: i32,
    /// `-1` while no leader is elected
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
    pub error_code: ErrorCode,
}

impl PartitionMeta {
    pub fn has_leader(&self) -> bool {
        self.leader >= 0
    }
}

/// Partitions of one topic, sorted by partition id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMeta {
    pub name: String,
    pub partitions: Vec<PartitionMeta>,
}

impl TopicMeta {
    pub fn partition(&self, partition: i32) -> Option<&PartitionMeta> {
        self.partitions
            .binary_search_by_key(&partition, |p| p.partition)
            .ok()
            .map(|index| &self.partitions[index])
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition_ids(&self) -> Vec<i32> {
        self.partitions.iter().map(|p| p.partition).collect()
    }
}

/// One immutable view of the cluster: live brokers and known topics.
#[derive(Debug, Default)]
pub struct ClusterMetadata {
    brokers: HashMap<i32, BrokerMeta>,
    topics: HashMap<String, Arc<TopicMeta>>,
    controller_id: i32,
}

impl ClusterMetadata {
    pub fn broker(&self, id: i32) -> Option<&BrokerMeta> {
        self.brokers.get(&id)
    }

    pub fn brokers(&self) -> impl Iterator<Item = &BrokerMeta> {
        self.brokers.values()
    }

    pub fn topic(&self, name: &str) -> Option<&Arc<TopicMeta>> {
        self.topics.get(name)
    }

    pub fn controller_id(&self) -> i32 {
        self.controller_id
    }

    /// Leader id of a partition, `None` when unknown or not elected.
    pub fn leader_id(&self, topic_partition: &TopicPartition) -> Option<i32> {
        self.topic(&topic_partition.topic)
            .and_then(|topic| topic.partition(topic_partition.partition))
            .filter(|partition| partition.has_leader())
            .map(|partition| partition.leader)
    }

    pub fn leader_for(&self, topic_partition: &TopicPartition) -> Option<&BrokerMeta> {
        self.leader_id(topic_partition)
            .and_then(|leader| self.brokers.get(&leader))
    }
}

/// What applying a metadata response changed.
#[derive(Debug, Default)]
pub struct MetadataUpdate {
    pub new_brokers: Vec<BrokerMeta>,
    pub topic_errors: Vec<(String, ErrorCode)>,
}

/// Snapshot-swap holder of [`ClusterMetadata`].
///
/// Readers clone the current `Arc` and never observe a half applied
/// response. Writers build a complete new snapshot and publish it in one
/// assignment.
#[derive(Debug, Default)]
pub struct MetadataCache {
    current: RwLock<Arc<ClusterMetadata>>,
    /// every broker id ever listed, guarded by the `current` write lock
    seen_broker_ids: Mutex<HashSet<i32>>,
}

impl MetadataCache {
    pub fn snapshot(&self) -> Arc<ClusterMetadata> {
        self.current.read().clone()
    }

    pub fn topic(&self, name: &str) -> Option<Arc<TopicMeta>> {
        self.current.read().topic(name).cloned()
    }

    pub fn broker(&self, id: i32) -> Option<BrokerMeta> {
        self.current.read().broker(id).cloned()
    }

    pub fn brokers(&self) -> Vec<BrokerMeta> {
        self.current.read().brokers().cloned().collect()
    }

    /// Publishes a new snapshot built from `response`.
    ///
    /// The broker list is replaced wholesale since a response lists every
    /// live broker. Only ids never listed before count as new brokers, so
    /// one that drops out of a response and returns is not announced twice. Topics in the response replace their cached entries,
    /// topics it does not mention are kept, and topics reported as unknown
    /// are dropped.
    pub fn apply(&self, response: &MetadataResponse) -> MetadataUpdate {
        let mut current = self.current.write();
        let mut update = MetadataUpdate::default();

        let brokers: HashMap<i32, BrokerMeta> = response
            .brokers
            .iter()
            .map(|b| {
                let broker = BrokerMeta {
                    id: b.node_id,
                    host: b.host.clone(),
                    port: b.port,
                    rack: b.rack.clone(),
                };
                (broker.id, broker)
            })
            .collect();
        let mut seen = self.seen_broker_ids.lock();
        update.new_brokers = brokers
            .values()
            .filter(|b| seen.insert(b.id))
            .cloned()
            .collect();
        drop(seen);
        update.new_brokers.sort_by_key(|b| b.id);

        let mut topics = current.topics.clone();
        for topic in &response.topics {
            match topic.error_code {
                ErrorCode::None => {
                    let mut partitions: Vec<PartitionMeta> = topic
                        .partitions
                        .iter()
                        .map(|p| PartitionMeta {
                            partition: p.partition,
                            leader: p.leader,
                            replicas: p.replicas.clone(),
                            isr: p.isr.clone(),
                            error_code: p.error_code,
                        })
                        .collect();
                    partitions.sort_by_key(|p| p.partition);
                    topics.insert(
                        topic.name.clone(),
                        Arc::new(TopicMeta {
                            name: topic.name.clone(),
                            partitions,
                        }),
                    );
                }
                ErrorCode::UnknownTopicOrPartition => {
                    topics.remove(&topic.name);
                    update.topic_errors.push((topic.name.clone(), topic.error_code));
                }
                code => update.topic_errors.push((topic.name.clone(), code)),
            }
        }

        *current = Arc::new(ClusterMetadata {
            brokers,
            topics,
            controller_id: response.controller_id,
        });
        update
    }
}
