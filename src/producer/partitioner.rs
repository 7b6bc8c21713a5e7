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

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Partition and recovery flag, as seen by a [`Partitioner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionStatus {
    pub partition: i32,
    pub recovering: bool,
}

/// Picks the partition of a message without an explicit one.
///
/// `partitions` is never empty and sorted by partition id.
pub trait Partitioner: Send + Sync + Debug {
    fn partition(&self, key: Option<&[u8]>, partitions: &[PartitionStatus]) -> i32;
}

/// Keyed messages hash to a fixed partition so their order holds. Unkeyed
/// messages go round robin, skipping partitions in recovery while a healthy
/// one exists.
#[derive(Debug, Default)]
pub struct DefaultPartitioner {
    next: AtomicUsize,
}

impl Partitioner for DefaultPartitioner {
    fn partition(&self, key: Option<&[u8]>, partitions: &[PartitionStatus]) -> i32 {
        if partitions.is_empty() {
            return -1;
        }
        if let Some(key) = key {
            let hash = crc32c::crc32c(key) as usize;
            return partitions[hash % partitions.len()].partition;
        }

        let next = self.next.fetch_add(1, Ordering::Relaxed);
        let healthy = partitions.iter().filter(|p| !p.recovering).count();
        if healthy == 0 {
            return partitions[next % partitions.len()].partition;
        }
        partitions
            .iter()
            .filter(|p| !p.recovering)
            .nth(next % healthy)
            .map_or(partitions[0].partition, |p| p.partition)
    }
}
