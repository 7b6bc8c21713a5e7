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

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::protocol::{EARLIEST_TIMESTAMP, LATEST_TIMESTAMP};
use crate::service::{AppError, AppResult};

/// Symbolic log position resolved through the list offsets api.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetPosition {
    /// oldest retained offset (head)
    Earliest,
    /// next offset to be written (tail)
    Latest,
}

impl OffsetPosition {
    pub fn timestamp(&self) -> i64 {
        match self {
            OffsetPosition::Earliest => EARLIEST_TIMESTAMP,
            OffsetPosition::Latest => LATEST_TIMESTAMP,
        }
    }
}

/// Per-partition "next offset to read" for one topic.
///
/// Used as consumer start and stop positions and as a checkpoint format.
/// The binary form is big-endian: `i16` topic length, UTF-8 topic, `i32`
/// entry count, then `(i32 partition, i64 offset)` per entry in partition
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPartitionOffsets {
    topic: String,
    offsets: BTreeMap<i32, i64>,
}

impl TopicPartitionOffsets {
    pub fn new(topic: impl Into<String>) -> Self {
        TopicPartitionOffsets {
            topic: topic.into(),
            offsets: BTreeMap::new(),
        }
    }

    pub fn from_map(topic: impl Into<String>, offsets: impl IntoIterator<Item = (i32, i64)>) -> Self {
        TopicPartitionOffsets {
            topic: topic.into(),
            offsets: offsets.into_iter().collect(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn update_offset(&mut self, partition: i32, offset: i64) {
        self.offsets.insert(partition, offset);
    }

    pub fn next_offset(&self, partition: i32) -> Option<i64> {
        self.offsets.get(&partition).copied()
    }

    pub fn partitions(&self) -> impl Iterator<Item = i32> + '_ {
        self.offsets.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, i64)> + '_ {
        self.offsets.iter().map(|(p, o)| (*p, *o))
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn should_consume_partition(&self, partition: i32) -> bool {
        self.offsets.contains_key(&partition)
    }

    /// Whether `cursor` reached this partition's bound. Partitions without
    /// an entry are never complete.
    pub fn is_partition_complete(&self, partition: i32, cursor: i64) -> bool {
        self.next_offset(partition)
            .is_some_and(|bound| cursor >= bound)
    }

    /// Messages between `earlier` and `self`, summed over the partitions
    /// present in both.
    pub fn messages_since(&self, earlier: &TopicPartitionOffsets) -> i64 {
        self.iter()
            .filter_map(|(partition, offset)| {
                earlier
                    .next_offset(partition)
                    .map(|start| (offset - start).max(0))
            })
            .sum()
    }

    pub fn write_offsets(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.topic.len() + 4 + self.offsets.len() * 12);
        buf.put_i16(self.topic.len() as i16);
        buf.put_slice(self.topic.as_bytes());
        buf.put_i32(self.offsets.len() as i32);
        for (partition, offset) in &self.offsets {
            buf.put_i32(*partition);
            buf.put_i64(*offset);
        }
        buf.freeze()
    }

    pub fn from_bytes(mut buf: &[u8]) -> AppResult<Self> {
        let short = |what: &str| AppError::InvalidValue(format!("offsets buffer too short for {}", what));
        if buf.remaining() < 2 {
            return Err(short("topic length"));
        }
        let topic_len = buf.get_i16();
        if topic_len < 0 || buf.remaining() < topic_len as usize {
            return Err(short("topic"));
        }
        let topic = String::from_utf8(buf[..topic_len as usize].to_vec())
            .map_err(|e| AppError::InvalidValue(format!("offsets topic is not utf8: {}", e)))?;
        buf.advance(topic_len as usize);

        if buf.remaining() < 4 {
            return Err(short("partition count"));
        }
        let count = buf.get_i32();
        if count < 0 || buf.remaining() < count as usize * 12 {
            return Err(short("partition entries"));
        }
        let mut offsets = BTreeMap::new();
        for _ in 0..count {
            let partition = buf.get_i32();
            let offset = buf.get_i64();
            offsets.insert(partition, offset);
        }
        Ok(TopicPartitionOffsets { topic, offsets })
    }
}

impl Display for TopicPartitionOffsets {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:", self.topic)?;
        for (i, (partition, offset)) in self.offsets.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{}", partition, offset)?;
        }
        write!(f, "]")
    }
}
