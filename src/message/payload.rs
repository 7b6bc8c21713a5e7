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

use std::sync::Arc;

use bytes::Bytes;

/// A message handed to the producer.
///
/// Messages sharing a key land on the same partition unless an explicit
/// partition is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub partition: Option<i32>,
}

impl Message {
    pub fn new(value: impl Into<Bytes>) -> Self {
        Message {
            key: None,
            value: value.into(),
            partition: None,
        }
    }

    pub fn with_key(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Message {
            key: Some(key.into()),
            value: value.into(),
            partition: None,
        }
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    /// Payload bytes counted against the batch byte limit.
    pub fn size(&self) -> usize {
        self.key.as_ref().map_or(0, Bytes::len) + self.value.len()
    }
}

/// A message delivered by the consumer, with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub topic: Arc<str>,
    pub partition: i32,
    pub offset: i64,
    /// create or log append time in epoch milliseconds
    pub timestamp: i64,
    pub key: Option<Bytes>,
    pub value: Bytes,
}
