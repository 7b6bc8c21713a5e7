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

use std::fmt::{Display, Formatter};

use crate::service::{AppError, AppResult};

/// Identity of one partition, rendered as `topic-partition`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl Display for TopicPartition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    pub fn id(&self) -> String {
        format!("{}-{}", self.topic, self.partition)
    }

    /// Parses `topic-partition`; the topic itself may contain dashes.
    pub fn from_string(value: &str) -> AppResult<Self> {
        let (topic, partition) = value.rsplit_once('-').ok_or_else(|| {
            AppError::InvalidValue(format!("topic partition without partition: {}", value))
        })?;
        if topic.is_empty() {
            return Err(AppError::InvalidValue(format!(
                "topic partition without topic: {}",
                value
            )));
        }
        let partition = partition.parse::<i32>().map_err(|_| {
            AppError::InvalidValue(format!("invalid partition in topic partition: {}", value))
        })?;
        Ok(Self::new(topic, partition))
    }
}
