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

use crate::message::TopicPartition;
use crate::protocol::ErrorCode;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("malformed protocol : {0}")]
    MalformedProtocol(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("channel recv error: {0}")]
    ChannelRecvError(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// marker error, the frame buffer does not hold a full frame yet
    #[error("incomplete frame")]
    Incomplete,

    /// cluster and transport errors
    #[error("no broker reachable: {0}")]
    BrokerUnreachable(String),

    #[error("connection to broker {broker_id} closed: {reason}")]
    ConnectionClosed { broker_id: i32, reason: String },

    #[error("request cancelled, the client is closing")]
    CancelledOnClose,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("broker error: {0}")]
    Broker(ErrorCode),

    /// pipeline errors
    #[error("partition {topic}-{partition} failed: {reason}")]
    PartitionFailed {
        topic: String,
        partition: i32,
        reason: String,
    },

    #[error("flush timeout exceeded, {unflushed} messages were not delivered")]
    FlushTimeoutExceeded { unflushed: usize },

    #[error("producer is closed")]
    ProducerClosed,

    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),

    #[error("corrupt message: {0}")]
    CorruptMessage(String),

    #[error("message too large: {0}")]
    MessageTooLarge(String),
}

impl AppError {
    pub fn partition_failed(topic_partition: &TopicPartition, reason: impl Into<String>) -> Self {
        AppError::PartitionFailed {
            topic: topic_partition.topic.clone(),
            partition: topic_partition.partition,
            reason: reason.into(),
        }
    }

    /// Whether the failure can heal once the partition leader is located again.
    ///
    /// Transport failures and leadership codes are recoverable. Protocol,
    /// validation and topic-level errors are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::IoError(_)
            | AppError::DetailedIoError(_)
            | AppError::ConnectionClosed { .. }
            | AppError::Timeout(_)
            | AppError::BrokerUnreachable(_) => true,
            AppError::Broker(code) => code.is_recoverable(),
            _ => false,
        }
    }
}
