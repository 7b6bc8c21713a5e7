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

use std::fmt;

/// Broker error codes seen by the produce, fetch, list offsets and metadata apis.
///
/// Codes outside this set decode as [`ErrorCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ErrorCode {
    None = 0,
    Unknown = -1,

    // leadership and availability, retried once the leader is found again
    LeaderNotAvailable = 5,
    NotLeaderForPartition = 6,
    RequestTimedOut = 7,
    BrokerNotAvailable = 8,
    ReplicaNotAvailable = 9,
    NetworkException = 13,
    NotEnoughReplicas = 19,
    NotEnoughReplicasAfterAppend = 20,
    KafkaStorageError = 56,

    // offsets and payloads
    OffsetOutOfRange = 1,
    CorruptMessage = 2,
    InvalidFetchSize = 4,
    MessageTooLarge = 10,
    RecordBatchTooLarge = 18,
    InvalidRequiredAcks = 21,
    InvalidTimestamp = 32,
    UnsupportedForMessageFormat = 43,

    // topics, requests and access
    UnknownTopicOrPartition = 3,
    StaleControllerEpoch = 11,
    InvalidTopic = 17,
    TopicAuthorizationFailed = 29,
    ClusterAuthorizationFailed = 31,
    UnsupportedVersion = 35,
    NotController = 41,
    InvalidRequest = 42,
    PolicyViolation = 44,
}

impl ErrorCode {
    /// Short description for logs and error messages.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::None => "",
            ErrorCode::Unknown => "unexpected broker error",
            ErrorCode::LeaderNotAvailable => "partition has no leader yet",
            ErrorCode::NotLeaderForPartition => "broker no longer leads the partition",
            ErrorCode::RequestTimedOut => "broker timed out the request",
            ErrorCode::BrokerNotAvailable => "broker unavailable",
            ErrorCode::ReplicaNotAvailable => "replica unavailable",
            ErrorCode::NetworkException => "broker lost a connection while serving the request",
            ErrorCode::NotEnoughReplicas => "too few in-sync replicas to accept the write",
            ErrorCode::NotEnoughReplicasAfterAppend => "write stored on too few in-sync replicas",
            ErrorCode::KafkaStorageError => "broker failed to access its log",
            ErrorCode::OffsetOutOfRange => "offset outside the retained log",
            ErrorCode::CorruptMessage => "record batch failed validation",
            ErrorCode::InvalidFetchSize => "invalid fetch size",
            ErrorCode::MessageTooLarge => "message exceeds the broker size limit",
            ErrorCode::RecordBatchTooLarge => "record batch exceeds the segment size",
            ErrorCode::InvalidRequiredAcks => "invalid required acks",
            ErrorCode::InvalidTimestamp => "record timestamp out of range",
            ErrorCode::UnsupportedForMessageFormat => "message format does not support the request",
            ErrorCode::UnknownTopicOrPartition => "topic or partition does not exist",
            ErrorCode::StaleControllerEpoch => "stale controller epoch",
            ErrorCode::InvalidTopic => "invalid topic",
            ErrorCode::TopicAuthorizationFailed => "not authorized for the topic",
            ErrorCode::ClusterAuthorizationFailed => "not authorized for the cluster",
            ErrorCode::UnsupportedVersion => "api version not supported by the broker",
            ErrorCode::NotController => "broker is not the controller",
            ErrorCode::InvalidRequest => "broker rejected the request as malformed",
            ErrorCode::PolicyViolation => "request violates a broker policy",
        }
    }

    pub fn from_code(code: i16) -> Self {
        match code {
            0 => ErrorCode::None,
            1 => ErrorCode::OffsetOutOfRange,
            2 => ErrorCode::CorruptMessage,
            3 => ErrorCode::UnknownTopicOrPartition,
            4 => ErrorCode::InvalidFetchSize,
            5 => ErrorCode::LeaderNotAvailable,
            6 => ErrorCode::NotLeaderForPartition,
            7 => ErrorCode::RequestTimedOut,
            8 => ErrorCode::BrokerNotAvailable,
            9 => ErrorCode::ReplicaNotAvailable,
            10 => ErrorCode::MessageTooLarge,
            11 => ErrorCode::StaleControllerEpoch,
            13 => ErrorCode::NetworkException,
            17 => ErrorCode::InvalidTopic,
            18 => ErrorCode::RecordBatchTooLarge,
            19 => ErrorCode::NotEnoughReplicas,
            20 => ErrorCode::NotEnoughReplicasAfterAppend,
            21 => ErrorCode::InvalidRequiredAcks,
            29 => ErrorCode::TopicAuthorizationFailed,
            31 => ErrorCode::ClusterAuthorizationFailed,
            32 => ErrorCode::InvalidTimestamp,
            35 => ErrorCode::UnsupportedVersion,
            41 => ErrorCode::NotController,
            42 => ErrorCode::InvalidRequest,
            43 => ErrorCode::UnsupportedForMessageFormat,
            44 => ErrorCode::PolicyViolation,
            56 => ErrorCode::KafkaStorageError,
            _ => ErrorCode::Unknown,
        }
    }

    pub fn code(&self) -> i16 {
        *self as i16
    }

    /// Leadership and availability codes. A retry against a freshly resolved
    /// leader may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::LeaderNotAvailable
                | ErrorCode::NotLeaderForPartition
                | ErrorCode::RequestTimedOut
                | ErrorCode::NetworkException
                | ErrorCode::BrokerNotAvailable
                | ErrorCode::ReplicaNotAvailable
                | ErrorCode::NotEnoughReplicas
                | ErrorCode::NotEnoughReplicasAfterAppend
                | ErrorCode::KafkaStorageError
        )
    }

    /// Codes that no amount of retrying fixes.
    pub fn is_permanent(&self) -> bool {
        *self != ErrorCode::None && !self.is_recoverable()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({}): {}", self, self.code(), self.message())
    }
}
