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

//! Message Module
//!
//! Application level messages, the magic 2 record batch format they travel
//! in, partition identities and per-partition offset maps.
//!
//! # Components
//!
//! - `Message` / `ReceivedMessage`: what producers accept and consumers deliver
//! - `RecordBatchBuilder` / `RecordBatch` / `MemoryRecords`: wire batches
//! - `TopicPartitionOffsets`: start, stop and checkpoint positions
//! - `OffsetCheckpointFile`: durable positions

pub use checkpoint::OffsetCheckpointFile;
pub use memory_records::MemoryRecords;
pub use offsets::{OffsetPosition, TopicPartitionOffsets};
pub use payload::{Message, ReceivedMessage};
pub use record::{Record, RecordHeader};
pub use record_batch::{RecordBatch, RecordBatchBuilder};
pub use topic_partition::TopicPartition;

mod checkpoint;
pub mod constants;
mod memory_records;
mod offsets;
mod payload;
mod record;
mod record_batch;
mod topic_partition;
