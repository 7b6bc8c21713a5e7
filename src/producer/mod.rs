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

//! Producer Module
//!
//! Non-blocking, batching producer with per-partition ordering.
//!
//! # Components
//!
//! - `Producer`: enqueue, connect and flush-on-close
//! - `ProducerEvent`: success, permanent error, recovery and resize notices
//! - `Partitioner` / `DefaultPartitioner`: partition choice for a message
//! - `PartitionQueue`: growable per-partition queue feeding a send loop

pub use partition_queue::QueueResizeInfo;
pub use partitioner::{DefaultPartitioner, PartitionStatus, Partitioner};
pub use pipeline::{Producer, ProducerEvent, ProducerEvents};

mod partition_queue;
mod partitioner;
mod pipeline;
