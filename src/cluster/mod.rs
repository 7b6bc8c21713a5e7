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

//! Cluster Module
//!
//! Broker discovery, metadata and partition leadership.
//!
//! # Architecture
//!
//! A [`Cluster`] owns a [`WorkerRuntime`] and everything that runs on it:
//! one multiplexed connection per broker, the metadata cache and the
//! partition recovery monitor. Producers and consumers built from the same
//! cluster share all of it.
//!
//! # Components
//!
//! - `Cluster`: bootstrap, metadata lookups, offsets, close
//! - `MetadataCache`: snapshot-swap view of brokers and topic leadership
//! - `PartitionRecoveryMonitor`: per-partition leader re-resolution with backoff
//! - `WorkerRuntime`: the dedicated I/O runtime

pub use client::{Cluster, ClusterState};
pub use metadata::{BrokerMeta, ClusterMetadata, PartitionMeta, TopicMeta};
pub use recovery::{PartitionState, PartitionStateChange};
pub use worker::WorkerRuntime;

pub(crate) use client::{unexpected_response, ClusterCore};
pub(crate) use recovery::PartitionRecoveryMonitor;

mod client;
mod metadata;
mod recovery;
mod worker;
