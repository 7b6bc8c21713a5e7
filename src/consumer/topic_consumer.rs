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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fetcher::{run_partition_fetcher, FetchContext};
use super::flow_control::FlowControl;
use crate::cluster::Cluster;
use crate::message::{OffsetPosition, ReceivedMessage, TopicPartition, TopicPartitionOffsets};
use crate::service::{AppError, AppResult, ConsumerConfig, StartPosition, StopPosition};

/// Messages of every consumed partition, interleaved.
///
/// Ends once every partition loop has finished, either at its stop offset,
/// after a partition failure, or because the consumer closed. Clones share
/// one queue, each message goes to exactly one reader.
#[derive(Debug, Clone)]
pub struct MessageStream {
    messages_rx: async_channel::Receiver<AppResult<ReceivedMessage>>,
}

impl MessageStream {
    /// Next message or partition failure, `None` when the stream ended.
    pub async fn next(&self) -> Option<AppResult<ReceivedMessage>> {
        self.messages_rx.recv().await.ok()
    }

    pub fn try_next(&self) -> Option<AppResult<ReceivedMessage>> {
        self.messages_rx.try_recv().ok()
    }

    /// Delivered but not yet read.
    pub fn len(&self) -> usize {
        self.messages_rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages_rx.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.messages_rx.is_closed() && self.messages_rx.is_empty()
    }
}

/// Consumer of one topic, one fetch loop per partition.
#[derive(Debug)]
pub struct Consumer {
    cluster: Cluster,
    config: ConsumerConfig,
    flow: Option<Arc<FlowControl>>,
    positions: Arc<DashMap<i32, i64>>,
    shutdown: CancellationToken,
    fetchers: Mutex<Vec<JoinHandle<()>>>,
    subscribed: AtomicBool,
}

impl Consumer {
    pub fn new(cluster: Cluster, config: ConsumerConfig) -> Consumer {
        let flow = config
            .use_flow_control
            .then(|| Arc::new(FlowControl::new(config.low_watermark, config.high_watermark)));
        let shutdown = cluster.core().shutdown_token().child_token();
        Consumer {
            cluster,
            config,
            flow,
            positions: Arc::new(DashMap::new()),
            shutdown,
            fetchers: Mutex::new(Vec::new()),
            subscribed: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Resolves start and stop offsets and starts the partition loops.
    ///
    /// Explicit start offsets consume only the partitions they list. May be
    /// called once per consumer.
    pub async fn subscribe(&self) -> AppResult<MessageStream> {
        self.config.validate()?;
        if self.subscribed.swap(true, Ordering::AcqRel) {
            return Err(AppError::IllegalStateError(format!(
                "consumer of {} is already subscribed",
                self.config.topic
            )));
        }
        let topic = self.config.topic.as_str();
        let meta = self.cluster.get_or_fetch_meta_for_topic(topic).await?;

        let start = match &self.config.start_position {
            StartPosition::Offsets(offsets) => {
                self.check_topic(offsets)?;
                offsets.clone()
            }
            StartPosition::TopicStart => {
                self.cluster
                    .fetch_partition_offsets(topic, OffsetPosition::Earliest)
                    .await?
            }
            StartPosition::TopicEnd => {
                self.cluster
                    .fetch_partition_offsets(topic, OffsetPosition::Latest)
                    .await?
            }
        };
        let stop = match &self.config.stop_position {
            StopPosition::Never => None,
            StopPosition::TopicEnd => Some(
                self.cluster
                    .fetch_partition_offsets(topic, OffsetPosition::Latest)
                    .await?,
            ),
            StopPosition::Offsets(offsets) => {
                self.check_topic(offsets)?;
                Some(offsets.clone())
            }
        };

        let (messages_tx, messages_rx) = async_channel::unbounded();
        let context = Arc::new(FetchContext {
            core: self.cluster.core().clone(),
            config: self.config.clone(),
            topic: Arc::from(topic),
            messages_tx,
            flow: self.flow.clone(),
            positions: self.positions.clone(),
            shutdown: self.shutdown.clone(),
        });

        let mut fetchers = self.fetchers.lock();
        for (partition, start_offset) in start.iter() {
            if meta.partition(partition).is_none() {
                warn!(topic, partition, "start offsets name a partition the topic does not have");
                let failed = AppError::partition_failed(
                    &TopicPartition::new(topic, partition),
                    "partition does not exist",
                );
                let _ = context.messages_tx.try_send(Err(failed));
                continue;
            }
            let stop_offset = stop.as_ref().and_then(|stop| stop.next_offset(partition));
            fetchers.push(self.cluster.worker().spawn(run_partition_fetcher(
                context.clone(),
                partition,
                start_offset,
                stop_offset,
            )));
        }
        info!(
            topic,
            partitions = fetchers.len(),
            start = %start,
            stop = %stop.as_ref().map_or_else(|| "never".to_string(), |s| s.to_string()),
            "consumer subscribed"
        );
        Ok(MessageStream { messages_rx })
    }

    /// Acknowledges processed messages, reopening a paused flow.
    pub fn ack(&self, count: usize) {
        if let Some(flow) = &self.flow {
            flow.ack(count);
        }
    }

    /// Delivered messages not yet acknowledged, 0 without flow control.
    pub fn unacked(&self) -> usize {
        self.flow.as_ref().map_or(0, |flow| flow.unacked())
    }

    /// Next offset to fetch for every partition, suitable for a checkpoint.
    pub fn positions(&self) -> TopicPartitionOffsets {
        TopicPartitionOffsets::from_map(
            self.config.topic.as_str(),
            self.positions.iter().map(|entry| (*entry.key(), *entry.value())),
        )
    }

    /// Stops every partition loop. Delivered messages stay delivered.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let fetchers: Vec<JoinHandle<()>> = self.fetchers.lock().drain(..).collect();
        for fetcher in fetchers {
            if let Err(e) = fetcher.await {
                debug!(error = %e, "partition fetcher ended abnormally");
            }
        }
        info!(topic = %self.config.topic, "consumer closed");
    }

    fn check_topic(&self, offsets: &TopicPartitionOffsets) -> AppResult<()> {
        if offsets.topic() != self.config.topic {
            return Err(AppError::InvalidValue(format!(
                "offsets for topic {} given to a consumer of {}",
                offsets.topic(),
                self.config.topic
            )));
        }
        Ok(())
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
