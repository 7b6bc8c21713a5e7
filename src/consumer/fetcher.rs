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
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::flow_control::FlowControl;
use crate::cluster::{unexpected_response, ClusterCore};
use crate::message::{MemoryRecords, ReceivedMessage, TopicPartition};
use crate::protocol::{
    ErrorCode, FetchRequest, PartitionFetchData, Request, Response, CONSUMER_REPLICA_ID,
};
use crate::service::{AppError, AppResult, ConsumerConfig};

/// Read committed is not needed without transactions.
const READ_UNCOMMITTED: i8 = 0;

/// What every fetch loop of one consumer shares.
#[derive(Debug)]
pub(crate) struct FetchContext {
    pub(crate) core: Arc<ClusterCore>,
    pub(crate) config: ConsumerConfig,
    pub(crate) topic: Arc<str>,
    pub(crate) messages_tx: async_channel::Sender<AppResult<ReceivedMessage>>,
    pub(crate) flow: Option<Arc<FlowControl>>,
    pub(crate) positions: Arc<DashMap<i32, i64>>,
    pub(crate) shutdown: CancellationToken,
}

impl FetchContext {
    /// `false` once every stream handle is gone.
    async fn deliver(&self, item: AppResult<ReceivedMessage>) -> bool {
        self.messages_tx.send(item).await.is_ok()
    }
}

struct FetchedChunk {
    messages: Vec<ReceivedMessage>,
    next_offset: i64,
}

/// Fetch loop of one partition.
///
/// Delivers offsets in `[start, stop)` in order. A recoverable error
/// re-resolves the leader and retries from the same cursor. Anything else
/// ends this partition with a `PartitionFailed` item; other partitions keep
/// going.
pub(crate) async fn run_partition_fetcher(
    context: Arc<FetchContext>,
    partition: i32,
    start: i64,
    stop: Option<i64>,
) {
    let topic_partition = TopicPartition::new(&*context.topic, partition);
    if start < 0 {
        warn!(%topic_partition, start, "invalid start offset");
        context
            .deliver(Err(AppError::partition_failed(
                &topic_partition,
                format!("invalid start offset {}", start),
            )))
            .await;
        return;
    }

    let mut cursor = start;
    context.positions.insert(partition, cursor);
    debug!(%topic_partition, start, ?stop, "partition fetcher started");

    loop {
        if stop.is_some_and(|stop| cursor >= stop) {
            info!(%topic_partition, cursor, "partition reached its stop offset");
            break;
        }
        if let Some(flow) = &context.flow {
            if !flow.is_open() {
                trace!(%topic_partition, "fetching paused by flow control");
                tokio::select! {
                    _ = context.shutdown.cancelled() => break,
                    _ = flow.wait_open() => {}
                }
            }
        }

        let result = tokio::select! {
            _ = context.shutdown.cancelled() => break,
            result = fetch_once(&context, &topic_partition, cursor) => result,
        };

        match result {
            Ok(chunk) => {
                let mut delivered = 0;
                let mut receiver_gone = false;
                for message in chunk.messages {
                    if stop.is_some_and(|stop| message.offset >= stop) {
                        break;
                    }
                    cursor = message.offset + 1;
                    delivered += 1;
                    if !context.deliver(Ok(message)).await {
                        receiver_gone = true;
                        break;
                    }
                }
                if let Some(flow) = &context.flow {
                    flow.on_delivered(delivered);
                }
                if receiver_gone {
                    debug!(%topic_partition, "message stream dropped, stopping fetcher");
                    break;
                }
                // control batches and records below the cursor still move it
                cursor = match stop {
                    Some(stop) => cursor.max(chunk.next_offset.min(stop)),
                    None => cursor.max(chunk.next_offset),
                };
                context.positions.insert(partition, cursor);
            }
            Err(_) if context.shutdown.is_cancelled() => break,
            Err(AppError::Broker(ErrorCode::OffsetOutOfRange)) => {
                warn!(%topic_partition, cursor, "fetch offset is out of range");
                context
                    .deliver(Err(AppError::partition_failed(
                        &topic_partition,
                        format!("offset {} is out of range", cursor),
                    )))
                    .await;
                break;
            }
            Err(error) if error.is_recoverable() => {
                debug!(%topic_partition, cursor, error = %error, "fetch failed, recovering partition");
                let recovered = tokio::select! {
                    _ = context.shutdown.cancelled() => break,
                    recovered = context.core.recover_partition(&topic_partition, &error) => recovered,
                };
                match recovered {
                    Ok(leader) => {
                        debug!(%topic_partition, leader = leader.id, cursor, "resuming fetch");
                    }
                    Err(_) if context.shutdown.is_cancelled() => break,
                    Err(error) => {
                        context.deliver(Err(error)).await;
                        break;
                    }
                }
            }
            Err(error) => {
                warn!(%topic_partition, cursor, error = %error, "partition fetch failed");
                context
                    .deliver(Err(AppError::partition_failed(
                        &topic_partition,
                        error.to_string(),
                    )))
                    .await;
                break;
            }
        }
    }
    trace!(%topic_partition, cursor, "partition fetcher stopped");
}

async fn fetch_once(
    context: &FetchContext,
    topic_partition: &TopicPartition,
    cursor: i64,
) -> AppResult<FetchedChunk> {
    let connection = context.core.leader_connection(topic_partition).await?;
    let config = &context.config;
    let request = FetchRequest {
        replica_id: CONSUMER_REPLICA_ID,
        max_wait_ms: config.max_wait_time_ms,
        min_bytes: config.min_bytes_per_fetch,
        max_bytes: config.max_bytes_per_fetch,
        isolation_level: READ_UNCOMMITTED,
        fetch_data: BTreeMap::from([(
            topic_partition.clone(),
            PartitionFetchData {
                fetch_offset: cursor,
                log_start_offset: -1,
                max_bytes: config.max_bytes_per_fetch,
            },
        )]),
    };
    let mut response = match connection.send(Request::Fetch(request)).await? {
        Response::Fetch(response) => response,
        other => return Err(unexpected_response("fetch", &other)),
    };
    let data = response.responses.remove(topic_partition).ok_or_else(|| {
        AppError::MalformedProtocol(format!("fetch response is missing {}", topic_partition))
    })?;
    if data.error_code != ErrorCode::None {
        return Err(AppError::Broker(data.error_code));
    }

    let mut chunk = FetchedChunk {
        messages: Vec::new(),
        next_offset: cursor,
    };
    for batch in MemoryRecords::new(data.records) {
        let batch = batch?;
        if batch.last_offset() < cursor {
            continue;
        }
        if !batch.is_control() {
            for record in batch.records()? {
                let offset = batch.base_offset() + record.offset_delta as i64;
                if offset < cursor {
                    continue;
                }
                chunk.messages.push(ReceivedMessage {
                    topic: context.topic.clone(),
                    partition: topic_partition.partition,
                    offset,
                    timestamp: batch.base_timestamp() + record.timestamp_delta,
                    key: record.key,
                    value: record.value.unwrap_or_default(),
                });
            }
        }
        chunk.next_offset = chunk.next_offset.max(batch.last_offset() + 1);
    }
    trace!(
        %topic_partition,
        cursor,
        messages = chunk.messages.len(),
        high_watermark = data.high_watermark,
        "fetched"
    );
    Ok(chunk)
}
