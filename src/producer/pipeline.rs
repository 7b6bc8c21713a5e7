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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::partition_queue::PartitionQueue;
use super::{DefaultPartitioner, PartitionStatus, Partitioner, QueueResizeInfo};
use crate::cluster::{unexpected_response, Cluster, ClusterCore, PartitionRecoveryMonitor};
use crate::message::{Message, RecordBatchBuilder, TopicPartition};
use crate::protocol::{ErrorCode, ProduceRequest, Request, Response};
use crate::service::{AppError, AppResult, CompressionType, ProducerConfig};

/// Time allowed for partition loops to stop after a forced shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Outcome notifications of a [`Producer`], in the order they happened per
/// partition.
#[derive(Debug)]
pub enum ProducerEvent {
    /// a batch was acknowledged
    Success(Vec<Message>),
    /// messages were dropped and will not be retried
    PermanentError {
        error: AppError,
        messages: Vec<Message>,
    },
    /// a send failed and the partition is recovering; the batch is kept
    TemporaryError {
        topic: String,
        partition: i32,
        error: AppError,
    },
    QueueResized(QueueResizeInfo),
    /// messages still queued when `close` gave up
    ShutdownDirty(Vec<Message>),
}

pub type ProducerEvents = mpsc::UnboundedReceiver<ProducerEvent>;

/// Batching producer bound to one topic.
///
/// `send` only enqueues. One loop per partition, running on the cluster
/// worker, cuts batches by linger time, message count or byte size and
/// ships them to the partition leader, one request in flight at a time.
/// Outcomes arrive on [`ProducerEvents`].
#[derive(Debug)]
pub struct Producer {
    cluster: Cluster,
    config: ProducerConfig,
    partitioner: Arc<dyn Partitioner>,
    events_tx: mpsc::UnboundedSender<ProducerEvent>,
    state: OnceLock<ProducerState>,
    closed: AtomicBool,
}

#[derive(Debug)]
struct ProducerState {
    /// sorted by partition id
    queues: Vec<Arc<PartitionQueue>>,
    closing: CancellationToken,
    shutdown: CancellationToken,
    workers: Mutex<Vec<Worker>>,
}

#[derive(Debug)]
struct Worker {
    partition: i32,
    handle: JoinHandle<()>,
}

impl ProducerState {
    fn queue(&self, partition: i32) -> Option<&Arc<PartitionQueue>> {
        self.queues
            .binary_search_by_key(&partition, |q| q.partition())
            .ok()
            .map(|index| &self.queues[index])
    }
}

impl Producer {
    pub fn new(cluster: Cluster, config: ProducerConfig) -> (Producer, ProducerEvents) {
        Producer::with_partitioner(cluster, config, Arc::new(DefaultPartitioner::default()))
    }

    pub fn with_partitioner(
        cluster: Cluster,
        config: ProducerConfig,
        partitioner: Arc<dyn Partitioner>,
    ) -> (Producer, ProducerEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let producer = Producer {
            cluster,
            config,
            partitioner,
            events_tx,
            state: OnceLock::new(),
            closed: AtomicBool::new(false),
        };
        (producer, events_rx)
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Resolves the topic's partitions and starts one send loop per
    /// partition. The cluster must be connected.
    pub async fn connect(&self) -> AppResult<()> {
        self.config.validate()?;
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::ProducerClosed);
        }
        if self.state.get().is_some() {
            return Ok(());
        }
        let meta = self
            .cluster
            .get_or_fetch_meta_for_topic(&self.config.topic)
            .await?;

        let core = self.cluster.core().clone();
        let closing = CancellationToken::new();
        let shutdown = core.shutdown_token().child_token();
        let context = Arc::new(SenderContext {
            core,
            config: self.config.clone(),
            events_tx: self.events_tx.clone(),
            closing: closing.clone(),
            shutdown: shutdown.clone(),
        });

        let mut queues = Vec::with_capacity(meta.partition_count());
        let mut workers = Vec::with_capacity(meta.partition_count());
        for partition in meta.partition_ids() {
            let queue = Arc::new(PartitionQueue::new(
                partition,
                self.config.initial_queue_size,
                self.config.batch_flush_size,
            ));
            let handle = self
                .cluster
                .worker()
                .spawn(run_partition_sender(context.clone(), queue.clone()));
            queues.push(queue);
            workers.push(Worker { partition, handle });
        }
        let state = ProducerState {
            queues,
            closing,
            shutdown,
            workers: Mutex::new(workers),
        };

        if let Err(raced) = self.state.set(state) {
            // another connect won
            raced.shutdown.cancel();
            return Ok(());
        }
        info!(
            topic = %self.config.topic,
            partitions = meta.partition_count(),
            "producer connected"
        );
        Ok(())
    }

    /// Enqueues a message without blocking.
    ///
    /// Fails only when the producer is not connected, is closed, or the
    /// message names a partition the topic does not have.
    pub fn send(&self, message: Message) -> AppResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::ProducerClosed);
        }
        let state = self
            .state
            .get()
            .ok_or_else(|| AppError::NotConnected("producer is not connected".to_string()))?;

        let partition = match message.partition {
            Some(partition) => partition,
            None => {
                let statuses: Vec<PartitionStatus> = state
                    .queues
                    .iter()
                    .map(|q| PartitionStatus {
                        partition: q.partition(),
                        recovering: q.is_recovering(),
                    })
                    .collect();
                self.partitioner
                    .partition(message.key.as_deref(), &statuses)
            }
        };
        let queue = state.queue(partition).ok_or_else(|| {
            AppError::InvalidValue(format!(
                "topic {} has no partition {}",
                self.config.topic, partition
            ))
        })?;

        if let Some((old_capacity, new_capacity)) = queue.push(message) {
            debug!(
                topic = %self.config.topic,
                partition,
                old_capacity,
                new_capacity,
                "partition queue resized"
            );
            let _ = self
                .events_tx
                .send(ProducerEvent::QueueResized(QueueResizeInfo {
                    topic: self.config.topic.clone(),
                    partition,
                    old_capacity,
                    new_capacity,
                }));
        }
        Ok(())
    }

    pub fn partition_count(&self) -> usize {
        self.state.get().map_or(0, |state| state.queues.len())
    }

    /// Queued, not yet sent, messages per partition.
    pub fn queue_sizes(&self) -> BTreeMap<i32, usize> {
        self.state.get().map_or_else(BTreeMap::new, |state| {
            state
                .queues
                .iter()
                .map(|q| (q.partition(), q.len()))
                .collect()
        })
    }

    /// Stops accepting messages and flushes what is queued.
    ///
    /// When `timeout` elapses first, the loops are stopped, the leftovers are
    /// reported as [`ProducerEvent::ShutdownDirty`] and
    /// [`AppError::FlushTimeoutExceeded`] is returned.
    pub async fn close(&self, timeout: Duration) -> AppResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let Some(state) = self.state.get() else {
            return Ok(());
        };
        info!(topic = %self.config.topic, timeout_ms = timeout.as_millis() as u64, "closing producer");
        state.closing.cancel();

        let mut workers: Vec<Worker> = state.workers.lock().drain(..).collect();
        let flushed = time::timeout(timeout, async {
            for worker in workers.iter_mut() {
                let _ = (&mut worker.handle).await;
            }
        })
        .await
        .is_ok();

        state.shutdown.cancel();
        if flushed {
            info!(topic = %self.config.topic, "producer closed, all messages flushed");
            return Ok(());
        }

        let _ = time::timeout(SHUTDOWN_GRACE, async {
            for worker in workers.iter_mut() {
                if let Err(e) = (&mut worker.handle).await {
                    debug!(partition = worker.partition, error = %e, "partition sender ended abnormally");
                }
            }
        })
        .await;

        let unflushed: Vec<Message> = state.queues.iter().flat_map(|q| q.drain()).collect();
        if unflushed.is_empty() {
            return Ok(());
        }
        let count = unflushed.len();
        warn!(topic = %self.config.topic, unflushed = count, "flush timed out, dropping queued messages");
        let _ = self.events_tx.send(ProducerEvent::ShutdownDirty(unflushed));
        Err(AppError::FlushTimeoutExceeded { unflushed: count })
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if let Some(state) = self.state.get() {
            state.shutdown.cancel();
        }
    }
}

/// What every partition loop of one producer shares.
#[derive(Debug)]
struct SenderContext {
    core: Arc<ClusterCore>,
    config: ProducerConfig,
    events_tx: mpsc::UnboundedSender<ProducerEvent>,
    /// flush what is queued, then stop
    closing: CancellationToken,
    /// stop now
    shutdown: CancellationToken,
}

impl SenderContext {
    fn emit(&self, event: ProducerEvent) {
        // the caller may have dropped the events receiver
        let _ = self.events_tx.send(event);
    }
}

async fn run_partition_sender(context: Arc<SenderContext>, queue: Arc<PartitionQueue>) {
    let topic_partition = TopicPartition::new(context.config.topic.as_str(), queue.partition());
    let linger = context.config.batch_flush_time();
    trace!(%topic_partition, "partition sender started");

    loop {
        if context.shutdown.is_cancelled() {
            break;
        }
        if queue.is_empty() {
            if context.closing.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = context.shutdown.cancelled() => break,
                _ = context.closing.cancelled() => {}
                _ = queue.data_ready() => {}
            }
            continue;
        }

        if !context.closing.is_cancelled() && !queue.is_batch_full() {
            tokio::select! {
                _ = context.shutdown.cancelled() => break,
                _ = context.closing.cancelled() => {}
                _ = queue.batch_ready() => {}
                _ = time::sleep(linger) => {}
            }
        }

        let batch = queue.take_batch(context.config.batch_flush_size, context.config.max_batch_bytes);
        if batch.is_empty() {
            continue;
        }
        if batch.len() == 1 && batch[0].size() > context.config.max_batch_bytes {
            let error = AppError::MessageTooLarge(format!(
                "message of {} bytes exceeds max_batch_bytes {}",
                batch[0].size(),
                context.config.max_batch_bytes
            ));
            warn!(%topic_partition, error = %error, "dropping message");
            context.emit(ProducerEvent::PermanentError {
                error,
                messages: batch,
            });
            continue;
        }

        let result = tokio::select! {
            _ = context.shutdown.cancelled() => {
                queue.requeue_front(batch);
                break;
            }
            result = send_batch(&context, &topic_partition, &batch) => result,
        };

        match result {
            Ok(()) => {
                trace!(%topic_partition, messages = batch.len(), "batch acknowledged");
                context.emit(ProducerEvent::Success(batch));
            }
            Err(_) if context.shutdown.is_cancelled() => {
                queue.requeue_front(batch);
                break;
            }
            Err(error) if error.is_recoverable() => {
                queue.requeue_front(batch);
                queue.set_recovering(true);
                debug!(%topic_partition, error = %error, "send failed, recovering partition");
                let verdict_rx = context
                    .core
                    .recovery()
                    .begin(&context.core, &topic_partition, &error);
                context.emit(ProducerEvent::TemporaryError {
                    topic: topic_partition.topic.clone(),
                    partition: topic_partition.partition,
                    error,
                });

                let verdict = tokio::select! {
                    _ = context.shutdown.cancelled() => break,
                    verdict = PartitionRecoveryMonitor::verdict(&context.core, &topic_partition, verdict_rx) => verdict,
                };
                queue.set_recovering(false);
                match verdict {
                    Ok(leader) => {
                        debug!(%topic_partition, leader = leader.id, "resuming sends");
                    }
                    Err(_) if context.shutdown.is_cancelled() => break,
                    Err(error) => {
                        let messages = queue.drain();
                        error!(
                            %topic_partition,
                            dropped = messages.len(),
                            error = %error,
                            "partition failed, dropping queued messages"
                        );
                        context.emit(ProducerEvent::PermanentError { error, messages });
                    }
                }
            }
            Err(error) => {
                warn!(
                    %topic_partition,
                    messages = batch.len(),
                    error = %error,
                    "permanent produce error, dropping batch"
                );
                context.emit(ProducerEvent::PermanentError {
                    error,
                    messages: batch,
                });
            }
        }
    }
    trace!(%topic_partition, remaining = queue.len(), "partition sender stopped");
}

async fn send_batch(
    context: &SenderContext,
    topic_partition: &TopicPartition,
    batch: &[Message],
) -> AppResult<()> {
    if context.config.compression != CompressionType::None {
        return Err(AppError::UnsupportedCompression(format!(
            "{:?} producer compression",
            context.config.compression
        )));
    }
    let connection = context.core.leader_connection(topic_partition).await?;

    let mut builder = RecordBatchBuilder::new(0);
    let timestamp = chrono::Utc::now().timestamp_millis();
    for message in batch {
        builder.append(message.key.as_deref(), &message.value, timestamp);
    }
    let records = builder.build()?;

    let request = ProduceRequest {
        required_acks: context.config.required_acks,
        timeout_ms: context.config.produce_timeout_ms,
        partition_data: BTreeMap::from([(topic_partition.clone(), records.into_bytes())]),
    };
    let mut response = match connection.send(Request::Produce(request)).await? {
        Response::Produce(response) => response,
        other => return Err(unexpected_response("produce", &other)),
    };
    if context.config.required_acks == 0 {
        return Ok(());
    }
    let partition_response = response.responses.remove(topic_partition).ok_or_else(|| {
        AppError::MalformedProtocol(format!("produce response is missing {}", topic_partition))
    })?;
    match partition_response.error_code {
        ErrorCode::None => Ok(()),
        code => Err(AppError::Broker(code)),
    }
}
