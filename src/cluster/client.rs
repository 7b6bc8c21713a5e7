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

use std::collections::{BTreeMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{self, Instant};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::metadata::{MetadataCache, MetadataUpdate};
use super::recovery::PartitionRecoveryMonitor;
use super::{BrokerMeta, PartitionStateChange, TopicMeta, WorkerRuntime};
use crate::message::{OffsetPosition, TopicPartition, TopicPartitionOffsets};
use crate::network::{BrokerConnection, CloseReason};
use crate::protocol::{
    Codec, ErrorCode, KafkaCodec, ListOffsetsPartitionResponse, ListOffsetsRequest,
    MetadataRequest, MetadataResponse, Request, Response, CONSUMER_REPLICA_ID,
};
use crate::service::{AppError, AppResult, ClusterConfig};

const NEW_BROKER_CAPACITY: usize = 64;
const CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

type ConnectionSlot = Arc<Mutex<Option<Arc<BrokerConnection>>>>;

/// Shared handle to a broker cluster.
///
/// Owns the metadata cache, one connection per broker, the partition
/// recovery monitor and the worker runtime all of them run on. Clones share
/// everything, and producers and consumers built from the same `Cluster`
/// share its connections.
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<ClusterInner>,
}

struct ClusterInner {
    core: Arc<ClusterCore>,
    worker: WorkerRuntime,
}

impl Drop for ClusterInner {
    fn drop(&mut self) {
        self.core.shutdown.cancel();
    }
}

impl Debug for Cluster {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("seeds", &self.inner.core.seeds)
            .field("state", &self.state())
            .finish()
    }
}

impl Cluster {
    pub fn new(config: ClusterConfig) -> AppResult<Cluster> {
        Cluster::with_codec(config, Arc::new(KafkaCodec))
    }

    pub fn with_codec(config: ClusterConfig, codec: Arc<dyn Codec>) -> AppResult<Cluster> {
        let seeds = config.seed_addresses()?;
        let worker = WorkerRuntime::new(config.io_threads)?;
        let (new_brokers_tx, _) = broadcast::channel(NEW_BROKER_CAPACITY);
        let core = Arc::new(ClusterCore {
            handle: worker.handle().clone(),
            config,
            codec,
            seeds,
            metadata: MetadataCache::default(),
            connections: DashMap::new(),
            refresh_lock: Mutex::new(()),
            new_brokers_tx,
            recovery: PartitionRecoveryMonitor::new(),
            state: RwLock::new(ClusterState::Disconnected),
            shutdown: CancellationToken::new(),
        });
        Ok(Cluster {
            inner: Arc::new(ClusterInner { core, worker }),
        })
    }

    pub(crate) fn core(&self) -> &Arc<ClusterCore> {
        &self.inner.core
    }

    pub fn worker(&self) -> &WorkerRuntime {
        &self.inner.worker
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.inner.core.config
    }

    pub fn state(&self) -> ClusterState {
        *self.inner.core.state.read()
    }

    /// Bootstraps from the seed brokers.
    ///
    /// Seeds are tried in random order; an unreachable seed is logged and
    /// skipped. Fails with [`AppError::BrokerUnreachable`] only when no seed
    /// answers.
    pub async fn connect(&self) -> AppResult<()> {
        {
            let mut state = self.inner.core.state.write();
            match *state {
                ClusterState::Connected => return Ok(()),
                ClusterState::Closing | ClusterState::Closed => {
                    return Err(AppError::IllegalStateError(
                        "cluster is closed".to_string(),
                    ))
                }
                _ => *state = ClusterState::Connecting,
            }
        }
        let core = self.inner.core.clone();
        let result = self.inner.worker.run(async move { core.bootstrap().await }).await;

        let mut state = self.inner.core.state.write();
        if *state == ClusterState::Connecting {
            *state = if result.is_ok() {
                ClusterState::Connected
            } else {
                ClusterState::Disconnected
            };
        }
        result
    }

    pub async fn get_or_fetch_meta_for_topic(&self, topic: &str) -> AppResult<Arc<TopicMeta>> {
        self.ensure_connected()?;
        let core = self.inner.core.clone();
        let topic = topic.to_string();
        self.inner
            .worker
            .run(async move { core.get_or_fetch_meta_for_topic(&topic).await })
            .await
    }

    /// Forces a metadata refresh for `topic`.
    pub async fn refresh_topic(&self, topic: &str) -> AppResult<Arc<TopicMeta>> {
        self.ensure_connected()?;
        let core = self.inner.core.clone();
        let topic = topic.to_string();
        self.inner
            .worker
            .run(async move { core.refresh_topic(&topic).await })
            .await
    }

    /// Head or tail offset of every partition of `topic`.
    pub async fn fetch_partition_offsets(
        &self,
        topic: &str,
        position: OffsetPosition,
    ) -> AppResult<TopicPartitionOffsets> {
        self.ensure_connected()?;
        let core = self.inner.core.clone();
        let topic = topic.to_string();
        self.inner
            .worker
            .run(async move { core.fetch_partition_offsets(&topic, position).await })
            .await
    }

    /// Cached leader of a partition, `None` when not known yet.
    pub fn find_broker_meta_for_partition(&self, topic: &str, partition: i32) -> Option<BrokerMeta> {
        self.inner
            .core
            .metadata
            .snapshot()
            .leader_for(&TopicPartition::new(topic, partition))
            .cloned()
    }

    pub fn brokers(&self) -> Vec<BrokerMeta> {
        self.inner.core.metadata.brokers()
    }

    /// Brokers seen for the first time from now on. Late subscribers do not
    /// see earlier discoveries.
    pub fn new_brokers(&self) -> broadcast::Receiver<BrokerMeta> {
        self.inner.core.new_brokers_tx.subscribe()
    }

    pub fn partition_state_changes(&self) -> broadcast::Receiver<PartitionStateChange> {
        self.inner.core.recovery.subscribe()
    }

    /// [`partition_state_changes`](Self::partition_state_changes) as a stream.
    pub fn partition_state_stream(&self) -> BroadcastStream<PartitionStateChange> {
        BroadcastStream::new(self.partition_state_changes())
    }

    pub fn is_recovering(&self, topic: &str, partition: i32) -> bool {
        self.inner
            .core
            .recovery
            .is_recovering(&TopicPartition::new(topic, partition))
    }

    /// Reports a delivery failure without waiting for the outcome.
    pub fn report_partition_error(&self, topic: &str, partition: i32, error: &AppError) {
        let topic_partition = TopicPartition::new(topic, partition);
        self.inner
            .core
            .recovery
            .begin(&self.inner.core, &topic_partition, error);
    }

    /// Reports a delivery failure and waits for the partition's new leader.
    pub async fn recover_partition(
        &self,
        topic: &str,
        partition: i32,
        error: &AppError,
    ) -> AppResult<BrokerMeta> {
        self.inner
            .core
            .recover_partition(&TopicPartition::new(topic, partition), error)
            .await
    }

    pub async fn connection_for_broker(&self, broker_id: i32) -> AppResult<Arc<BrokerConnection>> {
        self.ensure_connected()?;
        let core = self.inner.core.clone();
        self.inner
            .worker
            .run(async move { core.connection_for_broker(broker_id).await })
            .await
    }

    /// Requests queued or awaiting a response on any broker connection.
    pub fn in_flight_requests(&self) -> usize {
        self.inner.core.in_flight_requests()
    }

    /// Closes every broker connection and stops the worker.
    ///
    /// In-flight requests get until `timeout` to complete. Whatever is still
    /// pending afterwards fails with [`AppError::CancelledOnClose`].
    pub async fn close(&self, timeout: Duration) -> AppResult<()> {
        {
            let mut state = self.inner.core.state.write();
            if matches!(*state, ClusterState::Closing | ClusterState::Closed) {
                return Ok(());
            }
            *state = ClusterState::Closing;
        }
        info!(timeout_ms = timeout.as_millis() as u64, "closing cluster");

        let core = self.inner.core.clone();
        let drained = self
            .inner
            .worker
            .run(async move {
                let deadline = Instant::now() + timeout;
                while core.in_flight_requests() > 0 && Instant::now() < deadline {
                    time::sleep(CLOSE_POLL_INTERVAL).await;
                }
                let abandoned = core.in_flight_requests();
                core.shutdown.cancel();
                let connections = core.live_connections();
                for connection in &connections {
                    connection.close(CloseReason::ClientClosing);
                }
                // let connection tasks fail their callers before the worker stops
                for connection in &connections {
                    let _ = time::timeout(Duration::from_secs(1), connection.closed()).await;
                }
                Ok(abandoned)
            })
            .await;
        self.inner.core.shutdown.cancel();
        self.inner.worker.shutdown();
        *self.inner.core.state.write() = ClusterState::Closed;

        match drained {
            Ok(0) => info!("cluster closed"),
            Ok(abandoned) => warn!(abandoned, "cluster closed with requests still in flight"),
            Err(e) => warn!(error = %e, "cluster close did not finish cleanly"),
        }
        Ok(())
    }

    fn ensure_connected(&self) -> AppResult<()> {
        match self.state() {
            ClusterState::Connected => Ok(()),
            ClusterState::Closing | ClusterState::Closed => Err(AppError::CancelledOnClose),
            state => Err(AppError::NotConnected(format!("cluster is {:?}", state))),
        }
    }
}

/// Everything the worker tasks need, without the runtime itself, so the
/// last user handle is never dropped on a worker thread.
pub(crate) struct ClusterCore {
    config: ClusterConfig,
    codec: Arc<dyn Codec>,
    seeds: Vec<String>,
    metadata: MetadataCache,
    connections: DashMap<i32, ConnectionSlot>,
    refresh_lock: Mutex<()>,
    new_brokers_tx: broadcast::Sender<BrokerMeta>,
    recovery: PartitionRecoveryMonitor,
    state: RwLock<ClusterState>,
    shutdown: CancellationToken,
    handle: Handle,
}

impl Debug for ClusterCore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCore")
            .field("seeds", &self.seeds)
            .field("brokers", &self.connections.len())
            .finish()
    }
}

impl ClusterCore {
    pub(crate) fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn recovery(&self) -> &PartitionRecoveryMonitor {
        &self.recovery
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn in_flight_requests(&self) -> usize {
        self.live_connections().iter().map(|c| c.in_flight()).sum()
    }

    fn live_connections(&self) -> Vec<Arc<BrokerConnection>> {
        self.connections
            .iter()
            .filter_map(|slot| {
                slot.value()
                    .try_lock()
                    .ok()
                    .and_then(|guard| guard.clone())
            })
            .filter(|connection| !connection.is_closed())
            .collect()
    }

    fn has_live_connection(&self, broker_id: i32) -> bool {
        self.connections.get(&broker_id).is_some_and(|slot| {
            slot.try_lock()
                .is_ok_and(|guard| guard.as_ref().is_some_and(|c| !c.is_closed()))
        })
    }

    async fn bootstrap(self: &Arc<Self>) -> AppResult<()> {
        let mut seeds = self.seeds.clone();
        seeds.shuffle(&mut rand::thread_rng());

        let mut failures = Vec::with_capacity(seeds.len());
        for seed in &seeds {
            match self.metadata_from_seed(seed, Some(vec![])).await {
                Ok(response) => {
                    info!(seed = %seed, brokers = response.brokers.len(), "bootstrapped from seed broker");
                    self.establish_first_connection().await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(seed = %seed, error = %e, "seed broker unreachable, trying the next one");
                    failures.push(format!("{}: {}", seed, e));
                }
            }
        }
        Err(AppError::BrokerUnreachable(format!(
            "none of the seed brokers answered: {}",
            failures.join("; ")
        )))
    }

    async fn establish_first_connection(&self) {
        let mut brokers = self.metadata.brokers();
        brokers.sort_by_key(|b| b.id);
        for broker in brokers {
            match self.connection_for_broker(broker.id).await {
                Ok(_) => return,
                Err(e) => debug!(broker_id = broker.id, error = %e, "broker not reachable yet"),
            }
        }
        warn!("no advertised broker is reachable, connections will be retried on demand");
    }

    /// Asks a seed through a short lived connection.
    async fn metadata_from_seed(
        &self,
        seed: &str,
        topics: Option<Vec<String>>,
    ) -> AppResult<MetadataResponse> {
        let (host, port) = seed
            .rsplit_once(':')
            .and_then(|(host, port)| port.parse::<i32>().ok().map(|port| (host, port)))
            .ok_or_else(|| AppError::InvalidValue(format!("invalid seed address '{}'", seed)))?;
        let connection =
            BrokerConnection::connect(BrokerMeta::new(-1, host, port), self.codec.clone(), &self.config)
                .await?;
        let response = request_metadata(&connection, topics).await;
        connection.close(CloseReason::Requested);
        let response = response?;
        self.apply_metadata(&response);
        Ok(response)
    }

    fn apply_metadata(&self, response: &MetadataResponse) -> MetadataUpdate {
        let update = self.metadata.apply(response);
        for broker in &update.new_brokers {
            info!(broker_id = broker.id, address = %broker.address(), "new broker discovered");
            let _ = self.new_brokers_tx.send(broker.clone());
        }
        for (topic, code) in &update.topic_errors {
            debug!(topic, error = ?code, "metadata reports a topic error");
        }
        update
    }

    /// One metadata round trip against any reachable broker.
    ///
    /// Known brokers are tried first, the ones with a live connection ahead
    /// of the rest, then the seeds. Refreshes are serialized so each one
    /// publishes a whole snapshot.
    async fn refresh_metadata(&self, topics: Vec<String>) -> AppResult<MetadataResponse> {
        let _guard = self.refresh_lock.lock().await;
        if self.is_shutting_down() {
            return Err(AppError::CancelledOnClose);
        }

        let mut brokers = self.metadata.brokers();
        brokers.shuffle(&mut rand::thread_rng());
        brokers.sort_by_key(|b| !self.has_live_connection(b.id));

        let mut failures = Vec::new();
        for broker in brokers {
            let attempt = match self.connection_for_broker(broker.id).await {
                Ok(connection) => request_metadata(&connection, Some(topics.clone())).await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(response) => {
                    trace!(broker_id = broker.id, ?topics, "metadata refreshed");
                    self.apply_metadata(&response);
                    return Ok(response);
                }
                Err(AppError::CancelledOnClose) => return Err(AppError::CancelledOnClose),
                Err(e) => {
                    debug!(broker_id = broker.id, error = %e, "metadata request failed");
                    failures.push(format!("broker {}: {}", broker.id, e));
                }
            }
        }

        let mut seeds = self.seeds.clone();
        seeds.shuffle(&mut rand::thread_rng());
        for seed in &seeds {
            match self.metadata_from_seed(seed, Some(topics.clone())).await {
                Ok(response) => return Ok(response),
                Err(e) => failures.push(format!("{}: {}", seed, e)),
            }
        }
        Err(AppError::BrokerUnreachable(failures.join("; ")))
    }

    pub(crate) async fn refresh_topic(&self, topic: &str) -> AppResult<Arc<TopicMeta>> {
        let response = self.refresh_metadata(vec![topic.to_string()]).await?;
        let error_code = response
            .topics
            .iter()
            .find(|t| t.name == topic)
            .map(|t| t.error_code)
            .ok_or_else(|| {
                AppError::MalformedProtocol(format!("metadata response is missing topic {}", topic))
            })?;
        match error_code {
            ErrorCode::None => self
                .metadata
                .topic(topic)
                .ok_or_else(|| AppError::UnknownTopic(topic.to_string())),
            ErrorCode::UnknownTopicOrPartition => Err(AppError::UnknownTopic(topic.to_string())),
            code => Err(AppError::Broker(code)),
        }
    }

    /// Cached topic metadata, fetched when missing.
    ///
    /// A topic that is still being created reports `LeaderNotAvailable`, and
    /// is retried with the metadata backoff.
    pub(crate) async fn get_or_fetch_meta_for_topic(&self, topic: &str) -> AppResult<Arc<TopicMeta>> {
        if let Some(meta) = self.metadata.topic(topic) {
            if meta.partition_count() > 0 {
                return Ok(meta);
            }
        }
        let mut retries = 0;
        loop {
            let error = match self.refresh_topic(topic).await {
                Ok(meta) if meta.partition_count() > 0 => return Ok(meta),
                Ok(_) => AppError::Broker(ErrorCode::LeaderNotAvailable),
                Err(e @ AppError::Broker(ErrorCode::LeaderNotAvailable)) => e,
                Err(e) => return Err(e),
            };
            retries += 1;
            if retries > self.config.metadata_max_retries {
                return Err(error);
            }
            debug!(topic, retries, "topic metadata not ready, retrying");
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(AppError::CancelledOnClose),
                _ = time::sleep(self.config.metadata_retry_backoff()) => {}
            }
        }
    }

    /// The live connection to `broker_id`, opening a new one when there is
    /// none, it closed, or the broker moved to another address.
    pub(crate) async fn connection_for_broker(&self, broker_id: i32) -> AppResult<Arc<BrokerConnection>> {
        if self.is_shutting_down() {
            return Err(AppError::CancelledOnClose);
        }
        let broker = self.metadata.broker(broker_id).ok_or_else(|| {
            AppError::BrokerUnreachable(format!("broker {} is not in the cluster metadata", broker_id))
        })?;
        let slot = self.connections.entry(broker_id).or_default().clone();
        let mut current = slot.lock().await;

        if let Some(connection) = current.as_ref() {
            if !connection.is_closed() {
                if connection.broker().address() == broker.address() {
                    return Ok(connection.clone());
                }
                info!(
                    broker_id,
                    old = %connection.broker().address(),
                    new = %broker.address(),
                    "broker address changed, reconnecting"
                );
                connection.close(CloseReason::Requested);
            }
        }

        let connection = BrokerConnection::connect(broker, self.codec.clone(), &self.config).await?;
        if self.is_shutting_down() {
            connection.close(CloseReason::ClientClosing);
            return Err(AppError::CancelledOnClose);
        }
        *current = Some(connection.clone());
        Ok(connection)
    }

    /// Connection to the current leader of a partition.
    pub(crate) async fn leader_connection(
        &self,
        topic_partition: &TopicPartition,
    ) -> AppResult<Arc<BrokerConnection>> {
        let topic = self.get_or_fetch_meta_for_topic(&topic_partition.topic).await?;
        let partition = topic.partition(topic_partition.partition).ok_or_else(|| {
            AppError::partition_failed(topic_partition, "partition does not exist")
        })?;
        if !partition.has_leader() {
            return Err(AppError::Broker(ErrorCode::LeaderNotAvailable));
        }
        self.connection_for_broker(partition.leader).await
    }

    /// One recovery attempt: refresh the topic and connect to the leader.
    pub(crate) async fn check_partition_leader(
        &self,
        topic_partition: &TopicPartition,
    ) -> AppResult<BrokerMeta> {
        let topic = self.refresh_topic(&topic_partition.topic).await?;
        let partition = topic.partition(topic_partition.partition).ok_or_else(|| {
            AppError::partition_failed(topic_partition, "partition no longer exists")
        })?;
        if !partition.has_leader() {
            return Err(AppError::Broker(ErrorCode::LeaderNotAvailable));
        }
        let connection = self.connection_for_broker(partition.leader).await?;
        Ok(connection.broker().clone())
    }

    pub(crate) async fn recover_partition(
        self: &Arc<Self>,
        topic_partition: &TopicPartition,
        error: &AppError,
    ) -> AppResult<BrokerMeta> {
        let verdict_rx = self.recovery.begin(self, topic_partition, error);
        PartitionRecoveryMonitor::verdict(self, topic_partition, verdict_rx).await
    }

    pub(crate) async fn fetch_partition_offsets(
        self: &Arc<Self>,
        topic: &str,
        position: OffsetPosition,
    ) -> AppResult<TopicPartitionOffsets> {
        let meta = self.get_or_fetch_meta_for_topic(topic).await?;
        let mut offsets = TopicPartitionOffsets::new(topic);
        let mut pending = meta.partition_ids();
        let mut retried = HashSet::new();

        while !pending.is_empty() {
            let snapshot = self.metadata.snapshot();
            let mut by_leader: BTreeMap<i32, Vec<i32>> = BTreeMap::new();
            let mut failed: Vec<(Vec<i32>, AppError)> = Vec::new();
            for partition in pending.drain(..) {
                match snapshot.leader_id(&TopicPartition::new(topic, partition)) {
                    Some(leader) => by_leader.entry(leader).or_default().push(partition),
                    None => failed.push((vec![partition], AppError::Broker(ErrorCode::LeaderNotAvailable))),
                }
            }

            for (leader, partitions) in by_leader {
                match self.list_offsets(leader, topic, &partitions, position).await {
                    Ok(responses) => {
                        for (partition, response) in responses {
                            if response.error_code == ErrorCode::None {
                                offsets.update_offset(partition, response.offset);
                            } else {
                                failed.push((vec![partition], AppError::Broker(response.error_code)));
                            }
                        }
                    }
                    Err(e) => failed.push((partitions, e)),
                }
            }

            for (partitions, error) in failed {
                if !error.is_recoverable() {
                    return Err(error);
                }
                for partition in &partitions {
                    if !retried.insert(*partition) {
                        return Err(error);
                    }
                }
                for partition in partitions {
                    let topic_partition = TopicPartition::new(topic, partition);
                    self.recover_partition(&topic_partition, &error).await?;
                    pending.push(partition);
                }
            }
        }
        debug!(topic, ?position, %offsets, "partition offsets fetched");
        Ok(offsets)
    }

    async fn list_offsets(
        &self,
        leader: i32,
        topic: &str,
        partitions: &[i32],
        position: OffsetPosition,
    ) -> AppResult<Vec<(i32, ListOffsetsPartitionResponse)>> {
        let connection = self.connection_for_broker(leader).await?;
        let request = ListOffsetsRequest {
            replica_id: CONSUMER_REPLICA_ID,
            partitions: partitions
                .iter()
                .map(|p| (TopicPartition::new(topic, *p), position.timestamp()))
                .collect(),
        };
        let mut response = match connection.send(Request::ListOffsets(request)).await? {
            Response::ListOffsets(response) => response,
            other => return Err(unexpected_response("list offsets", &other)),
        };
        partitions
            .iter()
            .map(|partition| {
                response
                    .responses
                    .remove(&TopicPartition::new(topic, *partition))
                    .map(|r| (*partition, r))
                    .ok_or_else(|| {
                        AppError::MalformedProtocol(format!(
                            "list offsets response is missing {}-{}",
                            topic, partition
                        ))
                    })
            })
            .collect()
    }
}

async fn request_metadata(
    connection: &BrokerConnection,
    topics: Option<Vec<String>>,
) -> AppResult<MetadataResponse> {
    match connection
        .send(Request::Metadata(MetadataRequest { topics }))
        .await?
    {
        Response::Metadata(response) => Ok(response),
        other => Err(unexpected_response("metadata", &other)),
    }
}

pub(crate) fn unexpected_response(expected: &str, response: &Response) -> AppError {
    AppError::IllegalStateError(format!(
        "unexpected {:?} response to a {} request",
        response.api_key(),
        expected
    ))
}
