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

//! In-process brokers speaking the Kafka wire format over real sockets.
//!
//! Every broker of a [`MockCluster`] shares one in-memory log. Leadership,
//! broker liveness and one-shot error injection are controlled from tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use stonemq_client::{Cluster, ClusterConfig, Message, ProducerEvent, ProducerEvents};

pub const PRODUCE: i16 = 0;
pub const FETCH: i16 = 1;
pub const LIST_OFFSETS: i16 = 2;
pub const METADATA: i16 = 3;

pub const NONE: i16 = 0;
pub const OFFSET_OUT_OF_RANGE: i16 = 1;
pub const UNKNOWN_TOPIC_OR_PARTITION: i16 = 3;
pub const LEADER_NOT_AVAILABLE: i16 = 5;
pub const NOT_LEADER_FOR_PARTITION: i16 = 6;
pub const MESSAGE_TOO_LARGE: i16 = 10;
pub const TOPIC_AUTHORIZATION_FAILED: i16 = 29;

/// Longest a fetch with no data is held before answering.
const MAX_FETCH_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct StoredBatch {
    base_offset: i64,
    last_offset: i64,
    bytes: Bytes,
}

#[derive(Debug, Default)]
struct PartitionLog {
    leader: i32,
    replicas: Vec<i32>,
    log_start: i64,
    next_offset: i64,
    batches: Vec<StoredBatch>,
}

#[derive(Debug)]
struct BrokerEntry {
    port: i32,
    alive: bool,
    shutdown: CancellationToken,
}

#[derive(Debug, Default)]
struct State {
    brokers: BTreeMap<i32, BrokerEntry>,
    topics: BTreeMap<String, Vec<PartitionLog>>,
    auto_create_partitions: Option<usize>,
    /// topics announced as LeaderNotAvailable once before showing up
    creating: Vec<String>,
    /// (api key, topic, partition) -> error codes returned once each
    injected: HashMap<(i16, String, i32), VecDeque<i16>>,
    request_counts: HashMap<i16, usize>,
}

#[derive(Debug, Clone)]
pub struct MockCluster {
    state: Arc<Mutex<State>>,
}

impl MockCluster {
    /// Starts `brokers` brokers with ids `1..=brokers`.
    pub async fn start(brokers: usize) -> MockCluster {
        let cluster = MockCluster {
            state: Arc::new(Mutex::new(State::default())),
        };
        for id in 1..=brokers as i32 {
            cluster.start_broker(id).await;
        }
        cluster
    }

    async fn start_broker(&self, id: i32) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port() as i32;
        let shutdown = CancellationToken::new();
        self.state.lock().brokers.insert(
            id,
            BrokerEntry {
                port,
                alive: true,
                shutdown: shutdown.clone(),
            },
        );
        let state = self.state.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((socket, _)) = accepted else { break };
                        let broker = BrokerHandler { id, state: state.clone() };
                        tokio::spawn(broker.serve(socket, shutdown.clone()));
                    }
                }
            }
        });
    }

    /// Comma separated addresses of every live broker.
    pub fn bootstrap(&self) -> String {
        self.state
            .lock()
            .brokers
            .values()
            .filter(|b| b.alive)
            .map(|b| format!("127.0.0.1:{}", b.port))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn broker_address(&self, id: i32) -> SocketAddr {
        let port = self.state.lock().brokers[&id].port;
        SocketAddr::from(([127, 0, 0, 1], port as u16))
    }

    /// Partitions given to topics created on first use, `None` disables it.
    pub fn set_auto_create(&self, partitions: Option<usize>) {
        self.state.lock().auto_create_partitions = partitions;
    }

    /// Creates a topic, leaders assigned round robin over live brokers and
    /// the next broker as second replica.
    pub fn create_topic(&self, topic: &str, partitions: usize) {
        let mut state = self.state.lock();
        create_topic(&mut state, topic, partitions);
    }

    pub fn leader(&self, topic: &str, partition: i32) -> i32 {
        self.state.lock().topics[topic][partition as usize].leader
    }

    pub fn set_leader(&self, topic: &str, partition: i32, leader: i32) {
        self.state.lock().topics.get_mut(topic).unwrap()[partition as usize].leader = leader;
    }

    /// Stops a broker: its sockets close and its partitions move to a live
    /// replica, or to no leader when none is left.
    pub fn stop_broker(&self, id: i32) {
        let mut state = self.state.lock();
        let alive: Vec<i32> = state
            .brokers
            .iter()
            .filter(|(broker, entry)| **broker != id && entry.alive)
            .map(|(broker, _)| *broker)
            .collect();
        if let Some(entry) = state.brokers.get_mut(&id) {
            entry.alive = false;
            entry.shutdown.cancel();
        }
        for partitions in state.topics.values_mut() {
            for partition in partitions.iter_mut().filter(|p| p.leader == id) {
                partition.leader = partition
                    .replicas
                    .iter()
                    .copied()
                    .find(|replica| alive.contains(replica))
                    .or_else(|| alive.first().copied())
                    .unwrap_or(-1);
            }
        }
    }

    /// Makes the next request of `api_key` for a partition fail with `code`.
    pub fn inject_error(&self, api_key: i16, topic: &str, partition: i32, code: i16) {
        self.state
            .lock()
            .injected
            .entry((api_key, topic.to_string(), partition))
            .or_default()
            .push_back(code);
    }

    pub fn request_count(&self, api_key: i16) -> usize {
        self.state
            .lock()
            .request_counts
            .get(&api_key)
            .copied()
            .unwrap_or(0)
    }

    pub fn head_offset(&self, topic: &str, partition: i32) -> i64 {
        self.state.lock().topics[topic][partition as usize].log_start
    }

    pub fn tail_offset(&self, topic: &str, partition: i32) -> i64 {
        self.state.lock().topics[topic][partition as usize].next_offset
    }

    pub fn total_messages(&self, topic: &str) -> i64 {
        self.state.lock().topics[topic]
            .iter()
            .map(|p| p.next_offset - p.log_start)
            .sum()
    }

    /// Drops everything below `offset`, like retention would.
    pub fn truncate_head(&self, topic: &str, partition: i32, offset: i64) {
        let mut state = self.state.lock();
        let log = &mut state.topics.get_mut(topic).unwrap()[partition as usize];
        log.batches.retain(|batch| batch.last_offset >= offset);
        log.log_start = offset;
    }
}

fn create_topic(state: &mut State, topic: &str, partitions: usize) {
    let alive: Vec<i32> = state
        .brokers
        .iter()
        .filter(|(_, entry)| entry.alive)
        .map(|(id, _)| *id)
        .collect();
    let logs = (0..partitions)
        .map(|p| {
            let leader = alive[p % alive.len()];
            let follower = alive[(p + 1) % alive.len()];
            let mut replicas = vec![leader];
            if follower != leader {
                replicas.push(follower);
            }
            PartitionLog {
                leader,
                replicas,
                ..Default::default()
            }
        })
        .collect();
    state.topics.insert(topic.to_string(), logs);
}

struct BrokerHandler {
    id: i32,
    state: Arc<Mutex<State>>,
}

impl BrokerHandler {
    async fn serve(self, mut socket: TcpStream, shutdown: CancellationToken) {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => return,
                frame = read_frame(&mut socket) => frame,
            };
            let Some(mut frame) = frame else { return };

            let api_key = frame.get_i16();
            let _api_version = frame.get_i16();
            let correlation_id = frame.get_i32();
            let _client_id = get_nullable_string(&mut frame);
            *self.state.lock().request_counts.entry(api_key).or_default() += 1;

            let body = match api_key {
                METADATA => Some(self.metadata(&mut frame)),
                PRODUCE => self.produce(&mut frame),
                FETCH => Some(self.fetch(&mut frame).await),
                LIST_OFFSETS => Some(self.list_offsets(&mut frame)),
                other => panic!("mock broker got api key {}", other),
            };
            let Some(body) = body else { continue };

            let mut out = BytesMut::with_capacity(body.len() + 8);
            out.put_i32(body.len() as i32 + 4);
            out.put_i32(correlation_id);
            out.put_slice(&body);
            tokio::select! {
                _ = shutdown.cancelled() => return,
                written = socket.write_all(&out) => if written.is_err() { return },
            }
        }
    }

    fn take_injected(state: &mut State, api_key: i16, topic: &str, partition: i32) -> Option<i16> {
        state
            .injected
            .get_mut(&(api_key, topic.to_string(), partition))
            .and_then(VecDeque::pop_front)
    }

    /// Error code for a request to a partition, `None` when it may proceed.
    fn check_partition(&self, state: &mut State, api_key: i16, topic: &str, partition: i32) -> Option<i16> {
        if let Some(code) = Self::take_injected(state, api_key, topic, partition) {
            return Some(code);
        }
        match state.topics.get(topic).and_then(|p| p.get(partition as usize)) {
            None => Some(UNKNOWN_TOPIC_OR_PARTITION),
            Some(log) if log.leader != self.id => Some(NOT_LEADER_FOR_PARTITION),
            Some(_) => None,
        }
    }

    fn metadata(&self, buf: &mut Bytes) -> BytesMut {
        let count = buf.get_i32();
        let requested: Option<Vec<String>> =
            (count >= 0).then(|| (0..count).map(|_| get_string(buf)).collect());

        let mut state = self.state.lock();
        let mut out = BytesMut::new();
        let alive: Vec<(i32, i32)> = state
            .brokers
            .iter()
            .filter(|(_, entry)| entry.alive)
            .map(|(id, entry)| (*id, entry.port))
            .collect();
        out.put_i32(alive.len() as i32);
        for (id, port) in &alive {
            out.put_i32(*id);
            put_string(&mut out, "127.0.0.1");
            out.put_i32(*port);
            out.put_i16(-1);
        }
        out.put_i32(alive.first().map_or(-1, |(id, _)| *id));

        let names: Vec<String> = requested.unwrap_or_else(|| state.topics.keys().cloned().collect());
        out.put_i32(names.len() as i32);
        for name in names {
            if !state.topics.contains_key(&name) {
                let auto_create = state.auto_create_partitions;
                match auto_create {
                    Some(_) if !state.creating.contains(&name) => {
                        state.creating.push(name.clone());
                        put_topic_header(&mut out, LEADER_NOT_AVAILABLE, &name);
                        out.put_i32(0);
                        continue;
                    }
                    Some(partitions) => create_topic(&mut state, &name, partitions),
                    None => {
                        put_topic_header(&mut out, UNKNOWN_TOPIC_OR_PARTITION, &name);
                        out.put_i32(0);
                        continue;
                    }
                }
            }
            let partitions = &state.topics[&name];
            put_topic_header(&mut out, NONE, &name);
            out.put_i32(partitions.len() as i32);
            for (index, log) in partitions.iter().enumerate() {
                out.put_i16(if log.leader < 0 { LEADER_NOT_AVAILABLE } else { NONE });
                out.put_i32(index as i32);
                out.put_i32(log.leader);
                out.put_i32(log.replicas.len() as i32);
                for replica in &log.replicas {
                    out.put_i32(*replica);
                }
                out.put_i32(log.replicas.len() as i32);
                for replica in &log.replicas {
                    out.put_i32(*replica);
                }
            }
        }
        out
    }

    fn produce(&self, buf: &mut Bytes) -> Option<BytesMut> {
        let _transactional_id = get_nullable_string(buf);
        let acks = buf.get_i16();
        let _timeout = buf.get_i32();

        let mut state = self.state.lock();
        let mut out = BytesMut::new();
        let topic_count = buf.get_i32();
        out.put_i32(topic_count);
        for _ in 0..topic_count {
            let topic = get_string(buf);
            put_string(&mut out, &topic);
            let partition_count = buf.get_i32();
            out.put_i32(partition_count);
            for _ in 0..partition_count {
                let partition = buf.get_i32();
                let size = buf.get_i32() as usize;
                let records = buf.split_to(size);

                out.put_i32(partition);
                if let Some(code) = self.check_partition(&mut state, PRODUCE, &topic, partition) {
                    out.put_i16(code);
                    out.put_i64(-1);
                    out.put_i64(-1);
                    continue;
                }
                let log = &mut state.topics.get_mut(&topic).unwrap()[partition as usize];
                let base_offset = log.next_offset;
                let mut batch = BytesMut::from(&records[..]);
                let last_offset_delta = (&batch[23..27]).get_i32() as i64;
                // offsets are assigned by the log, the checksum does not cover them
                batch[0..8].copy_from_slice(&base_offset.to_be_bytes());
                log.batches.push(StoredBatch {
                    base_offset,
                    last_offset: base_offset + last_offset_delta,
                    bytes: batch.freeze(),
                });
                log.next_offset = base_offset + last_offset_delta + 1;
                out.put_i16(NONE);
                out.put_i64(base_offset);
                out.put_i64(-1);
            }
        }
        out.put_i32(0);
        (acks != 0).then_some(out)
    }

    async fn fetch(&self, buf: &mut Bytes) -> BytesMut {
        let _replica_id = buf.get_i32();
        let max_wait = Duration::from_millis(buf.get_i32().max(0) as u64).min(MAX_FETCH_WAIT);
        let _min_bytes = buf.get_i32();
        let _max_bytes = buf.get_i32();
        let _isolation = buf.get_i8();
        let mut requested = Vec::new();
        for _ in 0..buf.get_i32() {
            let topic = get_string(buf);
            for _ in 0..buf.get_i32() {
                let partition = buf.get_i32();
                let fetch_offset = buf.get_i64();
                let _log_start = buf.get_i64();
                let max_bytes = buf.get_i32();
                requested.push((topic.clone(), partition, fetch_offset, max_bytes));
            }
        }

        let has_data = {
            let state = self.state.lock();
            requested.iter().any(|(topic, partition, offset, _)| {
                state
                    .topics
                    .get(topic)
                    .and_then(|p| p.get(*partition as usize))
                    .is_some_and(|log| log.next_offset > *offset)
            })
        };
        if !has_data {
            tokio::time::sleep(max_wait).await;
        }

        let mut state = self.state.lock();
        let mut out = BytesMut::new();
        out.put_i32(0);
        out.put_i32(requested.len() as i32);
        for (topic, partition, fetch_offset, max_bytes) in requested {
            put_string(&mut out, &topic);
            out.put_i32(1);
            out.put_i32(partition);
            let code = self
                .check_partition(&mut state, FETCH, &topic, partition)
                .or_else(|| {
                    let log = &state.topics[&topic][partition as usize];
                    (fetch_offset < log.log_start || fetch_offset > log.next_offset)
                        .then_some(OFFSET_OUT_OF_RANGE)
                });
            let Some(log) = state.topics.get(&topic).and_then(|p| p.get(partition as usize)) else {
                put_fetch_partition(&mut out, UNKNOWN_TOPIC_OR_PARTITION, -1, -1, &[]);
                continue;
            };
            if let Some(code) = code {
                put_fetch_partition(&mut out, code, log.next_offset, log.log_start, &[]);
                continue;
            }
            let mut records = BytesMut::new();
            for batch in log.batches.iter().filter(|b| b.last_offset >= fetch_offset) {
                if !records.is_empty() && records.len() + batch.bytes.len() > max_bytes as usize {
                    break;
                }
                records.put_slice(&batch.bytes);
            }
            put_fetch_partition(&mut out, NONE, log.next_offset, log.log_start, &records);
        }
        out
    }

    fn list_offsets(&self, buf: &mut Bytes) -> BytesMut {
        let _replica_id = buf.get_i32();
        let mut state = self.state.lock();
        let mut out = BytesMut::new();
        let topic_count = buf.get_i32();
        out.put_i32(topic_count);
        for _ in 0..topic_count {
            let topic = get_string(buf);
            put_string(&mut out, &topic);
            let partition_count = buf.get_i32();
            out.put_i32(partition_count);
            for _ in 0..partition_count {
                let partition = buf.get_i32();
                let timestamp = buf.get_i64();
                out.put_i32(partition);
                if let Some(code) = self.check_partition(&mut state, LIST_OFFSETS, &topic, partition) {
                    out.put_i16(code);
                    out.put_i64(-1);
                    out.put_i64(-1);
                    continue;
                }
                let log = &state.topics[&topic][partition as usize];
                let offset = if timestamp == -2 { log.log_start } else { log.next_offset };
                out.put_i16(NONE);
                out.put_i64(timestamp);
                out.put_i64(offset);
            }
        }
        out
    }
}

async fn read_frame(socket: &mut TcpStream) -> Option<Bytes> {
    let size = socket.read_i32().await.ok()?;
    let mut frame = vec![0u8; size as usize];
    socket.read_exact(&mut frame).await.ok()?;
    Some(Bytes::from(frame))
}

fn get_string(buf: &mut Bytes) -> String {
    let len = buf.get_i16() as usize;
    String::from_utf8(buf.split_to(len).to_vec()).unwrap()
}

fn get_nullable_string(buf: &mut Bytes) -> Option<String> {
    let len = buf.get_i16();
    (len >= 0).then(|| String::from_utf8(buf.split_to(len as usize).to_vec()).unwrap())
}

fn put_string(out: &mut BytesMut, value: &str) {
    out.put_i16(value.len() as i16);
    out.put_slice(value.as_bytes());
}

fn put_topic_header(out: &mut BytesMut, error: i16, name: &str) {
    out.put_i16(error);
    put_string(out, name);
    out.put_i8(0);
}

fn put_fetch_partition(out: &mut BytesMut, error: i16, high_watermark: i64, log_start: i64, records: &[u8]) {
    out.put_i16(error);
    out.put_i64(high_watermark);
    out.put_i64(high_watermark);
    out.put_i64(log_start);
    out.put_i32(-1);
    out.put_i32(records.len() as i32);
    out.put_slice(records);
}

/// Polls `condition` every 10ms until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Cluster settings with timeouts and backoffs short enough for tests.
pub fn cluster_config(seeds: &str) -> ClusterConfig {
    ClusterConfig::new(seeds)
        .with_client_id("mock-test")
        .with_io_threads(2)
        .with_connect_timeout(Duration::from_secs(1))
        .with_request_timeout(Duration::from_secs(5))
        .with_metadata_retry(Duration::from_millis(20), 20)
        .with_recovery_backoff(Duration::from_millis(20), Duration::from_millis(200))
        .with_recovery_max_elapsed(Duration::from_secs(10))
}

pub async fn connected_cluster(mock: &MockCluster) -> Cluster {
    let cluster = Cluster::new(cluster_config(&mock.bootstrap())).unwrap();
    cluster.connect().await.unwrap();
    cluster
}

/// Collected producer outcomes.
#[derive(Debug, Default)]
pub struct Outcomes {
    pub acked: Vec<Message>,
    pub permanent: Vec<(stonemq_client::AppError, Vec<Message>)>,
    pub temporary: usize,
    pub resized: usize,
    pub dirty: Vec<Message>,
}

impl Outcomes {
    pub fn record(&mut self, event: ProducerEvent) {
        match event {
            ProducerEvent::Success(messages) => self.acked.extend(messages),
            ProducerEvent::PermanentError { error, messages } => self.permanent.push((error, messages)),
            ProducerEvent::TemporaryError { .. } => self.temporary += 1,
            ProducerEvent::QueueResized(_) => self.resized += 1,
            ProducerEvent::ShutdownDirty(messages) => self.dirty.extend(messages),
        }
    }

    pub fn failed_messages(&self) -> usize {
        self.permanent.iter().map(|(_, messages)| messages.len()).sum()
    }
}

/// Reads events until `done` holds or `timeout` passes.
pub async fn collect_until(
    events: &mut ProducerEvents,
    outcomes: &mut Outcomes,
    timeout: Duration,
    mut done: impl FnMut(&Outcomes) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while !done(outcomes) {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => outcomes.record(event),
            Ok(None) | Err(_) => return done(outcomes),
        }
    }
    true
}

/// Everything already queued on the events channel.
pub fn drain_events(events: &mut ProducerEvents, outcomes: &mut Outcomes) {
    while let Ok(event) = events.try_recv() {
        outcomes.record(event);
    }
}
