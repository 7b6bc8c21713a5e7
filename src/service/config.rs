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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::{OffsetPosition, TopicPartitionOffsets};
use crate::service::{AppError, AppResult};

/// Port used for seed entries written without one.
pub const DEFAULT_BROKER_PORT: u16 = 9092;

/// Connection level settings shared by every producer and consumer of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// comma separated `host[:port]` list
    pub seed_brokers: String,
    pub client_id: String,
    /// worker threads of the dedicated I/O runtime
    pub io_threads: usize,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_frame_size: usize,
    pub metadata_retry_backoff_ms: u64,
    pub metadata_max_retries: u32,
    pub recovery_initial_backoff_ms: u64,
    pub recovery_max_backoff_ms: u64,
    /// total time budget of a single recovery episode
    pub recovery_max_elapsed_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            seed_brokers: format!("localhost:{}", DEFAULT_BROKER_PORT),
            client_id: format!("stonemq-client-{}", uuid::Uuid::new_v4()),
            io_threads: num_cpus::get().clamp(1, 4),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            max_frame_size: 100 * 1024 * 1024,
            metadata_retry_backoff_ms: 200,
            metadata_max_retries: 25,
            recovery_initial_backoff_ms: 100,
            recovery_max_backoff_ms: 5_000,
            recovery_max_elapsed_ms: 120_000,
        }
    }
}

impl ClusterConfig {
    pub fn new(seed_brokers: impl Into<String>) -> Self {
        ClusterConfig {
            seed_brokers: seed_brokers.into(),
            ..Default::default()
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_io_threads(mut self, io_threads: usize) -> Self {
        self.io_threads = io_threads;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_recovery_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.recovery_initial_backoff_ms = initial.as_millis() as u64;
        self.recovery_max_backoff_ms = max.as_millis() as u64;
        self
    }

    pub fn with_recovery_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.recovery_max_elapsed_ms = max_elapsed.as_millis() as u64;
        self
    }

    pub fn with_metadata_retry(mut self, backoff: Duration, max_retries: u32) -> Self {
        self.metadata_retry_backoff_ms = backoff.as_millis() as u64;
        self.metadata_max_retries = max_retries;
        self
    }

    /// Parses the seed list into `host:port` addresses.
    ///
    /// Blank entries are skipped and entries without a port get
    /// [`DEFAULT_BROKER_PORT`]. An empty result is an error.
    pub fn seed_addresses(&self) -> AppResult<Vec<String>> {
        let seeds: Vec<String> = self
            .seed_brokers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|seed| match seed.rsplit_once(':') {
                Some((_, port)) if port.parse::<u16>().is_ok() => seed.to_string(),
                _ => format!("{}:{}", seed, DEFAULT_BROKER_PORT),
            })
            .collect();
        if seeds.is_empty() {
            return Err(AppError::InvalidValue(format!(
                "seed broker list is empty: '{}'",
                self.seed_brokers
            )));
        }
        Ok(seeds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn metadata_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.metadata_retry_backoff_ms)
    }

    pub fn recovery_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.recovery_initial_backoff_ms)
    }

    pub fn recovery_max_backoff(&self) -> Duration {
        Duration::from_millis(self.recovery_max_backoff_ms)
    }

    pub fn recovery_max_elapsed(&self) -> Duration {
        Duration::from_millis(self.recovery_max_elapsed_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl CompressionType {
    /// Attribute bits carried in a record batch header.
    pub fn attribute_bits(&self) -> i16 {
        match self {
            CompressionType::None => 0,
            CompressionType::Gzip => 1,
            CompressionType::Snappy => 2,
            CompressionType::Lz4 => 3,
            CompressionType::Zstd => 4,
        }
    }

    pub fn from_attributes(attributes: i16) -> Option<CompressionType> {
        match attributes & 0x07 {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Gzip),
            2 => Some(CompressionType::Snappy),
            3 => Some(CompressionType::Lz4),
            4 => Some(CompressionType::Zstd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub topic: String,
    /// linger time before a partially filled batch is cut
    pub batch_flush_time_ms: u64,
    /// batch size in messages
    pub batch_flush_size: usize,
    /// batch size in bytes, keys and values only
    pub max_batch_bytes: usize,
    pub compression: CompressionType,
    /// starting logical capacity of every partition queue
    pub initial_queue_size: usize,
    /// 0, 1 or -1 (all in-sync replicas)
    pub required_acks: i16,
    pub produce_timeout_ms: i32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        ProducerConfig {
            topic: String::new(),
            batch_flush_time_ms: 500,
            batch_flush_size: 1000,
            max_batch_bytes: 1024 * 1024,
            compression: CompressionType::None,
            initial_queue_size: 1000,
            required_acks: 1,
            produce_timeout_ms: 1000,
        }
    }
}

impl ProducerConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        ProducerConfig {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_batch_flush_time(mut self, linger: Duration) -> Self {
        self.batch_flush_time_ms = linger.as_millis() as u64;
        self
    }

    pub fn with_batch_flush_size(mut self, size: usize) -> Self {
        self.batch_flush_size = size.max(1);
        self
    }

    pub fn with_max_batch_bytes(mut self, bytes: usize) -> Self {
        self.max_batch_bytes = bytes.max(1);
        self
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_initial_queue_size(mut self, size: usize) -> Self {
        self.initial_queue_size = size;
        self
    }

    pub fn with_required_acks(mut self, acks: i16) -> Self {
        self.required_acks = acks;
        self
    }

    pub fn batch_flush_time(&self) -> Duration {
        Duration::from_millis(self.batch_flush_time_ms)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.topic.is_empty() {
            return Err(AppError::InvalidValue("producer topic is empty".to_string()));
        }
        if !matches!(self.required_acks, -1..=1) {
            return Err(AppError::InvalidValue(format!(
                "required acks must be -1, 0 or 1, got {}",
                self.required_acks
            )));
        }
        Ok(())
    }
}

/// Where a consumer begins reading each partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    TopicStart,
    #[default]
    TopicEnd,
    Offsets(TopicPartitionOffsets),
}

impl StartPosition {
    pub fn offset_position(&self) -> Option<OffsetPosition> {
        match self {
            StartPosition::TopicStart => Some(OffsetPosition::Earliest),
            StartPosition::TopicEnd => Some(OffsetPosition::Latest),
            StartPosition::Offsets(_) => None,
        }
    }
}

/// Exclusive per-partition bound after which a consumer stops reading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPosition {
    #[default]
    Never,
    /// the topic end as observed when subscribing
    TopicEnd,
    Offsets(TopicPartitionOffsets),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub topic: String,
    pub start_position: StartPosition,
    pub stop_position: StopPosition,
    pub max_bytes_per_fetch: i32,
    pub max_wait_time_ms: i32,
    pub min_bytes_per_fetch: i32,
    pub low_watermark: usize,
    pub high_watermark: usize,
    pub use_flow_control: bool,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            topic: String::new(),
            start_position: StartPosition::TopicEnd,
            stop_position: StopPosition::Never,
            max_bytes_per_fetch: 256 * 1024,
            max_wait_time_ms: 500,
            min_bytes_per_fetch: 1,
            low_watermark: 500,
            high_watermark: 2000,
            use_flow_control: false,
        }
    }
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        ConsumerConfig {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_start_position(mut self, start: StartPosition) -> Self {
        self.start_position = start;
        self
    }

    pub fn with_stop_position(mut self, stop: StopPosition) -> Self {
        self.stop_position = stop;
        self
    }

    pub fn with_max_bytes_per_fetch(mut self, max_bytes: i32) -> Self {
        self.max_bytes_per_fetch = max_bytes;
        self
    }

    pub fn with_max_wait_time(mut self, max_wait: Duration) -> Self {
        self.max_wait_time_ms = max_wait.as_millis() as i32;
        self
    }

    pub fn with_flow_control(mut self, low_watermark: usize, high_watermark: usize) -> Self {
        self.use_flow_control = true;
        self.low_watermark = low_watermark;
        self.high_watermark = high_watermark;
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.topic.is_empty() {
            return Err(AppError::InvalidValue("consumer topic is empty".to_string()));
        }
        if self.max_bytes_per_fetch <= 0 {
            return Err(AppError::InvalidValue(format!(
                "max bytes per fetch must be positive, got {}",
                self.max_bytes_per_fetch
            )));
        }
        if self.use_flow_control && self.low_watermark >= self.high_watermark {
            return Err(AppError::InvalidValue(format!(
                "low watermark {} must be below high watermark {}",
                self.low_watermark, self.high_watermark
            )));
        }
        if let (StartPosition::Offsets(start), StopPosition::Offsets(stop)) =
            (&self.start_position, &self.stop_position)
        {
            if start.topic() != stop.topic() {
                return Err(AppError::InvalidValue(format!(
                    "start offsets topic {} differs from stop offsets topic {}",
                    start.topic(),
                    stop.topic()
                )));
            }
        }
        Ok(())
    }
}

/// File backed configuration, one section per concern.
///
/// ```toml
/// [cluster]
/// seed_brokers = "127.0.0.1:9092,127.0.0.1:9093"
///
/// [producer]
/// batch_flush_time_ms = 100
///
/// [consumer]
/// max_wait_time_ms = 200
/// ```
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub cluster: ClusterConfig,
    pub producer: ProducerConfig,
    pub consumer: ConsumerConfig,
}

impl ClientConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<ClientConfig> {
        let path_str = path.as_ref().to_str().ok_or(AppError::InvalidValue(format!(
            "config file path: {}",
            path.as_ref().to_string_lossy()
        )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(config::Environment::with_prefix("STONEMQ_CLIENT").separator("__"))
            .build()?;
        let client_config: ClientConfig = config.try_deserialize()?;
        client_config.cluster.seed_addresses()?;
        Ok(client_config)
    }
}
