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

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use stonemq_client::{
    setup_file_tracing, setup_local_tracing, AppError, AppResult, ClientConfig, Cluster, Consumer, ConsumerConfig,
    Message, OffsetPosition, Producer, ProducerConfig, ProducerEvent, StartPosition,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::{runtime, signal};
use tracing::{info, warn};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(version, about = "command line client for StoneMQ and Kafka-compatible brokers")]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// seed brokers, overrides the config file
    #[arg(short, long)]
    pub brokers: Option<String>,
    #[command(subcommand)]
    pub command: Command,
    /// also write hourly rolling log files into this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    /// send stdin lines to a topic
    Produce {
        #[arg(short, long)]
        topic: String,
        /// split each line into key and value at the first occurrence
        #[arg(short, long)]
        key_separator: Option<char>,
    },
    /// print messages of a topic
    Consume {
        #[arg(short, long)]
        topic: String,
        /// start at the oldest retained offset instead of the tail
        #[arg(long)]
        from_start: bool,
        /// stop after this many messages
        #[arg(long)]
        count: Option<usize>,
    },
    /// print head and tail offsets of every partition
    Offsets {
        #[arg(short, long)]
        topic: String,
    },
    PrintConfig,
}

fn main() -> AppResult<()> {
    let commandline = CommandLine::parse();
    if std::env::var_os("RUST_LOG").is_none() {
        let level = match commandline.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }
    let _log_guard = match &commandline.log_dir {
        Some(dir) => Some(setup_file_tracing(dir, "info")),
        None => {
            setup_local_tracing()?;
            None
        }
    };

    let mut config = match &commandline.conf {
        Some(path) => ClientConfig::set_up_config(PathBuf::from(path))?,
        None => ClientConfig::default(),
    };
    if let Some(brokers) = &commandline.brokers {
        config.cluster.seed_brokers = brokers.clone();
    }

    let rt = runtime::Builder::new_current_thread().enable_all().build()?;
    rt.block_on(run(commandline.command, config))
}

async fn run(command: Command, config: ClientConfig) -> AppResult<()> {
    if let Command::PrintConfig = command {
        println!("{:#?}", config);
        return Ok(());
    }

    let cluster = Cluster::new(config.cluster.clone())?;
    cluster.connect().await?;
    let result = match command {
        Command::Produce {
            topic,
            key_separator,
        } => produce(&cluster, config.producer, topic, key_separator).await,
        Command::Consume {
            topic,
            from_start,
            count,
        } => consume(&cluster, config.consumer, topic, from_start, count).await,
        Command::Offsets { topic } => offsets(&cluster, &topic).await,
        Command::PrintConfig => Ok(()),
    };
    cluster.close(CLOSE_TIMEOUT).await?;
    result
}

async fn produce(
    cluster: &Cluster,
    defaults: ProducerConfig,
    topic: String,
    key_separator: Option<char>,
) -> AppResult<()> {
    let config = ProducerConfig { topic, ..defaults };
    let (producer, mut events) = Producer::new(cluster.clone(), config);
    producer.connect().await?;

    let reporter = tokio::spawn(async move {
        let (mut acked, mut failed) = (0usize, 0usize);
        while let Some(event) = events.recv().await {
            match event {
                ProducerEvent::Success(messages) => acked += messages.len(),
                ProducerEvent::PermanentError { error, messages } => {
                    warn!(error = %error, dropped = messages.len(), "messages dropped");
                    failed += messages.len();
                }
                ProducerEvent::ShutdownDirty(messages) => failed += messages.len(),
                ProducerEvent::TemporaryError { .. } | ProducerEvent::QueueResized(_) => {}
            }
        }
        (acked, failed)
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let message = match key_separator.and_then(|sep| line.split_once(sep)) {
            Some((key, value)) => Message::with_key(key.to_string(), value.to_string()),
            None => Message::new(line),
        };
        producer.send(message)?;
    }
    let closed = producer.close(CLOSE_TIMEOUT).await;
    drop(producer);
    let (acked, failed) = reporter
        .await
        .map_err(|e| AppError::IllegalStateError(e.to_string()))?;
    info!(acked, failed, "produce finished");
    println!("acknowledged {} messages, {} failed", acked, failed);
    closed
}

async fn consume(
    cluster: &Cluster,
    defaults: ConsumerConfig,
    topic: String,
    from_start: bool,
    count: Option<usize>,
) -> AppResult<()> {
    let mut config = ConsumerConfig { topic, ..defaults };
    if from_start {
        config.start_position = StartPosition::TopicStart;
    }
    let consumer = Consumer::new(cluster.clone(), config);
    let stream = consumer.subscribe().await?;

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut seen = 0;
    while count.map_or(true, |count| seen < count) {
        let item = tokio::select! {
            item = stream.next() => item,
            _ = &mut shutdown => {
                info!("get shutdown signal");
                None
            }
        };
        let Some(item) = item else {
            break;
        };
        match item {
            Ok(message) => {
                let key = message
                    .key
                    .as_ref()
                    .map(|key| String::from_utf8_lossy(key).into_owned());
                println!(
                    "{}:{}@{} {} {}",
                    message.topic,
                    message.partition,
                    message.offset,
                    key.unwrap_or_default(),
                    String::from_utf8_lossy(&message.value)
                );
                seen += 1;
                consumer.ack(1);
            }
            Err(e) => warn!(error = %e, "partition stopped"),
        }
    }
    consumer.close().await;
    println!("positions {}", consumer.positions());
    Ok(())
}

async fn offsets(cluster: &Cluster, topic: &str) -> AppResult<()> {
    let head = cluster
        .fetch_partition_offsets(topic, OffsetPosition::Earliest)
        .await?;
    let tail = cluster
        .fetch_partition_offsets(topic, OffsetPosition::Latest)
        .await?;
    for (partition, tail_offset) in tail.iter() {
        let head_offset = head.next_offset(partition).unwrap_or_default();
        println!(
            "{}-{} head {} tail {} messages {}",
            topic,
            partition,
            head_offset,
            tail_offset,
            tail_offset - head_offset
        );
    }
    println!("total {}", tail.messages_since(&head));
    Ok(())
}
