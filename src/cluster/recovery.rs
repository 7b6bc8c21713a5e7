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

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::client::ClusterCore;
use super::BrokerMeta;
use crate::message::TopicPartition;
use crate::service::{AppError, AppResult};
use crate::utils::ExponentialBackoff;

/// Health of a partition as seen by the recovery monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionState {
    Healthy { leader: BrokerMeta },
    Recovering,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStateChange {
    pub topic_partition: TopicPartition,
    pub state: PartitionState,
}

impl Display for PartitionStateChange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            PartitionState::Healthy { leader } => {
                write!(f, "{} recovered with leader {}", self.topic_partition, leader)
            }
            PartitionState::Recovering => write!(f, "{} recovering", self.topic_partition),
            PartitionState::Failed { reason } => {
                write!(f, "{} failed: {}", self.topic_partition, reason)
            }
        }
    }
}

type Verdict = Option<Result<BrokerMeta, String>>;

const STATE_CHANGE_CAPACITY: usize = 1024;

/// Per-partition recovery episodes.
///
/// At most one episode runs per partition. Failures reported while one is
/// running join it and share its verdict. A partition's failure never
/// touches other partitions.
#[derive(Debug)]
pub(crate) struct PartitionRecoveryMonitor {
    active: DashMap<TopicPartition, watch::Receiver<Verdict>>,
    events_tx: broadcast::Sender<PartitionStateChange>,
}

impl PartitionRecoveryMonitor {
    pub(crate) fn new() -> Self {
        let (events_tx, _) = broadcast::channel(STATE_CHANGE_CAPACITY);
        PartitionRecoveryMonitor {
            active: DashMap::new(),
            events_tx,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PartitionStateChange> {
        self.events_tx.subscribe()
    }

    pub(crate) fn is_recovering(&self, topic_partition: &TopicPartition) -> bool {
        self.active.contains_key(topic_partition)
    }

    fn emit(&self, topic_partition: &TopicPartition, state: PartitionState) {
        // no subscribers is fine
        let _ = self.events_tx.send(PartitionStateChange {
            topic_partition: topic_partition.clone(),
            state,
        });
    }

    /// Starts or joins the recovery episode for `topic_partition`.
    ///
    /// Non-recoverable errors fail the partition at once without probing.
    pub(crate) fn begin(
        &self,
        core: &Arc<ClusterCore>,
        topic_partition: &TopicPartition,
        error: &AppError,
    ) -> watch::Receiver<Verdict> {
        if !error.is_recoverable() {
            warn!(
                topic = %topic_partition.topic,
                partition = topic_partition.partition,
                error = %error,
                "partition failed with a non-recoverable error"
            );
            self.emit(
                topic_partition,
                PartitionState::Failed {
                    reason: error.to_string(),
                },
            );
            let (_, verdict_rx) = watch::channel(Some(Err(error.to_string())));
            return verdict_rx;
        }

        match self.active.entry(topic_partition.clone()) {
            Entry::Occupied(episode) => {
                debug!(
                    topic = %topic_partition.topic,
                    partition = topic_partition.partition,
                    error = %error,
                    "joining running partition recovery"
                );
                episode.get().clone()
            }
            Entry::Vacant(slot) => {
                let (verdict_tx, verdict_rx) = watch::channel(None);
                slot.insert(verdict_rx.clone());
                info!(
                    topic = %topic_partition.topic,
                    partition = topic_partition.partition,
                    cause = %error,
                    "partition recovering"
                );
                self.emit(topic_partition, PartitionState::Recovering);
                core.handle().spawn(run_recovery(
                    core.clone(),
                    topic_partition.clone(),
                    verdict_tx,
                ));
                verdict_rx
            }
        }
    }

    /// Waits for the verdict of an episode started by [`begin`](Self::begin).
    pub(crate) async fn verdict(
        core: &ClusterCore,
        topic_partition: &TopicPartition,
        mut verdict_rx: watch::Receiver<Verdict>,
    ) -> AppResult<BrokerMeta> {
        let verdict = match verdict_rx.wait_for(|verdict| verdict.is_some()).await {
            Ok(verdict) => verdict.clone(),
            Err(_) => None,
        };
        match verdict {
            Some(Ok(leader)) => Ok(leader),
            _ if core.is_shutting_down() => Err(AppError::CancelledOnClose),
            Some(Err(reason)) => Err(AppError::partition_failed(topic_partition, reason)),
            None => Err(AppError::partition_failed(
                topic_partition,
                "recovery stopped without a verdict",
            )),
        }
    }

    fn finish(&self, topic_partition: &TopicPartition, verdict: &Result<BrokerMeta, String>) {
        // later failures must start a fresh episode
        self.active.remove(topic_partition);
        match verdict {
            Ok(leader) => {
                info!(
                    topic = %topic_partition.topic,
                    partition = topic_partition.partition,
                    leader = leader.id,
                    "partition recovered"
                );
                self.emit(
                    topic_partition,
                    PartitionState::Healthy {
                        leader: leader.clone(),
                    },
                );
            }
            Err(reason) => {
                warn!(
                    topic = %topic_partition.topic,
                    partition = topic_partition.partition,
                    %reason,
                    "partition recovery failed"
                );
                self.emit(
                    topic_partition,
                    PartitionState::Failed {
                        reason: reason.clone(),
                    },
                );
            }
        }
    }
}

/// Re-resolves the leader until it is reachable or the budget runs out.
async fn run_recovery(
    core: Arc<ClusterCore>,
    topic_partition: TopicPartition,
    verdict_tx: watch::Sender<Verdict>,
) {
    let config = core.config();
    let mut backoff = ExponentialBackoff::new(
        config.recovery_initial_backoff(),
        config.recovery_max_backoff(),
        config.recovery_max_elapsed(),
    );

    let verdict = loop {
        let error = match core.check_partition_leader(&topic_partition).await {
            Ok(leader) => break Ok(leader),
            Err(e) if !e.is_recoverable() => break Err(e.to_string()),
            Err(e) => e,
        };
        let Some(delay) = backoff.next_delay() else {
            break Err(format!(
                "leader not found within {:?} after {} attempts, last error: {}",
                backoff.elapsed(),
                backoff.attempts() + 1,
                error
            ));
        };
        debug!(
            topic = %topic_partition.topic,
            partition = topic_partition.partition,
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "leader check failed, backing off"
        );
        tokio::select! {
            _ = core.shutdown_token().cancelled() => break Err("client is closing".to_string()),
            _ = tokio::time::sleep(delay) => {}
        }
    };

    core.recovery().finish(&topic_partition, &verdict);
    let _ = verdict_tx.send(Some(verdict));
}
