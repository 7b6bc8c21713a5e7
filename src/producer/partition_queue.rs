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

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::message::Message;

/// Emitted when a partition queue outgrew its capacity and was doubled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueResizeInfo {
    pub topic: String,
    pub partition: i32,
    pub old_capacity: usize,
    pub new_capacity: usize,
}

#[derive(Debug)]
struct QueueInner {
    messages: VecDeque<Message>,
    capacity: usize,
}

/// Pending messages of one partition.
///
/// Never blocks and never rejects: a full queue doubles its capacity.
#[derive(Debug)]
pub(crate) struct PartitionQueue {
    partition: i32,
    batch_flush_size: usize,
    inner: Mutex<QueueInner>,
    /// a message arrived
    data_ready: Notify,
    /// a whole batch is waiting, stop lingering
    batch_ready: Notify,
    recovering: AtomicBool,
}

impl PartitionQueue {
    pub(crate) fn new(partition: i32, initial_capacity: usize, batch_flush_size: usize) -> Self {
        let capacity = initial_capacity.max(1);
        PartitionQueue {
            partition,
            batch_flush_size: batch_flush_size.max(1),
            inner: Mutex::new(QueueInner {
                messages: VecDeque::with_capacity(capacity),
                capacity,
            }),
            data_ready: Notify::new(),
            batch_ready: Notify::new(),
            recovering: AtomicBool::new(false),
        }
    }

    pub(crate) fn partition(&self) -> i32 {
        self.partition
    }

    /// Appends a message, returning `(old, new)` capacity when it grew.
    pub(crate) fn push(&self, message: Message) -> Option<(usize, usize)> {
        let (len, resized) = {
            let mut inner = self.inner.lock();
            let mut resized = None;
            if inner.messages.len() >= inner.capacity {
                let old = inner.capacity;
                inner.capacity = old * 2;
                let additional = inner.capacity - inner.messages.len();
                inner.messages.reserve(additional);
                resized = Some((old, inner.capacity));
            }
            inner.messages.push_back(message);
            (inner.messages.len(), resized)
        };
        self.data_ready.notify_one();
        if len >= self.batch_flush_size {
            self.batch_ready.notify_one();
        }
        resized
    }

    /// Takes up to `max_messages` messages within `max_bytes`, always at
    /// least one when the queue is not empty.
    pub(crate) fn take_batch(&self, max_messages: usize, max_bytes: usize) -> Vec<Message> {
        let mut inner = self.inner.lock();
        let mut batch = Vec::with_capacity(max_messages.min(inner.messages.len()));
        let mut bytes = 0;
        while batch.len() < max_messages {
            let Some(next) = inner.messages.front() else {
                break;
            };
            if !batch.is_empty() && bytes + next.size() > max_bytes {
                break;
            }
            bytes += next.size();
            if let Some(message) = inner.messages.pop_front() {
                batch.push(message);
            }
        }
        batch
    }

    /// Puts a failed batch back ahead of everything queued since.
    pub(crate) fn requeue_front(&self, batch: Vec<Message>) {
        if batch.is_empty() {
            return;
        }
        {
            let mut inner = self.inner.lock();
            for message in batch.into_iter().rev() {
                inner.messages.push_front(message);
            }
            if inner.messages.len() > inner.capacity {
                inner.capacity = inner.messages.len();
            }
        }
        self.data_ready.notify_one();
    }

    pub(crate) fn drain(&self) -> Vec<Message> {
        self.inner.lock().messages.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub(crate) fn is_batch_full(&self) -> bool {
        self.len() >= self.batch_flush_size
    }

    pub(crate) async fn data_ready(&self) {
        self.data_ready.notified().await
    }

    pub(crate) async fn batch_ready(&self) {
        self.batch_ready.notified().await
    }

    pub(crate) fn set_recovering(&self, recovering: bool) {
        self.recovering.store(recovering, Ordering::Release);
    }

    pub(crate) fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(i: usize) -> Message {
        Message::new(format!("m{:04}", i))
    }

    #[test]
    fn test_queue_grows_without_loss() {
        let queue = PartitionQueue::new(0, 1, 100);
        let mut resizes = Vec::new();
        for i in 0..1_000 {
            if let Some(resize) = queue.push(message(i)) {
                resizes.push(resize);
            }
        }
        assert_eq!(queue.len(), 1_000);
        assert_eq!(resizes.first(), Some(&(1, 2)));
        assert_eq!(resizes.last(), Some(&(512, 1024)));
        assert_eq!(queue.capacity(), 1024);

        let drained = queue.drain();
        assert!(drained.iter().enumerate().all(|(i, m)| *m == message(i)));
    }

    #[test]
    fn test_take_batch_respects_limits() {
        let queue = PartitionQueue::new(0, 16, 100);
        for i in 0..10 {
            queue.push(message(i));
        }
        // five bytes per message
        assert_eq!(queue.take_batch(4, 1_000).len(), 4);
        assert_eq!(queue.take_batch(100, 12).len(), 2);
        // an oversized message still goes out alone
        assert_eq!(queue.take_batch(100, 1).len(), 1);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_requeue_keeps_order() {
        let queue = PartitionQueue::new(0, 4, 100);
        for i in 0..4 {
            queue.push(message(i));
        }
        let batch = queue.take_batch(2, 1_000);
        queue.push(message(4));
        queue.requeue_front(batch);
        let order: Vec<Message> = queue.drain();
        assert_eq!(order, (0..5).map(message).collect::<Vec<_>>());
    }
}
