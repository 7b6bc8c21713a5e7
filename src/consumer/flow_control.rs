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

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;
use tracing::debug;

/// Pull based flow control shared by the fetch loops of one consumer.
///
/// Fetching pauses once `high` delivered messages are unacknowledged and
/// resumes when acknowledgements bring the count down to `low`.
#[derive(Debug)]
pub(crate) struct FlowControl {
    unacked: AtomicUsize,
    low: usize,
    high: usize,
    open_tx: watch::Sender<bool>,
}

impl FlowControl {
    pub(crate) fn new(low: usize, high: usize) -> Self {
        let (open_tx, _) = watch::channel(true);
        FlowControl {
            unacked: AtomicUsize::new(0),
            low,
            high,
            open_tx,
        }
    }

    pub(crate) fn on_delivered(&self, count: usize) {
        self.unacked.fetch_add(count, Ordering::AcqRel);
        self.reevaluate();
    }

    /// Acknowledges up to `count` messages. Acknowledging more than were
    /// delivered just clears the count.
    pub(crate) fn ack(&self, count: usize) {
        let _ = self
            .unacked
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |unacked| {
                Some(unacked.saturating_sub(count))
            });
        self.reevaluate();
    }

    pub(crate) fn unacked(&self) -> usize {
        self.unacked.load(Ordering::Acquire)
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.open_tx.borrow()
    }

    pub(crate) async fn wait_open(&self) {
        let mut open_rx = self.open_tx.subscribe();
        let _ = open_rx.wait_for(|open| *open).await;
    }

    fn reevaluate(&self) {
        // the watch lock orders transitions, so the count is read inside it
        self.open_tx.send_if_modified(|open| {
            let unacked = self.unacked.load(Ordering::Acquire);
            let next = if unacked >= self.high {
                false
            } else if unacked <= self.low {
                true
            } else {
                *open
            };
            if next == *open {
                return false;
            }
            debug!(unacked, open = next, "consumer flow control toggled");
            *open = next;
            true
        });
    }
}
