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

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Exponential backoff with a little jitter and an overall time budget.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    max_elapsed: Duration,
    current: Duration,
    started: Instant,
    attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, max_elapsed: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        ExponentialBackoff {
            initial,
            max: max.max(initial),
            max_elapsed,
            current: initial,
            started: Instant::now(),
            attempts: 0,
        }
    }

    /// Delay before the next attempt, `None` once the budget is spent.
    ///
    /// The delay never runs past the budget, so the caller gets one last
    /// attempt right at the deadline.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let elapsed = self.started.elapsed();
        if elapsed >= self.max_elapsed {
            return None;
        }
        let base = self.current;
        self.current = (self.current * 2).min(self.max);
        self.attempts += 1;

        let jitter_ms = (base.as_millis() as u64) / 10;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        Some((base + jitter).min(self.max_elapsed - elapsed))
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
        self.started = Instant::now();
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_delays_double_up_to_max() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(100),
            Duration::from_millis(400),
            Duration::from_secs(60),
        );
        let delays: Vec<_> = (0..5).filter_map(|_| backoff.next_delay()).collect();
        let floors = [100, 200, 400, 400, 400];
        for (delay, floor) in delays.iter().zip(floors) {
            assert!(delay.as_millis() as u64 >= floor);
            assert!(delay.as_millis() as u64 <= floor + floor / 10);
        }
        assert_eq!(backoff.attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(25),
        );
        let mut slept = Duration::ZERO;
        while let Some(delay) = backoff.next_delay() {
            tokio::time::sleep(delay).await;
            slept += delay;
        }
        assert!(slept >= Duration::from_millis(25));
        assert!(slept <= Duration::from_millis(30));
    }
}
