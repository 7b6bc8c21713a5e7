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

use std::future::Future;
use std::thread;

use parking_lot::Mutex;
use tokio::runtime::{self, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::service::{AppError, AppResult};

/// Dedicated runtime driving every socket, refresh and partition loop of a
/// cluster.
///
/// Callers never run on it. They hand work over with [`spawn`](Self::spawn)
/// or [`run`](Self::run) and get results back through join handles and
/// channels, which they await on their own runtime.
#[derive(Debug)]
pub struct WorkerRuntime {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
}

impl WorkerRuntime {
    pub const THREAD_NAME: &'static str = "stonemq-client-io";

    pub fn new(io_threads: usize) -> AppResult<Self> {
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(io_threads.max(1))
            .thread_name(Self::THREAD_NAME)
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(WorkerRuntime {
            runtime: Mutex::new(Some(runtime)),
            handle,
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawns onto the worker. After shutdown the task is dropped and the
    /// handle resolves to a cancelled error.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Runs `future` on the worker and awaits its result from the caller's
    /// context.
    pub async fn run<F, T>(&self, future: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        match self.spawn(future).await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(AppError::CancelledOnClose),
            Err(e) => Err(AppError::IllegalStateError(format!(
                "worker task panicked: {}",
                e
            ))),
        }
    }

    /// Whether the current thread belongs to a client worker runtime.
    pub fn is_worker_thread() -> bool {
        thread::current().name() == Some(Self::THREAD_NAME)
    }

    pub fn is_shutdown(&self) -> bool {
        self.runtime.lock().is_none()
    }

    /// Stops the worker without waiting for its tasks. Safe to call from
    /// any context, including async ones.
    pub fn shutdown(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            debug!("shutting down client worker runtime");
            runtime.shutdown_background();
        }
    }
}

impl Drop for WorkerRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
