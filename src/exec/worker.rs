// Copyright 2025 Lablup Inc. and Jeongkyu Shin
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

//! Background workers with cooperative stop and bounded join.

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A spawned task that can be asked to stop.
pub struct Worker {
    name: &'static str,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` with a fresh stop token.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(body(token.clone()));
        debug!("Started {} worker", name);
        Self {
            name,
            token,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn signal_stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal stop and wait up to `timeout` for the task to finish.
    ///
    /// Returns `false` if the worker missed the deadline; it is then aborted
    /// and abandoned.
    pub async fn stop(&mut self, timeout: Duration) -> bool {
        self.signal_stop();
        let Some(mut handle) = self.handle.take() else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {
                debug!("{} worker stopped", self.name);
                true
            }
            Ok(Err(e)) => {
                if e.is_panic() {
                    warn!("{} worker panicked: {}", self.name, e);
                }
                true
            }
            Err(_) => {
                warn!(
                    "{} worker did not stop within {:?}; abandoning it",
                    self.name, timeout
                );
                handle.abort();
                false
            }
        }
    }

    /// Abort without waiting.
    pub fn abort(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Stop all workers concurrently, so the whole call is bounded by `timeout`.
/// Returns how many stopped on their own.
pub async fn stop_all(workers: &mut [Worker], timeout: Duration) -> usize {
    for worker in workers.iter() {
        worker.signal_stop();
    }
    join_all(workers.iter_mut().map(|worker| worker.stop(timeout)))
        .await
        .into_iter()
        .filter(|stopped| *stopped)
        .count()
}
