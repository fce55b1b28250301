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

//! Configuration type definitions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::exec::constants::{
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_RESIZE_POLL_INTERVAL_MS, DEFAULT_UPDATE_TIMEOUT_MS,
    DEFAULT_WORKER_JOIN_TIMEOUT_MS, DEFAULT_WRITE_BACKOFF_MS, DEFAULT_WRITE_RETRY_LIMIT,
};
use crate::exec::{HeartbeatKind, RelaySettings, WritePolicy};

/// Main configuration structure.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub relay: RelayConfig,
}

/// Default session target settings. Command line flags take precedence.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Defaults {
    pub namespace: Option<String>,
    /// kubeconfig path; `$KUBECONFIG` or `~/.kube/config` when unset.
    pub kubeconfig: Option<String>,
    pub context: Option<String>,
    pub container: Option<String>,
    /// Label selectors used to find a pod when none is named.
    #[serde(default)]
    pub selectors: Vec<String>,
}

/// Relay timing and retry settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RelayConfig {
    pub update_timeout_ms: u64,
    /// Keep-alive interval in seconds. Must be at least 1.
    pub heartbeat_interval_secs: u64,
    pub heartbeat: HeartbeatKind,
    pub resize_poll_interval_ms: u64,
    pub worker_join_timeout_ms: u64,
    pub write_retry_limit: u32,
    pub write_backoff_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            update_timeout_ms: DEFAULT_UPDATE_TIMEOUT_MS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            heartbeat: HeartbeatKind::Ping,
            resize_poll_interval_ms: DEFAULT_RESIZE_POLL_INTERVAL_MS,
            worker_join_timeout_ms: DEFAULT_WORKER_JOIN_TIMEOUT_MS,
            write_retry_limit: DEFAULT_WRITE_RETRY_LIMIT,
            write_backoff_ms: DEFAULT_WRITE_BACKOFF_MS,
        }
    }
}

impl RelayConfig {
    /// Relay settings; zero intervals are raised to the smallest usable value.
    pub fn to_settings(&self) -> RelaySettings {
        RelaySettings {
            update_timeout: Duration::from_millis(self.update_timeout_ms.max(1)),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            heartbeat: self.heartbeat,
            resize_poll_interval: Duration::from_millis(self.resize_poll_interval_ms.max(1)),
            worker_join_timeout: Duration::from_millis(self.worker_join_timeout_ms),
            write_policy: WritePolicy {
                retry_limit: self.write_retry_limit,
                backoff: Duration::from_millis(self.write_backoff_ms),
            },
            handle_signals: true,
        }
    }
}
