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

//! Keep-alive worker for idle exec streams.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::channel::ChannelHandle;
use super::error::IoDisposition;

/// What a heartbeat sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatKind {
    /// WebSocket ping control frame.
    #[default]
    Ping,
    /// Zero-length stdin frame, for proxies that swallow pings.
    EmptyStdin,
}

/// Heartbeat body: send a keep-alive every `interval` until stopped or the
/// channel closes.
pub async fn run_heartbeat(
    handle: ChannelHandle,
    interval: Duration,
    kind: HeartbeatKind,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = handle.closed() => {
                debug!("Exec channel closed; heartbeat exiting");
                break;
            }
            _ = ticker.tick() => {
                let sent = match kind {
                    HeartbeatKind::Ping => handle.send_ping(),
                    HeartbeatKind::EmptyStdin => handle.send_empty_stdin(),
                };
                match sent {
                    Ok(()) => trace!("Heartbeat sent"),
                    Err(e) if e.disposition() == IoDisposition::WouldBlock => {
                        trace!("Outbound queue busy; heartbeat skipped");
                    }
                    Err(e) => {
                        debug!("Heartbeat stopping: {e}");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::channel::Outbound;
    use tokio::sync::{mpsc, watch};

    #[tokio::test]
    async fn test_sends_pings_on_interval() {
        let (tx, mut rx) = mpsc::channel(8);
        let (_open_tx, open_rx) = watch::channel(true);
        let token = CancellationToken::new();

        let task = tokio::spawn(run_heartbeat(
            ChannelHandle::new(tx, open_rx),
            Duration::from_millis(10),
            HeartbeatKind::Ping,
            token.clone(),
        ));

        for _ in 0..2 {
            let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap();
            assert_eq!(message, Some(Outbound::Ping));
        }

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_stdin_heartbeat() {
        let (tx, mut rx) = mpsc::channel(8);
        let (_open_tx, open_rx) = watch::channel(true);
        let token = CancellationToken::new();

        let _task = tokio::spawn(run_heartbeat(
            ChannelHandle::new(tx, open_rx),
            Duration::from_millis(10),
            HeartbeatKind::EmptyStdin,
            token.clone(),
        ));

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(message, Some(Outbound::Stdin(Vec::new())));
        token.cancel();
    }

    #[tokio::test]
    async fn test_stops_when_channel_closes() {
        let (tx, _rx) = mpsc::channel(8);
        let (open_tx, open_rx) = watch::channel(true);

        let task = tokio::spawn(run_heartbeat(
            ChannelHandle::new(tx, open_rx),
            Duration::from_secs(30),
            HeartbeatKind::Ping,
            CancellationToken::new(),
        ));
        open_tx.send_replace(false);

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("heartbeat should exit once the channel closes")
            .unwrap();
    }
}
