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

//! The multiplexed exec channel abstraction.
//!
//! The relay loop owns an [`ExecChannel`] exclusively. Background workers
//! never touch it directly; they get a cloneable [`ChannelHandle`] that can
//! queue resize and keep-alive requests and observe whether the channel is
//! still open.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use super::error::ChannelError;
use super::protocol::{ExecStatus, TerminalSize};

/// Requests queued for the writer half of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Stdin(Vec<u8>),
    Resize(TerminalSize),
    Ping,
    Close,
}

/// Cloneable sender side of a channel, shared with background workers.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<Outbound>,
    open: watch::Receiver<bool>,
}

impl ChannelHandle {
    pub fn new(tx: mpsc::Sender<Outbound>, open: watch::Receiver<bool>) -> Self {
        Self { tx, open }
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow() && !self.tx.is_closed()
    }

    /// Resolves once the channel reports closed.
    pub async fn closed(&self) {
        let mut open = self.open.clone();
        while *open.borrow_and_update() {
            if open.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn send_resize(&self, size: TerminalSize) -> Result<(), ChannelError> {
        self.try_queue(Outbound::Resize(size))
    }

    pub fn send_ping(&self) -> Result<(), ChannelError> {
        self.try_queue(Outbound::Ping)
    }

    /// Queue a zero-length stdin frame, for servers that ignore pings.
    pub fn send_empty_stdin(&self) -> Result<(), ChannelError> {
        self.try_queue(Outbound::Stdin(Vec::new()))
    }

    pub(crate) fn try_queue(&self, request: Outbound) -> Result<(), ChannelError> {
        if !*self.open.borrow() {
            return Err(ChannelError::Closed);
        }
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::WouldBlock,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })
    }
}

/// One bidirectional exec stream.
///
/// Implementations buffer received stdout/stderr until the relay drains them,
/// and never block the caller for longer than the timeout given to
/// [`ExecChannel::update`].
#[async_trait]
pub trait ExecChannel: Send {
    fn is_open(&self) -> bool;

    /// Pump the channel, waiting at most `timeout` for the first message.
    async fn update(&mut self, timeout: Duration) -> Result<(), ChannelError>;

    /// Take everything buffered on stdout, if anything.
    fn take_stdout(&mut self) -> Option<Vec<u8>>;

    /// Take everything buffered on stderr, if anything.
    fn take_stderr(&mut self) -> Option<Vec<u8>>;

    /// Forward stdin bytes. Fails with [`ChannelError::WouldBlock`] when the
    /// channel cannot take them right now; the caller keeps them for later.
    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), ChannelError>;

    fn handle(&self) -> ChannelHandle;

    /// Status reported by the server when the remote process exited.
    fn exit_status(&self) -> Option<&ExecStatus> {
        None
    }

    /// Close the channel. Calling it again has no effect.
    fn close(&mut self);
}

/// Move the contents out of an output buffer, leaving it empty.
pub(crate) fn take_buffer(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    if buffer.is_empty() {
        None
    } else {
        Some(std::mem::take(buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_pair(
        capacity: usize,
    ) -> (ChannelHandle, mpsc::Receiver<Outbound>, watch::Sender<bool>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (open_tx, open_rx) = watch::channel(true);
        (ChannelHandle::new(tx, open_rx), rx, open_tx)
    }

    #[tokio::test]
    async fn test_handle_queues_requests() {
        let (handle, mut rx, _open) = handle_pair(4);

        handle.send_resize(TerminalSize::new(100, 30)).unwrap();
        handle.send_ping().unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Outbound::Resize(TerminalSize::new(100, 30)))
        );
        assert_eq!(rx.recv().await, Some(Outbound::Ping));
    }

    #[tokio::test]
    async fn test_full_queue_reports_would_block() {
        let (handle, _rx, _open) = handle_pair(1);

        handle.send_ping().unwrap();
        let err = handle.send_ping().unwrap_err();
        assert!(matches!(err, ChannelError::WouldBlock));
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_requests() {
        let (handle, _rx, open) = handle_pair(4);
        assert!(handle.is_open());

        open.send_replace(false);

        assert!(!handle.is_open());
        assert!(matches!(handle.send_ping(), Err(ChannelError::Closed)));
        // Resolves immediately once closed.
        tokio::time::timeout(Duration::from_millis(100), handle.closed())
            .await
            .expect("closed() should resolve after the channel closed");
    }

    #[tokio::test]
    async fn test_closed_resolves_when_state_changes() {
        let (handle, _rx, open) = handle_pair(4);
        let waiter = tokio::spawn({
            let handle = handle.clone();
            async move { handle.closed().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        open.send_replace(false);
        tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[test]
    fn test_take_buffer() {
        let mut buffer = Vec::new();
        assert!(take_buffer(&mut buffer).is_none());

        buffer.extend_from_slice(b"output");
        assert_eq!(take_buffer(&mut buffer).as_deref(), Some(&b"output"[..]));
        assert!(buffer.is_empty());
    }
}
