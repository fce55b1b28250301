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

//! WebSocket implementation of [`ExecChannel`].
//!
//! The socket is split once: the relay loop reads from the stream half in
//! [`ExecChannel::update`], and a writer task owns the sink half and drains
//! the outbound queue shared with [`ChannelHandle`]s. The channel counts as
//! closed as soon as either half observes the end of the connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use super::channel::{take_buffer, ChannelHandle, ExecChannel, Outbound};
use super::constants::{CHANNEL_BUFFER_SIZE, OUTBOUND_QUEUE_SIZE};
use super::error::{ChannelError, IoDisposition};
use super::protocol::{decode_frame, encode_frame, encode_resize, ExecStatus, StreamChannel};

type ReadHalf<S> = SplitStream<WebSocketStream<S>>;
type WriteHalf<S> = SplitSink<WebSocketStream<S>, Message>;

/// Exec channel over a WebSocket speaking `v4.channel.k8s.io`.
pub struct WebSocketChannel<S> {
    reader: ReadHalf<S>,
    outbound: mpsc::Sender<Outbound>,
    open: Arc<watch::Sender<bool>>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    status: Option<ExecStatus>,
    close_requested: bool,
}

/// Transport settings for the exec stream.
///
/// Writes are flushed once a full frame is buffered and back up to four
/// frames when the socket stalls. Reads have no tunable buffer in this
/// version of tungstenite: they grow in fixed 4 KiB chunks, so the default
/// frame and message limits stay in place.
pub(crate) fn stream_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.write_buffer_size = CHANNEL_BUFFER_SIZE;
    config.max_write_buffer_size = CHANNEL_BUFFER_SIZE * 4;
    config
}

impl WebSocketChannel<MaybeTlsStream<TcpStream>> {
    /// Open the exec stream described by `request`.
    ///
    /// The request must already carry the subprotocol and authorization
    /// headers; `connector` supplies the TLS trust settings for `wss` URLs.
    pub async fn connect(
        request: Request,
        connector: Option<Connector>,
    ) -> Result<Self, ChannelError> {
        let uri = request.uri().clone();
        let (stream, response) = tokio_tungstenite::connect_async_tls_with_config(
            request,
            Some(stream_config()),
            false,
            connector,
        )
        .await?;

        debug!(
            "Exec stream established to {} (HTTP {})",
            uri.path(),
            response.status()
        );
        Ok(Self::from_stream(stream))
    }
}

impl<S> WebSocketChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an already negotiated WebSocket stream.
    pub fn from_stream(stream: WebSocketStream<S>) -> Self {
        let (sink, reader) = stream.split();
        let (outbound, requests) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let (open, _) = watch::channel(true);
        let open = Arc::new(open);

        tokio::spawn(write_loop(sink, requests, Arc::clone(&open)));

        Self {
            reader,
            outbound,
            open,
            stdout: Vec::new(),
            stderr: Vec::new(),
            status: None,
            close_requested: false,
        }
    }

    fn mark_closed(&self) {
        self.open.send_replace(false);
    }

    fn ingest(
        &mut self,
        next: Option<Result<Message, tungstenite::Error>>,
    ) -> Result<(), ChannelError> {
        match next {
            None => {
                debug!("Exec stream ended");
                self.mark_closed();
                Ok(())
            }
            Some(Err(e)) => {
                self.mark_closed();
                Err(e.into())
            }
            Some(Ok(message)) => {
                self.handle_message(message);
                Ok(())
            }
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Binary(data) => self.route_frame(&data),
            Message::Text(text) => self.route_frame(text.as_bytes()),
            Message::Close(frame) => {
                debug!("Exec stream closed by server: {:?}", frame);
                self.mark_closed();
            }
            Message::Ping(_) | Message::Pong(_) => trace!("Exec stream control frame"),
            Message::Frame(_) => {}
        }
    }

    fn route_frame(&mut self, data: &[u8]) {
        let Some(frame) = decode_frame(data) else {
            return;
        };

        match frame.stream() {
            Some(StreamChannel::Stdout) => self.stdout.extend_from_slice(frame.payload),
            Some(StreamChannel::Stderr) => self.stderr.extend_from_slice(frame.payload),
            Some(StreamChannel::Error) if !frame.payload.is_empty() => {
                let status = ExecStatus::parse(frame.payload);
                debug!(
                    "Remote process finished: status={}, exit_code={:?}",
                    status.status,
                    status.exit_code()
                );
                self.status = Some(status);
            }
            _ => trace!("Ignoring frame on channel {}", frame.channel),
        }
    }
}

#[async_trait]
impl<S> ExecChannel for WebSocketChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    async fn update(&mut self, timeout: Duration) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Ok(());
        }

        let first = match tokio::time::timeout(timeout, self.reader.next()).await {
            Ok(next) => next,
            Err(_) => return Ok(()),
        };
        self.ingest(first)?;

        // Drain whatever else has already arrived without waiting again.
        while self.is_open() {
            match self.reader.next().now_or_never() {
                Some(next) => self.ingest(next)?,
                None => break,
            }
        }
        Ok(())
    }

    fn take_stdout(&mut self) -> Option<Vec<u8>> {
        take_buffer(&mut self.stdout)
    }

    fn take_stderr(&mut self) -> Option<Vec<u8>> {
        take_buffer(&mut self.stderr)
    }

    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        self.outbound
            .try_send(Outbound::Stdin(data.to_vec()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ChannelError::WouldBlock,
                mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
            })
    }

    fn handle(&self) -> ChannelHandle {
        ChannelHandle::new(self.outbound.clone(), self.open.subscribe())
    }

    fn exit_status(&self) -> Option<&ExecStatus> {
        self.status.as_ref()
    }

    fn close(&mut self) {
        if self.close_requested {
            return;
        }
        self.close_requested = true;

        if self.outbound.try_send(Outbound::Close).is_err() {
            debug!("Exec stream writer already gone; dropping connection");
        }
        self.mark_closed();
    }
}

async fn write_loop<S>(
    mut sink: WriteHalf<S>,
    mut requests: mpsc::Receiver<Outbound>,
    open: Arc<watch::Sender<bool>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    while let Some(request) = requests.recv().await {
        let message = match request {
            Outbound::Stdin(data) => Message::Binary(encode_frame(StreamChannel::Stdin, &data)),
            Outbound::Resize(size) => match encode_resize(size) {
                Ok(frame) => Message::Binary(frame),
                Err(e) => {
                    warn!("Dropping resize to {size}: {e}");
                    continue;
                }
            },
            Outbound::Ping => Message::Ping(Vec::new()),
            Outbound::Close => {
                if let Err(e) = sink.close().await {
                    debug!("Error while closing exec stream: {e}");
                }
                break;
            }
        };

        if let Err(e) = sink.send(message).await {
            let err = ChannelError::from(e);
            match err.disposition() {
                IoDisposition::SessionEnded => debug!("Exec stream writer stopped: {err}"),
                _ => warn!("Exec stream writer failed: {err}"),
            }
            break;
        }
    }

    open.send_replace(false);
}
