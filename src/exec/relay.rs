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

//! The terminal relay loop.
//!
//! One cooperative loop moves bytes between the local terminal and the exec
//! channel. Each iteration:
//!
//! 1. checks for a pending interrupt or termination signal,
//! 2. pumps the channel for a short time,
//! 3. writes buffered stdout, then stderr, to the local streams,
//! 4. reads whatever stdin has available and forwards it.
//!
//! Resize notifications and keep-alives run as two background workers that
//! only talk to the channel through a [`ChannelHandle`](super::ChannelHandle).
//! Whatever way the loop ends, [`SessionResources::teardown`] runs once before
//! [`TerminalRelay::run`] returns.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::channel::ExecChannel;
use super::constants::{
    CHANNEL_PAYLOAD_SIZE, DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_RESIZE_POLL_INTERVAL_MS,
    DEFAULT_UPDATE_TIMEOUT_MS, DEFAULT_WORKER_JOIN_TIMEOUT_MS, DEFAULT_WRITE_BACKOFF_MS,
    DEFAULT_WRITE_RETRY_LIMIT,
};
use super::error::{classify_io_error, ChannelError, IoDisposition, SessionError};
use super::heartbeat::{run_heartbeat, HeartbeatKind};
use super::resize::watch_resize;
use super::resources::SessionResources;
use super::signals::SessionSignal;
use super::stdio::{write_output, LocalStdio, OutputStream, WritePolicy};
use super::terminal::TerminalController;
use super::worker::Worker;

/// Timing and retry knobs of the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub update_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat: HeartbeatKind,
    pub resize_poll_interval: Duration,
    pub worker_join_timeout: Duration,
    pub write_policy: WritePolicy,
    /// Route SIGINT/SIGTERM to the session while it runs.
    pub handle_signals: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            update_timeout: Duration::from_millis(DEFAULT_UPDATE_TIMEOUT_MS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            heartbeat: HeartbeatKind::Ping,
            resize_poll_interval: Duration::from_millis(DEFAULT_RESIZE_POLL_INTERVAL_MS),
            worker_join_timeout: Duration::from_millis(DEFAULT_WORKER_JOIN_TIMEOUT_MS),
            write_policy: WritePolicy {
                retry_limit: DEFAULT_WRITE_RETRY_LIMIT,
                backoff: Duration::from_millis(DEFAULT_WRITE_BACKOFF_MS),
            },
            handle_signals: true,
        }
    }
}

/// Which local streams take part in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamMode {
    /// Forward local stdin and run the full interactive loop.
    pub interactive: bool,
    /// Put the local terminal into raw mode and track its size.
    pub tty: bool,
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initializing,
    Active,
    ShuttingDown,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The remote side closed the stream.
    RemoteClosed,
    /// The connection was reset or a pipe broke.
    ConnectionLost,
    /// Ctrl-C delivered to this process.
    UserInterrupt,
    /// SIGTERM or SIGHUP delivered to this process.
    Terminated,
    /// Raw mode, stdio or workers could not be set up.
    SetupFailed,
    /// The exec stream could not be opened.
    ConnectFailed,
    /// The server reported a failure status without an exit code, such as a
    /// missing executable or container.
    RemoteFailed,
    /// Any other failure.
    Failed,
}

impl EndReason {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            EndReason::RemoteClosed | EndReason::ConnectionLost | EndReason::UserInterrupt
        )
    }
}

/// Result of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub success: bool,
    pub reason: EndReason,
    /// Exit code of the remote process, when the server reported one.
    pub exit_code: Option<i32>,
}

impl SessionOutcome {
    pub fn new(reason: EndReason, exit_code: Option<i32>) -> Self {
        Self {
            success: reason.is_success(),
            reason,
            exit_code,
        }
    }

    pub fn failed(reason: EndReason) -> Self {
        Self {
            success: false,
            reason,
            exit_code: None,
        }
    }

    /// Exit status for this process: the remote exit code when known,
    /// otherwise 0 on success and 1 on failure.
    pub fn process_exit_code(&self) -> i32 {
        match (self.success, self.exit_code) {
            (true, Some(code)) => code,
            (true, None) => 0,
            (false, _) => 1,
        }
    }
}

/// The relay core, generic over its channel, terminal and stdio so it can run
/// against test doubles.
pub struct TerminalRelay<C, T, S>
where
    C: ExecChannel,
    T: TerminalController,
    S: LocalStdio,
{
    target: String,
    resources: SessionResources<C, T, S>,
    mode: StreamMode,
    settings: RelaySettings,
    state: SessionState,
}

impl<C, T, S> TerminalRelay<C, T, S>
where
    C: ExecChannel,
    T: TerminalController,
    S: LocalStdio,
{
    pub fn new(
        target: impl Into<String>,
        channel: C,
        terminal: T,
        stdio: S,
        mode: StreamMode,
        settings: RelaySettings,
    ) -> Self {
        let resources =
            SessionResources::new(channel, terminal, stdio, settings.worker_join_timeout);
        Self {
            target: target.into(),
            resources,
            mode,
            settings,
            state: SessionState::Initializing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to the end and release everything it acquired.
    pub async fn run(mut self) -> SessionOutcome {
        let result = AssertUnwindSafe(self.drive()).catch_unwind().await;

        self.state = SessionState::ShuttingDown;
        self.resources.teardown().await;
        self.state = SessionState::Closed;

        let status = self.resources.channel().exit_status();
        let exit_code = status.and_then(|status| status.exit_code());

        match result {
            Ok(Ok(reason)) => {
                let remote_failure = status.filter(|s| {
                    reason.is_success() && !s.is_success() && exit_code.is_none()
                });
                if let Some(status) = remote_failure {
                    error!(
                        "Exec on {} failed: {}",
                        self.target,
                        status.message.as_deref().unwrap_or(status.status.as_str())
                    );
                    return SessionOutcome::new(EndReason::RemoteFailed, None);
                }
                debug!("Exec session on {} ended: {:?}", self.target, reason);
                SessionOutcome::new(reason, exit_code)
            }
            Ok(Err(e)) => {
                error!("Exec session on {} failed: {}", self.target, e);
                SessionOutcome::new(EndReason::Failed, exit_code)
            }
            Err(panic) => {
                error!(
                    "Exec session on {} aborted unexpectedly: {}",
                    self.target,
                    panic_message(panic.as_ref())
                );
                SessionOutcome::new(EndReason::Failed, exit_code)
            }
        }
    }

    async fn drive(&mut self) -> Result<EndReason, SessionError> {
        if !self.mode.interactive {
            self.state = SessionState::Active;
            return self.relay_output().await;
        }

        if let Err(e) = self.setup() {
            error!("Failed to set up exec session on {}: {}", self.target, e);
            return Ok(EndReason::SetupFailed);
        }

        self.state = SessionState::Active;
        self.relay_interactive().await
    }

    fn setup(&mut self) -> Result<(), SessionError> {
        if self.settings.handle_signals {
            if let Err(e) = self.resources.install_signals() {
                warn!("Session signal handlers unavailable: {e}");
            }
        }

        if self.mode.tty {
            self.resources.enter_raw_mode()?;
        }

        let handle = self.resources.channel().handle();
        let initial_size = if self.mode.tty {
            self.resources.terminal().size()
        } else {
            None
        };

        if self.mode.tty {
            let mut events = self
                .resources
                .terminal()
                .resize_events(self.settings.resize_poll_interval);
            if let Some(size) = initial_size {
                events.seed(size);
            }
            let watcher_handle = handle.clone();
            self.resources.add_worker(Worker::spawn("resize", move |token| {
                watch_resize(events, watcher_handle, token)
            }));
        }

        let heartbeat_handle = handle.clone();
        let interval = self.settings.heartbeat_interval;
        let kind = self.settings.heartbeat;
        self.resources.add_worker(Worker::spawn("heartbeat", move |token| {
            run_heartbeat(heartbeat_handle, interval, kind, token)
        }));

        self.resources.prepare_stdio()?;

        if self.mode.tty {
            let size = initial_size.unwrap_or_default();
            match handle.send_resize(size) {
                Ok(()) => debug!("Initial terminal size {size} sent"),
                Err(e) => debug!("Initial terminal size not sent: {e}"),
            }
        }

        Ok(())
    }

    /// Non-interactive mode: print output until the remote closes.
    async fn relay_output(&mut self) -> Result<EndReason, SessionError> {
        while self.resources.channel().is_open() {
            if let Some(reason) = self.pump().await? {
                return Ok(reason);
            }
            if let Some(reason) = self.forward_output().await? {
                return Ok(reason);
            }
        }

        Ok(self
            .forward_output()
            .await?
            .unwrap_or(EndReason::RemoteClosed))
    }

    async fn relay_interactive(&mut self) -> Result<EndReason, SessionError> {
        let mut input = vec![0u8; CHANNEL_PAYLOAD_SIZE];
        let mut pending: Option<Vec<u8>> = None;
        let mut stdin_open = true;

        while self.resources.channel().is_open() {
            match self.resources.pending_signal() {
                Some(SessionSignal::Interrupt) => {
                    debug!("Interrupt received; ending session on {}", self.target);
                    return Ok(EndReason::UserInterrupt);
                }
                Some(SessionSignal::Terminate) => {
                    warn!("Termination requested; ending session on {}", self.target);
                    return Ok(EndReason::Terminated);
                }
                None => {}
            }

            if let Some(reason) = self.pump().await? {
                return Ok(reason);
            }
            if let Some(reason) = self.forward_output().await? {
                return Ok(reason);
            }

            if stdin_open && pending.is_none() {
                match self.resources.stdio.read_input(&mut input) {
                    Ok(0) => {
                        debug!("Local stdin reached EOF; no more input is forwarded");
                        stdin_open = false;
                    }
                    Ok(n) => pending = Some(input[..n].to_vec()),
                    Err(e) => match classify_io_error(&e) {
                        IoDisposition::WouldBlock => {}
                        IoDisposition::SessionEnded => {
                            debug!("Local stdin closed: {e}");
                            stdin_open = false;
                        }
                        IoDisposition::Fatal => return Err(e.into()),
                    },
                }
            }

            if let Some(data) = pending.take() {
                if let Err(e) = self.resources.channel_mut().write_stdin(&data).await {
                    match e.disposition() {
                        IoDisposition::WouldBlock => {
                            debug!("Exec channel busy; retrying {} stdin bytes", data.len());
                            pending = Some(data);
                        }
                        IoDisposition::SessionEnded => {
                            debug!("Exec stream ended while writing stdin: {e}");
                            return Ok(EndReason::ConnectionLost);
                        }
                        IoDisposition::Fatal => return Err(e.into()),
                    }
                }
            }
        }

        Ok(self
            .forward_output()
            .await?
            .unwrap_or(EndReason::RemoteClosed))
    }

    /// Pump the channel once. Returns a reason if the session has ended.
    async fn pump(&mut self) -> Result<Option<EndReason>, SessionError> {
        let timeout = self.settings.update_timeout;
        match self.resources.channel_mut().update(timeout).await {
            Ok(()) => Ok(None),
            Err(e) => self.classify_channel_error(e).await,
        }
    }

    async fn classify_channel_error(
        &mut self,
        e: ChannelError,
    ) -> Result<Option<EndReason>, SessionError> {
        match e.disposition() {
            IoDisposition::WouldBlock => Ok(None),
            IoDisposition::SessionEnded => {
                debug!("Exec stream to {} ended: {}", self.target, e);
                // Output received before the reset is still shown.
                self.forward_output().await?;
                Ok(Some(EndReason::ConnectionLost))
            }
            IoDisposition::Fatal => Err(e.into()),
        }
    }

    /// Write buffered stdout, then stderr. Returns a reason if a local stream
    /// went away.
    async fn forward_output(&mut self) -> Result<Option<EndReason>, SessionError> {
        let policy = self.settings.write_policy;

        for stream in [OutputStream::Stdout, OutputStream::Stderr] {
            let channel = self.resources.channel_mut();
            let data = match stream {
                OutputStream::Stdout => channel.take_stdout(),
                OutputStream::Stderr => channel.take_stderr(),
            };
            let Some(data) = data else {
                continue;
            };

            if let Err(e) = write_output(&mut self.resources.stdio, stream, &data, &policy).await {
                match classify_io_error(&e) {
                    IoDisposition::SessionEnded => {
                        debug!("Local {:?} closed: {}", stream, e);
                        return Ok(Some(EndReason::ConnectionLost));
                    }
                    _ => return Err(e.into()),
                }
            }
        }
        Ok(None)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
