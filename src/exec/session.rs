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

//! Entry points for running an exec session against a real cluster.

use tracing::{debug, error, info, warn};

use super::error::RelayError;
use super::relay::{EndReason, RelaySettings, SessionOutcome, StreamMode, TerminalRelay};
use super::stdio::ProcessStdio;
use super::terminal::{should_allocate_tty, PlatformTerminal};
use super::websocket::WebSocketChannel;
use crate::kube::{ConnectionParams, ExecTarget};

/// How to run a session.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Forward local stdin (`-i`).
    pub interactive: bool,
    /// Request a TTY and put the local terminal into raw mode (`-t`).
    pub tty: bool,
    pub container: Option<String>,
    pub connection: ConnectionParams,
    pub settings: RelaySettings,
}

impl ExecOptions {
    pub fn new(connection: ConnectionParams) -> Self {
        Self {
            interactive: true,
            tty: true,
            container: None,
            connection,
            settings: RelaySettings::default(),
        }
    }
}

/// A validated exec session, ready to connect.
#[derive(Debug)]
pub struct ExecSession {
    target: String,
    namespace: String,
    command: Vec<String>,
    options: ExecOptions,
}

impl ExecSession {
    /// Validate the request. No connection is made and no terminal state is
    /// touched until [`ExecSession::run`].
    pub fn new(
        target: impl Into<String>,
        command: Vec<String>,
        namespace: impl Into<String>,
        options: ExecOptions,
    ) -> Result<Self, RelayError> {
        let target = target.into();
        let namespace = namespace.into();

        if command.is_empty() || command.iter().all(|arg| arg.trim().is_empty()) {
            return Err(RelayError::EmptyCommand);
        }
        if target.trim().is_empty() {
            return Err(RelayError::MissingField("target"));
        }
        if namespace.trim().is_empty() {
            return Err(RelayError::MissingField("namespace"));
        }

        Ok(Self {
            target,
            namespace,
            command,
            options,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Stream settings after checking what the local terminal supports.
    pub fn stream_mode(&self) -> StreamMode {
        let tty = should_allocate_tty(self.options.tty, self.options.interactive);
        if self.options.tty && !tty {
            if self.options.interactive {
                warn!("Unable to use a TTY - input is not a terminal or the right kind of file");
            } else {
                warn!("Unable to use a TTY without stdin; pass -i together with -t");
            }
        }
        StreamMode {
            interactive: self.options.interactive,
            tty,
        }
    }

    pub fn exec_target(&self, mode: StreamMode) -> ExecTarget {
        ExecTarget {
            namespace: self.namespace.clone(),
            pod: self.target.clone(),
            container: self.options.container.clone(),
            command: self.command.clone(),
            stdin: mode.interactive,
            tty: mode.tty,
        }
    }

    /// Connect and relay until the session ends.
    pub async fn run(self) -> SessionOutcome {
        let mode = self.stream_mode();
        let exec_target = self.exec_target(mode);
        let label = format!("{}/{}", self.namespace, self.target);

        let (request, connector) = match self.options.connection.exec_request(&exec_target) {
            Ok(parts) => parts,
            Err(e) => {
                error!("Failed to prepare exec request for {label}: {e:#}");
                return SessionOutcome::failed(EndReason::ConnectFailed);
            }
        };

        debug!("Opening exec stream to {label}: {:?}", self.command);
        let channel = match WebSocketChannel::connect(request, connector).await {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to open exec stream to {label}: {e}");
                return SessionOutcome::failed(EndReason::ConnectFailed);
            }
        };
        info!("Connected to {label}");

        TerminalRelay::new(
            label,
            channel,
            PlatformTerminal::new(),
            ProcessStdio::new(),
            mode,
            self.options.settings,
        )
        .run()
        .await
    }
}

/// Run `command` in pod `target` and relay the local terminal to it.
///
/// Returns `Ok(true)` when the session completed or the user interrupted it,
/// `Ok(false)` when the stream could not be opened or sustained. Only invalid
/// arguments are reported as errors.
pub async fn run_interactive_session(
    target: &str,
    command: &[String],
    namespace: &str,
    options: &ExecOptions,
) -> Result<bool, RelayError> {
    let session = ExecSession::new(target, command.to_vec(), namespace, options.clone())?;
    Ok(session.run().await.success)
}
