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

//! Ownership of everything a session acquires.
//!
//! Each resource is registered here the moment it is acquired, and
//! [`SessionResources::teardown`] releases them in a fixed order exactly once:
//! workers, terminal mode, stdio flags, channel, signal handlers. If the
//! session is dropped without a teardown (a panic unwinding through the relay),
//! `Drop` performs the synchronous part of the same sequence.

use std::io;
use std::time::Duration;

use tracing::{debug, warn};

use super::channel::ExecChannel;
use super::error::TerminalError;
use super::signals::{SessionSignal, SignalGuard};
use super::stdio::LocalStdio;
use super::terminal::TerminalController;
use super::worker::{stop_all, Worker};

pub struct SessionResources<C, T, S>
where
    C: ExecChannel,
    T: TerminalController,
    S: LocalStdio,
{
    pub(crate) channel: C,
    pub(crate) terminal: T,
    pub(crate) stdio: S,
    workers: Vec<Worker>,
    signals: Option<SignalGuard>,
    raw_mode: bool,
    stdio_prepared: bool,
    torn_down: bool,
    join_timeout: Duration,
}

impl<C, T, S> SessionResources<C, T, S>
where
    C: ExecChannel,
    T: TerminalController,
    S: LocalStdio,
{
    pub fn new(channel: C, terminal: T, stdio: S, join_timeout: Duration) -> Self {
        Self {
            channel,
            terminal,
            stdio,
            workers: Vec::with_capacity(2),
            signals: None,
            raw_mode: false,
            stdio_prepared: false,
            torn_down: false,
            join_timeout,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    pub fn stdio(&self) -> &S {
        &self.stdio
    }

    pub fn install_signals(&mut self) -> io::Result<()> {
        if self.signals.is_none() {
            self.signals = Some(SignalGuard::install()?);
        }
        Ok(())
    }

    pub fn pending_signal(&self) -> Option<SessionSignal> {
        self.signals.as_ref().and_then(SignalGuard::take_pending)
    }

    /// Enter raw mode. Registered before the switch, so a partial switch is
    /// still undone.
    pub fn enter_raw_mode(&mut self) -> Result<(), TerminalError> {
        self.raw_mode = true;
        self.terminal.enter_raw_mode()
    }

    pub fn prepare_stdio(&mut self) -> io::Result<()> {
        self.stdio_prepared = true;
        self.stdio.prepare()
    }

    pub fn add_worker(&mut self, worker: Worker) {
        self.workers.push(worker);
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Release everything. Only the first call does any work.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if !self.workers.is_empty() {
            let total = self.workers.len();
            let stopped = stop_all(&mut self.workers, self.join_timeout).await;
            if stopped < total {
                warn!(
                    "{} of {} session workers had to be abandoned",
                    total - stopped,
                    total
                );
            }
        }

        self.release();
        debug!("Session teardown complete");
    }

    fn release(&mut self) {
        for worker in &mut self.workers {
            worker.abort();
        }
        self.workers.clear();

        if self.raw_mode {
            self.raw_mode = false;
            if let Err(e) = self.terminal.restore() {
                warn!("{e}");
            }
        }

        if self.stdio_prepared {
            self.stdio_prepared = false;
            if let Err(e) = self.stdio.restore() {
                warn!("Failed to restore stdio flags: {e}");
            }
        }

        self.channel.close();

        if let Some(mut signals) = self.signals.take() {
            signals.restore();
        }
    }
}

impl<C, T, S> Drop for SessionResources<C, T, S>
where
    C: ExecChannel,
    T: TerminalController,
    S: LocalStdio,
{
    fn drop(&mut self) {
        if !self.torn_down {
            self.torn_down = true;
            debug!("Session dropped without teardown; releasing resources");
            self.release();
        }
    }
}
