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

//! Test doubles for driving the relay without a cluster or a terminal.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kexec::exec::{
    ChannelError, ChannelHandle, ExecChannel, ExecStatus, LocalStdio, Outbound, OutputStream,
    RelaySettings, ResizeEvents, TerminalController, TerminalError, TerminalSize, WritePolicy,
};
use tokio::sync::{mpsc, watch};

/// Settings for tests: no process-wide signal handlers and fast retries.
pub fn test_settings() -> RelaySettings {
    RelaySettings {
        update_timeout: Duration::from_millis(5),
        worker_join_timeout: Duration::from_millis(200),
        write_policy: WritePolicy {
            retry_limit: 8,
            backoff: Duration::ZERO,
        },
        handle_signals: false,
        ..RelaySettings::default()
    }
}

/// What a [`FakeChannel`] saw, shared with the test after the relay consumed it.
#[derive(Default)]
pub struct ChannelLog {
    pub updates: AtomicUsize,
    pub closes: AtomicUsize,
    pub stdin_attempts: AtomicUsize,
    pub stdin: Mutex<Vec<Vec<u8>>>,
    outbound: Mutex<Option<mpsc::Receiver<Outbound>>>,
}

impl ChannelLog {
    /// Requests queued through the channel handle so far.
    pub fn drain_outbound(&self) -> Vec<Outbound> {
        let mut requests = Vec::new();
        if let Some(rx) = self.outbound.lock().unwrap().as_mut() {
            while let Ok(request) = rx.try_recv() {
                requests.push(request);
            }
        }
        requests
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Stdin writes tried, including refused ones.
    pub fn stdin_attempts(&self) -> usize {
        self.stdin_attempts.load(Ordering::SeqCst)
    }

    pub fn stdin_writes(&self) -> Vec<Vec<u8>> {
        self.stdin.lock().unwrap().clone()
    }
}

type UpdateHook = Box<dyn FnOnce() + Send>;

/// Scripted exec channel that stays open for a fixed number of updates.
pub struct FakeChannel {
    open_for: usize,
    updates: usize,
    closed: bool,
    stdout_script: HashMap<usize, Vec<u8>>,
    stderr_script: HashMap<usize, Vec<u8>>,
    update_error: Option<(usize, ChannelError)>,
    stdin_error: Option<ChannelError>,
    stdin_busy: usize,
    panic_on_update: Option<usize>,
    hooks: HashMap<usize, UpdateHook>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    status: Option<ExecStatus>,
    tx: mpsc::Sender<Outbound>,
    open_tx: watch::Sender<bool>,
    open_rx: watch::Receiver<bool>,
    log: Arc<ChannelLog>,
}

impl FakeChannel {
    pub fn new(open_for: usize) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let (open_tx, open_rx) = watch::channel(open_for > 0);
        let log = Arc::new(ChannelLog::default());
        *log.outbound.lock().unwrap() = Some(rx);

        Self {
            open_for,
            updates: 0,
            closed: open_for == 0,
            stdout_script: HashMap::new(),
            stderr_script: HashMap::new(),
            update_error: None,
            stdin_error: None,
            stdin_busy: 0,
            panic_on_update: None,
            hooks: HashMap::new(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            status: None,
            tx,
            open_tx,
            open_rx,
            log,
        }
    }

    /// Deliver `data` on stdout during update number `index` (zero based).
    pub fn with_stdout(mut self, index: usize, data: &[u8]) -> Self {
        self.stdout_script.insert(index, data.to_vec());
        self
    }

    pub fn with_stderr(mut self, index: usize, data: &[u8]) -> Self {
        self.stderr_script.insert(index, data.to_vec());
        self
    }

    /// Fail update number `index` with `error`, after delivering its output.
    pub fn with_update_error(mut self, index: usize, error: ChannelError) -> Self {
        self.update_error = Some((index, error));
        self
    }

    /// Fail every stdin write with `error`.
    pub fn with_stdin_error(mut self, error: ChannelError) -> Self {
        self.stdin_error = Some(error);
        self
    }

    /// Refuse the first `count` stdin writes with would-block.
    pub fn with_stdin_would_block(mut self, count: usize) -> Self {
        self.stdin_busy = count;
        self
    }

    /// Run `hook` at the start of update number `index`.
    pub fn on_update(mut self, index: usize, hook: impl FnOnce() + Send + 'static) -> Self {
        self.hooks.insert(index, Box::new(hook));
        self
    }

    pub fn with_panic_on_update(mut self, index: usize) -> Self {
        self.panic_on_update = Some(index);
        self
    }

    pub fn with_status(mut self, payload: &[u8]) -> Self {
        self.status = Some(ExecStatus::parse(payload));
        self
    }

    pub fn log(&self) -> Arc<ChannelLog> {
        Arc::clone(&self.log)
    }

    fn mark_closed(&mut self) {
        self.closed = true;
        self.open_tx.send_replace(false);
    }
}

#[async_trait]
impl ExecChannel for FakeChannel {
    fn is_open(&self) -> bool {
        !self.closed
    }

    async fn update(&mut self, _timeout: Duration) -> Result<(), ChannelError> {
        tokio::task::yield_now().await;

        let index = self.updates;
        self.updates += 1;
        self.log.updates.fetch_add(1, Ordering::SeqCst);

        if let Some(hook) = self.hooks.remove(&index) {
            hook();
        }
        if self.panic_on_update == Some(index) {
            panic!("scripted panic in update {index}");
        }

        if let Some(data) = self.stdout_script.remove(&index) {
            self.stdout.extend_from_slice(&data);
        }
        if let Some(data) = self.stderr_script.remove(&index) {
            self.stderr.extend_from_slice(&data);
        }

        if matches!(&self.update_error, Some((at, _)) if *at == index) {
            if let Some((_, error)) = self.update_error.take() {
                self.mark_closed();
                return Err(error);
            }
        }

        if self.updates >= self.open_for {
            self.mark_closed();
        }
        Ok(())
    }

    fn take_stdout(&mut self) -> Option<Vec<u8>> {
        (!self.stdout.is_empty()).then(|| std::mem::take(&mut self.stdout))
    }

    fn take_stderr(&mut self) -> Option<Vec<u8>> {
        (!self.stderr.is_empty()).then(|| std::mem::take(&mut self.stderr))
    }

    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        self.log.stdin_attempts.fetch_add(1, Ordering::SeqCst);
        if self.stdin_busy > 0 {
            self.stdin_busy -= 1;
            return Err(ChannelError::WouldBlock);
        }
        if let Some(error) = self.stdin_error.take() {
            self.mark_closed();
            return Err(error);
        }
        self.log.stdin.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    fn handle(&self) -> ChannelHandle {
        ChannelHandle::new(self.tx.clone(), self.open_rx.clone())
    }

    fn exit_status(&self) -> Option<&ExecStatus> {
        self.status.as_ref()
    }

    fn close(&mut self) {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        self.mark_closed();
    }
}

/// Calls made on a [`FakeTerminal`].
#[derive(Default)]
pub struct TerminalLog {
    pub raw_calls: AtomicUsize,
    pub restore_calls: AtomicUsize,
    pub size_calls: AtomicUsize,
    pub resize_event_calls: AtomicUsize,
}

impl TerminalLog {
    pub fn total_calls(&self) -> usize {
        self.raw_calls.load(Ordering::SeqCst)
            + self.restore_calls.load(Ordering::SeqCst)
            + self.size_calls.load(Ordering::SeqCst)
            + self.resize_event_calls.load(Ordering::SeqCst)
    }

    pub fn restores(&self) -> usize {
        self.restore_calls.load(Ordering::SeqCst)
    }
}

pub struct FakeTerminal {
    raw: bool,
    size: Option<TerminalSize>,
    fail_raw: bool,
    log: Arc<TerminalLog>,
}

impl FakeTerminal {
    pub fn new(size: Option<TerminalSize>) -> Self {
        Self {
            raw: false,
            size,
            fail_raw: false,
            log: Arc::new(TerminalLog::default()),
        }
    }

    pub fn failing_raw_mode() -> Self {
        Self {
            fail_raw: true,
            ..Self::new(None)
        }
    }

    pub fn log(&self) -> Arc<TerminalLog> {
        Arc::clone(&self.log)
    }
}

impl TerminalController for FakeTerminal {
    fn enter_raw_mode(&mut self) -> Result<(), TerminalError> {
        self.log.raw_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_raw {
            return Err(TerminalError::NotATerminal);
        }
        self.raw = true;
        Ok(())
    }

    fn restore(&mut self) -> Result<(), TerminalError> {
        self.log.restore_calls.fetch_add(1, Ordering::SeqCst);
        self.raw = false;
        Ok(())
    }

    fn is_raw(&self) -> bool {
        self.raw
    }

    fn size(&self) -> Option<TerminalSize> {
        self.log.size_calls.fetch_add(1, Ordering::SeqCst);
        self.size
    }

    fn resize_events(&self, _poll_interval: Duration) -> ResizeEvents {
        self.log.resize_event_calls.fetch_add(1, Ordering::SeqCst);
        ResizeEvents::disabled()
    }
}

/// Captured output and call counts of a [`FakeStdio`].
#[derive(Default)]
pub struct StdioLog {
    pub stdout: Mutex<Vec<u8>>,
    pub stderr: Mutex<Vec<u8>>,
    pub prepare_calls: AtomicUsize,
    pub restore_calls: AtomicUsize,
    pub write_attempts: AtomicUsize,
}

impl StdioLog {
    pub fn stdout(&self) -> Vec<u8> {
        self.stdout.lock().unwrap().clone()
    }

    pub fn stderr(&self) -> Vec<u8> {
        self.stderr.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }
}

pub struct FakeStdio {
    input: VecDeque<Vec<u8>>,
    eof_after_input: bool,
    block_writes: bool,
    log: Arc<StdioLog>,
}

impl FakeStdio {
    /// Stdin that never has data; output is captured.
    pub fn new() -> Self {
        Self {
            input: VecDeque::new(),
            eof_after_input: false,
            block_writes: false,
            log: Arc::new(StdioLog::default()),
        }
    }

    pub fn with_input(mut self, chunk: &[u8]) -> Self {
        self.input.push_back(chunk.to_vec());
        self
    }

    /// Report end of input once the scripted chunks are read.
    pub fn with_eof(mut self) -> Self {
        self.eof_after_input = true;
        self
    }

    /// Every output write reports would-block.
    pub fn blocking_writes(mut self) -> Self {
        self.block_writes = true;
        self
    }

    pub fn log(&self) -> Arc<StdioLog> {
        Arc::clone(&self.log)
    }
}

impl LocalStdio for FakeStdio {
    fn prepare(&mut self) -> io::Result<()> {
        self.log.prepare_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        self.log.restore_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_input(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.input.pop_front() {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                Ok(n)
            }
            None if self.eof_after_input => Ok(0),
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn write_output(&mut self, stream: OutputStream, data: &[u8]) -> io::Result<usize> {
        self.log.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.block_writes {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let target = match stream {
            OutputStream::Stdout => &self.log.stdout,
            OutputStream::Stderr => &self.log.stderr,
        };
        target.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush_output(&mut self, _stream: OutputStream) -> io::Result<()> {
        Ok(())
    }
}
