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

#![cfg(unix)]

mod common;

use common::{test_settings, FakeChannel, FakeStdio, FakeTerminal};
use kexec::exec::{EndReason, RelaySettings, StreamMode, TerminalRelay, TerminalSize};
use nix::sys::signal::{raise, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use serial_test::serial;

const INTERACTIVE_TTY: StreamMode = StreamMode {
    interactive: true,
    tty: true,
};

fn signal_settings() -> RelaySettings {
    RelaySettings {
        handle_signals: true,
        ..test_settings()
    }
}

/// Ignore `signal` and return the disposition it replaced.
fn ignore(signal: Signal) -> SigAction {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe { sigaction(signal, &ignore) }.unwrap()
}

/// Put `previous` back and return the disposition that was in place.
fn reset(signal: Signal, previous: &SigAction) -> SigHandler {
    unsafe { sigaction(signal, previous) }.unwrap().handler()
}

#[tokio::test]
#[serial]
async fn test_interrupt_ends_session_cleanly() {
    let previous = ignore(Signal::SIGINT);

    let channel = FakeChannel::new(1000)
        .with_stdout(0, b"$ ")
        .on_update(3, || raise(Signal::SIGINT).unwrap());
    let terminal = FakeTerminal::new(Some(TerminalSize::new(80, 24)));
    let stdio = FakeStdio::new();
    let (channel_log, terminal_log, stdio_log) = (channel.log(), terminal.log(), stdio.log());

    let outcome = TerminalRelay::new(
        "agent-0",
        channel,
        terminal,
        stdio,
        INTERACTIVE_TTY,
        signal_settings(),
    )
    .run()
    .await;

    assert!(outcome.success);
    assert_eq!(outcome.reason, EndReason::UserInterrupt);
    assert_eq!(outcome.process_exit_code(), 0);
    assert_eq!(stdio_log.stdout(), b"$ ");
    assert!(channel_log.updates.load(std::sync::atomic::Ordering::SeqCst) < 1000);
    assert_eq!(channel_log.closes(), 1);
    assert_eq!(terminal_log.restores(), 1);
    assert_eq!(reset(Signal::SIGINT, &previous), SigHandler::SigIgn);
}

#[tokio::test]
#[serial]
async fn test_termination_fails_session() {
    let previous = ignore(Signal::SIGTERM);

    let channel = FakeChannel::new(1000).on_update(2, || raise(Signal::SIGTERM).unwrap());
    let terminal = FakeTerminal::new(Some(TerminalSize::new(80, 24)));
    let (channel_log, terminal_log) = (channel.log(), terminal.log());

    let outcome = TerminalRelay::new(
        "agent-0",
        channel,
        terminal,
        FakeStdio::new(),
        INTERACTIVE_TTY,
        signal_settings(),
    )
    .run()
    .await;

    assert!(!outcome.success);
    assert_eq!(outcome.reason, EndReason::Terminated);
    assert_eq!(outcome.process_exit_code(), 1);
    assert_eq!(channel_log.closes(), 1);
    assert_eq!(terminal_log.restores(), 1);
    assert_eq!(reset(Signal::SIGTERM, &previous), SigHandler::SigIgn);
}

#[tokio::test]
#[serial]
async fn test_hangup_handler_is_restored_after_normal_end() {
    let previous = ignore(Signal::SIGHUP);

    let channel = FakeChannel::new(3);
    let terminal = FakeTerminal::new(Some(TerminalSize::new(80, 24)));
    let terminal_log = terminal.log();

    let outcome = TerminalRelay::new(
        "agent-0",
        channel,
        terminal,
        FakeStdio::new(),
        INTERACTIVE_TTY,
        signal_settings(),
    )
    .run()
    .await;

    assert!(outcome.success);
    assert_eq!(outcome.reason, EndReason::RemoteClosed);
    assert_eq!(terminal_log.restores(), 1);
    assert_eq!(reset(Signal::SIGHUP, &previous), SigHandler::SigIgn);
}
