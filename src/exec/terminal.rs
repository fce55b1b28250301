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

//! Local terminal mode control.
//!
//! A [`TerminalController`] snapshots the terminal settings before its first
//! mutation and puts them back exactly once. On POSIX the snapshot is the
//! termios structure of stdin; on Windows it is the console input/output modes
//! together with the input/output code pages.

use std::time::Duration;

use super::error::TerminalError;
use super::protocol::TerminalSize;
use super::resize::ResizeEvents;

#[cfg(unix)]
mod posix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use posix::PosixTerminal;
#[cfg(windows)]
pub use windows::WindowsConsole;
#[cfg(windows)]
pub(crate) use windows::std_handle as windows_std_handle;

/// The terminal controller for the current platform.
#[cfg(unix)]
pub type PlatformTerminal = PosixTerminal;
#[cfg(windows)]
pub type PlatformTerminal = WindowsConsole;

/// Terminal mode transitions used by the relay.
pub trait TerminalController: Send {
    /// Snapshot the current settings, then switch to raw mode.
    ///
    /// The snapshot is taken before anything is changed, so a failure half way
    /// through can still be undone by [`TerminalController::restore`].
    fn enter_raw_mode(&mut self) -> Result<(), TerminalError>;

    /// Put back the snapshot, if one was taken. Later calls do nothing.
    fn restore(&mut self) -> Result<(), TerminalError>;

    fn is_raw(&self) -> bool;

    /// Current size, or `None` when it cannot be determined.
    fn size(&self) -> Option<TerminalSize>;

    /// Source of size-change notifications for the resize watcher.
    fn resize_events(&self, poll_interval: Duration) -> ResizeEvents;
}

/// Query the size of the controlling terminal.
pub fn current_size() -> Option<TerminalSize> {
    match crossterm::terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => Some(TerminalSize::new(cols, rows)),
        _ => None,
    }
}

/// Whether stdin is attached to a terminal.
pub fn stdin_is_terminal() -> bool {
    atty::is(atty::Stream::Stdin)
}

/// Whether a TTY should be requested, given what the user asked for.
///
/// Mirrors `kubectl exec -t`: a TTY needs a terminal on stdin, so the request
/// is dropped when stdin is redirected.
pub fn should_allocate_tty(requested: bool, stdin: bool) -> bool {
    requested && stdin && stdin_is_terminal()
}
