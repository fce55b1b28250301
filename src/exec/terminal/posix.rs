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

//! termios-based terminal control.

use std::io;
use std::os::fd::AsFd;
use std::time::Duration;

use nix::sys::termios::{self, SetArg, Termios};
use tracing::{debug, warn};

use super::{current_size, stdin_is_terminal, TerminalController};
use crate::exec::error::TerminalError;
use crate::exec::protocol::TerminalSize;
use crate::exec::resize::ResizeEvents;

/// Raw-mode control of the terminal on stdin.
#[derive(Default)]
pub struct PosixTerminal {
    saved: Option<Termios>,
}

impl PosixTerminal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TerminalController for PosixTerminal {
    fn enter_raw_mode(&mut self) -> Result<(), TerminalError> {
        if self.saved.is_some() {
            return Ok(());
        }
        if !stdin_is_terminal() {
            return Err(TerminalError::NotATerminal);
        }

        let stdin = io::stdin();
        let original = termios::tcgetattr(stdin.as_fd())
            .map_err(|e| TerminalError::Snapshot(io::Error::from(e)))?;

        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        self.saved = Some(original);

        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw)
            .map_err(|e| TerminalError::Apply(io::Error::from(e)))?;

        debug!("Terminal switched to raw mode");
        Ok(())
    }

    fn restore(&mut self) -> Result<(), TerminalError> {
        let Some(original) = self.saved.take() else {
            return Ok(());
        };

        // Queued output is written out under the raw settings first.
        termios::tcsetattr(io::stdin().as_fd(), SetArg::TCSADRAIN, &original)
            .map_err(|e| TerminalError::Restore(io::Error::from(e)))?;

        debug!("Terminal settings restored");
        Ok(())
    }

    fn is_raw(&self) -> bool {
        self.saved.is_some()
    }

    fn size(&self) -> Option<TerminalSize> {
        current_size()
    }

    fn resize_events(&self, poll_interval: Duration) -> ResizeEvents {
        match ResizeEvents::from_signal(Box::new(current_size)) {
            Ok(events) => events,
            Err(e) => {
                warn!("Cannot watch SIGWINCH ({e}); polling terminal size instead");
                ResizeEvents::polling(poll_interval, Box::new(current_size))
            }
        }
    }
}

impl Drop for PosixTerminal {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_without_snapshot_is_noop() {
        let mut terminal = PosixTerminal::new();
        assert!(!terminal.is_raw());
        assert!(terminal.restore().is_ok());
        assert!(terminal.restore().is_ok());
    }

    #[test]
    fn test_enter_raw_mode_requires_terminal() {
        // Under a test harness stdin is usually not a terminal; when it is,
        // the mode switch must be reversible.
        let mut terminal = PosixTerminal::new();
        match terminal.enter_raw_mode() {
            Err(TerminalError::NotATerminal) => assert!(!terminal.is_raw()),
            Ok(()) => {
                assert!(terminal.is_raw());
                terminal.restore().unwrap();
                assert!(!terminal.is_raw());
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
