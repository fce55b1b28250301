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

//! Signal handling for exec sessions.
//!
//! While a session runs, interrupt and termination signals are recorded
//! instead of killing the process, so the relay loop can unwind and restore
//! the terminal. The previous dispositions are put back afterwards.

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::debug;

const NONE: u8 = 0;
const INTERRUPT: u8 = 1;
const TERMINATE: u8 = 2;

/// Last signal received and not yet consumed. Termination outranks interrupt.
static PENDING: AtomicU8 = AtomicU8::new(NONE);

/// A signal the relay loop has to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    /// Ctrl-C outside raw mode; the session ends successfully.
    Interrupt,
    /// SIGTERM or SIGHUP; the session ends with a failure.
    Terminate,
}

fn record(value: u8) {
    PENDING.fetch_max(value, Ordering::SeqCst);
}

/// Installed session signal handlers. Dropping the guard restores the
/// handlers that were in place before.
pub struct SignalGuard {
    #[cfg(unix)]
    previous: Vec<(nix::sys::signal::Signal, nix::sys::signal::SigAction)>,
    #[cfg(not(unix))]
    listener: Option<tokio::task::JoinHandle<()>>,
}

impl SignalGuard {
    /// Consume the pending signal, if any.
    pub fn take_pending(&self) -> Option<SessionSignal> {
        match PENDING.swap(NONE, Ordering::SeqCst) {
            INTERRUPT => Some(SessionSignal::Interrupt),
            TERMINATE => Some(SessionSignal::Terminate),
            _ => None,
        }
    }
}

#[cfg(unix)]
extern "C" fn on_signal(signum: libc::c_int) {
    if signum == libc::SIGINT {
        record(INTERRUPT);
    } else {
        record(TERMINATE);
    }
}

#[cfg(unix)]
impl SignalGuard {
    /// Route SIGINT, SIGTERM and SIGHUP to the session.
    pub fn install() -> io::Result<Self> {
        use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

        PENDING.store(NONE, Ordering::SeqCst);

        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        // Built up incrementally so a failure part way restores what was replaced.
        let mut guard = Self {
            previous: Vec::with_capacity(3),
        };
        for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
            let previous = unsafe { sigaction(signal, &action) }.map_err(io::Error::from)?;
            guard.previous.push((signal, previous));
        }

        debug!("Session signal handlers installed");
        Ok(guard)
    }

    /// Put the previous handlers back. Later calls do nothing.
    pub fn restore(&mut self) {
        use nix::sys::signal::sigaction;

        if self.previous.is_empty() {
            return;
        }
        for (signal, previous) in self.previous.drain(..).rev() {
            if let Err(e) = unsafe { sigaction(signal, &previous) } {
                debug!("Failed to restore handler for {:?}: {}", signal, e);
            }
        }
        debug!("Previous signal handlers restored");
    }
}

#[cfg(not(unix))]
impl SignalGuard {
    /// Route Ctrl-C to the session. Must be called inside a tokio runtime.
    pub fn install() -> io::Result<Self> {
        PENDING.store(NONE, Ordering::SeqCst);

        let listener = tokio::spawn(async {
            while tokio::signal::ctrl_c().await.is_ok() {
                record(INTERRUPT);
            }
        });

        debug!("Session Ctrl-C listener installed");
        Ok(Self {
            listener: Some(listener),
        })
    }

    pub fn restore(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            debug!("Session Ctrl-C listener removed");
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::signal::{raise, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_interrupt_is_recorded() {
        let guard = SignalGuard::install().unwrap();
        assert_eq!(guard.take_pending(), None);

        raise(Signal::SIGINT).unwrap();
        assert_eq!(guard.take_pending(), Some(SessionSignal::Interrupt));
        assert_eq!(guard.take_pending(), None, "pending signal is consumed once");
    }

    #[test]
    #[serial]
    fn test_termination_outranks_interrupt() {
        let guard = SignalGuard::install().unwrap();

        raise(Signal::SIGTERM).unwrap();
        raise(Signal::SIGINT).unwrap();
        assert_eq!(guard.take_pending(), Some(SessionSignal::Terminate));
    }

    #[test]
    #[serial]
    fn test_previous_handler_is_restored() {
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        let original = unsafe { sigaction(Signal::SIGHUP, &ignore) }.unwrap();

        let mut guard = SignalGuard::install().unwrap();
        guard.restore();
        guard.restore();
        drop(guard);

        let current = unsafe { sigaction(Signal::SIGHUP, &original) }.unwrap();
        assert_eq!(current.handler(), SigHandler::SigIgn);
    }
}
