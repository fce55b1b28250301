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

//! Terminal resize detection and the resize watcher worker.
//!
//! POSIX terminals announce size changes with `SIGWINCH`; elsewhere the size
//! is polled. Both producers sit behind [`ResizeEvents`], which yields a new
//! size only when it differs from the last one reported.

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::channel::ChannelHandle;
use super::error::IoDisposition;
use super::protocol::TerminalSize;

/// Measures the local terminal.
pub type SizeReader = Box<dyn Fn() -> Option<TerminalSize> + Send + Sync>;

enum Source {
    #[cfg(unix)]
    Signal(tokio::signal::unix::Signal),
    Poll(Interval),
    Disabled,
}

/// Stream of terminal size changes.
pub struct ResizeEvents {
    source: Source,
    read_size: SizeReader,
    last: Option<TerminalSize>,
}

impl ResizeEvents {
    /// Report a new size whenever `SIGWINCH` arrives.
    #[cfg(unix)]
    pub fn from_signal(read_size: SizeReader) -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let winch = signal(SignalKind::window_change())?;
        Ok(Self {
            source: Source::Signal(winch),
            read_size,
            last: None,
        })
    }

    /// Check the size every `interval`.
    pub fn polling(interval: Duration, read_size: SizeReader) -> Self {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            source: Source::Poll(ticker),
            read_size,
            last: None,
        }
    }

    /// A source that never produces an event.
    pub fn disabled() -> Self {
        Self {
            source: Source::Disabled,
            read_size: Box::new(|| None),
            last: None,
        }
    }

    /// Remember `size` as already reported.
    pub fn seed(&mut self, size: TerminalSize) {
        self.last = Some(size);
    }

    /// Wait for the next size change. Returns `None` when the source ends.
    pub async fn next(&mut self) -> Option<TerminalSize> {
        loop {
            match &mut self.source {
                #[cfg(unix)]
                Source::Signal(winch) => winch.recv().await?,
                Source::Poll(ticker) => {
                    ticker.tick().await;
                }
                Source::Disabled => std::future::pending::<()>().await,
            }

            let Some(size) = (self.read_size)() else {
                continue;
            };
            if self.last == Some(size) {
                continue;
            }
            self.last = Some(size);
            return Some(size);
        }
    }
}

/// Resize watcher body: forward every size change until stopped.
pub async fn watch_resize(
    mut events: ResizeEvents,
    handle: ChannelHandle,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = handle.closed() => {
                debug!("Exec channel closed; resize watcher exiting");
                break;
            }
            next = events.next() => {
                let Some(size) = next else {
                    debug!("Resize event source ended");
                    break;
                };
                match handle.send_resize(size) {
                    Ok(()) => trace!("Forwarded terminal resize to {size}"),
                    Err(e) if e.disposition() == IoDisposition::WouldBlock => {
                        debug!("Outbound queue full; skipping resize to {size}");
                    }
                    Err(e) => {
                        debug!("Resize watcher stopping: {e}");
                        break;
                    }
                }
            }
        }
    }
}
