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

//! Error types for exec sessions and the classification of I/O failures.
//!
//! The relay never inspects numeric OS error codes. Every failure is mapped
//! onto an [`IoDisposition`] from the structured [`io::ErrorKind`] or the
//! [`tungstenite::Error`] variant, and the relay acts on that.

use std::io;

use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::ProtocolError;

/// What the relay should do about a failed I/O operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDisposition {
    /// Nothing could be transferred right now; try again on a later iteration.
    WouldBlock,
    /// The peer went away. The session ends normally.
    SessionEnded,
    /// Anything else. The session ends with a failure.
    Fatal,
}

/// Classify a standard I/O error.
pub fn classify_io_error(err: &io::Error) -> IoDisposition {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => IoDisposition::WouldBlock,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => IoDisposition::SessionEnded,
        _ => IoDisposition::Fatal,
    }
}

fn classify_transport_error(err: &tungstenite::Error) -> IoDisposition {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            IoDisposition::SessionEnded
        }
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            IoDisposition::SessionEnded
        }
        tungstenite::Error::Io(io_err) => classify_io_error(io_err),
        _ => IoDisposition::Fatal,
    }
}

/// Errors raised by an exec channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("exec channel cannot accept more data right now")]
    WouldBlock,

    #[error("exec channel is closed")]
    Closed,

    #[error("exec stream was reset: {0}")]
    Reset(String),

    #[error("exec protocol violation: {0}")]
    Protocol(String),

    #[error("failed to prepare exec connection: {0}")]
    Setup(String),

    #[error("websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("exec channel I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ChannelError {
    pub fn disposition(&self) -> IoDisposition {
        match self {
            ChannelError::WouldBlock => IoDisposition::WouldBlock,
            ChannelError::Closed | ChannelError::Reset(_) => IoDisposition::SessionEnded,
            ChannelError::Protocol(_) | ChannelError::Setup(_) => IoDisposition::Fatal,
            ChannelError::Transport(err) => classify_transport_error(err),
            ChannelError::Io(err) => classify_io_error(err),
        }
    }
}

/// Errors raised while switching terminal modes.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("standard input is not a terminal")]
    NotATerminal,

    #[error("failed to read terminal settings: {0}")]
    Snapshot(#[source] io::Error),

    #[error("failed to switch terminal into raw mode: {0}")]
    Apply(#[source] io::Error),

    #[error("failed to restore terminal settings: {0}")]
    Restore(#[source] io::Error),
}

/// Configuration errors detected before a session is created.
///
/// These are the only errors a caller of the relay ever observes; everything
/// that happens once a session exists is folded into its outcome.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("exec command must not be empty")]
    EmptyCommand,

    #[error("exec {0} must not be empty")]
    MissingField(&'static str),
}

/// Failures that end a running session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Terminal(#[from] TerminalError),

    #[error("local terminal I/O failed: {0}")]
    LocalIo(#[from] io::Error),
}
