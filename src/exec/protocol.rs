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

//! Framing of the Kubernetes exec stream (`v4.channel.k8s.io`).
//!
//! Every binary WebSocket message carries one sub-channel: the first byte is
//! the channel number and the rest is the payload. Stdin, stdout and stderr
//! carry raw bytes, the error channel carries a JSON `Status` object once the
//! remote process exits, and the resize channel carries a JSON terminal size.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::constants::{FALLBACK_COLUMNS, FALLBACK_ROWS};
use super::error::ChannelError;

/// WebSocket subprotocol negotiated with the API server.
pub const EXEC_SUBPROTOCOL: &str = "v4.channel.k8s.io";

/// Sub-channels multiplexed over one exec stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamChannel {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
    Error = 3,
    Resize = 4,
}

impl StreamChannel {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Stdin),
            1 => Some(Self::Stdout),
            2 => Some(Self::Stderr),
            3 => Some(Self::Error),
            4 => Some(Self::Resize),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Terminal geometry as sent on the resize channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    #[serde(rename = "Width")]
    pub width: u16,
    #[serde(rename = "Height")]
    pub height: u16,
}

impl TerminalSize {
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self::new(FALLBACK_COLUMNS, FALLBACK_ROWS)
    }
}

impl fmt::Display for TerminalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded frame borrowing its payload from the received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub channel: u8,
    pub payload: &'a [u8],
}

impl Frame<'_> {
    pub fn stream(&self) -> Option<StreamChannel> {
        StreamChannel::from_byte(self.channel)
    }
}

/// Prefix `payload` with its channel byte.
pub fn encode_frame(channel: StreamChannel, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.push(channel.as_byte());
    frame.extend_from_slice(payload);
    frame
}

/// Encode a resize notification frame.
pub fn encode_resize(size: TerminalSize) -> Result<Vec<u8>, ChannelError> {
    let payload = serde_json::to_vec(&size)
        .map_err(|e| ChannelError::Protocol(format!("failed to encode terminal size: {e}")))?;
    Ok(encode_frame(StreamChannel::Resize, &payload))
}

/// Split a received message into channel and payload.
///
/// Returns `None` for an empty message, which carries no channel at all.
pub fn decode_frame(data: &[u8]) -> Option<Frame<'_>> {
    let (&channel, payload) = data.split_first()?;
    Some(Frame { channel, payload })
}

/// The `Status` object delivered on the error channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ExecStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub details: Option<StatusDetails>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct StatusDetails {
    #[serde(default)]
    pub causes: Vec<StatusCause>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct StatusCause {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ExecStatus {
    /// Parse an error channel payload.
    ///
    /// Older API servers send plain text instead of a `Status` object; that
    /// text becomes the message of a failure status.
    pub fn parse(payload: &[u8]) -> Self {
        match serde_json::from_slice::<ExecStatus>(payload) {
            Ok(status) => status,
            Err(_) => ExecStatus {
                status: "Failure".to_string(),
                message: Some(String::from_utf8_lossy(payload).trim().to_string()),
                ..Default::default()
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "Success"
    }

    /// Exit code of the remote process, when the status carries one.
    pub fn exit_code(&self) -> Option<i32> {
        if self.is_success() {
            return Some(0);
        }
        if self.reason.as_deref() != Some("NonZeroExitCode") {
            return None;
        }
        self.details
            .as_ref()?
            .causes
            .iter()
            .find(|cause| cause.reason.as_deref() == Some("ExitCode"))
            .and_then(|cause| cause.message.as_deref())
            .and_then(|code| code.trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_channel_numbers() {
        assert_eq!(StreamChannel::Stdin.as_byte(), 0);
        assert_eq!(StreamChannel::Stdout.as_byte(), 1);
        assert_eq!(StreamChannel::Stderr.as_byte(), 2);
        assert_eq!(StreamChannel::Error.as_byte(), 3);
        assert_eq!(StreamChannel::Resize.as_byte(), 4);
        assert_eq!(StreamChannel::from_byte(4), Some(StreamChannel::Resize));
        assert_eq!(StreamChannel::from_byte(9), None);
    }

    #[test]
    fn test_encode_frame_prefixes_channel() {
        let frame = encode_frame(StreamChannel::Stdin, b"ls -la\n");
        assert_eq!(frame[0], 0);
        assert_eq!(&frame[1..], b"ls -la\n");
    }

    #[test]
    fn test_resize_payload_shape() {
        let frame = encode_resize(TerminalSize::new(120, 40)).unwrap();
        assert_eq!(frame[0], 4);
        assert_eq!(
            std::str::from_utf8(&frame[1..]).unwrap(),
            r#"{"Width":120,"Height":40}"#
        );
    }

    #[test]
    fn test_decode_frame() {
        let frame = decode_frame(&[1, b'h', b'i']).unwrap();
        assert_eq!(frame.stream(), Some(StreamChannel::Stdout));
        assert_eq!(frame.payload, b"hi");

        // A bare channel byte is a valid frame with an empty payload.
        let frame = decode_frame(&[2]).unwrap();
        assert_eq!(frame.stream(), Some(StreamChannel::Stderr));
        assert!(frame.payload.is_empty());

        assert!(decode_frame(&[]).is_none());
    }

    #[test]
    fn test_success_status() {
        let status = ExecStatus::parse(br#"{"metadata":{},"status":"Success"}"#);
        assert!(status.is_success());
        assert_eq!(status.exit_code(), Some(0));
    }

    #[test]
    fn test_non_zero_exit_status() {
        let payload = br#"{
            "metadata": {},
            "status": "Failure",
            "message": "command terminated with non-zero exit code: error executing command [sh -c exit 3], exit code 3",
            "reason": "NonZeroExitCode",
            "details": {"causes": [{"reason": "ExitCode", "message": "3"}]}
        }"#;
        let status = ExecStatus::parse(payload);
        assert!(!status.is_success());
        assert_eq!(status.exit_code(), Some(3));
    }

    #[test]
    fn test_failure_without_exit_code() {
        let payload = br#"{"status":"Failure","message":"container not found","reason":"NotFound"}"#;
        let status = ExecStatus::parse(payload);
        assert_eq!(status.exit_code(), None);
        assert_eq!(status.message.as_deref(), Some("container not found"));
    }

    #[test]
    fn test_plain_text_error_payload() {
        let status = ExecStatus::parse(b"exec failed: unable to start container process\n");
        assert_eq!(status.status, "Failure");
        assert_eq!(
            status.message.as_deref(),
            Some("exec failed: unable to start container process")
        );
        assert_eq!(status.exit_code(), None);
    }

    #[test]
    fn test_default_size_is_classic_terminal() {
        assert_eq!(TerminalSize::default(), TerminalSize::new(80, 24));
        assert_eq!(TerminalSize::new(120, 40).to_string(), "120x40");
    }
}
