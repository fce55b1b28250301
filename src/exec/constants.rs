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

//! Sizing and timing constants for exec sessions.

// Buffer sizes are derived from the exec stream framing: every frame carries
// one channel byte followed by the payload.

/// Largest stdin payload forwarded in a single frame.
/// Value: 32 KiB - matches the server-side read size of the exec stream
pub const CHANNEL_PAYLOAD_SIZE: usize = 32 * 1024;

/// Extra room for the channel byte and WebSocket framing.
pub const FRAME_HEADER_ALLOWANCE: usize = 1024;

/// Size of the transport buffers and the upper bound of a local write chunk.
pub const CHANNEL_BUFFER_SIZE: usize = CHANNEL_PAYLOAD_SIZE + FRAME_HEADER_ALLOWANCE;

/// Outbound request queue sizing:
/// - 256 requests balances memory usage with burst tolerance
/// - Each stdin request is at most one payload, so the worst case stays bounded
/// - A full queue surfaces as would-block to the relay loop
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Channel pump timeout per relay iteration.
/// Value: 20ms - short enough that keystrokes feel immediate
pub const DEFAULT_UPDATE_TIMEOUT_MS: u64 = 20;

/// Interval between keep-alive pings.
/// Value: 30s - below the common 60s idle timeout of load balancers and API proxies
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Terminal size polling interval where no resize signal exists.
pub const DEFAULT_RESIZE_POLL_INTERVAL_MS: u64 = 250;

/// Worker shutdown design:
/// - Each background worker gets this long to observe its stop signal
/// - Workers are joined concurrently, so teardown waits at most this long overall
/// - A worker that misses the deadline is aborted and abandoned
pub const DEFAULT_WORKER_JOIN_TIMEOUT_MS: u64 = 2000;

/// Retries for a local output chunk that keeps reporting would-block.
pub const DEFAULT_WRITE_RETRY_LIMIT: u32 = 64;

/// Base delay between would-block write retries; grows linearly per attempt.
pub const DEFAULT_WRITE_BACKOFF_MS: u64 = 1;

/// Ceiling for the per-retry write delay.
pub const MAX_WRITE_BACKOFF_MS: u64 = 50;

/// Fallback terminal geometry when the size cannot be queried.
pub const FALLBACK_COLUMNS: u16 = 80;
pub const FALLBACK_ROWS: u16 = 24;
