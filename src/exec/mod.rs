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

//! Interactive exec sessions.
//!
//! This module relays a local terminal to a process running in a Kubernetes
//! pod over one multiplexed exec stream, the way `kubectl exec -it` does:
//! raw-mode terminal control, non-blocking stdin, resize propagation,
//! keep-alives, and a teardown that restores the terminal on every exit path.

pub mod channel;
pub mod constants;
pub mod error;
pub mod heartbeat;
pub mod protocol;
pub mod relay;
pub mod resize;
pub mod resources;
pub mod session;
pub mod signals;
pub mod stdio;
pub mod terminal;
pub mod websocket;
pub mod worker;

pub use channel::{ChannelHandle, ExecChannel, Outbound};
pub use error::{ChannelError, IoDisposition, RelayError, SessionError, TerminalError};
pub use heartbeat::HeartbeatKind;
pub use protocol::{ExecStatus, StreamChannel, TerminalSize, EXEC_SUBPROTOCOL};
pub use relay::{EndReason, RelaySettings, SessionOutcome, SessionState, StreamMode, TerminalRelay};
pub use resize::ResizeEvents;
pub use resources::SessionResources;
pub use session::{run_interactive_session, ExecOptions, ExecSession};
pub use signals::{SessionSignal, SignalGuard};
pub use stdio::{LocalStdio, OutputStream, ProcessStdio, WritePolicy};
pub use terminal::{PlatformTerminal, TerminalController};
pub use websocket::WebSocketChannel;
pub use worker::Worker;
