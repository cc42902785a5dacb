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

//! The error taxonomy from the error handling design: distinct,
//! downcastable variants so that callers further up the stack can decide
//! *what kind* of failure happened rather than string-sniffing a message.
//! The runner in particular needs to tell a transport failure (retry
//! after spawning a server) apart from everything else (propagate as-is).

use std::fmt;

use viasock_protocol::FramerError;

#[derive(Debug)]
pub enum ViasockError {
    /// An incomplete record or a mid-record stream close, on either end.
    Framing(FramerError),
    /// The child produced fewer output records than inputs consumed, or
    /// stopped at EOF before a terminator.
    ProtocolViolation(String),
    /// The child exceeded `process_timeout` responding, or exiting.
    Timeout(String),
    /// Connection refused, socket absent, or connection reset.
    Transport(String),
    /// The child exited non-zero, or the server failed to bind because
    /// the socket path is already in use.
    Lifecycle(String),
}

impl fmt::Display for ViasockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViasockError::Framing(e) => write!(f, "framing error: {}", e),
            ViasockError::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            ViasockError::Timeout(msg) => write!(f, "timeout: {}", msg),
            ViasockError::Transport(msg) => write!(f, "transport error: {}", msg),
            ViasockError::Lifecycle(msg) => write!(f, "lifecycle error: {}", msg),
        }
    }
}

impl std::error::Error for ViasockError {}

impl From<FramerError> for ViasockError {
    fn from(e: FramerError) -> Self {
        let msg = e.to_string();
        match e {
            FramerError::Timeout => ViasockError::Timeout(msg),
            other => ViasockError::Framing(other),
        }
    }
}

/// Whether an error, however it was wrapped in an `anyhow::Error`, is a
/// transport error -- the only category the runner treats as retryable
/// by spawning a server (§4.4, §7).
pub fn is_transport_error(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<ViasockError>(), Some(ViasockError::Transport(_)))
        || err.downcast_ref::<std::io::Error>().map(is_transport_io_error).unwrap_or(false)
}

fn is_transport_io_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::NotFound
            | std::io::ErrorKind::ConnectionReset
    )
}
