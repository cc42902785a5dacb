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

use std::fmt;

/// The taxonomy of errors the record framer can raise. Kept as a distinct,
/// downcastable type (rather than a bare `anyhow::anyhow!(...)`) so that
/// callers higher up the stack -- the runner deciding whether to retry, the
/// server deciding whether to kill the child -- can match on *what kind* of
/// failure happened instead of string-sniffing a message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum FramerError {
    /// The stream ended in the middle of a record: at least one line had
    /// been read, but none of them matched the terminator pattern before
    /// EOF.
    IncompleteRecord,
    /// A read blocked longer than the configured timeout.
    Timeout,
}

impl fmt::Display for FramerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramerError::IncompleteRecord => {
                write!(f, "stream ended in the middle of a record")
            }
            FramerError::Timeout => write!(f, "timed out waiting for more record bytes"),
        }
    }
}

impl std::error::Error for FramerError {}
