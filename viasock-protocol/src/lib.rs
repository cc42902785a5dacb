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

//! Shared primitives between the viasock runner, server, and client:
//! record framing and command fingerprinting. You almost certainly don't
//! need to use this crate directly -- see the `viasock` binary.

pub mod error;
pub mod fingerprint;
pub mod framer;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use error::FramerError;
pub use fingerprint::{compute as compute_fingerprint, Fingerprint, Spec as FingerprintSpec};
pub use framer::{compile_pattern, Record, Records};
