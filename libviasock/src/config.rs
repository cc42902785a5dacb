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

//! There is deliberately no config file here. Every invocation's behavior
//! must be a pure function of its CLI flags plus file mtimes, because the
//! command fingerprint has to be computed the same way by the runner,
//! server, and client without consulting anything else. What would be a
//! config file in another tool is instead: the default constants in
//! `consts`, and the upfront flag validation in this module.

use std::time::Duration;

use anyhow::Context;
use regex::bytes::Regex;

/// The framing options shared by all three subcommands: the two
/// terminator patterns and the prelude record count. Compiled once at
/// the CLI boundary so a malformed pattern is reported immediately
/// instead of surfacing mid-session as an opaque I/O error.
#[derive(Clone)]
pub struct FramingOptions {
    pub input_terminator_pattern: String,
    pub output_terminator_pattern: String,
    pub input_terminator: Regex,
    pub output_terminator: Regex,
    pub prelude: usize,
}

impl FramingOptions {
    pub fn compile(
        input_pattern: &str,
        output_pattern: &str,
        prelude: usize,
    ) -> anyhow::Result<Self> {
        let input_terminator = viasock_protocol::compile_pattern(input_pattern)
            .context("compiling input terminator pattern")?;
        let output_terminator = viasock_protocol::compile_pattern(output_pattern)
            .context("compiling output terminator pattern")?;
        Ok(FramingOptions {
            input_terminator_pattern: input_pattern.to_string(),
            output_terminator_pattern: output_pattern.to_string(),
            input_terminator,
            output_terminator,
            prelude,
        })
    }
}

/// The two operational timeouts: how long the server waits on a single
/// child response, and how long it waits for a record exchange before
/// deciding it is idle.
#[derive(Clone, Copy, Debug)]
pub struct Timeouts {
    pub process_timeout: Option<Duration>,
    pub server_timeout: Duration,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_pattern_compiles() {
        let opts = FramingOptions::compile("", "", 0).unwrap();
        assert!(opts.input_terminator.is_match(b"anything"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = FramingOptions::compile("(unterminated", "", 0);
        assert!(err.is_err());
    }
}
