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

//! Glue between the CLI-level options and `viasock_protocol::fingerprint`.
//! Both the runner (computing the fingerprint once) and the server
//! (recomputing it on every idle poll to detect invalidation, §4.2) need
//! the exact same recipe, so it lives in one place.

use std::{fs, path::Path, time::SystemTime};

use viasock_protocol::{compute_fingerprint, Fingerprint, FingerprintSpec};

use crate::config::{FramingOptions, Timeouts};

/// The mtime of `arg` if it names a file or directory that currently
/// exists, `None` otherwise (§3: "0 if absent").
pub fn path_mtime(arg: &str) -> Option<SystemTime> {
    let path = Path::new(arg);
    if !path.exists() {
        return None;
    }
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

pub fn path_mtimes(args: &[String]) -> Vec<Option<SystemTime>> {
    args.iter().map(|a| path_mtime(a)).collect()
}

pub fn compute(
    program: &str,
    args: &[String],
    framing: &FramingOptions,
    timeouts: &Timeouts,
    log_path: Option<&Path>,
) -> Fingerprint {
    // The program path's own mtime is folded in first, ahead of the
    // argument mtimes (§3/§8 invariant 2: the program path counts the
    // same as any other path-like input).
    let mut mtimes = Vec::with_capacity(args.len() + 1);
    mtimes.push(path_mtime(program));
    mtimes.extend(path_mtimes(args));
    let spec = FingerprintSpec {
        program,
        args,
        path_mtimes: &mtimes,
        record_terminator: &framing.input_terminator_pattern,
        output_terminator: &framing.output_terminator_pattern,
        prelude_lines: framing.prelude,
        process_timeout: timeouts.process_timeout,
        server_timeout: Some(timeouts.server_timeout),
        log_path,
    };
    compute_fingerprint(&spec)
}

/// The socket path for a given fingerprint, rooted at `cache_dir`.
pub fn socket_path(cache_dir: &Path, fingerprint: &Fingerprint) -> std::path::PathBuf {
    cache_dir.join(fingerprint.to_hex())
}
