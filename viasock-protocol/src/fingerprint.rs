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

//! Command fingerprinting (§8): a 128-bit digest of everything that would
//! make a cached server invalid to reuse for a new invocation.

use std::{fmt, path::Path, time::SystemTime};

use sha2::{Digest, Sha256};

/// A 128-bit fingerprint, truncated from a SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Renders the fingerprint as a lowercase hex string, suitable for use
    /// as a socket filename component.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(32);
        for byte in &self.0 {
            s.push_str(&format!("{:02x}", byte));
        }
        s
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The inputs folded into a command fingerprint. Two invocations with
/// identical `Spec`s are considered the same logical command and may
/// share a server; anything that differs invalidates it (§8, invariant
/// 1/2).
pub struct Spec<'a> {
    pub program: &'a str,
    pub args: &'a [String],
    /// mtimes of any path-like arguments, matched positionally by the
    /// caller; `None` for an argument that isn't a path or doesn't exist.
    pub path_mtimes: &'a [Option<SystemTime>],
    pub record_terminator: &'a str,
    pub output_terminator: &'a str,
    pub prelude_lines: usize,
    pub process_timeout: Option<std::time::Duration>,
    pub server_timeout: Option<std::time::Duration>,
    pub log_path: Option<&'a Path>,
}

/// Computes the fingerprint for a command invocation.
pub fn compute(spec: &Spec) -> Fingerprint {
    let mut hasher = Sha256::new();

    hasher.update(b"program\0");
    hasher.update(spec.program.as_bytes());
    hasher.update(b"\0");

    hasher.update(b"args\0");
    for arg in spec.args {
        hasher.update(arg.as_bytes());
        hasher.update(b"\0");
    }

    hasher.update(b"mtimes\0");
    for mtime in spec.path_mtimes {
        match mtime {
            Some(t) => {
                let secs = t.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
                hasher.update(secs.to_le_bytes());
            }
            None => hasher.update(b"-"),
        }
        hasher.update(b"\0");
    }

    hasher.update(b"record_terminator\0");
    hasher.update(spec.record_terminator.as_bytes());
    hasher.update(b"\0");

    hasher.update(b"output_terminator\0");
    hasher.update(spec.output_terminator.as_bytes());
    hasher.update(b"\0");

    hasher.update(b"prelude_lines\0");
    hasher.update(spec.prelude_lines.to_le_bytes());

    hasher.update(b"process_timeout\0");
    hasher.update(spec.process_timeout.map(|d| d.as_millis()).unwrap_or(0).to_le_bytes());

    hasher.update(b"server_timeout\0");
    hasher.update(spec.server_timeout.map(|d| d.as_millis()).unwrap_or(0).to_le_bytes());

    hasher.update(b"log_path\0");
    if let Some(p) = spec.log_path {
        hasher.update(p.as_os_str().to_string_lossy().as_bytes());
    }

    let digest = hasher.finalize();
    let mut truncated = [0u8; 16];
    truncated.copy_from_slice(&digest[..16]);
    Fingerprint(truncated)
}

#[cfg(test)]
mod test {
    use super::*;

    fn base_spec<'a>(args: &'a [String]) -> Spec<'a> {
        Spec {
            program: "cat",
            args,
            path_mtimes: &[],
            record_terminator: "",
            output_terminator: "^$",
            prelude_lines: 0,
            process_timeout: None,
            server_timeout: None,
            log_path: None,
        }
    }

    #[test]
    fn identical_specs_fingerprint_identically() {
        let args = vec!["-n".to_string()];
        let a = compute(&base_spec(&args));
        let b = compute(&base_spec(&args));
        assert_eq!(a, b);
    }

    #[test]
    fn differing_args_fingerprint_differently() {
        let args_a = vec!["-n".to_string()];
        let args_b = vec!["-A".to_string()];
        let a = compute(&base_spec(&args_a));
        let b = compute(&base_spec(&args_b));
        assert_ne!(a, b);
    }

    #[test]
    fn differing_terminator_fingerprints_differently() {
        let args = vec![];
        let mut spec_a = base_spec(&args);
        let mut spec_b = base_spec(&args);
        spec_a.record_terminator = "^$";
        spec_b.record_terminator = "^EOS$";
        assert_ne!(compute(&spec_a), compute(&spec_b));
    }

    #[test]
    fn differing_mtime_fingerprints_differently() {
        let args = vec![];
        let mut spec_a = base_spec(&args);
        let mut spec_b = base_spec(&args);
        let older = [Some(SystemTime::UNIX_EPOCH)];
        let newer = [Some(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1))];
        spec_a.path_mtimes = &older;
        spec_b.path_mtimes = &newer;
        assert_ne!(compute(&spec_a), compute(&spec_b));
    }

    #[test]
    fn hex_rendering_is_32_chars() {
        let args = vec![];
        let fp = compute(&base_spec(&args));
        assert_eq!(fp.to_hex().len(), 32);
    }
}
