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

//! The record framer: turns a byte stream plus a terminator regex into a
//! lazy sequence of records (§4.1).
//!
//! `Records` is a pull-style iterator that owns its own read buffer, so it
//! can be used concurrently on independent streams with no shared mutable
//! state -- the server's `output_stream` is exactly one long-lived instance
//! of this type, reused across every session for the life of the child.

use std::{
    io::Read,
    os::fd::{AsRawFd, BorrowedFd, RawFd},
    time::Duration,
};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use regex::bytes::Regex;

use crate::error::FramerError;

const READ_CHUNK: usize = 8192;

/// A single record: the concatenation of one or more newline-terminated
/// lines, ending with the line whose chomped form matched the terminator
/// pattern.
pub type Record = Vec<u8>;

/// Compiles a terminator pattern. An empty pattern matches every line,
/// i.e. every line is its own record -- this is deliberate (§9): the
/// default empty-terminator regex also matches the empty chomped line
/// produced by a bare `\n`, so blank lines are records too.
pub fn compile_pattern(pattern: &str) -> anyhow::Result<Regex> {
    Regex::new(pattern).map_err(|e| anyhow::anyhow!("invalid terminator pattern {:?}: {}", pattern, e))
}

/// A lazy sequence of records pulled from a byte stream.
pub struct Records<R> {
    reader: R,
    pattern: Regex,
    timeout: Option<Duration>,
    /// Bytes read from `reader` but not yet consumed into a yielded line.
    pending: Vec<u8>,
    chunk: [u8; READ_CHUNK],
}

impl<R: Read + AsRawFd> Records<R> {
    pub fn new(reader: R, pattern: Regex, timeout: Option<Duration>) -> Self {
        Records { reader, pattern, timeout, pending: Vec::new(), chunk: [0; READ_CHUNK] }
    }

    /// Pulls the next record out of the stream.
    ///
    /// Returns `Ok(None)` if the stream ended cleanly between records.
    /// Returns `Err(FramerError::IncompleteRecord)` if the stream ended in
    /// the middle of one. Returns `Err(FramerError::Timeout)` if a read
    /// blocked longer than `timeout`.
    pub fn next_record(&mut self) -> Result<Option<Record>, FramerError> {
        let mut record: Record = Vec::new();

        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                let is_terminator = self.pattern.is_match(chomp(&line));
                record.extend_from_slice(&line);
                if is_terminator {
                    return Ok(Some(record));
                }
                continue;
            }

            if let Some(timeout) = self.timeout {
                match wait_readable(self.reader.as_raw_fd(), timeout) {
                    Ok(true) => {}
                    Ok(false) => return Err(FramerError::Timeout),
                    Err(_) => return Err(FramerError::Timeout),
                }
            }

            let nread = match self.reader.read(&mut self.chunk) {
                Ok(n) => n,
                Err(_) => {
                    if record.is_empty() && self.pending.is_empty() {
                        return Ok(None);
                    }
                    return Err(FramerError::IncompleteRecord);
                }
            };

            if nread == 0 {
                if record.is_empty() && self.pending.is_empty() {
                    return Ok(None);
                }
                return Err(FramerError::IncompleteRecord);
            }

            self.pending.extend_from_slice(&self.chunk[..nread]);
        }
    }
}

impl<R: Read + AsRawFd> Iterator for Records<R> {
    type Item = Result<Record, FramerError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(rec)) => Some(Ok(rec)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Strips the trailing `\n` (always present per line) and a preceding `\r`
/// if present, for the terminator-pattern check only -- the emitted bytes
/// of the record are never chomped.
fn chomp(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    if end > 0 && line[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && line[end - 1] == b'\r' {
        end -= 1;
    }
    &line[..end]
}

/// `PollTimeout` only accepts a `u16` worth of milliseconds (~65.5 s), but
/// `process_timeout` is user-configurable and can be far larger. Rather
/// than silently capping the wait, poll repeatedly in bounded slices
/// until either the fd is readable or the full requested `timeout` has
/// elapsed.
fn wait_readable(fd: RawFd, timeout: Duration) -> nix::Result<bool> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let deadline = std::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        let slice_millis: u16 = remaining.as_millis().min(u16::MAX as u128) as u16;

        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        let n = poll(&mut fds, PollTimeout::from(slice_millis))?;
        if n > 0 {
            return Ok(true);
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        io::Write,
        os::unix::net::UnixStream,
        thread,
    };

    use super::*;

    fn records_of(input: &[u8], pattern: &str) -> Result<Vec<Record>, FramerError> {
        let (mut writer, reader) = UnixStream::pair().expect("socketpair");
        let input = input.to_vec();
        let writer_thread = thread::spawn(move || {
            writer.write_all(&input).unwrap();
            drop(writer);
        });
        let pat = compile_pattern(pattern).unwrap();
        let mut records = Records::new(reader, pat, None);
        let mut out = Vec::new();
        loop {
            match records.next_record()? {
                Some(r) => out.push(r),
                None => break,
            }
        }
        writer_thread.join().unwrap();
        Ok(out)
    }

    #[test]
    fn empty_pattern_is_one_line_per_record() {
        let recs = records_of(b"a\nb\nc\n", "").unwrap();
        assert_eq!(recs, vec![b"a\n".to_vec(), b"b\n".to_vec(), b"c\n".to_vec()]);
    }

    #[test]
    fn blank_line_is_its_own_record() {
        let recs = records_of(b"a\n\nb\n", "").unwrap();
        assert_eq!(recs, vec![b"a\n".to_vec(), b"\n".to_vec(), b"b\n".to_vec()]);
    }

    #[test]
    fn custom_terminator_groups_lines() {
        let recs = records_of(b"x\nEOS\ny\nz\nEOS\n", "^EOS$").unwrap();
        assert_eq!(recs, vec![b"x\nEOS\n".to_vec(), b"y\nz\nEOS\n".to_vec()]);
    }

    #[test]
    fn blank_line_separated_records() {
        let recs = records_of(b"a\nb\n\nc\n\n", "^$").unwrap();
        assert_eq!(recs, vec![b"a\nb\n\n".to_vec(), b"c\n\n".to_vec()]);
    }

    #[test]
    fn incomplete_record_is_an_error() {
        let err = records_of(b"a\nb\nc", "^EOS$").unwrap_err();
        assert_eq!(err, FramerError::IncompleteRecord);
    }

    #[test]
    fn clean_eof_between_records() {
        let recs = records_of(b"a\nEOS\nb\nEOS\n", "^EOS$").unwrap();
        assert_eq!(recs.len(), 2);
    }

    #[test]
    fn round_trip_is_idempotent() {
        let input: &[u8] = b"a\nEOS\nb\nc\nEOS\n";
        let once = records_of(input, "^EOS$").unwrap();
        let concatenated: Vec<u8> = once.iter().flatten().copied().collect();
        let twice = records_of(&concatenated, "^EOS$").unwrap();
        assert_eq!(once, twice);
    }
}
