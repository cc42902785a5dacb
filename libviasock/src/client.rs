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

//! The client role (§4.5): connect to the socket, replay the prelude,
//! then pump stdin records through the socket one at a time until stdin
//! ends.

use std::{
    io::{self, Read, Write},
    os::unix::net::UnixStream,
    path::Path,
};

use anyhow::Context;
use tracing::{info, instrument};
use viasock_protocol::Records;

use crate::{config::FramingOptions, error::ViasockError};

/// Runs one client session against an already-listening server socket.
/// Returns `Ok(())` on a clean end-of-stdin; any framing error or
/// connection problem is returned as an `Err` (§4.5, §7).
#[instrument(skip(framing), fields(socket = %socket.display()))]
pub fn run(socket: &Path, framing: &FramingOptions) -> anyhow::Result<()> {
    let stream = UnixStream::connect(socket).map_err(|e| {
        anyhow::Error::new(ViasockError::Transport(format!(
            "connecting to {}: {}",
            socket.display(),
            e
        )))
    })?;

    let read_half = stream.try_clone().context("cloning socket for reading")?;
    let mut write_half = stream;

    let mut from_socket =
        Records::new(read_half, framing.output_terminator.clone(), None);

    info!(prelude = framing.prelude, "copying prelude records");
    for _ in 0..framing.prelude {
        let record = from_socket
            .next_record()
            .map_err(ViasockError::from)?
            .ok_or_else(|| ViasockError::Transport("socket closed during prelude".to_string()))?;
        io::stdout().write_all(&record).context("writing prelude to stdout")?;
    }
    io::stdout().flush().ok();

    let stdin_reader = StdinFdShim;
    let mut from_stdin = Records::new(stdin_reader, framing.input_terminator.clone(), None);

    loop {
        let input_record = match from_stdin.next_record().map_err(ViasockError::from)? {
            Some(r) => r,
            None => break, // clean end of stdin (§4.5 step 3)
        };

        write_half.write_all(&input_record).context("writing record to socket")?;
        write_half.flush().context("flushing socket")?;

        let output_record = from_socket
            .next_record()
            .map_err(ViasockError::from)?
            .ok_or_else(|| ViasockError::Transport("server closed socket".to_string()))?;
        io::stdout().write_all(&output_record).context("writing response to stdout")?;
        io::stdout().flush().ok();
    }

    Ok(())
}

/// `Records` requires `AsRawFd`; stdin's raw fd is always 0, so rather
/// than threading a `std::io::Stdin` lock (which doesn't implement
/// `AsRawFd` the way we need it borrowed per-read) we read straight off
/// fd 0 via a small shim.
struct StdinFdShim;

impl Read for StdinFdShim {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::stdin().read(buf)
    }
}

impl std::os::fd::AsRawFd for StdinFdShim {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        0
    }
}
