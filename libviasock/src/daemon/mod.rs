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

use std::{env, os::unix::net::UnixListener, path::PathBuf};

use anyhow::Context;
use tracing::{info, instrument};

use crate::{
    config::{FramingOptions, Timeouts},
    consts,
    error::ViasockError,
};

mod server;
mod signals;

/// Starts the server: optionally autodaemonizes, binds the listening
/// socket, spawns the child, and runs the accept loop to completion
/// (§4.2).
#[instrument(skip(framing, timeouts))]
pub fn run(
    socket: PathBuf,
    startup_fingerprint: String,
    program: String,
    args: Vec<String>,
    framing: FramingOptions,
    timeouts: Timeouts,
    log_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    if env::var(consts::AUTODAEMONIZE_VAR).as_deref() == Ok("true") {
        env::remove_var(consts::AUTODAEMONIZE_VAR); // avoid looping on exec

        let pid_file = socket.with_file_name(format!(
            "{}.pid",
            socket.file_name().and_then(|n| n.to_str()).unwrap_or("viasock-daemon")
        ));
        info!(?pid_file, "daemonizing");
        daemonize::Daemonize::new().pid_file(pid_file).start().context("daemonizing")?;
    }

    info!("starting server");

    let listener = UnixListener::bind(&socket).map_err(|e| {
        anyhow::Error::new(ViasockError::Lifecycle(format!(
            "binding socket {}: {}",
            socket.display(),
            e
        )))
    })?;

    signals::Handler::new(socket.clone()).spawn()?;

    let result: anyhow::Result<()> =
        server::Server::new(program, args, startup_fingerprint, framing, timeouts, log_file)
            .and_then(|srv| server::Server::serve(srv, listener));

    if let Err(e) = std::fs::remove_file(&socket) {
        if e.kind() != std::io::ErrorKind::NotFound {
            if result.is_ok() {
                return Err(anyhow::Error::new(e).context("cleaning up socket file"));
            }
            info!("error cleaning up socket file after a session error: {}", e);
        }
    }

    result
}
