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

//! The runner role (§4.4): compute a fingerprint, find or spawn a server
//! for it, then hand off to the client.

use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
    thread,
};

use anyhow::Context;
use tracing::{info, instrument, warn};

use crate::{
    client,
    config::{FramingOptions, Timeouts},
    consts, error, fingerprinting,
};

#[allow(clippy::too_many_arguments)]
#[instrument(skip(framing, timeouts), fields(%program))]
pub fn run(
    program: &str,
    args: &[String],
    framing: &FramingOptions,
    timeouts: &Timeouts,
    log_file: Option<&Path>,
    verbose: u8,
) -> anyhow::Result<()> {
    let cache_dir = PathBuf::from(consts::SOCKET_CACHE_DIR);
    fs::create_dir_all(&cache_dir).context("creating socket cache directory")?;

    let fingerprint =
        fingerprinting::compute(program, args, framing, timeouts, log_file);
    let socket = fingerprinting::socket_path(&cache_dir, &fingerprint);
    info!(socket = %socket.display(), fingerprint = %fingerprint, "resolved server identity");

    match client::run(&socket, framing) {
        Ok(()) => return Ok(()),
        Err(e) if error::is_transport_error(&e) => {
            warn!("no server answering at {}: {}", socket.display(), e);
        }
        Err(e) => return Err(e),
    }

    // Connection refused means a socket file exists but nothing is
    // listening behind it -- a server crashed without cleaning up after
    // itself. Unlink it so the new server can bind (§4.4 step 4).
    if socket.exists() {
        info!(socket = %socket.display(), "removing stale socket file");
        let _ = fs::remove_file(&socket);
    }

    spawn_detached_server(&socket, &fingerprint.to_hex(), program, args, framing, timeouts, log_file, verbose)?;

    thread::sleep(consts::SERVER_SPAWN_SETTLE);

    client::run(&socket, framing).context("retrying client session after spawning server")
}

#[allow(clippy::too_many_arguments)]
fn spawn_detached_server(
    socket: &Path,
    hash: &str,
    program: &str,
    args: &[String],
    framing: &FramingOptions,
    timeouts: &Timeouts,
    log_file: Option<&Path>,
    verbose: u8,
) -> anyhow::Result<()> {
    let exe = env::current_exe().context("locating own executable to spawn server")?;

    let mut cmd = Command::new(exe);
    cmd.arg("server").arg(socket).arg(hash).arg(program).args(args);
    cmd.arg("-t").arg(&framing.input_terminator_pattern);
    cmd.arg("-T").arg(&framing.output_terminator_pattern);
    cmd.arg("-P").arg(framing.prelude.to_string());
    if let Some(pt) = timeouts.process_timeout {
        cmd.arg("-w").arg(pt.as_secs().to_string());
    }
    cmd.arg("-W").arg(timeouts.server_timeout.as_secs().to_string());
    if let Some(log) = log_file {
        cmd.arg("-l").arg(log);
    }
    for _ in 0..verbose {
        cmd.arg("-v");
    }

    cmd.env(consts::AUTODAEMONIZE_VAR, "true");
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());

    info!("spawning detached server");
    cmd.spawn().context("spawning server process")?;

    Ok(())
}
