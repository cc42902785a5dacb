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

use std::time::Duration;

/// How long the server's accept loop waits for a connection before
/// re-checking idle timeout and fingerprint invalidation.
pub const ACCEPT_POLL: Duration = Duration::from_secs(1);

/// Default idle-server timeout when `-W` is not given.
pub const DEFAULT_SERVER_TIMEOUT_SECS: u64 = 60;

/// The directory, relative to the invoking working directory, that holds
/// one socket file per command fingerprint.
pub const SOCKET_CACHE_DIR: &str = ".viasock/sockets";

/// Size-based log rotation: ~1 MiB per file, 5 rotated backups.
pub const LOG_ROTATION_BYTES: usize = 1024 * 1024;
pub const LOG_ROTATION_BACKUPS: usize = 5;

/// How long the runner sleeps after spawning a detached server before
/// retrying the client session, to give the server time to bind and
/// capture its prelude.
pub const SERVER_SPAWN_SETTLE: Duration = Duration::from_millis(1000);

/// Bound on how long the writer-pool thread waits for stdin to accept a
/// write job before giving up and reporting the session dead.
pub const WRITER_JOB_CHANNEL_CAPACITY: usize = 1;

/// If set to "true" in the environment, a `server` invocation daemonizes
/// itself immediately rather than running in the foreground. Set by the
/// runner when it spawns a detached server; never set by end users.
pub const AUTODAEMONIZE_VAR: &str = "VIASOCK__INTERNAL__AUTODAEMONIZE";
