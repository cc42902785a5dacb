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

use std::{io, path::Path, sync::Mutex};

use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use tracing_subscriber::fmt::format::FmtSpan;

use crate::consts;

/// Sets the global tracing subscriber up. Every role (runner, server,
/// client) calls this once at startup. With no `-l` path, logs go to
/// stderr; with one, they go to a size-based rotating file and never to
/// stderr, since a detached server has no attached terminal (§10.2).
pub fn init(log_file: Option<&Path>, verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_thread_ids(true)
        .with_target(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    match log_file {
        Some(path) => {
            let rotating = FileRotate::new(
                path,
                AppendCount::new(consts::LOG_ROTATION_BACKUPS),
                ContentLimit::Bytes(consts::LOG_ROTATION_BYTES),
                Compression::None,
                #[cfg(unix)]
                None,
            );
            builder.with_writer(Mutex::new(rotating)).init();
        }
        None => {
            builder.with_writer(io::stderr).init();
        }
    }

    Ok(())
}
