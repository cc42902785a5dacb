use std::{
    io::{Read, Write},
    os::unix::net::UnixStream,
    path::PathBuf,
    process,
    process::{Command, Stdio},
    time::Duration,
};

use anyhow::Context;

use super::{tmpdir, viasock_bin, wait_until};

/// Framing options for a test server/client pair. Mirrors the CLI flags
/// in `FramingArgs`/`TimeoutArgs`.
#[derive(Clone)]
pub struct Framing {
    pub input_terminator: String,
    pub output_terminator: String,
    pub prelude: usize,
    pub process_timeout: Option<u64>,
    pub server_timeout: u64,
}

impl Default for Framing {
    fn default() -> Self {
        Framing {
            input_terminator: String::new(),
            output_terminator: String::new(),
            prelude: 0,
            process_timeout: None,
            server_timeout: 60,
        }
    }
}

/// `Proc` is a helper handle for a `viasock server` subprocess, spawned
/// directly (not through the runner's autodaemonizing spawn path) so the
/// test keeps a `Child` handle it can kill on `Drop`.
pub struct Proc {
    pub proc: process::Child,
    pub socket_path: PathBuf,
    _tmp_dir: tmpdir::Dir,
}

impl Proc {
    pub fn new(program: &str, program_args: &[&str], framing: Framing) -> anyhow::Result<Proc> {
        let tmp_dir = tmpdir::Dir::new(std::env::temp_dir().join("viasock-test"))?;
        let socket_path = tmp_dir.path().join("test.socket");
        let log_file = tmp_dir.path().join("server.log");

        let args: Vec<String> = program_args.iter().map(|s| s.to_string()).collect();
        let hash = fingerprint_hex(program, &args, &framing, &log_file);

        let mut cmd = Command::new(viasock_bin()?);
        cmd.stdout(Stdio::null())
            .stderr(Stdio::piped())
            .arg("-vv")
            .arg("server")
            .arg("-t")
            .arg(&framing.input_terminator)
            .arg("-T")
            .arg(&framing.output_terminator)
            .arg("-P")
            .arg(framing.prelude.to_string())
            .arg("-W")
            .arg(framing.server_timeout.to_string())
            .arg("-l")
            .arg(&log_file);
        if let Some(pt) = framing.process_timeout {
            cmd.arg("-w").arg(pt.to_string());
        }
        cmd.arg(&socket_path).arg(&hash).arg(program);
        for a in program_args {
            cmd.arg(a);
        }

        let proc = cmd.spawn().context("spawning server process")?;

        wait_until(|| Ok(UnixStream::connect(&socket_path).is_ok()))
            .context("waiting for server socket to come up")?;

        Ok(Proc { proc, socket_path, _tmp_dir: tmp_dir })
    }

    /// Opens one client session: writes `input` then reads exactly
    /// enough bytes to cover the prelude plus one reply per input
    /// record, as determined by counting terminator matches in `input`.
    pub fn session(&self, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        let mut stream =
            UnixStream::connect(&self.socket_path).context("connecting to test server")?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        stream.write_all(input).context("writing session input")?;
        stream.shutdown(std::net::Shutdown::Write).ok();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).context("reading session output")?;
        Ok(out)
    }

    pub fn kill(&mut self) {
        let _ = self.proc.kill();
        let _ = self.proc.wait();
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        self.kill();
    }
}

fn path_mtime(p: &str) -> Option<std::time::SystemTime> {
    let p = std::path::Path::new(p);
    if p.exists() {
        std::fs::metadata(p).and_then(|m| m.modified()).ok()
    } else {
        None
    }
}

fn fingerprint_hex(
    program: &str,
    args: &[String],
    framing: &Framing,
    log_file: &std::path::Path,
) -> String {
    // Program mtime first, then argument mtimes, matching
    // `libviasock::fingerprinting::compute`.
    let mut mtimes = Vec::with_capacity(args.len() + 1);
    mtimes.push(path_mtime(program));
    mtimes.extend(args.iter().map(|a| path_mtime(a)));

    let spec = viasock_protocol::FingerprintSpec {
        program,
        args,
        path_mtimes: &mtimes,
        record_terminator: &framing.input_terminator,
        output_terminator: &framing.output_terminator,
        prelude_lines: framing.prelude,
        process_timeout: framing.process_timeout.map(Duration::from_secs),
        server_timeout: Some(Duration::from_secs(framing.server_timeout)),
        log_path: Some(log_file),
    };
    viasock_protocol::compute_fingerprint(&spec).to_hex()
}
