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

//! The server: owns the child process and the listening socket, and runs
//! the accept loop plus the duplex bridge that is the critical region of
//! the whole system (§4.2, §4.3).

use std::{
    io::{self, BufRead, BufReader, Write},
    os::{
        fd::{AsRawFd, BorrowedFd},
        unix::{net::UnixListener, net::UnixStream, process::CommandExt},
    },
    path::PathBuf,
    process::{Child, ChildStdout, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{error, info, instrument, warn};
use viasock_protocol::Records;

use crate::{
    config::{FramingOptions, Timeouts},
    error::ViasockError,
    fingerprinting,
};

pub struct Server {
    child: Child,
    writer: WriterPool,
    output_stream: Records<ChildStdout>,
    prelude: Vec<u8>,
    framing: FramingOptions,
    timeouts: Timeouts,
    program: String,
    args: Vec<String>,
    startup_fingerprint: String,
    last_request_time: Instant,
    log_file: Option<PathBuf>,
    stderr_pump: Option<thread::JoinHandle<()>>,
}

impl Server {
    /// Spawns the child, starts the stderr pump, and drains the prelude
    /// (§4.2 steps 2-4). The child is left alive and ready to serve by
    /// the time this returns successfully.
    #[instrument(skip(framing, timeouts), fields(%program))]
    pub fn new(
        program: String,
        args: Vec<String>,
        startup_fingerprint: String,
        framing: FramingOptions,
        timeouts: Timeouts,
        log_file: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let mut cmd = Command::new(&program);
        cmd.args(&args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Detach from our controlling session so signals sent to us (or
        // to a terminating client) never reach the child directly.
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(|e| io::Error::from_raw_os_error(e as i32))?;
                Ok(())
            });
        }

        let mut child = cmd.spawn().with_context(|| format!("spawning child {}", program))?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let stderr_pump = Some(spawn_stderr_pump(stderr));

        let writer = WriterPool::spawn(stdin);
        let mut output_stream =
            Records::new(stdout, framing.output_terminator.clone(), timeouts.process_timeout);

        let mut prelude = Vec::new();
        for _ in 0..framing.prelude {
            match output_stream.next_record() {
                Ok(Some(record)) => prelude.extend_from_slice(&record),
                Ok(None) => {
                    return Err(anyhow::Error::new(ViasockError::Lifecycle(
                        "child exited before emitting its prelude".to_string(),
                    )))
                }
                Err(e) => {
                    return Err(anyhow::Error::new(ViasockError::Lifecycle(format!(
                        "incomplete prelude: {}",
                        e
                    ))))
                }
            }
        }
        info!(prelude_bytes = prelude.len(), "captured prelude");

        Ok(Server {
            child,
            writer,
            output_stream,
            prelude,
            framing,
            timeouts,
            program,
            args,
            startup_fingerprint,
            last_request_time: Instant::now(),
            log_file,
            stderr_pump,
        })
    }

    /// Runs the accept loop until idle timeout or fingerprint
    /// invalidation, then performs the shutdown sequence regardless of
    /// how the loop ended (§4.2).
    #[instrument(skip_all)]
    pub fn serve(mut self, listener: UnixListener) -> anyhow::Result<()> {
        let result = self.accept_loop(&listener);
        let shutdown_result = self.shutdown();
        result?;
        shutdown_result
    }

    fn accept_loop(&mut self, listener: &UnixListener) -> anyhow::Result<()> {
        loop {
            match accept_with_timeout(listener, crate::consts::ACCEPT_POLL)? {
                Some(stream) => {
                    if let Err(e) = self.handle_session(stream) {
                        error!("fatal session error: {:?}", e);
                        self.kill_child();
                        return Err(e);
                    }
                }
                None => {
                    if self.last_request_time.elapsed() > self.timeouts.server_timeout {
                        info!("idle timeout reached, shutting down");
                        return Ok(());
                    }
                    let current = fingerprinting::compute(
                        &self.program,
                        &self.args,
                        &self.framing,
                        &self.timeouts,
                        self.log_file.as_deref(),
                    );
                    if current.to_hex() != self.startup_fingerprint {
                        info!("command fingerprint no longer matches, shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// The duplex bridge (§4.3): the critical region of the whole
    /// system.
    #[instrument(skip_all)]
    fn handle_session(&mut self, stream: UnixStream) -> anyhow::Result<()> {
        let read_half = stream.try_clone().context("cloning session socket")?;
        let mut write_half = stream;

        write_half.write_all(&self.prelude).context("writing prelude to client")?;

        let mut from_client =
            Records::new(read_half, self.framing.input_terminator.clone(), None);

        loop {
            let input_record = match from_client.next_record() {
                Ok(Some(r)) => r,
                Ok(None) => break, // client is done sending
                Err(e) => return Err(anyhow::Error::new(ViasockError::from(e))),
            };

            // (a) dispatch the write asynchronously
            self.writer.submit(input_record)?;

            // (b) concurrently pull the next output record
            let output_record = match self.output_stream.next_record() {
                Ok(Some(r)) => r,
                Ok(None) => {
                    return Err(anyhow::Error::new(ViasockError::ProtocolViolation(
                        "child's output stream ended".to_string(),
                    )))
                }
                Err(e) => return Err(anyhow::Error::new(ViasockError::from(e))),
            };

            // (c) await the write, surfacing whichever failed first
            self.writer.join()?;

            // (d) forward the response
            write_half.write_all(&output_record).context("writing response to client")?;
            write_half.flush().context("flushing client socket")?;

            // (e)
            self.last_request_time = Instant::now();
        }

        Ok(())
    }

    /// Fatal session conditions kill the child immediately rather than
    /// waiting for it to notice its stdin closed (§4.3, §7).
    fn kill_child(&mut self) {
        let _ = self.child.kill();
    }

    fn shutdown(&mut self) -> anyhow::Result<()> {
        self.writer.close();

        let wait_result = match self
            .child
            .wait_timeout(self.timeouts.process_timeout.unwrap_or(Duration::from_secs(5)))
        {
            Ok(Some(status)) => {
                if status.success() {
                    Ok(())
                } else {
                    warn!(?status, "child exited non-zero");
                    Err(anyhow::Error::new(ViasockError::Lifecycle(format!(
                        "child exited with {}",
                        status
                    ))))
                }
            }
            Ok(None) => {
                warn!("child did not exit in time, killing it");
                let _ = self.child.kill();
                let _ = self.child.wait();
                Err(anyhow::Error::new(ViasockError::Timeout(
                    "child did not exit within process_timeout".to_string(),
                )))
            }
            Err(e) => {
                warn!("error waiting for child: {}", e);
                Err(anyhow::Error::new(e).context("waiting for child to exit"))
            }
        };

        if let Some(handle) = self.stderr_pump.take() {
            let _ = handle.join();
        }

        wait_result
    }
}

/// A single long-lived writer thread owned by the server for the life of
/// the child, fed one write job per record exchange through a bounded
/// channel (§5: "two-unit pool" guidance). This is the second
/// concurrent unit alongside the main accept-loop thread.
struct WriterPool {
    job_tx: Option<crossbeam_channel::Sender<Vec<u8>>>,
    result_rx: crossbeam_channel::Receiver<io::Result<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WriterPool {
    fn spawn(mut stdin: std::process::ChildStdin) -> Self {
        let (job_tx, job_rx) =
            crossbeam_channel::bounded::<Vec<u8>>(crate::consts::WRITER_JOB_CHANNEL_CAPACITY);
        let (result_tx, result_rx) = crossbeam_channel::bounded::<io::Result<()>>(1);

        let handle = thread::spawn(move || {
            for job in job_rx {
                let res = stdin.write_all(&job).and_then(|_| stdin.flush());
                if result_tx.send(res).is_err() {
                    break;
                }
            }
        });

        WriterPool { job_tx: Some(job_tx), result_rx, handle: Some(handle) }
    }

    fn submit(&self, record: Vec<u8>) -> anyhow::Result<()> {
        self.job_tx
            .as_ref()
            .context("writer thread already closed")?
            .send(record)
            .map_err(|_| anyhow::anyhow!("writer thread exited unexpectedly"))
    }

    fn join(&self) -> anyhow::Result<()> {
        self.result_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("writer thread exited unexpectedly"))?
            .context("writing to child stdin")
    }

    /// Closes the child's stdin by dropping the writer thread's sender,
    /// which ends its loop and drops `stdin` (§4.2 shutdown step 1).
    fn close(&mut self) {
        self.job_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn spawn_stderr_pump(stderr: std::process::ChildStderr) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stderr);
        for line in reader.lines() {
            match line {
                Ok(line) => info!(target: "child", "{}", line),
                Err(e) => {
                    warn!("stderr pump ending: {}", e);
                    break;
                }
            }
        }
    })
}

/// Polls for an incoming connection for up to `timeout`, in bounded
/// slices -- `PollTimeout` only accepts a `u16` worth of milliseconds.
fn accept_with_timeout(
    listener: &UnixListener,
    timeout: Duration,
) -> anyhow::Result<Option<UnixStream>> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(listener.as_raw_fd()) };
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        let slice_millis: u16 = remaining.as_millis().min(u16::MAX as u128) as u16;

        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        let n = poll(&mut fds, PollTimeout::from(slice_millis)).context("polling listening socket")?;
        if n > 0 {
            let (stream, _addr) = listener.accept().context("accepting connection")?;
            return Ok(Some(stream));
        }
    }
}

/// A small extension trait giving `Child` a bounded wait, since the
/// standard library only offers an unbounded `wait()` or a
/// non-blocking `try_wait()`.
trait ChildWaitTimeout {
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<std::process::ExitStatus>>;
}

impl ChildWaitTimeout for Child {
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<std::process::ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

