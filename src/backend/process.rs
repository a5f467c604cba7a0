//! Subprocess execution with a bounded wait.

use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// How long to wait for pipe readers after the child exits. A grandchild that
/// inherited the pipes can keep them open well past that point.
const DRAIN_GRACE: Duration = Duration::from_secs(5);
const KILLED_DRAIN_GRACE: Duration = Duration::from_millis(200);
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Cap on diagnostic text carried inside errors.
const DETAIL_LIMIT: usize = 4000;

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn stderr_tail(&self) -> String {
        tail(&self.stderr)
    }

    /// stderr when the tool wrote any, otherwise stdout.
    pub fn diagnostic(&self) -> String {
        let err = tail(&self.stderr);
        if err.is_empty() { tail(&self.stdout) } else { err }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("spawn failed: {0}")]
    Spawn(#[source] io::Error),
    #[error("process exceeded timeout ({timeout:?}); stderr: {stderr}")]
    Timeout { timeout: Duration, stderr: String },
    #[error("process io: {0}")]
    Io(#[source] io::Error),
}

impl RunError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RunError::Spawn(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

/// Runs `cmd` to completion, feeding `stdin` and killing the child once
/// `timeout` elapses.
pub fn run(
    cmd: &mut Command,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
) -> Result<ProcessOutput, RunError> {
    debug!(?cmd, ?timeout, "spawning");
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(RunError::Spawn)?;

    if let Some(bytes) = stdin {
        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| RunError::Io(io::Error::other("no stdin")))?;
        // A tool that exits without reading its input closes the pipe early.
        match pipe.write_all(bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RunError::Io(e));
            }
        }
        pipe.flush().ok();
    }

    wait_with_timeout(&mut child, timeout)
}

fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> Result<ProcessOutput, RunError> {
    // Drain pipes while waiting so a chatty tool can't deadlock on a full
    // stdout/stderr buffer.
    let stdout_rx = spawn_reader(child.stdout.take());
    let stderr_rx = spawn_reader(child.stderr.take());

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(RunError::Io)? {
            return Ok(ProcessOutput {
                status,
                stdout: collect(&stdout_rx, DRAIN_GRACE)?,
                stderr: collect(&stderr_rx, DRAIN_GRACE)?,
            });
        }

        if let Some(limit) = timeout {
            if start.elapsed() > limit {
                warn!("process timed out after {:?}", limit);
                let _ = child.kill();
                let _ = child.wait();
                let stderr = collect(&stderr_rx, KILLED_DRAIN_GRACE).unwrap_or_default();
                return Err(RunError::Timeout {
                    timeout: limit,
                    stderr: tail(&stderr),
                });
            }
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<io::Result<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let res = match pipe {
            Some(mut p) => p.read_to_end(&mut buf).map(|_| buf),
            None => Ok(buf),
        };
        let _ = tx.send(res);
    });
    rx
}

/// Output still unread after `grace` is dropped and its reader thread detached.
fn collect(rx: &Receiver<io::Result<Vec<u8>>>, grace: Duration) -> Result<Vec<u8>, RunError> {
    match rx.recv_timeout(grace) {
        Ok(res) => res.map_err(RunError::Io),
        Err(_) => Ok(Vec::new()),
    }
}

fn tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.len() <= DETAIL_LIMIT {
        return text.to_string();
    }
    let mut start = text.len() - DETAIL_LIMIT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
