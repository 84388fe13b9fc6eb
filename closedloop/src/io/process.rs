//! Child processes with a hard deadline and capped output capture.
//!
//! Children run in their own process group on unix so a timeout kills the
//! whole tree a shell command started, not just the shell.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How long pipe readers may keep draining after the child is gone.
///
/// A process that left the group can hold the pipes open; its output past
/// this point is abandoned.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Cap for one captured stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputCap {
    Bytes(usize),
    /// UTF-8 chars; the kept prefix always ends on a char boundary.
    Chars(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    pub stdout: OutputCap,
    pub stderr: OutputCap,
}

impl CaptureLimits {
    pub fn bytes(limit: usize) -> Self {
        Self {
            stdout: OutputCap::Bytes(limit),
            stderr: OutputCap::Bytes(limit),
        }
    }

    pub fn chars(stdout: usize, stderr: usize) -> Self {
        Self {
            stdout: OutputCap::Chars(stdout),
            stderr: OutputCap::Chars(stderr),
        }
    }
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    /// Units (bytes or chars, per cap) read past the cap and discarded.
    pub stdout_dropped: usize,
    pub stderr_dropped: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exit code, or `-1` when the child was killed by a signal or timed out.
    pub fn exit_code(&self) -> i32 {
        if self.timed_out {
            return -1;
        }
        self.status.code().unwrap_or(-1)
    }

    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Build a platform shell invocation of `command` running in `workdir`.
pub fn shell_command(command: &str, workdir: &Path) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    };
    cmd.current_dir(workdir);
    cmd
}

/// Run `cmd` to completion or until `timeout`, whichever comes first.
///
/// Both pipes are drained on reader threads while the child runs, keeping at
/// most the capped prefix of each. On timeout the child's process group is
/// killed. The call returns within `timeout` plus [`DRAIN_GRACE`].
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
pub fn run_bounded(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    limits: CaptureLimits,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().context("spawn command")?;
    debug!(pid = child.id(), "child spawned");

    let stdout = Capture::start(
        child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?,
        limits.stdout,
    );
    let stderr = Capture::start(
        child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?,
        limits.stderr,
    );

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading stdin closes the pipe early.
        if let Err(err) = child_stdin.write_all(input) {
            warn!(err = %err, "child closed stdin before reading all input");
        }
    }

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing its process group");
            kill_tree(&mut child)?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let drain_deadline = Instant::now() + DRAIN_GRACE;
    let (stdout, stdout_dropped) = stdout.finish(drain_deadline, "stdout")?;
    let (stderr, stderr_dropped) = stderr.finish(drain_deadline, "stderr")?;
    if stdout_dropped > 0 || stderr_dropped > 0 {
        debug!(stdout_dropped, stderr_dropped, "output capped");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_dropped,
        stderr_dropped,
        timed_out,
    })
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => {
            warn!(err = %err, "killpg failed, killing the child only");
            child.kill().context("kill command")
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

/// One stream being drained into a capped buffer.
struct Capture {
    buffer: Arc<Mutex<CappedBuffer>>,
    reader: thread::JoinHandle<Result<()>>,
}

impl Capture {
    fn start<R: Read + Send + 'static>(mut stream: R, cap: OutputCap) -> Self {
        let buffer = Arc::new(Mutex::new(CappedBuffer::new(cap)));
        let shared = Arc::clone(&buffer);
        let reader = thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                let n = stream.read(&mut chunk).context("read output")?;
                if n == 0 {
                    return Ok(());
                }
                shared
                    .lock()
                    .map_err(|_| anyhow!("capture buffer poisoned"))?
                    .push(&chunk[..n]);
            }
        });
        Self { buffer, reader }
    }

    /// Wait for the reader until `deadline`, then take whatever was captured.
    fn finish(self, deadline: Instant, name: &str) -> Result<(String, usize)> {
        while !self.reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if self.reader.is_finished() {
            match self.reader.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(stream = name, err = %format!("{err:#}"), "output read failed"),
                Err(_) => return Err(anyhow!("{name} reader thread panicked")),
            }
        } else {
            warn!(stream = name, "pipe still open after the child exited, abandoning reader");
        }
        let buffer = self
            .buffer
            .lock()
            .map_err(|_| anyhow!("capture buffer poisoned"))?;
        Ok((String::from_utf8_lossy(&buffer.kept).into_owned(), buffer.dropped))
    }
}

#[derive(Debug)]
struct CappedBuffer {
    cap: OutputCap,
    kept: Vec<u8>,
    chars: usize,
    /// Whether continuation bytes belong to a kept char.
    in_kept_char: bool,
    dropped: usize,
}

impl CappedBuffer {
    fn new(cap: OutputCap) -> Self {
        Self {
            cap,
            kept: Vec::new(),
            chars: 0,
            in_kept_char: false,
            dropped: 0,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        match self.cap {
            OutputCap::Bytes(limit) => {
                let keep = bytes.len().min(limit.saturating_sub(self.kept.len()));
                self.kept.extend_from_slice(&bytes[..keep]);
                self.dropped += bytes.len() - keep;
            }
            OutputCap::Chars(limit) => {
                for &byte in bytes {
                    let starts_char = byte & 0xC0 != 0x80;
                    if starts_char {
                        self.in_kept_char = self.chars < limit;
                        if self.in_kept_char {
                            self.chars += 1;
                        } else {
                            self.dropped += 1;
                        }
                    }
                    if self.in_kept_char {
                        self.kept.push(byte);
                    }
                }
            }
        }
    }
}
