//! Streaming child-process execution with timeout, abort, and bounded
//! diagnostic capture.
//!
//! Stdout is delivered line-by-line to the caller as it arrives; partial
//! lines are buffered across reads and a trailing unterminated buffer is
//! flushed at process exit. Stderr is captured with a byte bound. The
//! parent waits in short slices so a timeout or an external abort kills the
//! child promptly instead of blocking on exit.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Shared cancellation flag. Cloning yields another handle to the same
/// flag; setting it is idempotent and unblocks any pending wait.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How the child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(ExitStatus),
    /// The timeout elapsed and the child was killed.
    TimedOut,
    /// The abort flag was set and the child was killed.
    Aborted,
}

/// Parameters for one streaming execution.
pub struct StreamParams<'a> {
    /// Bytes to write to the child's stdin (stdin is closed after).
    pub stdin: Option<&'a [u8]>,
    /// Wall-clock budget; `None` waits until exit or abort.
    pub timeout: Option<Duration>,
    /// Truncate captured stderr beyond this many bytes.
    pub stderr_limit_bytes: usize,
    pub abort: &'a AbortFlag,
}

/// Captured end state of a streaming execution.
#[derive(Debug)]
pub struct StreamOutput {
    pub wait: WaitOutcome,
    pub stderr: Vec<u8>,
    pub stderr_truncated: usize,
    pub duration: Duration,
}

/// Spawn `cmd` and stream its stdout lines to `on_line` until exit,
/// timeout, or abort. Lines observed after a kill decision are discarded.
pub fn run_streaming(
    mut cmd: Command,
    params: &StreamParams<'_>,
    on_line: &(dyn Fn(&str) + Sync),
) -> Result<StreamOutput> {
    if params.stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let start = Instant::now();
    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn child process")?;

    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let deadline = params.timeout.map(|timeout| start + timeout);
    let suppress = AtomicBool::new(false);

    type StreamState = (WaitOutcome, Vec<u8>, usize);
    let (wait, stderr_buf, stderr_truncated) = thread::scope(|scope| -> Result<StreamState> {
        if let (Some(mut pipe), Some(input)) = (stdin, params.stdin) {
            scope.spawn(move || {
                // The child may exit without draining stdin; a broken pipe
                // here is not an error.
                let _ = pipe.write_all(input);
            });
        }
        let suppress_ref = &suppress;
        let stdout_handle = scope.spawn(move || read_lines(stdout, suppress_ref, on_line));
        let limit = params.stderr_limit_bytes;
        let stderr_handle = scope.spawn(move || read_limited(stderr, limit));

        let wait = wait_with_deadline(&mut child, deadline, params.abort, suppress_ref)?;

        stdout_handle
            .join()
            .map_err(|_| anyhow!("stdout reader thread panicked"))?
            .context("read child stdout")?;
        let (stderr_buf, stderr_truncated) = stderr_handle
            .join()
            .map_err(|_| anyhow!("stderr reader thread panicked"))?
            .context("read child stderr")?;
        Ok((wait, stderr_buf, stderr_truncated))
    })?;

    if stderr_truncated > 0 {
        warn!(stderr_truncated, "stderr capture truncated");
    }

    debug!(?wait, "child process finished");
    Ok(StreamOutput {
        wait,
        stderr: stderr_buf,
        stderr_truncated,
        duration: start.elapsed(),
    })
}

fn wait_with_deadline(
    child: &mut Child,
    deadline: Option<Instant>,
    abort: &AbortFlag,
    suppress: &AtomicBool,
) -> Result<WaitOutcome> {
    loop {
        if abort.is_set() {
            debug!("abort requested, killing child");
            suppress.store(true, Ordering::SeqCst);
            kill_and_reap(child)?;
            return Ok(WaitOutcome::Aborted);
        }
        let now = Instant::now();
        let slice = match deadline {
            Some(deadline) if now >= deadline => {
                warn!("child process timed out, killing");
                suppress.store(true, Ordering::SeqCst);
                kill_and_reap(child)?;
                return Ok(WaitOutcome::TimedOut);
            }
            Some(deadline) => WAIT_SLICE.min(deadline - now),
            None => WAIT_SLICE,
        };
        if let Some(status) = child
            .wait_timeout(slice)
            .context("wait for child process")?
        {
            return Ok(WaitOutcome::Exited(status));
        }
    }
}

fn kill_and_reap(child: &mut Child) -> Result<()> {
    child.kill().context("kill child process")?;
    child.wait().context("wait for child after kill")?;
    Ok(())
}

/// Deliver complete lines to `on_line`, buffering partial lines across
/// reads; flush any unterminated tail at end of stream.
fn read_lines<R: Read>(
    mut reader: R,
    suppress: &AtomicBool,
    on_line: &(dyn Fn(&str) + Sync),
) -> Result<()> {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read stream")?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&chunk[..n]);
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            emit_line(&line[..line.len() - 1], suppress, on_line);
        }
    }
    if !pending.is_empty() {
        emit_line(&pending, suppress, on_line);
    }
    Ok(())
}

fn emit_line(raw: &[u8], suppress: &AtomicBool, on_line: &(dyn Fn(&str) + Sync)) {
    if suppress.load(Ordering::SeqCst) {
        return;
    }
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches('\r');
    if line.is_empty() {
        return;
    }
    on_line(line);
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read stream")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }
    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn streams_lines_including_unterminated_tail() {
        let lines = Mutex::new(Vec::<String>::new());
        let abort = AbortFlag::new();
        let output = run_streaming(
            sh("printf 'one\\ntwo\\ntail'"),
            &StreamParams {
                stdin: None,
                timeout: Some(Duration::from_secs(5)),
                stderr_limit_bytes: 1000,
                abort: &abort,
            },
            &|line| lines.lock().expect("lock").push(line.to_string()),
        )
        .expect("run");

        assert!(matches!(output.wait, WaitOutcome::Exited(status) if status.success()));
        assert_eq!(
            *lines.lock().expect("lock"),
            vec!["one".to_string(), "two".to_string(), "tail".to_string()]
        );
    }

    #[test]
    fn passes_stdin_and_captures_stderr() {
        let abort = AbortFlag::new();
        let output = run_streaming(
            sh("cat >/dev/null; echo 'oops' >&2; exit 3"),
            &StreamParams {
                stdin: Some(b"hello"),
                timeout: Some(Duration::from_secs(5)),
                stderr_limit_bytes: 1000,
                abort: &abort,
            },
            &|_| {},
        )
        .expect("run");

        let WaitOutcome::Exited(status) = output.wait else {
            panic!("expected exit");
        };
        assert_eq!(status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "oops");
    }

    #[test]
    fn timeout_kills_child_and_reports_timed_out() {
        let abort = AbortFlag::new();
        let start = Instant::now();
        let output = run_streaming(
            sh("exec sleep 5"),
            &StreamParams {
                stdin: None,
                timeout: Some(Duration::from_millis(200)),
                stderr_limit_bytes: 1000,
                abort: &abort,
            },
            &|_| {},
        )
        .expect("run");

        assert_eq!(output.wait, WaitOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn preset_abort_kills_child_promptly() {
        let abort = AbortFlag::new();
        abort.set();
        let start = Instant::now();
        let output = run_streaming(
            sh("exec sleep 5"),
            &StreamParams {
                stdin: None,
                timeout: Some(Duration::from_secs(10)),
                stderr_limit_bytes: 1000,
                abort: &abort,
            },
            &|_| {},
        )
        .expect("run");

        assert_eq!(output.wait, WaitOutcome::Aborted);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn abort_from_another_thread_unblocks_wait() {
        let abort = AbortFlag::new();
        let handle = abort.clone();
        let setter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            handle.set();
        });

        let start = Instant::now();
        let output = run_streaming(
            sh("exec sleep 5"),
            &StreamParams {
                stdin: None,
                timeout: None,
                stderr_limit_bytes: 1000,
                abort: &abort,
            },
            &|_| {},
        )
        .expect("run");
        setter.join().expect("join setter");

        assert_eq!(output.wait, WaitOutcome::Aborted);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn stderr_capture_is_bounded() {
        let abort = AbortFlag::new();
        let output = run_streaming(
            sh("head -c 4096 /dev/zero | tr '\\0' 'e' >&2"),
            &StreamParams {
                stdin: None,
                timeout: Some(Duration::from_secs(5)),
                stderr_limit_bytes: 100,
                abort: &abort,
            },
            &|_| {},
        )
        .expect("run");

        assert_eq!(output.stderr.len(), 100);
        assert_eq!(output.stderr_truncated, 4096 - 100);
    }

    #[test]
    fn missing_executable_fails_with_spawn_error() {
        let abort = AbortFlag::new();
        let err = run_streaming(
            Command::new("definitely-not-an-installed-binary-xyz"),
            &StreamParams {
                stdin: None,
                timeout: Some(Duration::from_secs(1)),
                stderr_limit_bytes: 1000,
                abort: &abort,
            },
            &|_| {},
        )
        .expect_err("spawn should fail");
        let io = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<std::io::Error>())
            .expect("io error in chain");
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
    }
}
