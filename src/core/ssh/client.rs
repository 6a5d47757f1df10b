use serde::Serialize;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::invocation::{build_remote_invocation, RemoteInvocation};

/// Hard limit on a single remote call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Hard limit on captured output, applied to stdout and stderr separately.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const READ_CHUNK: usize = 8192;

/// How long to wait for pipes to close after the process group is killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecFailureKind {
    /// The command ran and exited non-zero (or was killed by a signal).
    NonZeroExit,
    /// The call exceeded its timeout; the whole process group was killed.
    Timeout,
    /// stdout or stderr exceeded the capture limit; the process group was killed.
    OutputLimit,
    /// The local process could not be started at all.
    Spawn,
}

/// A failed remote call. Partial output captured before the failure is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecFailure {
    pub kind: ExecFailureKind,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl std::fmt::Display for ExecFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ExecFailure {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Anything that can synchronously run a command sequence against a named host.
///
/// `Ok` means the sequence exited zero. Every other outcome (non-zero exit,
/// timeout, output overflow, spawn failure) is an `ExecFailure`.
pub trait RemoteExec {
    fn execute(&self, host: &str, command_sequence: &str) -> Result<CommandOutput, ExecFailure>;
}

/// Production channel: one `ssh` process per call, relying on the host's existing SSH trust.
#[derive(Debug, Clone, Default)]
pub struct SshExec {
    limits: ExecLimits,
}

impl SshExec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: ExecLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> ExecLimits {
        self.limits
    }
}

impl RemoteExec for SshExec {
    fn execute(&self, host: &str, command_sequence: &str) -> Result<CommandOutput, ExecFailure> {
        let invocation = build_remote_invocation(host, command_sequence);
        run_invocation(&invocation, &self.limits)
    }
}

enum Termination {
    Exited(ExitStatus),
    TimedOut,
    OutputLimit,
    WaitFailed(std::io::Error),
}

/// Run an invocation to completion, enforcing the timeout and output cap.
///
/// The child is placed in its own process group so that a timeout kills every
/// process it started, not just the leaf. The deadline also covers draining
/// output, so a background job that keeps the pipes open cannot outlive it.
pub fn run_invocation(
    invocation: &RemoteInvocation,
    limits: &ExecLimits,
) -> Result<CommandOutput, ExecFailure> {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|e| ExecFailure {
        kind: ExecFailureKind::Spawn,
        message: format!("Failed to start {}: {}", invocation.program, e),
        stdout: String::new(),
        stderr: String::new(),
        exit_code: None,
    })?;

    let overflow = Arc::new(AtomicBool::new(false));
    let stdout_stream = CapturedStream::spawn(
        child.stdout.take(),
        limits.max_output_bytes,
        Arc::clone(&overflow),
    );
    let stderr_stream = CapturedStream::spawn(
        child.stderr.take(),
        limits.max_output_bytes,
        Arc::clone(&overflow),
    );

    let termination = wait_with_limits(
        &mut child,
        limits,
        &overflow,
        &[&stdout_stream, &stderr_stream],
    );

    let stdout = stdout_stream.finish();
    let stderr = stderr_stream.finish();

    let termination = match termination {
        Termination::Exited(_) if overflow.load(Ordering::SeqCst) => Termination::OutputLimit,
        other => other,
    };

    match termination {
        Termination::Exited(status) if status.success() => Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: 0,
        }),
        Termination::Exited(status) => {
            let message = match status.code() {
                Some(code) => format!("Command failed with exit code {}", code),
                None => "Command was terminated by a signal".to_string(),
            };
            Err(ExecFailure {
                kind: ExecFailureKind::NonZeroExit,
                message,
                stdout,
                stderr,
                exit_code: status.code(),
            })
        }
        Termination::TimedOut => Err(ExecFailure {
            kind: ExecFailureKind::Timeout,
            message: format!(
                "Command timed out after {}s",
                limits.timeout.as_secs_f64()
            ),
            stdout,
            stderr,
            exit_code: None,
        }),
        Termination::OutputLimit => Err(ExecFailure {
            kind: ExecFailureKind::OutputLimit,
            message: format!(
                "Command output exceeded {} bytes",
                limits.max_output_bytes
            ),
            stdout,
            stderr,
            exit_code: None,
        }),
        Termination::WaitFailed(e) => Err(ExecFailure {
            kind: ExecFailureKind::Spawn,
            message: format!("Failed to wait for {}: {}", invocation.program, e),
            stdout,
            stderr,
            exit_code: None,
        }),
    }
}

/// Poll until the child has exited and both streams hit EOF, or a limit trips.
fn wait_with_limits(
    child: &mut Child,
    limits: &ExecLimits,
    overflow: &AtomicBool,
    streams: &[&CapturedStream],
) -> Termination {
    let deadline = Instant::now() + limits.timeout;
    let mut exited: Option<ExitStatus> = None;

    loop {
        if exited.is_none() {
            match child.try_wait() {
                Ok(status) => exited = status,
                Err(e) => {
                    kill_process_group(child);
                    return Termination::WaitFailed(e);
                }
            }
        }

        if overflow.load(Ordering::SeqCst) {
            kill_and_reap(child, exited.is_some());
            return Termination::OutputLimit;
        }

        if let Some(status) = exited {
            if streams.iter().all(|s| s.is_drained()) {
                return Termination::Exited(status);
            }
        }

        if Instant::now() >= deadline {
            kill_and_reap(child, exited.is_some());
            return Termination::TimedOut;
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill the whole group. The leader may already be reaped while other
/// members still hold its pipes; the group id stays valid until they exit.
fn kill_and_reap(child: &mut Child, reaped: bool) {
    kill_process_group(child);
    if !reaped {
        let _ = child.wait();
    }
}

/// One captured pipe. The buffer is shared so partial output survives a
/// reader thread that never reaches EOF.
struct CapturedStream {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl CapturedStream {
    fn spawn<R>(source: Option<R>, max_bytes: usize, overflow: Arc<AtomicBool>) -> Self
    where
        R: Read + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reader = source.map(|mut source| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut chunk = [0u8; READ_CHUNK];
                loop {
                    match source.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let mut captured = lock(&buffer);
                            let room = max_bytes.saturating_sub(captured.len());
                            if n > room {
                                captured.extend_from_slice(&chunk[..room]);
                                overflow.store(true, Ordering::SeqCst);
                                break;
                            }
                            captured.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            })
        });

        Self { buffer, reader }
    }

    fn is_drained(&self) -> bool {
        self.reader.as_ref().map_or(true, |r| r.is_finished())
    }

    /// Collect what was captured, waiting briefly for the reader to see EOF
    /// after a kill. A reader still blocked after that is left detached.
    fn finish(mut self) -> String {
        let give_up = Instant::now() + DRAIN_GRACE;
        while !self.is_drained() && Instant::now() < give_up {
            thread::sleep(POLL_INTERVAL);
        }
        if self.is_drained() {
            if let Some(reader) = self.reader.take() {
                let _ = reader.join();
            }
        }

        String::from_utf8_lossy(&lock(&self.buffer)).into_owned()
    }
}

fn lock(buffer: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: killpg only sends a signal. The child was spawned with
    // process_group(0), so its pid is the id of a group it leads.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn local(limits: ExecLimits) -> SshExec {
        SshExec::with_limits(limits)
    }

    #[test]
    fn successful_command_captures_stdout_and_stderr() {
        let output = SshExec::new()
            .execute("localhost", "echo out && echo err >&2")
            .unwrap();

        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, 0);
    }

    #[test]
    fn chained_prefix_keeps_working_directory() {
        let output = SshExec::new().execute("localhost", "cd /tmp && pwd").unwrap();
        assert!(output.stdout.trim().ends_with("tmp"));
    }

    #[test]
    fn non_zero_exit_carries_partial_output() {
        let failure = SshExec::new()
            .execute("localhost", "echo partial && echo broken >&2 && exit 3")
            .unwrap_err();

        assert_eq!(failure.kind, ExecFailureKind::NonZeroExit);
        assert_eq!(failure.exit_code, Some(3));
        assert_eq!(failure.stdout.trim(), "partial");
        assert_eq!(failure.stderr.trim(), "broken");
    }

    #[test]
    fn timeout_kills_the_command() {
        let exec = local(ExecLimits {
            timeout: Duration::from_millis(300),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        });

        let started = Instant::now();
        let failure = exec.execute("localhost", "echo early && sleep 20").unwrap_err();

        assert_eq!(failure.kind, ExecFailureKind::Timeout);
        assert_eq!(failure.exit_code, None);
        assert_eq!(failure.stdout.trim(), "early");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    /// A pid counts as gone once it no longer exists or is a zombie awaiting reaping.
    #[cfg(target_os = "linux")]
    fn process_alive(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| !rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timeout_kills_background_children_in_the_group() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("child.pid");
        let exec = local(ExecLimits {
            timeout: Duration::from_millis(500),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        });

        let command = format!("sleep 30 & echo $! > {} && wait", pid_file.display());
        let failure = exec.execute("localhost", &command).unwrap_err();
        assert_eq!(failure.kind, ExecFailureKind::Timeout);

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();

        let mut alive = true;
        for _ in 0..40 {
            alive = process_alive(&pid);
            if !alive {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!alive, "background sleep survived the timeout");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timeout_covers_background_job_holding_the_pipes() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("daemon.pid");
        let exec = local(ExecLimits {
            timeout: Duration::from_secs(1),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        });

        let started = Instant::now();
        let command = format!("echo started; sleep 15 & echo $! > {}", pid_file.display());
        let failure = exec.execute("localhost", &command).unwrap_err();

        assert_eq!(failure.kind, ExecFailureKind::Timeout);
        assert_eq!(failure.stdout.trim(), "started");
        assert!(started.elapsed() < Duration::from_secs(8));

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        let mut alive = true;
        for _ in 0..40 {
            alive = process_alive(&pid);
            if !alive {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!alive, "background sleep outlived the call");
    }

    #[test]
    fn detached_background_job_does_not_hold_the_call() {
        let exec = local(ExecLimits {
            timeout: Duration::from_secs(10),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        });

        let started = Instant::now();
        let output = exec
            .execute("localhost", "sleep 5 > /dev/null 2>&1 & echo done")
            .unwrap();

        assert_eq!(output.stdout.trim(), "done");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn output_over_limit_is_truncated_and_reported() {
        let exec = local(ExecLimits {
            timeout: Duration::from_secs(30),
            max_output_bytes: 1024,
        });

        let failure = exec
            .execute("localhost", "head -c 200000 /dev/zero | tr '\\0' a")
            .unwrap_err();

        assert_eq!(failure.kind, ExecFailureKind::OutputLimit);
        assert_eq!(failure.stdout.len(), 1024);
    }
}
