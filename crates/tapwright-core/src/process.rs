//! External command execution with hard timeouts.
//!
//! Every toolchain interaction (`adb`, `emulator`, `xcrun simctl`, `idb`,
//! `sdkmanager`, ...) goes through the [`CommandRunner`] trait so that device
//! and toolchain logic can be exercised against a scripted runner in tests.
//! [`ProcessExecutor`] is the production implementation built on
//! `tokio::process`.
//!
//! # Timeouts
//!
//! When [`CommandSpec::timeout`] is set, one deadline covers both the
//! process exit and draining its output pipes. If the deadline passes, the
//! whole process group is killed (on unix every command runs in its own
//! group, so background children that inherited the pipes go too), the
//! direct child is reaped, and [`ProcessError::Timeout`] is returned.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tapwright_core::process::{CommandRunner, CommandSpec, ProcessExecutor};
//!
//! # async fn example() -> Result<(), tapwright_core::process::ProcessError> {
//! let spec = CommandSpec::new("adb")
//!     .args(["devices"])
//!     .timeout(Duration::from_secs(10));
//! let output = ProcessExecutor::new().run(&spec).await?;
//! println!("{}", output.stdout_text());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Errors produced while running an external command.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The program could not be spawned because it does not exist.
    #[error("'{program}' is not installed or not on PATH")]
    NotFound {
        /// The program that was requested.
        program: String,
    },

    /// The command did not finish before its timeout and was killed.
    #[error("'{command}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The command line that timed out.
        command: String,
        /// The configured timeout.
        timeout_ms: u64,
    },

    /// The command exited with a non-zero status.
    #[error("'{command}' failed (exit code {}): {stderr}", exit_label(.code))]
    Failed {
        /// The command line that failed.
        command: String,
        /// The exit code, if the process was not terminated by a signal.
        code: Option<i32>,
        /// Captured standard error, verbatim.
        stderr: String,
        /// Captured standard output, kept for tools that report errors there.
        stdout: String,
    },

    /// An I/O error occurred while talking to the process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

impl ProcessError {
    /// Returns true if the user can fix this error (e.g. by installing a tool).
    pub fn is_actionable(&self) -> bool {
        matches!(self, ProcessError::NotFound { .. })
    }
}

/// Description of a command to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Optional hard timeout.
    pub timeout: Option<Duration>,
    /// Optional text written to the process's standard input.
    pub stdin: Option<String>,
    /// Extra environment variables.
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    /// Creates a spec for `program` with no arguments and no timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the hard timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets an optional timeout, leaving the spec unchanged for `None`.
    pub fn maybe_timeout(mut self, timeout: Option<Duration>) -> Self {
        if timeout.is_some() {
            self.timeout = timeout;
        }
        self
    }

    /// Feeds `input` to the process's standard input.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Human-readable command line, used in errors and logs.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Raw standard output.
    pub stdout: Vec<u8>,
    /// Raw standard error.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Builds an output from text, mainly for scripted runners.
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into().into_bytes(),
            stderr: Vec::new(),
        }
    }

    /// Standard output decoded lossily as UTF-8.
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Standard error decoded lossily as UTF-8.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Runs external commands.
///
/// Implemented by [`ProcessExecutor`] for real processes; tests provide
/// scripted implementations.
#[async_trait]
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    /// Runs the command to completion and captures its output.
    ///
    /// A non-zero exit status is reported as [`ProcessError::Failed`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError>;

    /// Starts a long-lived process without waiting for it, returning its pid.
    ///
    /// Used for processes such as the Android emulator that keep running
    /// after the call that started them.
    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<u32, ProcessError>;
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    /// Creates a new executor.
    pub fn new() -> Self {
        Self
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> ProcessError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ProcessError::NotFound {
            program: program.to_string(),
        }
    } else {
        ProcessError::Io(err)
    }
}

type OutputTask = JoinHandle<std::io::Result<Vec<u8>>>;

fn read_all<R>(reader: Option<R>) -> OutputTask
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            reader.read_to_end(&mut buf).await?;
        }
        Ok(buf)
    })
}

async fn join_output(handle: &mut OutputTask) -> Result<Vec<u8>, ProcessError> {
    handle
        .await
        .map_err(|e| ProcessError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(ProcessError::Io)
}

/// Waits for exit and for both pipes to reach EOF.
///
/// The pipes stay open while any process holding them is alive, so this only
/// finishes once every inheritor has exited.
async fn collect_output(
    child: &mut Child,
    stdout: &mut OutputTask,
    stderr: &mut OutputTask,
) -> Result<(ExitStatus, Vec<u8>, Vec<u8>), ProcessError> {
    let status = child.wait().await?;
    let stdout = join_output(stdout).await?;
    let stderr = join_output(stderr).await?;
    Ok((status, stdout, stderr))
}

#[cfg(unix)]
fn kill_process_group(pgid: Option<u32>, command: &str) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // ESRCH: the group is already gone.
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(command, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: Option<u32>, _command: &str) {}

#[async_trait]
impl CommandRunner for ProcessExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        let command_line = spec.display();
        debug!(command = %command_line, timeout_ms = ?spec.timeout.map(|t| t.as_millis()), "running command");

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if spec.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| spawn_error(&spec.program, e))?;
        // The child leads its own group, so its pid is the group id.
        let pgid = child.id();

        if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
            // The process may exit before consuming its input; a broken pipe is not an error.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(error = %e, "stdin write ended early");
                }
            });
        }

        let mut stdout_task = read_all(child.stdout.take());
        let mut stderr_task = read_all(child.stderr.take());

        let collected = {
            let collect = collect_output(&mut child, &mut stdout_task, &mut stderr_task);
            match spec.timeout {
                Some(timeout) => tokio::time::timeout(timeout, collect).await.ok(),
                None => Some(collect.await),
            }
        };

        let (status, stdout, stderr) = match collected {
            Some(result) => result?,
            None => {
                kill_process_group(pgid, &command_line);
                // kill() also reaps the child; it may already have exited.
                if let Err(e) = child.kill().await {
                    debug!(command = %command_line, error = %e, "direct child already gone");
                }
                stdout_task.abort();
                stderr_task.abort();
                let timeout = spec.timeout.unwrap_or_default();
                return Err(ProcessError::Timeout {
                    command: command_line,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };

        if !status.success() {
            return Err(ProcessError::Failed {
                command: command_line,
                code: status.code(),
                stderr: String::from_utf8_lossy(&stderr).to_string(),
                stdout: String::from_utf8_lossy(&stdout).to_string(),
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }

    async fn spawn_detached(&self, spec: &CommandSpec) -> Result<u32, ProcessError> {
        debug!(command = %spec.display(), "spawning detached process");
        let child = tokio::process::Command::new(&spec.program)
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| spawn_error(&spec.program, e))?;

        child.id().ok_or_else(|| {
            ProcessError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("'{}' exited before its pid could be read", spec.program),
            ))
        })
    }
}

/// Resolves `tool` through the host's PATH lookup command (`which`, or
/// `where` on Windows). Returns the first reported path, or `None` when the
/// lookup fails or prints nothing.
pub async fn which(runner: &dyn CommandRunner, tool: &str, timeout: Duration) -> Option<PathBuf> {
    let lookup = if cfg!(windows) { "where" } else { "which" };
    which_with(runner, lookup, tool, timeout).await
}

/// [`which`] with an explicit lookup command.
pub async fn which_with(
    runner: &dyn CommandRunner,
    lookup: &str,
    tool: &str,
    timeout: Duration,
) -> Option<PathBuf> {
    let spec = CommandSpec::new(lookup).arg(tool).timeout(timeout);
    let output = match runner.run(&spec).await {
        Ok(output) => output,
        Err(e) => {
            debug!(tool, error = %e, "PATH lookup found nothing");
            return None;
        }
    };
    output
        .stdout_text()
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn spec_builder_and_display() {
        let spec = CommandSpec::new("adb")
            .args(["-s", "emulator-5554"])
            .arg("shell")
            .timeout(Duration::from_millis(500));
        assert_eq!(spec.display(), "adb -s emulator-5554 shell");
        assert_eq!(spec.timeout, Some(Duration::from_millis(500)));
        assert_eq!(CommandSpec::new("adb").display(), "adb");
    }

    #[test]
    fn maybe_timeout_keeps_existing_value_for_none() {
        let spec = CommandSpec::new("x")
            .timeout(Duration::from_secs(1))
            .maybe_timeout(None);
        assert_eq!(spec.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn error_display() {
        let err = ProcessError::NotFound { program: "adb".into() };
        assert!(err.to_string().contains("not installed"));
        assert!(err.is_actionable());

        let err = ProcessError::Timeout { command: "sleep 10".into(), timeout_ms: 100 };
        assert_eq!(err.to_string(), "'sleep 10' timed out after 100ms");
        assert!(!err.is_actionable());

        let err = ProcessError::Failed {
            command: "adb shell".into(),
            code: Some(1),
            stderr: "error: no devices".into(),
            stdout: String::new(),
        };
        assert!(err.to_string().contains("exit code 1"));
        assert!(err.to_string().contains("error: no devices"));
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let result = ProcessExecutor::new()
            .run(&CommandSpec::new("tapwright-definitely-missing-binary"))
            .await;
        assert!(matches!(result, Err(ProcessError::NotFound { .. })));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        #[tokio::test]
        async fn captures_stdout() {
            let output = ProcessExecutor::new()
                .run(&CommandSpec::new("sh").args(["-c", "echo hello"]))
                .await
                .unwrap();
            assert_eq!(output.stdout_text().trim(), "hello");
        }

        #[tokio::test]
        async fn non_zero_exit_surfaces_stderr_verbatim() {
            let result = ProcessExecutor::new()
                .run(&CommandSpec::new("sh").args(["-c", "echo 'boom happened' >&2; exit 3"]))
                .await;
            match result {
                Err(ProcessError::Failed { code, stderr, .. }) => {
                    assert_eq!(code, Some(3));
                    assert_eq!(stderr.trim(), "boom happened");
                }
                other => panic!("Expected Failed, got: {:?}", other),
            }
        }

        #[tokio::test]
        async fn stdin_is_forwarded() {
            let output = ProcessExecutor::new()
                .run(&CommandSpec::new("cat").stdin("y\ny\n"))
                .await
                .unwrap();
            assert_eq!(output.stdout_text(), "y\ny\n");
        }

        #[tokio::test]
        async fn timeout_kills_the_process() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("pid");
            let script = format!("echo $$ > {}; exec sleep 10", pid_file.display());

            let start = Instant::now();
            let result = ProcessExecutor::new()
                .run(
                    &CommandSpec::new("sh")
                        .args(["-c", script.as_str()])
                        .timeout(Duration::from_millis(100)),
                )
                .await;
            let elapsed = start.elapsed();

            assert!(matches!(result, Err(ProcessError::Timeout { timeout_ms: 100, .. })));
            assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);

            let pid = std::fs::read_to_string(&pid_file).unwrap();
            let probe = ProcessExecutor::new()
                .run(&CommandSpec::new("kill").args(["-0", pid.trim()]))
                .await;
            assert!(probe.is_err(), "process {} should no longer be running", pid.trim());
        }

        /// True while `pid` exists and is not a zombie awaiting its reaper.
        async fn is_running(pid: &str) -> bool {
            match ProcessExecutor::new()
                .run(&CommandSpec::new("ps").args(["-o", "stat=", "-p", pid]))
                .await
            {
                Ok(output) => {
                    let stat = output.stdout_text();
                    !stat.trim().is_empty() && !stat.trim_start().starts_with('Z')
                }
                Err(_) => false,
            }
        }

        #[tokio::test]
        async fn timeout_bounds_background_children_holding_the_pipes() {
            let dir = tempfile::tempdir().unwrap();
            let pid_file = dir.path().join("bg.pid");
            let script = format!("sleep 30 & echo $! > {}; echo hi", pid_file.display());

            let start = Instant::now();
            let result = ProcessExecutor::new()
                .run(
                    &CommandSpec::new("sh")
                        .args(["-c", script.as_str()])
                        .timeout(Duration::from_millis(300)),
                )
                .await;
            let elapsed = start.elapsed();

            assert!(
                matches!(result, Err(ProcessError::Timeout { timeout_ms: 300, .. })),
                "got {:?}",
                result
            );
            assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);

            let pid = std::fs::read_to_string(&pid_file).unwrap();
            let mut alive = true;
            for _ in 0..20 {
                alive = is_running(pid.trim()).await;
                if !alive {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            assert!(!alive, "background process {} should have been killed", pid.trim());
        }

        #[tokio::test]
        async fn detached_background_children_do_not_delay_completion() {
            let start = Instant::now();
            let output = ProcessExecutor::new()
                .run(
                    &CommandSpec::new("sh")
                        .args(["-c", "(sleep 3 >/dev/null 2>&1 &); echo hi"])
                        .timeout(Duration::from_secs(5)),
                )
                .await
                .unwrap();
            assert_eq!(output.stdout_text(), "hi\n");
            assert!(start.elapsed() < Duration::from_secs(2));
        }

        #[tokio::test]
        async fn which_resolves_sh() {
            let runner = ProcessExecutor::new();
            let sh = which(&runner, "sh", Duration::from_secs(5)).await.unwrap();
            assert!(sh.is_absolute());
            assert!(which(&runner, "tapwright-definitely-missing-binary", Duration::from_secs(5))
                .await
                .is_none());
        }

        #[tokio::test]
        async fn spawn_detached_returns_pid() {
            let pid = ProcessExecutor::new()
                .spawn_detached(&CommandSpec::new("sh").args(["-c", "exit 0"]))
                .await
                .unwrap();
            assert!(pid > 0);
        }
    }
}
