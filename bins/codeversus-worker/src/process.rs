//! Local process sandbox
//!
//! Runs the program as a plain child process inside the submission workspace
//! with a cleared environment. This is NOT an isolation boundary: there is no
//! network or filesystem confinement, and memory is only capped best-effort
//! through `ulimit -v`. Intended for development and tests.

use async_trait::async_trait;
use codeversus_common::types::{ExecutionResult, ExecutionStatus, ResourceLimits};
use codeversus_common::JudgeError;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capture::{read_bounded, Captured};
use crate::config::LanguageConfig;
use crate::engine::{BuildOutcome, Sandbox, TEARDOWN_ALLOWANCE};
use crate::workspace::Workspace;

/// Compiler diagnostics kept per build
const COMPILE_OUTPUT_LIMIT: usize = 64 * 1024;

const SAFE_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

pub struct ProcessSandbox {
    compile_timeout: Duration,
}

enum Waited {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

struct ProcessRun {
    waited: Waited,
    stdout: Captured,
    stderr: Captured,
    elapsed: Duration,
}

impl ProcessSandbox {
    pub fn new(compile_timeout: Duration) -> Self {
        Self { compile_timeout }
    }

    fn command(&self, argv: &[String], workspace: &Workspace, memory_limit_kb: Option<u64>) -> Command {
        let mut command = match memory_limit_kb {
            Some(kb) => {
                let mut sh = Command::new("sh");
                sh.arg("-c")
                    .arg(format!("ulimit -v {} && exec \"$@\"", kb))
                    .arg("sandbox")
                    .args(argv);
                sh
            }
            None => {
                let mut cmd = Command::new(&argv[0]);
                cmd.args(&argv[1..]);
                cmd
            }
        };
        command
            .current_dir(workspace.code_dir())
            .env_clear()
            .env("PATH", SAFE_PATH)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so background children can be killed with the program
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    /// Spawn, feed stdin, wait with a deadline, and kill on timeout or cancel
    async fn execute(
        &self,
        mut command: Command,
        input: &str,
        time_limit: Duration,
        output_limit: usize,
        cancel: &CancellationToken,
    ) -> Result<ProcessRun, JudgeError> {
        let start = Instant::now();
        let mut child: Child = command
            .spawn()
            .map_err(|e| JudgeError::SandboxSetup(format!("failed to spawn process: {}", e)))?;
        let group = child.id();

        let stdin = child.stdin.take();
        let input = input.as_bytes().to_vec();
        let feeder: JoinHandle<()> = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                // The program may exit without reading its input
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            }
        });
        let stdout_task = tokio::spawn(read_bounded(child.stdout.take(), output_limit));
        let stderr_task = tokio::spawn(read_bounded(child.stderr.take(), output_limit));

        let waited = tokio::select! {
            res = tokio::time::timeout(time_limit, child.wait()) => match res {
                Ok(Ok(status)) => Waited::Exited(status),
                Ok(Err(e)) => {
                    feeder.abort();
                    kill_group(group);
                    return Err(JudgeError::SandboxSetup(format!("failed to wait for process: {}", e)));
                }
                Err(_) => Waited::TimedOut,
            },
            _ = cancel.cancelled() => Waited::Cancelled,
        };
        let elapsed = start.elapsed();

        // Anything the program left behind dies with it and releases the pipes
        kill_group(group);
        if !matches!(waited, Waited::Exited(_)) {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill sandboxed process");
            }
        }
        feeder.abort();

        let stdout = collect(stdout_task, output_limit).await;
        let stderr = collect(stderr_task, output_limit).await;

        Ok(ProcessRun {
            waited,
            stdout,
            stderr,
            elapsed,
        })
    }
}

/// Join a reader task, giving up after the teardown allowance.
///
/// A reader that never reached EOF yields output flagged as truncated.
async fn collect(task: JoinHandle<Captured>, cap: usize) -> Captured {
    match tokio::time::timeout(TEARDOWN_ALLOWANCE, task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            warn!(error = %e, "Output reader failed");
            Captured::incomplete(cap)
        }
        Err(_) => {
            warn!("Output pipe still open after teardown allowance");
            Captured::incomplete(cap)
        }
    }
}

#[cfg(unix)]
fn kill_group(group: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = group.and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_group: Option<u32>) {}

#[cfg(unix)]
fn exit_code(status: &ExitStatus) -> Option<i64> {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .map(i64::from)
        .or_else(|| status.signal().map(|sig| 128 + i64::from(sig)))
}

#[cfg(not(unix))]
fn exit_code(status: &ExitStatus) -> Option<i64> {
    status.code().map(i64::from)
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    fn name(&self) -> &str {
        "process"
    }

    async fn build(
        &self,
        workspace: &Workspace,
        language: &LanguageConfig,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, JudgeError> {
        let workdir = workspace.code_dir().display().to_string();
        let Some(argv) = language.compile_command(&workdir) else {
            return Ok(BuildOutcome::Ready);
        };

        debug!(language = %language.name, "Compiling in process sandbox");
        let command = self.command(&argv, workspace, None);
        let run = self
            .execute(command, "", self.compile_timeout, COMPILE_OUTPUT_LIMIT, cancel)
            .await?;
        let wall_time_ms = run.elapsed.as_millis() as u64;

        match run.waited {
            Waited::Cancelled => Err(JudgeError::Cancelled),
            Waited::TimedOut => Ok(BuildOutcome::Failed(ExecutionResult::compile_error(
                format!("compilation exceeded {}ms", self.compile_timeout.as_millis()),
                false,
                wall_time_ms,
            ))),
            Waited::Exited(status) if status.success() => Ok(BuildOutcome::Ready),
            Waited::Exited(_) => {
                let mut diagnostics = run.stdout;
                let (stderr, _) = run.stderr.into_parts();
                diagnostics.push(stderr.as_bytes());
                let truncated = diagnostics.is_truncated();
                let (text, _) = diagnostics.into_parts();
                Ok(BuildOutcome::Failed(ExecutionResult::compile_error(
                    text,
                    truncated,
                    wall_time_ms,
                )))
            }
        }
    }

    async fn run(
        &self,
        workspace: &Workspace,
        language: &LanguageConfig,
        input: &str,
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, JudgeError> {
        let workdir = workspace.code_dir().display().to_string();
        let argv = language.run_command(&workdir);
        let command = self.command(&argv, workspace, Some(limits.memory_limit_mb.saturating_mul(1024)));

        let run = self
            .execute(command, input, limits.time_limit(), limits.output_limit_bytes, cancel)
            .await?;

        let (status, exit_code) = match run.waited {
            Waited::Cancelled => return Err(JudgeError::Cancelled),
            Waited::TimedOut => (ExecutionStatus::TimedOut, None),
            Waited::Exited(status) if status.success() => (ExecutionStatus::Completed, Some(0)),
            Waited::Exited(status) => (ExecutionStatus::RuntimeError, exit_code(&status)),
        };

        let (stdout, stdout_truncated) = run.stdout.into_parts();
        let (stderr, stderr_truncated) = run.stderr.into_parts();
        Ok(ExecutionResult {
            status,
            exit_code,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            wall_time_ms: run.elapsed.as_millis() as u64,
            peak_memory_bytes: None,
        })
    }
}
