/// Docker sandbox backend
///
/// **Docker Execution Rules:**
/// 1. Pulls the language image if not present
/// 2. Builds once per submission in a container that mounts the workspace
///    read-write
/// 3. Runs each test case in a fresh container with:
///    - Network disabled
///    - Memory ceiling with swap disabled, CPU quota, PID limit
///    - Read-only root filesystem, small tmpfs on /tmp
///    - Workspace mounted read-only, stdin file mounted read-only
///    - All capabilities dropped, no-new-privileges
/// 4. Captures stdout/stderr up to the output cap
/// 5. Kills the container on timeout or cancellation
/// 6. Reads OOM kills from container state; samples peak memory from the
///    stats stream while the program runs
/// 7. Removes every container it creates, on every exit path
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StatsOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use codeversus_common::types::{ExecutionResult, ExecutionStatus, ResourceLimits};
use codeversus_common::JudgeError;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::Captured;
use crate::config::LanguageConfig;
use crate::engine::{BuildOutcome, Sandbox};
use crate::workspace::Workspace;

/// Mount point of the submission workspace inside containers
const CONTAINER_WORKDIR: &str = "/code";
/// Mount point of the per-run stdin file
const CONTAINER_STDIN: &str = "/io/stdin";

const COMPILE_OUTPUT_LIMIT: usize = 64 * 1024;
const RUN_PIDS_LIMIT: i64 = 64;
const BUILD_PIDS_LIMIT: i64 = 256;

/// Container cleanup guard - guarantees container removal on drop
/// This ensures containers are cleaned up even if execution panics or is cancelled
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: String,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, container_id: String) -> Self {
        Self {
            docker,
            container_id,
        }
    }
}

impl<'a> Drop for ContainerGuard<'a> {
    fn drop(&mut self) {
        // Cannot be async in Drop
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to cleanup container");
            }
        });
    }
}

/// What to run in one container
struct ContainerSpec {
    image: String,
    cmd: Vec<String>,
    binds: Vec<String>,
    memory_bytes: i64,
    nano_cpus: i64,
    pids_limit: i64,
    time_limit: Duration,
    output_limit: usize,
}

enum Waited {
    Exited(Option<i64>),
    TimedOut,
    Cancelled,
}

struct ContainerRun {
    waited: Waited,
    oom_killed: bool,
    stdout: Captured,
    stderr: Captured,
    elapsed: Duration,
    peak_memory: Option<u64>,
}

pub struct DockerSandbox {
    docker: Docker,
    compile_timeout: Duration,
}

impl DockerSandbox {
    pub fn connect(compile_timeout: Duration) -> Result<Self, JudgeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| JudgeError::SandboxSetup(format!("failed to connect to Docker daemon: {}", e)))?;
        Ok(Self {
            docker,
            compile_timeout,
        })
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<(), JudgeError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling now");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| JudgeError::SandboxSetup(format!("failed to pull image '{}': {}", image, e)))?;
        }

        info!(image, "Image pulled successfully");
        Ok(())
    }

    async fn run_container(
        &self,
        job: ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<ContainerRun, JudgeError> {
        self.ensure_image(&job.image).await?;

        let config = Config {
            image: Some(job.image.clone()),
            cmd: Some(job.cmd),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                memory: Some(job.memory_bytes),
                memory_swap: Some(job.memory_bytes),
                nano_cpus: Some(job.nano_cpus),
                pids_limit: Some(job.pids_limit),
                network_mode: Some("none".to_string()),
                readonly_rootfs: Some(true),
                tmpfs: Some(HashMap::from([(
                    "/tmp".to_string(),
                    "rw,exec,size=64m".to_string(),
                )])),
                binds: Some(job.binds),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let container_name = format!("codeversus-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| JudgeError::SandboxSetup(format!("failed to create container: {}", e)))?;

        let container_id = container.id.clone();
        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| JudgeError::SandboxSetup(format!("failed to start container: {}", e)))?;
        let start_time = Instant::now();

        // Memory monitor runs alongside the program
        let peak = Arc::new(AtomicU64::new(0));
        let monitor = tokio::spawn(sample_memory(
            self.docker.clone(),
            container_id.clone(),
            peak.clone(),
        ));

        let mut stdout = Captured::new(job.output_limit);
        let mut stderr = Captured::new(job.output_limit);

        let waited = {
            let execution = async {
                let logs_options = Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    follow: true,
                    ..Default::default()
                });
                let mut logs = self.docker.logs(&container_id, logs_options);
                while let Some(output) = logs.next().await {
                    match output {
                        Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                        Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                        Ok(_) => {}
                        Err(e) => {
                            warn!(container_id = %container_id, error = %e, "Error reading container logs");
                            break;
                        }
                    }
                }

                let wait_options = WaitContainerOptions {
                    condition: "not-running",
                };
                let mut wait = self.docker.wait_container(&container_id, Some(wait_options));
                match wait.next().await {
                    Some(Ok(response)) => Some(response.status_code),
                    // bollard reports non-zero exits as an error carrying the code
                    Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
                    Some(Err(e)) => {
                        warn!(container_id = %container_id, error = %e, "Failed to get container exit code");
                        None
                    }
                    None => None,
                }
            };

            tokio::select! {
                res = tokio::time::timeout(job.time_limit, execution) => match res {
                    Ok(code) => Waited::Exited(code),
                    Err(_) => Waited::TimedOut,
                },
                _ = cancel.cancelled() => Waited::Cancelled,
            }
        };
        let elapsed = start_time.elapsed();
        monitor.abort();

        let mut oom_killed = false;
        match waited {
            Waited::Exited(_) => {
                match self
                    .docker
                    .inspect_container(&container_id, None::<InspectContainerOptions>)
                    .await
                {
                    Ok(inspect) => {
                        oom_killed = inspect
                            .state
                            .and_then(|s| s.oom_killed)
                            .unwrap_or(false);
                    }
                    Err(e) => warn!(container_id = %container_id, error = %e, "Failed to inspect container"),
                }
            }
            Waited::TimedOut | Waited::Cancelled => {
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container_id = %container_id, error = %e, "Failed to kill container");
                }
            }
        }

        let peak_bytes = peak.load(Ordering::Relaxed);
        Ok(ContainerRun {
            waited,
            oom_killed,
            stdout,
            stderr,
            elapsed,
            peak_memory: (peak_bytes > 0).then_some(peak_bytes),
        })
    }
}

/// Track the highest memory usage reported by the stats stream
async fn sample_memory(docker: Docker, container_id: String, peak: Arc<AtomicU64>) {
    let options = Some(StatsOptions {
        stream: true,
        one_shot: false,
    });
    let mut stats = docker.stats(&container_id, options);
    while let Some(Ok(sample)) = stats.next().await {
        let usage = sample
            .memory_stats
            .max_usage
            .or(sample.memory_stats.usage)
            .unwrap_or(0);
        peak.fetch_max(usage, Ordering::Relaxed);
    }
}

fn nano_cpus(cpu_limit: f32) -> i64 {
    (cpu_limit as f64 * 1_000_000_000.0) as i64
}

/// Docker takes memory as i64; oversized limits clamp instead of wrapping
fn docker_bytes(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn name(&self) -> &str {
        "docker"
    }

    #[tracing::instrument(skip_all, fields(language = %language.name))]
    async fn build(
        &self,
        workspace: &Workspace,
        language: &LanguageConfig,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, JudgeError> {
        let Some(cmd) = language.compile_command(CONTAINER_WORKDIR) else {
            return Ok(BuildOutcome::Ready);
        };

        let job = ContainerSpec {
            image: language.image.clone(),
            cmd,
            binds: vec![format!(
                "{}:{}:rw",
                workspace.code_dir().display(),
                CONTAINER_WORKDIR
            )],
            memory_bytes: docker_bytes(language.compile_memory_mb.saturating_mul(1024 * 1024)),
            nano_cpus: nano_cpus(language.cpu_limit),
            pids_limit: BUILD_PIDS_LIMIT,
            time_limit: self.compile_timeout,
            output_limit: COMPILE_OUTPUT_LIMIT,
        };

        let run = self.run_container(job, cancel).await?;
        let wall_time_ms = run.elapsed.as_millis() as u64;

        match run.waited {
            Waited::Cancelled => Err(JudgeError::Cancelled),
            Waited::TimedOut => {
                warn!(wall_time_ms, "Compilation timed out");
                Ok(BuildOutcome::Failed(ExecutionResult::compile_error(
                    format!("compilation exceeded {}ms", self.compile_timeout.as_millis()),
                    false,
                    wall_time_ms,
                )))
            }
            Waited::Exited(Some(0)) => {
                info!(wall_time_ms, "Compilation succeeded");
                Ok(BuildOutcome::Ready)
            }
            Waited::Exited(None) => Err(JudgeError::SandboxSetup(
                "compiler container exited without a status".to_string(),
            )),
            Waited::Exited(Some(code)) => {
                let mut diagnostics = run.stdout;
                let (stderr, _) = run.stderr.into_parts();
                diagnostics.push(stderr.as_bytes());
                let truncated = diagnostics.is_truncated();
                let (text, _) = diagnostics.into_parts();
                warn!(
                    wall_time_ms,
                    exit_code = code,
                    error_preview = text.lines().next().unwrap_or(""),
                    "Compilation failed"
                );
                Ok(BuildOutcome::Failed(ExecutionResult::compile_error(
                    text,
                    truncated,
                    wall_time_ms,
                )))
            }
        }
    }

    #[tracing::instrument(skip_all, fields(language = %language.name, time_limit_ms = limits.time_limit_ms))]
    async fn run(
        &self,
        workspace: &Workspace,
        language: &LanguageConfig,
        input: &str,
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, JudgeError> {
        let input_path = workspace.write_input(input).await?;

        let mut cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("exec \"$@\" < {}", CONTAINER_STDIN),
            "sandbox".to_string(),
        ];
        cmd.extend(language.run_command(CONTAINER_WORKDIR));

        let job = ContainerSpec {
            image: language.image.clone(),
            cmd,
            binds: vec![
                format!("{}:{}:ro", workspace.code_dir().display(), CONTAINER_WORKDIR),
                format!("{}:{}:ro", input_path.display(), CONTAINER_STDIN),
            ],
            memory_bytes: docker_bytes(limits.memory_limit_bytes()),
            nano_cpus: nano_cpus(language.cpu_limit),
            pids_limit: RUN_PIDS_LIMIT,
            time_limit: limits.time_limit(),
            output_limit: limits.output_limit_bytes,
        };

        let result = self.run_container(job, cancel).await;
        if let Err(e) = tokio::fs::remove_file(&input_path).await {
            debug!(path = %input_path.display(), error = %e, "Failed to remove stdin file");
        }
        let run = result?;

        let (status, exit_code) = match run.waited {
            Waited::Cancelled => return Err(JudgeError::Cancelled),
            Waited::TimedOut => (ExecutionStatus::TimedOut, None),
            Waited::Exited(None) => {
                return Err(JudgeError::SandboxSetup(
                    "container exited without a status".to_string(),
                ))
            }
            Waited::Exited(code) if run.oom_killed => (ExecutionStatus::Killed, code),
            Waited::Exited(Some(0)) => (ExecutionStatus::Completed, Some(0)),
            Waited::Exited(code) => (ExecutionStatus::RuntimeError, code),
        };

        let (stdout, stdout_truncated) = run.stdout.into_parts();
        let (stderr, stderr_truncated) = run.stderr.into_parts();
        let result = ExecutionResult {
            status,
            exit_code,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            wall_time_ms: run.elapsed.as_millis() as u64,
            peak_memory_bytes: run.peak_memory,
        };

        debug!(
            status = ?result.status,
            exit_code = ?result.exit_code,
            wall_time_ms = result.wall_time_ms,
            peak_memory_bytes = ?result.peak_memory_bytes,
            "Container run finished"
        );
        Ok(result)
    }
}
