/// Execution Engine - Abstraction for Sandboxed Execution
///
/// **Core Responsibility:**
/// Build and run assembled source inside a sandbox and capture raw outcomes.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker, local process)
/// - Engine does NOT know comparison policies
/// - Engine does NOT evaluate correctness
/// - Timeouts, memory kills and compile errors are `ExecutionResult` statuses;
///   only infrastructure failures and cancellation come back as `Err`
///
/// The `SandboxPool` is the single shared resource between submissions: every
/// build and every run holds one slot for its whole duration.
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use codeversus_common::types::{ExecutionResult, ResourceLimits};
use codeversus_common::JudgeError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LanguageConfig;
use crate::workspace::Workspace;

/// Extra time granted after a limit fires for the sandbox to tear down
pub const TEARDOWN_ALLOWANCE: Duration = Duration::from_millis(500);

/// Outcome of the build step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Artifact ready (or nothing to build)
    Ready,
    /// Compiler exited non-zero; diagnostics are in the result's stderr
    Failed(ExecutionResult),
}

/// A sandbox backend.
///
/// `Err(SandboxSetup)` means the sandbox itself could not be provided and the
/// call may be retried. `Err(Cancelled)` means the token fired mid-call.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &str;

    async fn build(
        &self,
        workspace: &Workspace,
        language: &LanguageConfig,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, JudgeError>;

    async fn run(
        &self,
        workspace: &Workspace,
        language: &LanguageConfig,
        input: &str,
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, JudgeError>;
}

/// Bounded pool of sandbox slots with retry on setup failure
pub struct SandboxPool {
    sandbox: Arc<dyn Sandbox>,
    slots: Arc<Semaphore>,
    capacity: usize,
    setup_retries: u32,
    initial_backoff: Duration,
}

impl SandboxPool {
    pub fn new(sandbox: Arc<dyn Sandbox>, capacity: usize, setup_retries: u32) -> Self {
        Self {
            sandbox,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            setup_retries,
            initial_backoff: Duration::from_millis(200),
        }
    }

    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held by any execution
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn backend(&self) -> &str {
        self.sandbox.name()
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit, JudgeError> {
        tokio::select! {
            permit = self.slots.clone().acquire_owned() => {
                permit.map_err(|_| JudgeError::SandboxSetup("sandbox pool closed".to_string()))
            }
            _ = cancel.cancelled() => Err(JudgeError::Cancelled),
        }
    }

    pub async fn build(
        &self,
        workspace: &Workspace,
        language: &LanguageConfig,
        cancel: &CancellationToken,
    ) -> Result<BuildOutcome, JudgeError> {
        let _permit = self.acquire(cancel).await?;
        self.with_retry("build", || self.sandbox.build(workspace, language, cancel))
            .await
    }

    pub async fn run(
        &self,
        workspace: &Workspace,
        language: &LanguageConfig,
        input: &str,
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, JudgeError> {
        let _permit = self.acquire(cancel).await?;
        self.with_retry("run", || {
            self.sandbox.run(workspace, language, input, limits, cancel)
        })
        .await
    }

    /// Retry `SandboxSetup` failures with exponential backoff, at most
    /// `setup_retries` extra attempts. Everything else is returned as is.
    async fn with_retry<T, F, Fut>(&self, stage: &str, op: F) -> Result<T, JudgeError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, JudgeError>>,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(Duration::from_secs(5))
            .with_max_elapsed_time(None)
            .build();

        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let op = &op;
        let max_attempts = self.setup_retries + 1;

        backoff::future::retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(stage, attempt, "Sandbox recovered after retry");
                    }
                    Ok(value)
                }
                Err(e @ JudgeError::SandboxSetup(_)) if attempt < max_attempts => {
                    warn!(stage, attempt, max_attempts, error = %e, "Sandbox setup failed, retrying");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }
}
