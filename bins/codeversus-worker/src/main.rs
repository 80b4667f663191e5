mod capture;
mod config;
mod docker;
mod engine;
mod evaluator;
mod executor;
mod process;
mod workspace;

use anyhow::Context;
use codeversus_common::redis;
use codeversus_common::store::ProblemStore;
use codeversus_common::types::{JudgeReport, Submission};
use config::{Backend, LanguageConfigManager, WorkerSettings};
use docker::DockerSandbox;
use engine::{Sandbox, SandboxPool};
use executor::{JudgeOptions, Orchestrator};
use process::ProcessSandbox;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = WorkerSettings::from_env()?;
    init_tracing(settings.json_logs);

    info!("CodeVersus Worker booting...");

    // Load language configurations
    let languages = LanguageConfigManager::load(&settings.languages_path).map_err(|e| {
        error!("Failed to load language configurations: {}", e);
        error!("Set LANGUAGES_CONFIG or make sure config/languages.json exists");
        e
    })?;
    info!(languages = ?languages.list_languages(), "Loaded language configurations");

    let problems = ProblemStore::load(&settings.problems_dir)
        .with_context(|| format!("Failed to load problems from {}", settings.problems_dir.display()))?;
    info!(problems = problems.len(), ids = ?problems.ids(), "Loaded problem content");

    // Bind mounts need an absolute host path
    tokio::fs::create_dir_all(&settings.workspace_root)
        .await
        .context("Failed to create workspace root")?;
    let workspace_root = tokio::fs::canonicalize(&settings.workspace_root)
        .await
        .context("Failed to resolve workspace root")?;

    let sandbox: Arc<dyn Sandbox> = match settings.backend {
        Backend::Docker => Arc::new(DockerSandbox::connect(settings.compile_timeout)?),
        Backend::Process => {
            warn!("Process backend runs submissions without container isolation");
            Arc::new(ProcessSandbox::new(settings.compile_timeout))
        }
    };
    let pool = Arc::new(SandboxPool::new(
        sandbox,
        settings.sandbox_slots,
        settings.setup_retries,
    ));
    info!(
        backend = pool.backend(),
        sandbox_slots = pool.capacity(),
        worker_slots = settings.worker_slots,
        max_parallel_tests = settings.max_parallel_tests,
        stop_on_first_failure = settings.stop_on_first_failure,
        workspace_root = %workspace_root.display(),
        "Sandbox pool ready"
    );

    let mut options = JudgeOptions::from_settings(&settings);
    options.workspace_root = workspace_root;
    let orchestrator = Arc::new(Orchestrator::new(pool, Arc::new(languages), options));
    let problems = Arc::new(problems);

    // Connect to Redis
    let client = ::redis::Client::open(settings.redis_url.as_str())?;
    let redis_conn = ::redis::aio::ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis: {}", settings.redis_url);

    let mut slots = JoinSet::new();
    for slot in 0..settings.worker_slots {
        slots.spawn(worker_loop(
            slot,
            redis_conn.clone(),
            orchestrator.clone(),
            problems.clone(),
            settings.cancel_poll_interval,
        ));
    }

    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("Failed to listen for shutdown signal")?;
            warn!("Received shutdown signal, stopping worker slots...");
        }
        Some(res) = slots.join_next() => {
            error!(result = ?res, "Worker slot exited unexpectedly");
        }
    }

    slots.shutdown().await;
    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip(redis_conn, orchestrator, problems, cancel_poll_interval))]
async fn worker_loop(
    slot: usize,
    mut redis_conn: ::redis::aio::ConnectionManager,
    orchestrator: Arc<Orchestrator>,
    problems: Arc<ProblemStore>,
    cancel_poll_interval: Duration,
) {
    loop {
        // BLPOP with 5 second timeout so shutdown is never blocked for long
        match redis::pop_submission(&mut redis_conn, 5.0).await {
            Ok(Some(submission)) => {
                info!(
                    submission_id = %submission.id,
                    problem_id = %submission.problem_id,
                    language = %submission.language,
                    mode = ?submission.mode,
                    source_size = submission.code.len(),
                    "Received submission"
                );

                let start = std::time::Instant::now();
                let report = judge_submission(
                    &submission,
                    &orchestrator,
                    &problems,
                    &redis_conn,
                    cancel_poll_interval,
                )
                .await;

                info!(
                    submission_id = %submission.id,
                    status = ?report.status,
                    failing_case = ?report.failing_case,
                    execution_ms = start.elapsed().as_millis() as u64,
                    "Judging completed"
                );

                // Persist report to Redis
                match redis::store_report(&mut redis_conn, &report).await {
                    Ok(()) => debug!(submission_id = %submission.id, "Report persisted to Redis"),
                    Err(e) => {
                        // Non-fatal - worker continues
                        error!(submission_id = %submission.id, error = %e, "Failed to persist report");
                    }
                }
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn judge_submission(
    submission: &Submission,
    orchestrator: &Orchestrator,
    problems: &ProblemStore,
    redis_conn: &::redis::aio::ConnectionManager,
    cancel_poll_interval: Duration,
) -> JudgeReport {
    let problem = match problems.get(&submission.problem_id) {
        Ok(problem) => problem,
        Err(e) => {
            warn!(submission_id = %submission.id, error = %e, "Submission rejected");
            return JudgeReport::rejected(submission, &e);
        }
    };

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(watch_cancel(
        redis_conn.clone(),
        submission.id,
        cancel.clone(),
        cancel_poll_interval,
    ));

    let report = orchestrator.judge(submission, &problem, &cancel).await;
    watcher.abort();
    report
}

/// Poll the submission's cancel flag and trip the token when it appears
async fn watch_cancel(
    mut redis_conn: ::redis::aio::ConnectionManager,
    submission_id: uuid::Uuid,
    cancel: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match redis::is_cancelled(&mut redis_conn, &submission_id).await {
            Ok(true) => {
                info!(submission_id = %submission_id, "Cancellation requested");
                cancel.cancel();
                return;
            }
            Ok(false) => {}
            Err(e) => warn!(submission_id = %submission_id, error = %e, "Failed to poll cancel flag"),
        }
    }
}
