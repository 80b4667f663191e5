/// Submission Orchestrator - High-Level Coordination
///
/// **Responsibility:**
/// Assemble the program, build it once, run every test case through the
/// sandbox pool and hand the results to the judge.
///
/// **Architecture:**
/// 1. Assemble user code into the problem template (codeversus-common)
/// 2. Build once per submission (engine.rs)
/// 3. Run test cases concurrently, bounded by `max_parallel_tests` and the
///    pool capacity (engine.rs)
/// 4. Judge each run and aggregate (evaluator.rs)
///
/// **Stop On First Failure:**
/// Once a case fails, no new runs are issued. In-flight runs for earlier cases
/// finish and are reported; later cases are killed and reported as `not-run`,
/// so the report is the same whatever order the runs complete in.
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's job)
/// - How outputs are compared (evaluator's job)
use crate::config::{LanguageConfig, LanguageConfigManager, WorkerSettings};
use crate::engine::{BuildOutcome, SandboxPool};
use crate::evaluator;
use crate::workspace::Workspace;
use codeversus_common::config::JudgeDefaults;
use codeversus_common::types::{
    ComparisonPolicy, ExecutionResult, JudgeReport, LimitOverrides, Problem, ResourceLimits,
    Submission, SubmissionStatus, TestCaseReport, Verdict,
};
use codeversus_common::JudgeError;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct JudgeOptions {
    pub workspace_root: PathBuf,
    pub max_parallel_tests: usize,
    pub stop_on_first_failure: bool,
    pub defaults: JudgeDefaults,
}

impl JudgeOptions {
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            workspace_root: settings.workspace_root.clone(),
            max_parallel_tests: settings.max_parallel_tests,
            stop_on_first_failure: settings.stop_on_first_failure,
            defaults: settings.defaults,
        }
    }
}

pub struct Orchestrator {
    pool: Arc<SandboxPool>,
    languages: Arc<LanguageConfigManager>,
    options: JudgeOptions,
}

impl Orchestrator {
    pub fn new(pool: Arc<SandboxPool>, languages: Arc<LanguageConfigManager>, options: JudgeOptions) -> Self {
        Self {
            pool,
            languages,
            options,
        }
    }

    pub fn pool(&self) -> &SandboxPool {
        &self.pool
    }

    /// Judge one submission. Never fails: every outcome becomes a report.
    #[tracing::instrument(
        skip_all,
        fields(
            submission_id = %submission.id,
            problem_id = %problem.id,
            language = %submission.language,
            mode = ?submission.mode,
        )
    )]
    pub async fn judge(&self, submission: &Submission, problem: &Problem, cancel: &CancellationToken) -> JudgeReport {
        let report = match self.try_judge(submission, problem, cancel).await {
            Ok(report) => report,
            Err(JudgeError::Cancelled) => {
                let cases = (0..problem.cases_for(submission.mode).len())
                    .map(TestCaseReport::not_run)
                    .collect();
                evaluator::aggregate(submission, cases, true, None)
            }
            Err(err) if err.is_structural() => {
                warn!(error = %err, "Submission rejected");
                JudgeReport::rejected(submission, &err)
            }
            Err(err) => {
                error!(error = %err, "Judging failed");
                JudgeReport::infrastructure_error(submission, &err)
            }
        };

        info!(
            status = ?report.status,
            failing_case = ?report.failing_case,
            cases = report.cases.len(),
            "Submission judged"
        );
        report
    }

    async fn try_judge(
        &self,
        submission: &Submission,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<JudgeReport, JudgeError> {
        let policy = match &submission.policy {
            Some(name) => name.parse::<ComparisonPolicy>()?,
            None => problem.comparison,
        };
        let source = problem.template(submission.language)?.assemble(&submission.code)?;
        let language = self.languages.get_config(submission.language)?;
        let cases = problem.cases_for(submission.mode);

        let workspace = Workspace::create(&self.options.workspace_root, submission.id, language, &source).await?;

        let build_limits = self.options.defaults.resolve(
            LimitOverrides::default(),
            problem.limits,
            Some(language.memory_limit_mb),
        );
        match self.pool.build(&workspace, language, cancel).await? {
            BuildOutcome::Ready => debug!("Build ready"),
            BuildOutcome::Failed(build) => {
                info!(wall_time_ms = build.wall_time_ms, "Compilation failed; all tests marked as error");
                return Ok(evaluator::compile_failure(submission, cases.len(), &build, &build_limits));
            }
        }

        // Tripped on infrastructure failure to stop every in-flight run
        let run_cancel = cancel.child_token();
        let mut reports: Vec<Option<TestCaseReport>> = vec![None; cases.len()];
        let mut case_tokens: BTreeMap<usize, CancellationToken> = BTreeMap::new();
        let mut in_flight = FuturesUnordered::new();
        let mut next = 0;
        let mut first_failure: Option<usize> = None;
        let mut infrastructure: Option<JudgeError> = None;

        loop {
            while in_flight.len() < self.options.max_parallel_tests
                && next < cases.len()
                && first_failure.is_none()
                && infrastructure.is_none()
                && !cancel.is_cancelled()
            {
                let case = &cases[next];
                let limits = self.options.defaults.resolve(
                    case.limits,
                    problem.limits,
                    Some(language.memory_limit_mb),
                );
                let token = run_cancel.child_token();
                case_tokens.insert(next, token.clone());
                debug!(test_index = next, time_limit_ms = limits.time_limit_ms, "Issuing test case");
                in_flight.push(run_case(&self.pool, &workspace, language, next, &case.input, limits, token));
                next += 1;
            }

            let Some((index, limits, outcome)) = in_flight.next().await else {
                break;
            };
            case_tokens.remove(&index);

            match outcome {
                Ok(execution) => {
                    let report = evaluator::evaluate_case(
                        index,
                        execution,
                        &cases[index].expected_output,
                        policy,
                        &limits,
                    );
                    info!(
                        test_index = index,
                        verdict = ?report.verdict,
                        wall_time_ms = report.execution.as_ref().map(|e| e.wall_time_ms),
                        "Test case judged"
                    );
                    if report.verdict != Verdict::Pass && self.options.stop_on_first_failure {
                        let failing = first_failure.map_or(index, |f| f.min(index));
                        first_failure = Some(failing);
                        for token in case_tokens.range(failing + 1..).map(|(_, t)| t) {
                            token.cancel();
                        }
                    }
                    reports[index] = Some(report);
                }
                Err(JudgeError::Cancelled) => debug!(test_index = index, "Test case cancelled"),
                Err(err) => {
                    error!(test_index = index, error = %err, "Sandbox failed");
                    infrastructure.get_or_insert(err);
                    run_cancel.cancel();
                }
            }
        }

        let cases: Vec<TestCaseReport> = reports
            .into_iter()
            .enumerate()
            .map(|(index, report)| match report {
                Some(report) if first_failure.map_or(true, |f| index <= f) => report,
                _ => TestCaseReport::not_run(index),
            })
            .collect();

        let report = evaluator::aggregate(submission, cases, cancel.is_cancelled(), infrastructure.as_ref());
        if report.status == SubmissionStatus::InfrastructureError {
            warn!("Submission finished with infrastructure error");
        }
        Ok(report)
    }
}

async fn run_case(
    pool: &SandboxPool,
    workspace: &Workspace,
    language: &LanguageConfig,
    index: usize,
    input: &str,
    limits: ResourceLimits,
    cancel: CancellationToken,
) -> (usize, ResourceLimits, Result<ExecutionResult, JudgeError>) {
    let outcome = pool.run(workspace, language, input, &limits, &cancel).await;
    (index, limits, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Sandbox;
    use async_trait::async_trait;
    use codeversus_common::template::Template;
    use codeversus_common::types::{ExecutionStatus, Language, SubmissionMode, TestCase};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Clone)]
    struct Step {
        delay: Duration,
        stdout: &'static str,
        status: ExecutionStatus,
    }

    fn step(delay_ms: u64, stdout: &'static str) -> Step {
        Step {
            delay: Duration::from_millis(delay_ms),
            stdout,
            status: ExecutionStatus::Completed,
        }
    }

    fn timed_out(delay_ms: u64) -> Step {
        Step {
            status: ExecutionStatus::TimedOut,
            ..step(delay_ms, "")
        }
    }

    /// Replays a fixed outcome per test case; the case index is the stdin
    #[derive(Default)]
    struct ScriptedSandbox {
        steps: Vec<Step>,
        failed_build: Option<ExecutionResult>,
        build_delay: Duration,
        setup_broken: bool,
        active: AtomicUsize,
        peak: AtomicUsize,
        started: Mutex<Vec<usize>>,
    }

    impl ScriptedSandbox {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps,
                ..Default::default()
            }
        }

        fn started(&self) -> Vec<usize> {
            let mut started = self.started.lock().unwrap().clone();
            started.sort();
            started
        }
    }

    #[async_trait]
    impl Sandbox for ScriptedSandbox {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn build(
            &self,
            _workspace: &Workspace,
            _language: &LanguageConfig,
            cancel: &CancellationToken,
        ) -> Result<BuildOutcome, JudgeError> {
            tokio::select! {
                _ = tokio::time::sleep(self.build_delay) => {}
                _ = cancel.cancelled() => return Err(JudgeError::Cancelled),
            }
            Ok(match &self.failed_build {
                Some(result) => BuildOutcome::Failed(result.clone()),
                None => BuildOutcome::Ready,
            })
        }

        async fn run(
            &self,
            _workspace: &Workspace,
            _language: &LanguageConfig,
            input: &str,
            _limits: &ResourceLimits,
            cancel: &CancellationToken,
        ) -> Result<ExecutionResult, JudgeError> {
            if self.setup_broken {
                return Err(JudgeError::SandboxSetup("docker daemon unreachable".to_string()));
            }
            let index: usize = input.parse().unwrap();
            self.started.lock().unwrap().push(index);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let step = self.steps[index].clone();
            let outcome = tokio::select! {
                _ = tokio::time::sleep(step.delay) => Ok(ExecutionResult {
                    status: step.status,
                    exit_code: (step.status == ExecutionStatus::Completed).then_some(0),
                    stdout: step.stdout.to_string(),
                    stderr: String::new(),
                    stdout_truncated: false,
                    stderr_truncated: false,
                    wall_time_ms: step.delay.as_millis() as u64,
                    peak_memory_bytes: None,
                }),
                _ = cancel.cancelled() => Err(JudgeError::Cancelled),
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            outcome
        }
    }

    fn bash() -> LanguageConfig {
        LanguageConfig {
            name: Language::Bash,
            version: "5".to_string(),
            image: "bash:5".to_string(),
            source_file: "main.sh".to_string(),
            compile: None,
            run: vec!["sh".to_string(), "{workdir}/main.sh".to_string()],
            memory_limit_mb: 64,
            compile_memory_mb: 512,
            cpu_limit: 1.0,
        }
    }

    fn problem(cases: usize) -> Problem {
        Problem {
            id: "echo-ok".to_string(),
            templates: vec![Template::new(Language::Bash, "#!/bin/sh\n##USER_CODE_HERE##\n").unwrap()],
            test_cases: (0..cases).map(|i| TestCase::new(i.to_string(), "ok")).collect(),
            limits: LimitOverrides::default(),
            comparison: ComparisonPolicy::default(),
        }
    }

    fn orchestrator(
        sandbox: Arc<ScriptedSandbox>,
        slots: usize,
        parallel: usize,
        stop_on_first_failure: bool,
        root: &TempDir,
    ) -> Orchestrator {
        let pool = SandboxPool::new(sandbox, slots, 0).with_initial_backoff(Duration::from_millis(1));
        let languages = LanguageConfigManager::from_configs(vec![bash()]).unwrap();
        Orchestrator::new(
            Arc::new(pool),
            Arc::new(languages),
            JudgeOptions {
                workspace_root: root.path().to_path_buf(),
                max_parallel_tests: parallel,
                stop_on_first_failure,
                defaults: JudgeDefaults::default(),
            },
        )
    }

    fn submission() -> Submission {
        Submission::new("echo-ok", Language::Bash, "echo ok")
    }

    fn verdicts(report: &JudgeReport) -> Vec<Verdict> {
        report.cases.iter().map(|c| c.verdict).collect()
    }

    #[tokio::test]
    async fn test_all_pass_is_accepted() {
        let root = TempDir::new().unwrap();
        let sandbox = Arc::new(ScriptedSandbox::new(vec![step(5, "ok\n"); 3]));
        let orchestrator = orchestrator(sandbox, 4, 2, false, &root);

        let report = orchestrator.judge(&submission(), &problem(3), &CancellationToken::new()).await;

        assert_eq!(report.status, SubmissionStatus::Accepted);
        assert_eq!(verdicts(&report), vec![Verdict::Pass; 3]);
        assert_eq!(report.failing_case, None);
        // Workspace removed once judging is over
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_reports_follow_case_order() {
        let root = TempDir::new().unwrap();
        // Later cases finish first
        let steps = vec![step(60, "ok"), step(40, "no"), step(20, "ok"), step(1, "ok")];
        let sandbox = Arc::new(ScriptedSandbox::new(steps));
        let orchestrator = orchestrator(sandbox, 4, 4, false, &root);

        let report = orchestrator.judge(&submission(), &problem(4), &CancellationToken::new()).await;

        let indices: Vec<usize> = report.cases.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(
            verdicts(&report),
            vec![Verdict::Pass, Verdict::Fail, Verdict::Pass, Verdict::Pass]
        );
        assert_eq!(report.status, SubmissionStatus::Failed);
        assert_eq!(report.failing_case, Some(1));
    }

    #[tokio::test]
    async fn test_stop_on_first_failure() {
        let root = TempDir::new().unwrap();
        // Five cases, three at a time, the second fails
        let steps = vec![
            step(40, "ok"),
            step(10, "wrong"),
            step(300, "ok"),
            step(5, "ok"),
            step(5, "ok"),
        ];
        let sandbox = Arc::new(ScriptedSandbox::new(steps));
        let orchestrator = orchestrator(sandbox.clone(), 8, 3, true, &root);

        let report = orchestrator.judge(&submission(), &problem(5), &CancellationToken::new()).await;

        assert_eq!(
            verdicts(&report),
            vec![
                Verdict::Pass,
                Verdict::Fail,
                Verdict::NotRun,
                Verdict::NotRun,
                Verdict::NotRun
            ]
        );
        assert_eq!(report.status, SubmissionStatus::Failed);
        assert_eq!(report.failing_case, Some(1));
        assert_eq!(sandbox.started(), vec![0, 1, 2]);
        assert!(sandbox.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(orchestrator.pool().available(), 8);
    }

    #[tokio::test]
    async fn test_parallelism_bounded_by_pool() {
        let root = TempDir::new().unwrap();
        let sandbox = Arc::new(ScriptedSandbox::new(vec![step(20, "ok"); 6]));
        let orchestrator = orchestrator(sandbox.clone(), 2, 6, false, &root);

        let report = orchestrator.judge(&submission(), &problem(6), &CancellationToken::new()).await;

        assert!(report.is_accepted());
        assert!(sandbox.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(orchestrator.pool().available(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_keeps_finished_cases() {
        let root = TempDir::new().unwrap();
        let mut steps = vec![step(5, "ok")];
        steps.extend(vec![step(5_000, "ok"); 4]);
        let sandbox = Arc::new(ScriptedSandbox::new(steps));
        let orchestrator = orchestrator(sandbox, 4, 3, false, &root);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let report = orchestrator.judge(&submission(), &problem(5), &cancel).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.status, SubmissionStatus::Cancelled);
        assert_eq!(report.cases[0].verdict, Verdict::Pass);
        assert!(report.cases[1..].iter().all(|c| c.verdict == Verdict::NotRun));
        assert_eq!(orchestrator.pool().available(), 4);
    }

    #[tokio::test]
    async fn test_timed_out_case_is_error() {
        let root = TempDir::new().unwrap();
        let steps = vec![step(1, "ok"), timed_out(10), step(1, "ok")];
        let sandbox = Arc::new(ScriptedSandbox::new(steps));
        let orchestrator = orchestrator(sandbox, 2, 2, false, &root);

        let report = orchestrator.judge(&submission(), &problem(3), &CancellationToken::new()).await;

        assert!(!report.is_accepted());
        assert_eq!(report.status, SubmissionStatus::Failed);
        assert_eq!(verdicts(&report), vec![Verdict::Pass, Verdict::Error, Verdict::Pass]);
        assert_eq!(report.failing_case, Some(1));
        let execution = report.cases[1].execution.as_ref().unwrap();
        assert_eq!(execution.status, ExecutionStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_cancel_during_build() {
        let root = TempDir::new().unwrap();
        let sandbox = Arc::new(ScriptedSandbox {
            steps: vec![step(1, "ok"); 3],
            build_delay: Duration::from_secs(5),
            ..Default::default()
        });
        let orchestrator = orchestrator(sandbox.clone(), 2, 2, false, &root);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let report = orchestrator.judge(&submission(), &problem(3), &cancel).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.status, SubmissionStatus::Cancelled);
        assert_eq!(verdicts(&report), vec![Verdict::NotRun; 3]);
        assert!(sandbox.started().is_empty());
        assert_eq!(orchestrator.pool().available(), 2);
    }

    #[tokio::test]
    async fn test_compile_failure_reported_on_every_case() {
        let root = TempDir::new().unwrap();
        let sandbox = Arc::new(ScriptedSandbox {
            failed_build: Some(ExecutionResult::compile_error("syntax error".to_string(), false, 30)),
            ..Default::default()
        });
        let orchestrator = orchestrator(sandbox.clone(), 2, 2, false, &root);

        let report = orchestrator.judge(&submission(), &problem(3), &CancellationToken::new()).await;

        assert_eq!(report.status, SubmissionStatus::Failed);
        assert_eq!(verdicts(&report), vec![Verdict::Error; 3]);
        assert!(sandbox.started().is_empty());
    }

    #[tokio::test]
    async fn test_structural_errors_reject() {
        let root = TempDir::new().unwrap();
        let sandbox = Arc::new(ScriptedSandbox::new(vec![step(1, "ok")]));
        let orchestrator = orchestrator(sandbox.clone(), 2, 2, false, &root);

        let empty = Submission::new("echo-ok", Language::Bash, "   \n");
        let report = orchestrator.judge(&empty, &problem(1), &CancellationToken::new()).await;
        assert_eq!(report.status, SubmissionStatus::Rejected);
        assert!(report.cases.is_empty());

        let mut fuzzy = submission();
        fuzzy.policy = Some("fuzzy".to_string());
        let report = orchestrator.judge(&fuzzy, &problem(1), &CancellationToken::new()).await;
        assert_eq!(report.status, SubmissionStatus::Rejected);

        let java = Submission::new("echo-ok", Language::Java, "return 1;");
        let report = orchestrator.judge(&java, &problem(1), &CancellationToken::new()).await;
        assert_eq!(report.status, SubmissionStatus::Rejected);

        assert!(sandbox.started().is_empty());
    }

    #[tokio::test]
    async fn test_sandbox_failure_is_infrastructure_error() {
        let root = TempDir::new().unwrap();
        let sandbox = Arc::new(ScriptedSandbox {
            setup_broken: true,
            ..Default::default()
        });
        let orchestrator = orchestrator(sandbox, 3, 3, false, &root);

        let report = orchestrator.judge(&submission(), &problem(4), &CancellationToken::new()).await;

        assert_eq!(report.status, SubmissionStatus::InfrastructureError);
        assert!(report.error.as_deref().unwrap().contains("docker daemon unreachable"));
        assert!(!report.is_accepted());
        assert_eq!(orchestrator.pool().available(), 3);
    }

    #[tokio::test]
    async fn test_run_mode_uses_sample_cases() {
        let root = TempDir::new().unwrap();
        let sandbox = Arc::new(ScriptedSandbox::new(vec![step(1, "ok"); 5]));
        let orchestrator = orchestrator(sandbox.clone(), 4, 4, false, &root);

        let mut run = submission();
        run.mode = SubmissionMode::Run;
        let report = orchestrator.judge(&run, &problem(5), &CancellationToken::new()).await;

        assert!(report.is_accepted());
        assert_eq!(report.cases.len(), 2);
        assert_eq!(sandbox.started(), vec![0, 1]);
    }
}
