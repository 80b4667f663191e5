use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{JudgeError, Result};
use crate::template::Template;

/// Number of test cases executed in `SubmissionMode::Run`
pub const RUN_MODE_CASES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Cpp,
    Java,
    Python,
    Rust,
    Bash,
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Cpp,
        Language::Java,
        Language::Python,
        Language::Rust,
        Language::Bash,
        Language::JavaScript,
    ];

    /// File extension used for boilerplate files in the content directory
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "py",
            Language::Rust => "rs",
            Language::Bash => "sh",
            Language::JavaScript => "js",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|lang| lang.extension() == ext)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Bash => "bash",
            Language::JavaScript => "javascript",
        };
        f.write_str(name)
    }
}

impl FromStr for Language {
    type Err = JudgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cpp" | "c++" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            "python" | "py" => Ok(Language::Python),
            "rust" | "rs" => Ok(Language::Rust),
            "bash" | "sh" => Ok(Language::Bash),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            _ => Err(JudgeError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Optional resource-limit overrides; unset fields fall through to the next layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_limit_bytes: Option<usize>,
}

impl LimitOverrides {
    /// Fill unset fields from `fallback`
    pub fn or(self, fallback: LimitOverrides) -> Self {
        Self {
            time_limit_ms: self.time_limit_ms.or(fallback.time_limit_ms),
            memory_limit_mb: self.memory_limit_mb.or(fallback.memory_limit_mb),
            output_limit_bytes: self.output_limit_bytes.or(fallback.output_limit_bytes),
        }
    }
}

/// Fully resolved limits for a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub time_limit_ms: u64,
    pub memory_limit_mb: u64,
    pub output_limit_bytes: usize,
}

impl ResourceLimits {
    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub limits: LimitOverrides,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            limits: LimitOverrides::default(),
        }
    }
}

/// Rule deciding whether actual output matches expected output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonPolicy {
    Exact,
    #[default]
    TrimTrailingWhitespace,
    TokenSequence,
}

impl fmt::Display for ComparisonPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComparisonPolicy::Exact => "exact",
            ComparisonPolicy::TrimTrailingWhitespace => "trim-trailing-whitespace",
            ComparisonPolicy::TokenSequence => "token-sequence",
        };
        f.write_str(name)
    }
}

impl FromStr for ComparisonPolicy {
    type Err = JudgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exact" => Ok(ComparisonPolicy::Exact),
            "trim-trailing-whitespace" => Ok(ComparisonPolicy::TrimTrailingWhitespace),
            "token-sequence" => Ok(ComparisonPolicy::TokenSequence),
            other => Err(JudgeError::ComparisonPolicyUnknown(other.to_string())),
        }
    }
}

/// A published problem. Immutable once loaded from the content store.
#[derive(Debug, Clone)]
pub struct Problem {
    pub id: String,
    pub templates: Vec<Template>,
    pub test_cases: Vec<TestCase>,
    pub limits: LimitOverrides,
    pub comparison: ComparisonPolicy,
}

impl Problem {
    pub fn template(&self, language: Language) -> Result<&Template> {
        self.templates
            .iter()
            .find(|t| t.language() == language)
            .ok_or_else(|| JudgeError::UnsupportedLanguage(language.to_string()))
    }

    pub fn languages(&self) -> Vec<Language> {
        self.templates.iter().map(|t| t.language()).collect()
    }

    /// Test cases executed for a submission mode, in declaration order
    pub fn cases_for(&self, mode: SubmissionMode) -> &[TestCase] {
        match mode {
            SubmissionMode::Submit => &self.test_cases,
            SubmissionMode::Run => {
                &self.test_cases[..self.test_cases.len().min(RUN_MODE_CASES)]
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionMode {
    /// Sample run against the first few cases
    Run,
    #[default]
    Submit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub problem_id: String,
    pub language: Language,
    pub code: String,
    #[serde(default)]
    pub mode: SubmissionMode,
    /// Overrides the problem's comparison policy when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(problem_id: impl Into<String>, language: Language, code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            problem_id: problem_id.into(),
            language,
            code: code.into(),
            mode: SubmissionMode::default(),
            policy: None,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Completed,
    TimedOut,
    Killed,
    CompileError,
    RuntimeError,
}

/// Raw outcome of one sandboxed execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub stdout_truncated: bool,
    #[serde(default)]
    pub stderr_truncated: bool,
    pub wall_time_ms: u64,
    pub peak_memory_bytes: Option<u64>,
}

impl ExecutionResult {
    pub fn compile_error(diagnostics: String, truncated: bool, wall_time_ms: u64) -> Self {
        Self {
            status: ExecutionStatus::CompileError,
            exit_code: None,
            stdout: String::new(),
            stderr: diagnostics,
            stdout_truncated: false,
            stderr_truncated: truncated,
            wall_time_ms,
            peak_memory_bytes: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Describe a non-completed status using the error taxonomy
    pub fn failure(&self, limits: &ResourceLimits) -> Option<String> {
        match self.status {
            ExecutionStatus::Completed => None,
            ExecutionStatus::TimedOut => Some(
                JudgeError::SandboxTimeout {
                    limit_ms: limits.time_limit_ms,
                }
                .to_string(),
            ),
            ExecutionStatus::Killed => Some(
                JudgeError::SandboxKilled {
                    limit_mb: limits.memory_limit_mb,
                }
                .to_string(),
            ),
            ExecutionStatus::CompileError => {
                let first = self.stderr.lines().next().unwrap_or_default();
                Some(JudgeError::CompileError(first.to_string()).to_string())
            }
            ExecutionStatus::RuntimeError => Some(match self.exit_code {
                Some(code) => format!("runtime error: exit code {}", code),
                None => "runtime error".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
    /// Never executed (stop-on-first-failure or cancellation)
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseReport {
    /// Zero-based position in the problem's test case order
    pub index: usize,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TestCaseReport {
    pub fn not_run(index: usize) -> Self {
        Self {
            index,
            verdict: Verdict::NotRun,
            execution: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionStatus {
    Accepted,
    Failed,
    Cancelled,
    /// Structural problem with the submission or template
    Rejected,
    /// The judge itself failed
    InfrastructureError,
}

/// Final result handed to the results store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeReport {
    pub submission_id: Uuid,
    pub problem_id: String,
    pub language: Language,
    pub status: SubmissionStatus,
    /// First test case (in declaration order) that did not pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_case: Option<usize>,
    pub cases: Vec<TestCaseReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub judged_at: DateTime<Utc>,
}

impl JudgeReport {
    /// Build a report from ordered case results; `failing_case` is the first
    /// case whose verdict is not `pass`
    pub fn new(
        submission: &Submission,
        status: SubmissionStatus,
        cases: Vec<TestCaseReport>,
        error: Option<String>,
    ) -> Self {
        let failing_case = cases
            .iter()
            .find(|case| case.verdict != Verdict::Pass)
            .map(|case| case.index);
        Self {
            submission_id: submission.id,
            problem_id: submission.problem_id.clone(),
            language: submission.language,
            status,
            failing_case,
            cases,
            error,
            judged_at: Utc::now(),
        }
    }

    fn empty(submission: &Submission, status: SubmissionStatus, error: Option<String>) -> Self {
        Self::new(submission, status, Vec::new(), error)
    }

    pub fn rejected(submission: &Submission, error: &JudgeError) -> Self {
        Self::empty(submission, SubmissionStatus::Rejected, Some(error.to_string()))
    }

    pub fn infrastructure_error(submission: &Submission, error: &JudgeError) -> Self {
        Self::empty(
            submission,
            SubmissionStatus::InfrastructureError,
            Some(error.to_string()),
        )
    }

    pub fn is_accepted(&self) -> bool {
        self.status == SubmissionStatus::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem_with_cases(n: usize) -> Problem {
        Problem {
            id: "sum".to_string(),
            templates: vec![Template::new(Language::Cpp, "##USER_CODE_HERE##").unwrap()],
            test_cases: (0..n).map(|i| TestCase::new(i.to_string(), i.to_string())).collect(),
            limits: LimitOverrides::default(),
            comparison: ComparisonPolicy::default(),
        }
    }

    #[test]
    fn test_memory_limit_bytes_saturates() {
        let mut limits = ResourceLimits {
            time_limit_ms: 1000,
            memory_limit_mb: 256,
            output_limit_bytes: 1024,
        };
        assert_eq!(limits.memory_limit_bytes(), 268_435_456);

        limits.memory_limit_mb = u64::MAX;
        assert_eq!(limits.memory_limit_bytes(), u64::MAX);
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("CPP".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!("py".parse::<Language>().unwrap(), Language::Python);
        assert_eq!(Language::from_extension("rs"), Some(Language::Rust));
        assert_eq!(Language::from_extension("js"), Some(Language::JavaScript));
        assert_eq!("Node".parse::<Language>().unwrap(), Language::JavaScript);
        assert_eq!(Language::from_extension("rb"), None);
        assert!(matches!(
            "cobol".parse::<Language>(),
            Err(JudgeError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_policy_parsing() {
        for policy in [
            ComparisonPolicy::Exact,
            ComparisonPolicy::TrimTrailingWhitespace,
            ComparisonPolicy::TokenSequence,
        ] {
            assert_eq!(policy.to_string().parse::<ComparisonPolicy>().unwrap(), policy);
        }
        assert_eq!(
            "fuzzy".parse::<ComparisonPolicy>(),
            Err(JudgeError::ComparisonPolicyUnknown("fuzzy".to_string()))
        );
    }

    #[test]
    fn test_policy_serde_matches_display() {
        let json = serde_json::to_string(&ComparisonPolicy::TokenSequence).unwrap();
        assert_eq!(json, "\"token-sequence\"");
    }

    #[test]
    fn test_limit_overrides_layering() {
        let case = LimitOverrides {
            time_limit_ms: Some(500),
            ..Default::default()
        };
        let problem = LimitOverrides {
            time_limit_ms: Some(3000),
            memory_limit_mb: Some(128),
            output_limit_bytes: None,
        };
        let merged = case.or(problem);
        assert_eq!(merged.time_limit_ms, Some(500));
        assert_eq!(merged.memory_limit_mb, Some(128));
        assert_eq!(merged.output_limit_bytes, None);
    }

    #[test]
    fn test_run_mode_limits_cases() {
        let problem = problem_with_cases(5);
        assert_eq!(problem.cases_for(SubmissionMode::Submit).len(), 5);
        assert_eq!(problem.cases_for(SubmissionMode::Run).len(), RUN_MODE_CASES);

        let tiny = problem_with_cases(1);
        assert_eq!(tiny.cases_for(SubmissionMode::Run).len(), 1);
    }

    #[test]
    fn test_template_lookup() {
        let problem = problem_with_cases(1);
        assert!(problem.template(Language::Cpp).is_ok());
        assert_eq!(
            problem.template(Language::Java).unwrap_err(),
            JudgeError::UnsupportedLanguage("java".to_string())
        );
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&SubmissionStatus::InfrastructureError).unwrap(),
            "\"infrastructure-error\""
        );
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::TimedOut).unwrap(),
            "\"timed-out\""
        );
        assert_eq!(serde_json::to_string(&Verdict::NotRun).unwrap(), "\"not-run\"");
    }

    #[test]
    fn test_failure_description() {
        let limits = ResourceLimits {
            time_limit_ms: 1000,
            memory_limit_mb: 64,
            output_limit_bytes: 1024,
        };
        let mut result = ExecutionResult::compile_error("main.cpp:3: error: expected ';'\nmore".into(), false, 10);
        assert_eq!(
            result.failure(&limits).unwrap(),
            "compilation failed: main.cpp:3: error: expected ';'"
        );

        result.status = ExecutionStatus::TimedOut;
        assert!(result.failure(&limits).unwrap().contains("1000ms"));

        result.status = ExecutionStatus::Completed;
        assert_eq!(result.failure(&limits), None);
    }
}
