/// Judge - Language-Agnostic Verdict Logic
///
/// **Core Responsibility:**
/// Compare captured stdout against expected output and assign verdicts.
///
/// **Critical Properties:**
/// - Knows nothing about Docker
/// - Knows nothing about language runtimes
/// - Knows nothing about Redis
/// - Pure function: (execution result, expected output, policy) → verdict
///
/// **Comparison Policies:**
/// - `exact`: byte-for-byte equality
/// - `trim-trailing-whitespace`: trailing whitespace stripped per line, trailing
///   blank lines dropped, `\r\n` treated as a line ending
/// - `token-sequence`: whitespace-delimited tokens must match in order
///
/// **Verdict Rules:**
/// - Non-`completed` execution → `error`, comparison skipped
/// - `completed` with truncated stdout → `error`
/// - Otherwise `pass` or `fail` per the policy
///
/// **Aggregation:**
/// `accepted` iff every case is `pass`; cancellation and infrastructure
/// failures override the case verdicts.
use codeversus_common::types::{
    ComparisonPolicy, ExecutionResult, JudgeReport, ResourceLimits, Submission, SubmissionStatus,
    TestCaseReport, Verdict,
};
use codeversus_common::JudgeError;

fn trimmed_lines(output: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = output.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// Compare actual output against expected output under a policy
pub fn outputs_match(actual: &str, expected: &str, policy: ComparisonPolicy) -> bool {
    match policy {
        ComparisonPolicy::Exact => actual == expected,
        ComparisonPolicy::TrimTrailingWhitespace => trimmed_lines(actual) == trimmed_lines(expected),
        ComparisonPolicy::TokenSequence => actual.split_whitespace().eq(expected.split_whitespace()),
    }
}

/// Evaluate a single test case execution
///
/// ## Arguments
/// * `index` - Zero-based test case position
/// * `execution` - Raw result from the sandbox
/// * `expected` - Expected stdout
/// * `policy` - Comparison policy for this submission
/// * `limits` - Limits the run was held to (used to render error messages)
pub fn evaluate_case(
    index: usize,
    execution: ExecutionResult,
    expected: &str,
    policy: ComparisonPolicy,
    limits: &ResourceLimits,
) -> TestCaseReport {
    let (verdict, message) = if let Some(failure) = execution.failure(limits) {
        (Verdict::Error, Some(failure))
    } else if execution.stdout_truncated {
        (
            Verdict::Error,
            Some(format!(
                "output exceeded {} bytes",
                limits.output_limit_bytes
            )),
        )
    } else if outputs_match(&execution.stdout, expected, policy) {
        (Verdict::Pass, None)
    } else {
        (Verdict::Fail, Some("wrong answer".to_string()))
    };

    TestCaseReport {
        index,
        verdict,
        execution: Some(execution),
        message,
    }
}

/// A failed build is reported on every test case
pub fn compile_failure(
    submission: &Submission,
    case_count: usize,
    build: &ExecutionResult,
    limits: &ResourceLimits,
) -> JudgeReport {
    let message = build.failure(limits);
    let cases = (0..case_count)
        .map(|index| TestCaseReport {
            index,
            verdict: Verdict::Error,
            execution: Some(build.clone()),
            message: message.clone(),
        })
        .collect();
    JudgeReport::new(submission, SubmissionStatus::Failed, cases, message.clone())
}

/// Aggregate ordered case reports into the final report
///
/// Priority: infrastructure failure, then cancellation, then the verdicts.
pub fn aggregate(
    submission: &Submission,
    cases: Vec<TestCaseReport>,
    cancelled: bool,
    infrastructure: Option<&JudgeError>,
) -> JudgeReport {
    if let Some(err) = infrastructure {
        return JudgeReport::new(
            submission,
            SubmissionStatus::InfrastructureError,
            cases,
            Some(err.to_string()),
        );
    }
    if cancelled {
        return JudgeReport::new(
            submission,
            SubmissionStatus::Cancelled,
            cases,
            Some(JudgeError::Cancelled.to_string()),
        );
    }

    let status = if !cases.is_empty() && cases.iter().all(|case| case.verdict == Verdict::Pass) {
        SubmissionStatus::Accepted
    } else {
        SubmissionStatus::Failed
    };
    JudgeReport::new(submission, status, cases, None)
}
