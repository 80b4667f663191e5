// HTTP route handlers for the CodeVersus API

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use codeversus_common::redis;
use codeversus_common::store::ProblemStore;
use codeversus_common::types::{ComparisonPolicy, Language, Submission, SubmissionMode};
use codeversus_common::JudgeError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::language_config::LanguageRegistry;
use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub problem_id: String,
    pub language: String,
    pub code: String,
    #[serde(default)]
    pub mode: SubmissionMode,
    #[serde(default)]
    pub policy: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub submission_id: String,
}

#[derive(Debug, Serialize)]
pub struct ProblemSummary {
    pub id: String,
    pub languages: Vec<Language>,
    pub test_cases: usize,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn status_for(err: &JudgeError) -> StatusCode {
    match err {
        JudgeError::UnknownProblem(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn rejection_reason(err: &JudgeError) -> &'static str {
    match err {
        JudgeError::UnknownProblem(_) => "unknown_problem",
        JudgeError::UnsupportedLanguage(_) => "unsupported_language",
        JudgeError::EmptyCode => "empty_code",
        JudgeError::SourceTooLarge { .. } => "source_too_large",
        JudgeError::ComparisonPolicyUnknown(_) => "unknown_policy",
        _ => "other",
    }
}

fn mode_label(mode: SubmissionMode) -> &'static str {
    match mode {
        SubmissionMode::Run => "run",
        SubmissionMode::Submit => "submit",
    }
}

/// Check a request against the loaded content before it reaches the queue
pub fn validate_submission(
    request: SubmitRequest,
    problems: &ProblemStore,
    languages: &LanguageRegistry,
) -> Result<Submission, JudgeError> {
    let language: Language = request.language.parse()?;
    let problem = problems.get(&request.problem_id)?;
    if !languages.is_enabled(language) {
        return Err(JudgeError::UnsupportedLanguage(language.to_string()));
    }

    // Assembling here surfaces empty or oversized code as a 422 up front
    problem.template(language)?.assemble(&request.code)?;

    if let Some(policy) = &request.policy {
        policy.parse::<ComparisonPolicy>()?;
    }

    let mut submission = Submission::new(request.problem_id, language, request.code);
    submission.mode = request.mode;
    submission.policy = request.policy;
    Ok(submission)
}

fn parse_submission_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid submission ID format"))
}

/// POST /submissions - Queue a submission for judging
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitRequest>,
) -> Response {
    let submission = match validate_submission(payload, &state.problems, &state.languages) {
        Ok(submission) => submission,
        Err(e) => {
            warn!(error = %e, "Submission refused");
            metrics::SUBMISSIONS_REJECTED
                .with_label_values(&[rejection_reason(&e)])
                .inc();
            return error_response(status_for(&e), e.to_string());
        }
    };

    let mut conn = state.redis.clone();
    match redis::push_submission(&mut conn, &submission).await {
        Ok(()) => {
            info!(
                submission_id = %submission.id,
                problem_id = %submission.problem_id,
                language = %submission.language,
                mode = mode_label(submission.mode),
                "Submission queued"
            );
            let language = submission.language.to_string();
            metrics::SUBMISSIONS_QUEUED
                .with_label_values(&[language.as_str(), mode_label(submission.mode)])
                .inc();

            (
                StatusCode::CREATED,
                Json(SubmitResponse {
                    submission_id: submission.id.to_string(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(submission_id = %submission.id, error = %e, "Failed to queue submission");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to queue submission: {}", e),
            )
        }
    }
}

/// GET /submissions/{id} - Query the judge report
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Response {
    let id = match parse_submission_id(&submission_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let mut conn = state.redis.clone();
    match redis::get_report(&mut conn, &id).await {
        Ok(Some(report)) => {
            info!(submission_id = %id, status = ?report.status, "Report retrieved");
            let status = serde_json::to_value(report.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            metrics::REPORTS_SERVED.with_label_values(&[status.as_str()]).inc();
            (StatusCode::OK, Json(report)).into_response()
        }
        Ok(None) => {
            info!(submission_id = %id, "Submission still pending");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "submission_id": id,
                    "status": "pending",
                    "message": "Submission is queued or still being judged"
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!(submission_id = %id, error = %e, "Failed to fetch report");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to query submission: {}", e),
            )
        }
    }
}

/// POST /submissions/{id}/cancel - Ask the judging worker to stop
pub async fn cancel_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Response {
    let id = match parse_submission_id(&submission_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let mut conn = state.redis.clone();
    match redis::request_cancel(&mut conn, &id).await {
        Ok(()) => {
            info!(submission_id = %id, "Cancellation requested");
            metrics::CANCELLATIONS_REQUESTED.inc();
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "submission_id": id,
                    "status": "cancel-requested"
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!(submission_id = %id, error = %e, "Failed to request cancellation");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to cancel submission: {}", e),
            )
        }
    }
}

/// GET /problems - Published problems with their languages and case counts
pub async fn list_problems(State(state): State<Arc<AppState>>) -> Json<Vec<ProblemSummary>> {
    let problems = state
        .problems
        .iter()
        .map(|problem| ProblemSummary {
            id: problem.id.clone(),
            languages: problem
                .languages()
                .into_iter()
                .filter(|l| state.languages.is_enabled(*l))
                .collect(),
            test_cases: problem.test_cases.len(),
        })
        .collect();
    Json(problems)
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn export_metrics() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
