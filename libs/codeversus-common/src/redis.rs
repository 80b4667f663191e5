use crate::types::{JudgeReport, Submission};
use redis::{AsyncCommands, RedisResult};

/// Redis queue semantics - defines only key layout and encoding, not runtime logic.
/// Keeps the API and worker from drifting apart.

pub const QUEUE_KEY: &str = "codeversus:queue";
pub const RESULT_PREFIX: &str = "codeversus:result";
pub const STATUS_PREFIX: &str = "codeversus:status";
pub const CANCEL_PREFIX: &str = "codeversus:cancel";

/// Generate result key for a submission
pub fn result_key(submission_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, submission_id)
}

/// Generate status key for a submission
pub fn status_key(submission_id: &uuid::Uuid) -> String {
    format!("{}:{}", STATUS_PREFIX, submission_id)
}

/// Generate cancellation flag key for a submission
pub fn cancel_key(submission_id: &uuid::Uuid) -> String {
    format!("{}:{}", CANCEL_PREFIX, submission_id)
}

fn encode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

fn decode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
}

/// Push a submission to the judge queue
/// Uses RPUSH for FIFO semantics
pub async fn push_submission(
    conn: &mut redis::aio::ConnectionManager,
    submission: &Submission,
) -> RedisResult<()> {
    let payload = serde_json::to_string(submission).map_err(encode_error)?;
    conn.rpush(QUEUE_KEY, payload).await
}

/// Pop a submission from the judge queue
/// Uses BLPOP with timeout for graceful shutdown
pub async fn pop_submission(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<Submission>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_KEY, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let submission: Submission = serde_json::from_str(&payload).map_err(decode_error)?;
            Ok(Some(submission))
        }
        None => Ok(None),
    }
}

/// Store a judge report with a 24-hour TTL
pub async fn store_report(
    conn: &mut redis::aio::ConnectionManager,
    report: &JudgeReport,
) -> RedisResult<()> {
    let key = result_key(&report.submission_id);
    let payload = serde_json::to_string(report).map_err(encode_error)?;
    let _: () = conn.set_ex(&key, payload, 86400).await?;

    // Also store status separately for quick lookup
    let status = serde_json::to_string(&report.status).map_err(encode_error)?;
    let _: () = conn
        .set_ex(status_key(&report.submission_id), status, 86400)
        .await?;

    Ok(())
}

/// Retrieve a judge report
pub async fn get_report(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &uuid::Uuid,
) -> RedisResult<Option<JudgeReport>> {
    let payload: Option<String> = conn.get(result_key(submission_id)).await?;

    match payload {
        Some(data) => {
            let report: JudgeReport = serde_json::from_str(&data).map_err(decode_error)?;
            Ok(Some(report))
        }
        None => Ok(None),
    }
}

/// Flag a submission as cancelled. The worker judging it polls this flag.
pub async fn request_cancel(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &uuid::Uuid,
) -> RedisResult<()> {
    conn.set_ex(cancel_key(submission_id), "1", 3600).await
}

pub async fn is_cancelled(
    conn: &mut redis::aio::ConnectionManager,
    submission_id: &uuid::Uuid,
) -> RedisResult<bool> {
    conn.exists(cancel_key(submission_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_result_key_deterministic() {
        let id = Uuid::new_v4();
        let key1 = result_key(&id);
        let key2 = result_key(&id);
        assert_eq!(key1, key2);
        assert!(key1.starts_with("codeversus:result:"));
    }

    #[test]
    fn test_status_key_format() {
        let id = Uuid::new_v4();
        let key = status_key(&id);
        assert!(key.starts_with("codeversus:status:"));
        assert!(key.contains(&id.to_string()));
    }

    #[test]
    fn test_cancel_key_distinct_from_result() {
        let id = Uuid::new_v4();
        assert_ne!(cancel_key(&id), result_key(&id));
        assert!(cancel_key(&id).ends_with(&id.to_string()));
    }
}
