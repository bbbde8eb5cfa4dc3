use crate::types::{GradingJob, GradingReport};
use redis::{AsyncCommands, RedisResult};

/// Redis queue semantics - defines only semantics, not runtime logic
/// Ensures CLI and worker never drift and Redis keys are deterministic

pub const QUEUE_NAME: &str = "codegrade:queue";
pub const RESULT_PREFIX: &str = "codegrade:result";
pub const STATUS_PREFIX: &str = "codegrade:status";

/// Generate result key for a job
pub fn result_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

/// Generate status key for a job
pub fn status_key(job_id: &uuid::Uuid) -> String {
    format!("{}:{}", STATUS_PREFIX, job_id)
}

fn encode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "serialization error", e.to_string()))
}

fn decode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, "deserialization error", e.to_string()))
}

/// Push a grading job to the queue
/// Uses RPUSH for FIFO semantics
pub async fn push_job(
    conn: &mut redis::aio::ConnectionManager,
    job: &GradingJob,
) -> RedisResult<()> {
    let payload = serde_json::to_string(job).map_err(encode_error)?;
    conn.rpush(QUEUE_NAME, payload).await
}

/// Pop a grading job from the queue
/// Uses BLPOP with timeout for graceful shutdown
pub async fn pop_job(
    conn: &mut redis::aio::ConnectionManager,
    timeout_seconds: f64,
) -> RedisResult<Option<GradingJob>> {
    let result: Option<(String, String)> = conn.blpop(QUEUE_NAME, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let job: GradingJob = serde_json::from_str(&payload).map_err(decode_error)?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

/// Store a grading report and its status
/// TTL is 24 hours, matching the status key
pub async fn store_report(
    conn: &mut redis::aio::ConnectionManager,
    report: &GradingReport,
) -> RedisResult<()> {
    let payload = serde_json::to_string(report).map_err(encode_error)?;
    let _: () = conn.set_ex(result_key(&report.job_id), payload, 86400).await?;

    // Also store status separately for quick lookup
    let status = serde_json::to_string(&report.verdict.status).map_err(encode_error)?;
    let _: () = conn.set_ex(status_key(&report.job_id), status, 86400).await?;

    Ok(())
}

/// Retrieve a grading report
pub async fn get_report(
    conn: &mut redis::aio::ConnectionManager,
    job_id: &uuid::Uuid,
) -> RedisResult<Option<GradingReport>> {
    let payload: Option<String> = conn.get(result_key(job_id)).await?;

    match payload {
        Some(data) => {
            let report: GradingReport = serde_json::from_str(&data).map_err(decode_error)?;
            Ok(Some(report))
        }
        None => Ok(None),
    }
}
