use codegrade_common::redis;
use codegrade_common::types::{GradingJob, GradingReport};
use codegrade_common::Config;
use codegrade_engine::{Grader, HintPenalties, SandboxProfile};
use tokio::signal;
use tracing::{debug, error, info, instrument, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Codegrade worker booting...");

    let profile = SandboxProfile::load_default().map_err(|e| {
        error!("Failed to load sandbox profile: {}", e);
        error!("Check config/sandbox.json");
        e
    })?;
    let config = Config::from_env();

    info!(
        python = %profile.python_command,
        memory_mb = profile.memory_limit_mb,
        max_concurrent_sandboxes = profile.max_concurrent_sandboxes,
        max_timeout_secs = config.max_timeout_secs,
        "Sandbox profile loaded"
    );

    let client = ::redis::Client::open(config.redis_url.as_str())?;
    let mut redis_conn = ::redis::aio::ConnectionManager::new(client).await?;

    info!("Connected to Redis: {}", config.redis_url);
    info!("Queue: {}", redis::QUEUE_NAME);

    let grader = Grader::new(profile, config);

    // Setup graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, stopping worker...");
    };

    tokio::select! {
        _ = worker_loop(&mut redis_conn, &grader) => {},
        _ = shutdown => {},
    }

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip_all)]
async fn worker_loop(
    redis_conn: &mut ::redis::aio::ConnectionManager,
    grader: &Grader,
) -> anyhow::Result<()> {
    loop {
        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_job(redis_conn, 5.0).await {
            Ok(Some(job)) => {
                let job_id = job.id;
                info!(
                    job_id = %job_id,
                    test_cases = job.submission.test_cases.len(),
                    source_size = job.submission.source.len(),
                    timeout_secs = job.submission.timeout_secs,
                    "Received job"
                );

                let start = std::time::Instant::now();
                let report = process_job(grader, &job).await;

                info!(
                    job_id = %job_id,
                    status = %report.verdict.status,
                    final_score = report.verdict.final_score,
                    execution_ms = start.elapsed().as_millis(),
                    "Grading completed"
                );

                for test in &report.verdict.verdicts {
                    debug!(
                        job_id = %job_id,
                        test_index = test.test_index,
                        passed = test.passed,
                        strategy = %test.strategy,
                        wall_time_ms = test.result.wall_time_ms,
                        "Test result"
                    );
                }

                // Non-fatal - worker continues
                match redis::store_report(redis_conn, &report).await {
                    Ok(()) => info!(job_id = %job_id, "Report persisted to Redis"),
                    Err(e) => error!(job_id = %job_id, error = %e, "Failed to persist report"),
                }
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Every popped job gets a report; a malformed hint table grades without penalties
async fn process_job(grader: &Grader, job: &GradingJob) -> GradingReport {
    let verdict = match grader.grade_job(job).await {
        Ok(verdict) => verdict,
        Err(e) => {
            warn!(job_id = %job.id, error = format!("{:#}", e), "Ignoring hint penalties");
            grader
                .grade(&job.submission, &HintPenalties::default(), job.scoring.scale)
                .await
        }
    };

    GradingReport {
        job_id: job.id,
        verdict,
        graded_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use codegrade_common::types::{
        AttemptStatus, RawExecutionResult, ScoreScale, ScoringPolicy, Submission, TestCase,
    };
    use codegrade_engine::{RunRequest, SandboxRunner};
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    struct FixedRunner(&'static str);

    #[async_trait]
    impl SandboxRunner for FixedRunner {
        async fn run(&self, _request: &RunRequest) -> RawExecutionResult {
            RawExecutionResult {
                stdout: self.0.to_string(),
                stderr: String::new(),
                exit_code: 0,
                wall_time_ms: 3,
                security_rejected: false,
                timed_out: false,
            }
        }
    }

    fn grader(stdout: &'static str) -> Grader {
        let config = Config {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            default_timeout_secs: 5,
            max_timeout_secs: 30,
        };
        Grader::with_runner(Arc::new(FixedRunner(stdout)), Arc::new(Semaphore::new(2)), config)
    }

    #[tokio::test]
    async fn test_process_job_builds_report() {
        let job = GradingJob::new(
            Submission::new("print(2+2)", vec![TestCase::new("", "4")]),
            ScoringPolicy::default(),
        );

        let report = process_job(&grader("4"), &job).await;

        assert_eq!(report.job_id, job.id);
        assert_eq!(report.verdict.status, AttemptStatus::Pass);
        assert_eq!(report.verdict.scale, ScoreScale::Ten);
        assert!(report.graded_at >= job.submitted_at);
    }

    #[tokio::test]
    async fn test_process_job_reports_bad_policy_without_penalty() {
        let job = GradingJob::new(
            Submission::new("print(2+2)", vec![TestCase::new("", "4")]).with_hints_used(1),
            ScoringPolicy {
                scale: ScoreScale::Hundred,
                hint_penalties: vec![-5.0],
            },
        );

        let report = process_job(&grader("4"), &job).await;

        assert_eq!(report.job_id, job.id);
        assert_eq!(report.verdict.status, AttemptStatus::Pass);
        assert_eq!(report.verdict.scale, ScoreScale::Hundred);
        assert_eq!(report.verdict.penalty, 0.0);
        assert_eq!(report.verdict.final_score, 100.0);
    }
}
