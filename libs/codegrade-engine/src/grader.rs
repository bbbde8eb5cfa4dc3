/// Grader - Guard → Runner → Comparator → Scorer
///
/// Tests of one submission run concurrently. Every sandboxed run, including
/// the probe runs of expression tests, first takes a permit from a shared
/// semaphore, so one `Grader` (or one semaphore handed to several) caps the
/// number of live child processes. Verdicts come back in test order.
use crate::comparator::{is_expression_input, OutcomeComparator};
use crate::config::SandboxProfile;
use crate::guard::{GuardRejection, StaticGuard};
use crate::runner::{IsolatedRunner, RunRequest, SandboxRunner};
use crate::scorer::{self, HintPenalties};
use anyhow::{Context, Result};
use async_trait::async_trait;
use codegrade_common::types::{
    AttemptVerdict, GradingJob, RawExecutionResult, ScoreScale, Submission, TestCase, TestVerdict,
};
use codegrade_common::Config;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

/// Runner wrapper that holds a permit for the duration of each run
struct PermittedRunner {
    inner: Arc<dyn SandboxRunner>,
    permits: Arc<Semaphore>,
}

#[async_trait]
impl SandboxRunner for PermittedRunner {
    async fn run(&self, request: &RunRequest) -> RawExecutionResult {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return RawExecutionResult::spawn_failure("sandbox pool is closed"),
        };
        self.inner.run(request).await
    }
}

pub struct Grader {
    guard: StaticGuard,
    runner: Arc<PermittedRunner>,
    comparator: OutcomeComparator,
    config: Config,
}

impl Grader {
    /// Production grader backed by an `IsolatedRunner`
    pub fn new(profile: SandboxProfile, config: Config) -> Self {
        let permits = Arc::new(Semaphore::new(profile.max_concurrent_sandboxes));
        Self::with_runner(Arc::new(IsolatedRunner::new(profile)), permits, config)
    }

    /// Grader over any runner; `permits` may be shared with other graders
    pub fn with_runner(
        runner: Arc<dyn SandboxRunner>,
        permits: Arc<Semaphore>,
        config: Config,
    ) -> Self {
        let runner = Arc::new(PermittedRunner {
            inner: runner,
            permits,
        });
        Self {
            guard: StaticGuard::new(),
            comparator: OutcomeComparator::new(runner.clone()),
            runner,
            config,
        }
    }

    /// Replace the concurrency limiter, e.g. to share one across graders
    pub fn with_semaphore(self, permits: Arc<Semaphore>) -> Self {
        let inner = self.runner.inner.clone();
        Self::with_runner(inner, permits, self.config)
    }

    /// Grade a queued job, validating its scoring policy first
    pub async fn grade_job(&self, job: &GradingJob) -> Result<AttemptVerdict> {
        let penalties = HintPenalties::new(job.scoring.hint_penalties.clone())
            .with_context(|| format!("Invalid scoring policy for job {}", job.id))?;
        Ok(self.grade(&job.submission, &penalties, job.scoring.scale).await)
    }

    #[instrument(skip_all, fields(tests = submission.test_cases.len(), hints_used = submission.hints_used))]
    pub async fn grade(
        &self,
        submission: &Submission,
        penalties: &HintPenalties,
        scale: ScoreScale,
    ) -> AttemptVerdict {
        let timeout_secs = self.config.effective_timeout_secs(submission.timeout_secs);

        let rejection = self.guard.scan(&submission.source).err();
        if let Some(rejection) = &rejection {
            warn!(token = rejection.token(), "Submission rejected by static guard");
        }

        let runs = submission
            .test_cases
            .iter()
            .enumerate()
            .map(|(index, test_case)| {
                self.run_test(index, test_case, &submission.source, timeout_secs, rejection.as_ref())
            });
        let verdicts = join_all(runs).await;

        let verdict = scorer::score(verdicts, submission.hints_used, penalties, scale);
        info!(
            status = %verdict.status,
            tests_passed = verdict.tests_passed,
            tests_total = verdict.tests_total,
            final_score = verdict.final_score,
            "Attempt graded"
        );
        verdict
    }

    async fn run_test(
        &self,
        index: usize,
        test_case: &TestCase,
        source: &str,
        timeout_secs: u64,
        rejection: Option<&GuardRejection>,
    ) -> TestVerdict {
        let result = match rejection {
            // Never spawn for rejected source
            Some(rejection) => RawExecutionResult::security_rejected(rejection.to_string()),
            None => {
                // Expression inputs are evaluated by the comparator's probe run
                let stdin = if is_expression_input(test_case) {
                    ""
                } else {
                    test_case.input.as_str()
                };
                self.runner
                    .run(&RunRequest::new(source, stdin, timeout_secs))
                    .await
            }
        };

        self.comparator
            .judge(index, test_case, result, source, timeout_secs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codegrade_common::types::{AttemptStatus, ComparisonStrategy, FailureKind, ScoringPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Echoes stdin back as stdout, answers probes with a fixed repr,
    /// and records concurrency
    #[derive(Default)]
    struct EchoRunner {
        spawns: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        requests: Mutex<Vec<RunRequest>>,
        delay_ms: u64,
    }

    #[async_trait]
    impl SandboxRunner for EchoRunner {
        async fn run(&self, request: &RunRequest) -> RawExecutionResult {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());

            // Later tests finish first
            let wait = self.delay_ms * (10 - request.stdin.len().min(9) as u64);
            tokio::time::sleep(Duration::from_millis(wait)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let stdout = match &request.probe {
                Some(probe) => format!("{}5", probe.marker),
                None => request.stdin.trim().to_string(),
            };
            RawExecutionResult {
                stdout,
                stderr: String::new(),
                exit_code: 0,
                wall_time_ms: wait,
                security_rejected: false,
                timed_out: false,
            }
        }
    }

    fn config() -> Config {
        Config {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            default_timeout_secs: 5,
            max_timeout_secs: 30,
        }
    }

    fn grader(runner: Arc<EchoRunner>, permits: usize) -> Grader {
        Grader::with_runner(runner, Arc::new(Semaphore::new(permits)), config())
    }

    #[tokio::test]
    async fn test_rejected_source_never_spawns() {
        let runner = Arc::new(EchoRunner::default());
        let grader = grader(runner.clone(), 4);
        let submission = Submission::new(
            "import os\nprint(os.listdir('/'))",
            vec![TestCase::new("", "x"), TestCase::new("1", "1")],
        );

        let verdict = grader
            .grade(&submission, &HintPenalties::default(), ScoreScale::Ten)
            .await;

        assert_eq!(runner.spawns.load(Ordering::SeqCst), 0);
        assert_eq!(verdict.status, AttemptStatus::Error);
        assert_eq!(verdict.tests_passed, 0);
        assert!(verdict.security_rejected());
        for test in &verdict.verdicts {
            assert_eq!(test.failure_kind(), Some(FailureKind::SecurityRejected));
            assert!(test.result.stderr.contains("'os'"));
            assert_eq!(test.strategy, ComparisonStrategy::None);
        }
    }

    #[tokio::test]
    async fn test_single_test_passes() {
        let runner = Arc::new(EchoRunner::default());
        let grader = grader(runner.clone(), 4);
        let submission = Submission::new("print(input())", vec![TestCase::new("4", "4")]);

        let verdict = grader
            .grade(&submission, &HintPenalties::default(), ScoreScale::Ten)
            .await;

        assert_eq!(verdict.status, AttemptStatus::Pass);
        assert_eq!(verdict.tests_passed, 1);
        assert_eq!(verdict.raw_score, 10.0);
        assert_eq!(runner.spawns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_verdicts_keep_test_order() {
        let runner = Arc::new(EchoRunner {
            delay_ms: 5,
            ..Default::default()
        });
        let grader = grader(runner, 8);
        let tests: Vec<TestCase> = ["a", "bb", "ccc", "dddd", "eeeee"]
            .iter()
            .map(|input| TestCase::new(*input, *input))
            .collect();
        let submission = Submission::new("print(input())", tests);

        let verdict = grader
            .grade(&submission, &HintPenalties::default(), ScoreScale::Ten)
            .await;

        let indices: Vec<usize> = verdict.verdicts.iter().map(|v| v.test_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(verdict.verdicts[3].result.stdout, "dddd");
        assert_eq!(verdict.status, AttemptStatus::Pass);
    }

    #[tokio::test]
    async fn test_concurrency_is_capped_by_permits() {
        let runner = Arc::new(EchoRunner {
            delay_ms: 2,
            ..Default::default()
        });
        let grader = grader(runner.clone(), 2);
        let tests = (0..6).map(|i| TestCase::new(i.to_string(), i.to_string())).collect();
        let submission = Submission::new("print(input())", tests);

        grader
            .grade(&submission, &HintPenalties::default(), ScoreScale::Ten)
            .await;

        assert_eq!(runner.spawns.load(Ordering::SeqCst), 6);
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_timeout_is_clamped() {
        let runner = Arc::new(EchoRunner::default());
        let grader = grader(runner.clone(), 4);
        let submission =
            Submission::new("print(input())", vec![TestCase::new("1", "1")]).with_timeout_secs(600);

        grader
            .grade(&submission, &HintPenalties::default(), ScoreScale::Ten)
            .await;

        assert_eq!(runner.requests.lock().unwrap()[0].timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_expression_test_runs_source_then_probe() {
        let runner = Arc::new(EchoRunner::default());
        let grader = grader(runner.clone(), 4);
        let submission = Submission::new(
            "def add(a, b):\n    return a + b\n",
            vec![TestCase::new("add(2,3)", "5")],
        );

        let verdict = grader
            .grade(&submission, &HintPenalties::default(), ScoreScale::Ten)
            .await;

        assert_eq!(verdict.status, AttemptStatus::Pass);
        assert_eq!(verdict.verdicts[0].strategy, ComparisonStrategy::Expression);

        let requests = runner.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.stdin.is_empty()));
        assert_eq!(requests.iter().filter(|r| r.probe.is_some()).count(), 1);
    }

    #[tokio::test]
    async fn test_hints_reduce_final_score() {
        let runner = Arc::new(EchoRunner::default());
        let grader = grader(runner, 4);
        let job = GradingJob::new(
            Submission::new("print(input())", vec![TestCase::new("1", "1")]).with_hints_used(2),
            ScoringPolicy {
                scale: ScoreScale::Hundred,
                hint_penalties: vec![5.0, 10.0],
            },
        );

        let verdict = grader.grade_job(&job).await.unwrap();

        assert_eq!(verdict.penalty, 15.0);
        assert_eq!(verdict.final_score, 85.0);
        assert_eq!(verdict.hints_used, 2);
    }

    #[tokio::test]
    async fn test_invalid_policy_rejected_before_running() {
        let runner = Arc::new(EchoRunner::default());
        let grader = grader(runner.clone(), 4);
        let job = GradingJob::new(
            Submission::new("print(1)", vec![TestCase::new("", "1")]),
            ScoringPolicy {
                scale: ScoreScale::Ten,
                hint_penalties: vec![20.0, 10.0],
            },
        );

        assert!(grader.grade_job(&job).await.is_err());
        assert_eq!(runner.spawns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shared_semaphore() {
        let permits = Arc::new(Semaphore::new(1));
        let runner = Arc::new(EchoRunner::default());
        let grader = grader(runner.clone(), 8).with_semaphore(permits.clone());

        let held = permits.clone().acquire_owned().await.unwrap();
        let submission = Submission::new("print(input())", vec![TestCase::new("1", "1")]);
        let penalties = HintPenalties::default();
        let grading = grader.grade(&submission, &penalties, ScoreScale::Ten);
        tokio::pin!(grading);

        // Blocked on the permit held above
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut grading).await.is_err());
        assert_eq!(runner.spawns.load(Ordering::SeqCst), 0);

        drop(held);
        let verdict = grading.await;
        assert_eq!(verdict.status, AttemptStatus::Pass);
    }
}
