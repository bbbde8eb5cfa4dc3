use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stderr text recorded for a run killed at the wall-clock limit
pub const TIMEOUT_MESSAGE: &str = "execution time exceeded";

/// How a test case's `input` is fed to the program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Expression if the input looks like a call, stdin otherwise
    #[default]
    Auto,
    Stdin,
    Expression,
}

/// Test Case Definition (Immutable Input)
/// `expected` may be a literal, an ellipsis-suffixed number, a pattern,
/// or a value literal for expression inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected: String,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub mode: InputMode,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected: expected.into(),
            is_hidden: false,
            mode: InputMode::Auto,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.is_hidden = true;
        self
    }

    pub fn with_mode(mut self, mode: InputMode) -> Self {
        self.mode = mode;
        self
    }
}

fn default_timeout_secs() -> u64 {
    5
}

/// Submission (Immutable)
/// One grading attempt: source text plus its ordered test cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub source: String,
    pub test_cases: Vec<TestCase>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub hints_used: u32,
}

impl Submission {
    pub fn new(source: impl Into<String>, test_cases: Vec<TestCase>) -> Self {
        Self {
            source: source.into(),
            test_cases,
            timeout_secs: default_timeout_secs(),
            hints_used: 0,
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_hints_used(mut self, hints_used: u32) -> Self {
        self.hints_used = hints_used;
        self
    }
}

/// Raw output of one sandboxed run
/// Produced once per test case by the runner, never mutated afterwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub wall_time_ms: u64,
    pub security_rejected: bool,
    pub timed_out: bool,
}

impl RawExecutionResult {
    /// Run killed at the wall-clock limit; partial output is discarded
    pub fn timeout(timeout_secs: u64) -> Self {
        Self {
            stdout: String::new(),
            stderr: TIMEOUT_MESSAGE.to_string(),
            exit_code: -1,
            wall_time_ms: timeout_secs * 1000,
            security_rejected: false,
            timed_out: true,
        }
    }

    /// The host could not start (or stage) the child process
    pub fn spawn_failure(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: -1,
            wall_time_ms: 0,
            security_rejected: false,
            timed_out: false,
        }
    }

    /// Vetoed before execution; nothing was spawned
    pub fn security_rejected(reason: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: reason.into(),
            exit_code: -1,
            wall_time_ms: 0,
            security_rejected: true,
            timed_out: false,
        }
    }

    pub fn has_error_output(&self) -> bool {
        !self.stderr.is_empty()
    }
}

/// Which comparison decided a test verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonStrategy {
    /// Not compared: the run itself failed
    None,
    Ellipsis,
    Pattern,
    Expression,
    Exact,
}

impl fmt::Display for ComparisonStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonStrategy::None => write!(f, "none"),
            ComparisonStrategy::Ellipsis => write!(f, "ellipsis"),
            ComparisonStrategy::Pattern => write!(f, "pattern"),
            ComparisonStrategy::Expression => write!(f, "expression"),
            ComparisonStrategy::Exact => write!(f, "exact"),
        }
    }
}

/// Failure taxonomy, derived from a verdict for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SecurityRejected,
    RuntimeFailure,
    Timeout,
    ComparisonFailure,
}

/// Per-Test Verdict
/// References its test case by index; the hidden flag is carried through
/// so callers can decide what to show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestVerdict {
    pub test_index: usize,
    pub is_hidden: bool,
    pub result: RawExecutionResult,
    pub passed: bool,
    pub strategy: ComparisonStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TestVerdict {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        if self.passed {
            None
        } else if self.result.security_rejected {
            Some(FailureKind::SecurityRejected)
        } else if self.result.timed_out {
            Some(FailureKind::Timeout)
        } else if self.result.has_error_output() {
            Some(FailureKind::RuntimeFailure)
        } else {
            Some(FailureKind::ComparisonFailure)
        }
    }
}

/// Overall attempt classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttemptStatus {
    Pass,
    Fail,
    Error,
    Timeout,
}

impl AttemptStatus {
    /// Student-facing summary; diagnostics stay in the verdicts
    pub fn user_message(&self, security_rejected: bool) -> &'static str {
        match self {
            AttemptStatus::Pass => "all tests passed",
            AttemptStatus::Error if security_rejected => "disallowed construct",
            AttemptStatus::Timeout => "time limit exceeded",
            AttemptStatus::Error | AttemptStatus::Fail => "test failed",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStatus::Pass => write!(f, "PASS"),
            AttemptStatus::Fail => write!(f, "FAIL"),
            AttemptStatus::Error => write!(f, "ERROR"),
            AttemptStatus::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Score scale the caller works in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreScale {
    #[default]
    Ten,
    Hundred,
}

impl ScoreScale {
    pub fn max(&self) -> f64 {
        match self {
            ScoreScale::Ten => 10.0,
            ScoreScale::Hundred => 100.0,
        }
    }

    pub fn from_str(s: &str) -> Option<ScoreScale> {
        match s.to_lowercase().as_str() {
            "ten" | "10" => Some(ScoreScale::Ten),
            "hundred" | "100" => Some(ScoreScale::Hundred),
            _ => None,
        }
    }
}

/// Per-exercise scoring inputs supplied by the caller
/// `hint_penalties` are points on the 0-100 scale, one per hint index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    #[serde(default)]
    pub scale: ScoreScale,
    #[serde(default)]
    pub hint_penalties: Vec<f64>,
}

/// Final verdict for one submission
///
/// ## Scoring Semantics:
/// - raw_score: 10 x passed / total, always on the 0-10 scale
/// - penalty and final_score: expressed in `scale` units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptVerdict {
    pub verdicts: Vec<TestVerdict>,
    pub tests_passed: usize,
    pub tests_total: usize,
    pub status: AttemptStatus,
    pub raw_score: f64,
    pub penalty: f64,
    pub final_score: f64,
    pub scale: ScoreScale,
    pub hints_used: u32,
}

impl AttemptVerdict {
    pub fn security_rejected(&self) -> bool {
        self.verdicts.iter().any(|v| v.result.security_rejected)
    }

    pub fn user_message(&self) -> &'static str {
        self.status.user_message(self.security_rejected())
    }
}

/// Queue envelope: a submission plus its scoring policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingJob {
    pub id: Uuid,
    pub submission: Submission,
    #[serde(default)]
    pub scoring: ScoringPolicy,
    pub submitted_at: DateTime<Utc>,
}

impl GradingJob {
    pub fn new(submission: Submission, scoring: ScoringPolicy) -> Self {
        Self {
            id: Uuid::new_v4(),
            submission,
            scoring,
            submitted_at: Utc::now(),
        }
    }
}

/// Written by workers, read by the CLI and the persistence collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingReport {
    pub job_id: Uuid,
    pub verdict: AttemptVerdict,
    pub graded_at: DateTime<Utc>,
}
