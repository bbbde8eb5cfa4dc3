pub mod types;
pub mod redis;
pub mod config;

// Re-export commonly used types for convenience
pub use types::{
    AttemptStatus, AttemptVerdict, GradingJob, GradingReport, RawExecutionResult, ScoreScale,
    ScoringPolicy, Submission, TestCase, TestVerdict,
};
pub use config::Config;
