//! Untrusted code execution and scoring engine.
//!
//! Pipeline: [`guard`] rejects obviously dangerous source, [`runner`] executes
//! each test in a resource-bounded child process, [`comparator`] judges the
//! output, and [`scorer`] folds the judgments into an attempt verdict.
//! [`grader::Grader`] wires the stages together.

pub mod comparator;
pub mod config;
pub mod grader;
pub mod guard;
pub mod literal;
pub mod preamble;
pub mod runner;
pub mod scorer;


pub use config::SandboxProfile;
pub use grader::Grader;
pub use guard::{GuardRejection, StaticGuard};
pub use runner::{IsolatedRunner, Probe, RunRequest, SandboxRunner};
pub use scorer::HintPenalties;
