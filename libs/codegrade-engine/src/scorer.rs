/// Attempt Scorer - Folds per-test verdicts into one attempt verdict
///
/// ## Scoring:
/// - raw_score = 10 x passed / total, rounded to 2 decimals (0 when total = 0)
/// - penalty = sum of the first `hints_used` hint weights (0-100 points)
/// - hundred scale: final = max(0, raw x 10 - penalty)
/// - ten scale: final = max(0, raw - penalty / 10), penalty reported / 10
///
/// ## Status precedence:
/// ERROR (non-timeout stderr or security rejection) > TIMEOUT > PASS/FAIL
use anyhow::{bail, Result};
use codegrade_common::types::{AttemptStatus, AttemptVerdict, ScoreScale, TestVerdict};
use tracing::warn;

/// Validated hint-penalty table, in points on the 0-100 scale
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HintPenalties {
    weights: Vec<f64>,
}

impl HintPenalties {
    pub fn new(weights: Vec<f64>) -> Result<Self> {
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            bail!("Hint penalty must be a non-negative number, got {}", bad);
        }
        if weights.windows(2).any(|pair| pair[1] < pair[0]) {
            bail!("Hint penalties must be non-decreasing: {:?}", weights);
        }
        Ok(Self { weights })
    }

    /// Total penalty for `hints_used` hints; hints past the end of the
    /// table reuse its last weight
    pub fn total(&self, hints_used: u32) -> f64 {
        let hints_used = hints_used as usize;
        let Some(&last) = self.weights.last() else {
            if hints_used > 0 {
                warn!(hints_used, "Hints used but no penalty table configured");
            }
            return 0.0;
        };

        if hints_used > self.weights.len() {
            warn!(
                hints_used,
                table_len = self.weights.len(),
                "More hints used than the penalty table covers; reusing last weight"
            );
        }

        let covered: f64 = self.weights.iter().take(hints_used).sum();
        let extra = hints_used.saturating_sub(self.weights.len()) as f64 * last;
        covered + extra
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn classify(verdicts: &[TestVerdict], tests_passed: usize) -> AttemptStatus {
    let errored = verdicts.iter().any(|v| {
        v.result.security_rejected || (!v.result.timed_out && v.result.has_error_output())
    });

    if errored {
        AttemptStatus::Error
    } else if verdicts.iter().any(|v| v.result.timed_out) {
        AttemptStatus::Timeout
    } else if tests_passed == verdicts.len() && !verdicts.is_empty() {
        AttemptStatus::Pass
    } else {
        AttemptStatus::Fail
    }
}

/// Fold verdicts into an attempt verdict
pub fn score(
    verdicts: Vec<TestVerdict>,
    hints_used: u32,
    penalties: &HintPenalties,
    scale: ScoreScale,
) -> AttemptVerdict {
    let tests_total = verdicts.len();
    let tests_passed = verdicts.iter().filter(|v| v.passed).count();

    let raw_score = if tests_total == 0 {
        warn!("Scoring an attempt with no test cases");
        0.0
    } else {
        round2(10.0 * tests_passed as f64 / tests_total as f64)
    };

    let status = classify(&verdicts, tests_passed);
    let penalty_points = penalties.total(hints_used);

    let (penalty, final_score) = match scale {
        ScoreScale::Hundred => (penalty_points, (raw_score * 10.0 - penalty_points).max(0.0)),
        ScoreScale::Ten => {
            let penalty = penalty_points / 10.0;
            (penalty, (raw_score - penalty).max(0.0))
        }
    };

    AttemptVerdict {
        verdicts,
        tests_passed,
        tests_total,
        status,
        raw_score,
        penalty: round2(penalty),
        final_score: round2(final_score),
        scale,
        hints_used,
    }
}
