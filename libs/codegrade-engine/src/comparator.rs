/// Outcome Comparator - Strategy-Selecting Judge
///
/// **Core Responsibility:**
/// Decide whether one test passed, given its raw execution result.
///
/// **Strategy selection** (first match on `expected`):
/// 1. Ellipsis: `...`/`…` marks a truncated value; prefix comparison
/// 2. Pattern: regex-looking text; searched over the whole actual text with
///    `.` matching newlines
/// 3. Expression: the input is an expression; the source is re-run in a fresh
///    sandbox with a probe and the value's `repr` is compared by value
/// 4. Exact: trimmed equality, with numeric tolerance for fractional numbers
///
/// A run that wrote to stderr never reaches a strategy. Nothing here panics
/// or returns an error; every outcome is a `TestVerdict`.
use crate::literal::{self, FLOAT_TOLERANCE};
use crate::runner::{Probe, RunRequest, SandboxRunner};
use codegrade_common::types::{
    ComparisonStrategy, InputMode, RawExecutionResult, TestCase, TestVerdict,
};
use regex::RegexBuilder;
use std::sync::Arc;
use tracing::debug;

const ELLIPSES: [&str; 2] = ["...", "…"];
const PATTERN_TOKENS: [&str; 6] = [".*", ".+", r"\d", r"\s", r"\w", r"\."];

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// `name(...)` or `a.b(...)` on a single line
fn is_call_shaped(input: &str) -> bool {
    if input.contains('\n') || !input.ends_with(')') {
        return false;
    }
    match input.find('(') {
        Some(open) => input[..open].trim_end().split('.').all(is_identifier),
        None => false,
    }
}

/// `[...]` character class or `{n}`/`{n,m}` quantifier following some atom.
/// At offset 0 these are list/set literals, not regex syntax.
fn has_class_or_quantifier(expected: &str) -> bool {
    let bytes = expected.as_bytes();
    (1..bytes.len()).any(|start| match bytes[start] {
        b'[' => bytes[start + 1..]
            .iter()
            .position(|b| *b == b']')
            .map_or(false, |len| {
                len > 0
                    && bytes[start + 1..start + 1 + len]
                        .iter()
                        .all(|b| !b.is_ascii_whitespace() && *b != b',')
            }),
        b'{' => {
            let body = &bytes[start + 1..];
            let digits = body.iter().take_while(|b| b.is_ascii_digit()).count();
            if digits == 0 {
                return false;
            }
            match body.get(digits) {
                Some(b'}') => true,
                Some(b',') => {
                    let more = body[digits + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
                    body.get(digits + 1 + more) == Some(&b'}')
                }
                _ => false,
            }
        }
        _ => false,
    })
}

/// Whether a test's input is an expression to evaluate rather than stdin
pub fn is_expression_input(test_case: &TestCase) -> bool {
    match test_case.mode {
        InputMode::Expression => true,
        InputMode::Stdin => false,
        InputMode::Auto => is_call_shaped(test_case.input.trim()),
    }
}

pub fn is_pattern(expected: &str) -> bool {
    let expected = expected.trim();
    PATTERN_TOKENS.iter().any(|token| expected.contains(token))
        || has_class_or_quantifier(expected)
        || (expected.len() > 1 && expected.starts_with('^') && expected.ends_with('$'))
}

fn ellipsis_prefix(expected: &str) -> Option<&str> {
    ELLIPSES
        .iter()
        .filter_map(|ellipsis| expected.find(ellipsis))
        .min()
        .map(|at| expected[..at].trim())
}

fn looks_fractional(text: &str) -> bool {
    text.contains('.') || text.contains('e') || text.contains('E')
}

/// Outcome of one strategy: pass/fail plus a reason on failure
struct Judgement {
    strategy: ComparisonStrategy,
    passed: bool,
    reason: Option<String>,
}

impl Judgement {
    fn pass(strategy: ComparisonStrategy) -> Self {
        Self {
            strategy,
            passed: true,
            reason: None,
        }
    }

    fn fail(strategy: ComparisonStrategy, reason: impl Into<String>) -> Self {
        Self {
            strategy,
            passed: false,
            reason: Some(reason.into()),
        }
    }
}

pub struct OutcomeComparator {
    runner: Arc<dyn SandboxRunner>,
}

impl OutcomeComparator {
    pub fn new(runner: Arc<dyn SandboxRunner>) -> Self {
        Self { runner }
    }

    /// Judge one test's raw result.
    ///
    /// `source` and `timeout_secs` are needed only for expression inputs,
    /// which re-run the source with a probe. If that probe run fails, its
    /// result replaces `result` in the verdict so the failure is classified
    /// as the runtime error or timeout it was.
    pub async fn judge(
        &self,
        test_index: usize,
        test_case: &TestCase,
        result: RawExecutionResult,
        source: &str,
        timeout_secs: u64,
    ) -> TestVerdict {
        if result.has_error_output() {
            let reason = if result.timed_out {
                "execution timed out".to_string()
            } else if result.security_rejected {
                format!("rejected before execution: {}", result.stderr)
            } else {
                "program wrote to stderr".to_string()
            };
            return verdict(test_index, test_case, result, Judgement::fail(ComparisonStrategy::None, reason));
        }

        if !is_expression_input(test_case) {
            let judgement = compare_text(&test_case.expected, &result.stdout, false);
            return verdict(test_index, test_case, result, judgement);
        }

        let probe = Probe::new(test_case.input.trim());
        let request = RunRequest::new(source, "", timeout_secs).with_probe(probe.clone());
        let probed = self.runner.run(&request).await;

        if probed.has_error_output() {
            let reason = if probed.timed_out {
                format!("evaluating '{}' timed out", probe.expression)
            } else {
                format!("evaluating '{}' failed", probe.expression)
            };
            return verdict(test_index, test_case, probed, Judgement::fail(ComparisonStrategy::Expression, reason));
        }

        let judgement = match probe.extract(&probed.stdout) {
            Some(actual) => compare_text(&test_case.expected, actual, true),
            None => Judgement::fail(
                ComparisonStrategy::Expression,
                format!("evaluating '{}' produced no value", probe.expression),
            ),
        };
        verdict(test_index, test_case, result, judgement)
    }
}

fn verdict(
    test_index: usize,
    test_case: &TestCase,
    result: RawExecutionResult,
    judgement: Judgement,
) -> TestVerdict {
    debug!(
        test_index,
        strategy = %judgement.strategy,
        passed = judgement.passed,
        "Test judged"
    );

    TestVerdict {
        test_index,
        is_hidden: test_case.is_hidden,
        result,
        passed: judgement.passed,
        strategy: judgement.strategy,
        reason: judgement.reason,
    }
}

/// Pick a strategy for `expected` and apply it to `actual`
fn compare_text(expected: &str, actual: &str, expression: bool) -> Judgement {
    let expected = expected.trim();
    let actual = actual.trim();

    if let Some(prefix) = ellipsis_prefix(expected) {
        return if actual.starts_with(prefix) {
            Judgement::pass(ComparisonStrategy::Ellipsis)
        } else {
            Judgement::fail(
                ComparisonStrategy::Ellipsis,
                format!("expected a value starting with '{}', got '{}'", prefix, actual),
            )
        };
    }

    if is_pattern(expected) {
        let judgement = compare_pattern(expected, actual);
        if judgement.passed {
            return judgement;
        }
        // Brackets and braces also appear in plain output such as `[5]`
        let literal = if expression {
            compare_values(expected, actual)
        } else {
            compare_exact(expected, actual)
        };
        return if literal.passed { literal } else { judgement };
    }

    if expression {
        return compare_values(expected, actual);
    }

    compare_exact(expected, actual)
}

fn compare_pattern(expected: &str, actual: &str) -> Judgement {
    match RegexBuilder::new(expected).dot_matches_new_line(true).build() {
        Ok(pattern) if pattern.is_match(actual) => Judgement::pass(ComparisonStrategy::Pattern),
        Ok(_) => Judgement::fail(
            ComparisonStrategy::Pattern,
            format!("output does not match pattern '{}'", expected),
        ),
        Err(e) => Judgement::fail(
            ComparisonStrategy::Pattern,
            format!("invalid pattern '{}': {}", expected, e),
        ),
    }
}

fn compare_values(expected: &str, actual: &str) -> Judgement {
    let (matched, reason) = match (literal::parse(expected), literal::parse(actual)) {
        (Ok(want), Ok(got)) => (
            literal::values_equal(&want, &got),
            format!("expected {}, got {}", want, got),
        ),
        _ => (
            literal::normalize(expected) == literal::normalize(actual),
            format!("expected {}, got {}", expected, actual),
        ),
    };

    if matched {
        Judgement::pass(ComparisonStrategy::Expression)
    } else {
        Judgement::fail(ComparisonStrategy::Expression, reason)
    }
}

fn compare_exact(expected: &str, actual: &str) -> Judgement {
    if expected == actual {
        return Judgement::pass(ComparisonStrategy::Exact);
    }

    if looks_fractional(expected) || looks_fractional(actual) {
        if let (Ok(want), Ok(got)) = (expected.parse::<f64>(), actual.parse::<f64>()) {
            if want.is_finite() && got.is_finite() && (want - got).abs() < FLOAT_TOLERANCE {
                return Judgement::pass(ComparisonStrategy::Exact);
            }
        }
    }

    Judgement::fail(
        ComparisonStrategy::Exact,
        format!("expected '{}', got '{}'", expected, actual),
    )
}
