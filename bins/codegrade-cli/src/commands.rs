// CLI commands for grading and queueing submissions
use crate::GradeArgs;
use anyhow::{bail, Context, Result};
use codegrade_common::redis;
use codegrade_common::types::{
    AttemptVerdict, GradingJob, ScoreScale, ScoringPolicy, Submission, TestCase,
};
use codegrade_common::Config;
use codegrade_engine::{Grader, HintPenalties, SandboxProfile, StaticGuard};
use std::fs;
use std::path::Path;

fn load_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Test files are a JSON array of `{input, expected, is_hidden?, mode?}`
fn load_tests(path: &Path) -> Result<Vec<TestCase>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let tests: Vec<TestCase> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse test cases in {}", path.display()))?;
    if tests.is_empty() {
        bail!("No test cases in {}", path.display());
    }
    Ok(tests)
}

fn parse_penalties(raw: Option<&str>) -> Result<Vec<f64>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<f64>()
                .with_context(|| format!("Invalid hint penalty: {}", part))
        })
        .collect()
}

fn build_job(args: &GradeArgs) -> Result<GradingJob> {
    let scale = match ScoreScale::from_str(&args.scale) {
        Some(scale) => scale,
        None => bail!("Invalid scale '{}'. Valid options: ten, hundred", args.scale),
    };

    let hint_penalties = parse_penalties(args.penalties.as_deref())?;
    // Fail on a bad table before any sandbox or queue work
    HintPenalties::new(hint_penalties.clone())?;

    let submission = Submission::new(load_source(&args.file)?, load_tests(&args.tests)?)
        .with_timeout_secs(args.timeout)
        .with_hints_used(args.hints);

    Ok(GradingJob::new(
        submission,
        ScoringPolicy {
            scale,
            hint_penalties,
        },
    ))
}

async fn connect(config: &Config) -> Result<::redis::aio::ConnectionManager> {
    let client = ::redis::Client::open(config.redis_url.as_str())
        .with_context(|| format!("Invalid Redis URL: {}", config.redis_url))?;
    ::redis::aio::ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))
}

/// Run the static guard only
pub fn check(file: &Path) -> Result<()> {
    let source = load_source(file)?;

    match StaticGuard::new().scan(&source) {
        Ok(()) => {
            println!("✓ {} passed the static guard", file.display());
            Ok(())
        }
        Err(rejection) => bail!("{} rejected: {}", file.display(), rejection),
    }
}

/// Grade locally in isolated child processes
pub async fn grade(args: &GradeArgs, json: bool) -> Result<()> {
    let job = build_job(args)?;
    let profile = SandboxProfile::load_default()?;
    let grader = Grader::new(profile, Config::from_env());

    let verdict = grader.grade_job(&job).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print_verdict(&verdict);
    }
    Ok(())
}

/// Push a job for the worker and print its id
pub async fn submit(args: &GradeArgs) -> Result<()> {
    let job = build_job(args)?;
    let config = Config::from_env();
    let mut conn = connect(&config).await?;

    redis::push_job(&mut conn, &job)
        .await
        .context("Failed to queue job")?;

    println!("✓ Queued job {}", job.id);
    println!("  Check with: codegrade-cli result {}", job.id);
    Ok(())
}

/// Print a stored report, or its absence
pub async fn result(id: &str) -> Result<()> {
    let job_id = uuid::Uuid::parse_str(id).with_context(|| format!("Invalid job id: {}", id))?;
    let config = Config::from_env();
    let mut conn = connect(&config).await?;

    match redis::get_report(&mut conn, &job_id).await? {
        Some(report) => {
            println!("Graded at {}", report.graded_at.to_rfc3339());
            print_verdict(&report.verdict);
        }
        None => println!("No report for {} yet (queued, running, or expired)", job_id),
    }
    Ok(())
}

/// Human-readable summary; hidden tests show only pass/fail
fn print_verdict(verdict: &AttemptVerdict) {
    for test in &verdict.verdicts {
        let mark = if test.passed { "✓" } else { "✗" };
        if test.is_hidden {
            println!("{} Test {} (hidden)", mark, test.test_index + 1);
            continue;
        }

        println!(
            "{} Test {} [{}] {}ms",
            mark,
            test.test_index + 1,
            test.strategy,
            test.result.wall_time_ms
        );
        if let Some(reason) = &test.reason {
            println!("    {}", reason);
        }
        if !test.passed && !test.result.stderr.is_empty() {
            for line in test.result.stderr.lines().rev().take(3).collect::<Vec<_>>().into_iter().rev() {
                println!("    | {}", line);
            }
        }
    }

    println!();
    println!(
        "{}: {} ({}/{} passed)",
        verdict.status,
        verdict.user_message(),
        verdict.tests_passed,
        verdict.tests_total
    );
    println!(
        "Score: {} raw, -{} penalty, {} / {} final",
        verdict.raw_score,
        verdict.penalty,
        verdict.final_score,
        verdict.scale.max()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    fn args(file: PathBuf, tests: PathBuf) -> GradeArgs {
        GradeArgs {
            file,
            tests,
            scale: "hundred".to_string(),
            hints: 1,
            penalties: Some("5, 10".to_string()),
            timeout: 3,
        }
    }

    #[test]
    fn test_parse_penalties() {
        assert_eq!(parse_penalties(None).unwrap(), Vec::<f64>::new());
        assert_eq!(parse_penalties(Some("5,10,20")).unwrap(), vec![5.0, 10.0, 20.0]);
        assert_eq!(parse_penalties(Some(" 5 , 7.5 ,")).unwrap(), vec![5.0, 7.5]);
        assert!(parse_penalties(Some("5,ten")).is_err());
    }

    #[test]
    fn test_load_tests() {
        let file = write_temp(
            r#"[{"input": "5", "expected": "10"}, {"input": "add(1, 2)", "expected": "3", "is_hidden": true}]"#,
        );
        let tests = load_tests(file.path()).unwrap();
        assert_eq!(tests.len(), 2);
        assert!(tests[1].is_hidden);

        let empty = write_temp("[]");
        assert!(load_tests(empty.path()).is_err());
    }

    #[test]
    fn test_build_job() {
        let source = write_temp("print(int(input()) * 2)");
        let tests = write_temp(r#"[{"input": "5", "expected": "10"}]"#);

        let job = build_job(&args(source.path().to_path_buf(), tests.path().to_path_buf())).unwrap();

        assert_eq!(job.scoring.scale, ScoreScale::Hundred);
        assert_eq!(job.scoring.hint_penalties, vec![5.0, 10.0]);
        assert_eq!(job.submission.hints_used, 1);
        assert_eq!(job.submission.timeout_secs, 3);
        assert_eq!(job.submission.test_cases.len(), 1);
    }

    #[test]
    fn test_build_job_rejects_bad_inputs() {
        let source = write_temp("print(1)");
        let tests = write_temp(r#"[{"input": "", "expected": "1"}]"#);

        let mut bad_scale = args(source.path().to_path_buf(), tests.path().to_path_buf());
        bad_scale.scale = "fifty".to_string();
        assert!(build_job(&bad_scale).is_err());

        let mut bad_table = args(source.path().to_path_buf(), tests.path().to_path_buf());
        bad_table.penalties = Some("10,5".to_string());
        assert!(build_job(&bad_table).is_err());
    }

    #[test]
    fn test_check_reports_rejection() {
        let clean = write_temp("print(sum(range(10)))");
        assert!(check(clean.path()).is_ok());

        let dangerous = write_temp("import subprocess");
        let err = check(dangerous.path()).unwrap_err();
        assert!(err.to_string().contains("subprocess"));
    }
}
