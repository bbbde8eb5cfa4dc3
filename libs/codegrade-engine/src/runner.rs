/// Isolated Runner - Resource-Bounded Child Process Execution
///
/// **Core Responsibility:**
/// Execute one candidate program against one stdin text and capture raw
/// outputs. Knows nothing about expected values or scoring.
///
/// **Layers:**
/// - OS ceilings applied in the forked child before exec (`setrlimit`):
///   address space, CPU time, zero file size, zero new processes, no core
/// - Restricted built-ins and guarded imports (see `preamble`)
/// - Cleared environment, isolated interpreter mode, no byte-code writes
/// - Hard wall-clock timeout enforced by the supervisor; the child is
///   SIGKILLed when the timed future is dropped (`kill_on_drop`)
///
/// **Cleanup:**
/// The staged program lives in a `NamedTempFile` owned by the call; it is
/// removed on return, on timeout, and when the caller drops the future.
///
/// Every failure is returned as a `RawExecutionResult`, never as an error.
use crate::config::SandboxProfile;
use crate::preamble;
use async_trait::async_trait;
use codegrade_common::types::RawExecutionResult;
use std::io::Write;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};

/// Expression evaluated in the candidate's namespace after it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub expression: String,
    /// Random per-run prefix of the line carrying the value
    pub marker: String,
}

impl Probe {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            marker: format!("@@codegrade-probe-{}@@", uuid::Uuid::new_v4().simple()),
        }
    }

    /// Extract the probed `repr` from captured stdout
    pub fn extract<'a>(&self, stdout: &'a str) -> Option<&'a str> {
        stdout
            .lines()
            .rev()
            .find_map(|line| line.strip_prefix(self.marker.as_str()))
    }
}

/// One sandboxed execution
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source: String,
    pub stdin: String,
    pub timeout_secs: u64,
    pub probe: Option<Probe>,
}

impl RunRequest {
    pub fn new(source: impl Into<String>, stdin: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            source: source.into(),
            stdin: stdin.into(),
            timeout_secs,
            probe: None,
        }
    }

    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = Some(probe);
        self
    }
}

/// Seam between judging and execution; the comparator re-runs sources
/// through it and tests substitute a recording fake
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn run(&self, request: &RunRequest) -> RawExecutionResult;
}

/// Production runner: one disposable Python child process per request
#[derive(Debug, Clone)]
pub struct IsolatedRunner {
    profile: SandboxProfile,
}

impl IsolatedRunner {
    pub fn new(profile: SandboxProfile) -> Self {
        #[cfg(not(unix))]
        warn!("OS resource limits are unavailable on this platform; relying on interpreter restrictions only");

        Self { profile }
    }

    pub fn profile(&self) -> &SandboxProfile {
        &self.profile
    }

    fn stage(&self, program: &str) -> std::io::Result<NamedTempFile> {
        let mut staged = tempfile::Builder::new()
            .prefix("codegrade-")
            .suffix(".py")
            .tempfile()?;
        staged.write_all(program.as_bytes())?;
        staged.flush()?;
        Ok(staged)
    }

    fn command(&self, staged: &NamedTempFile, timeout_secs: u64) -> Command {
        let path_env = std::env::var("PATH")
            .unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string());

        let mut cmd = Command::new(&self.profile.python_command);
        cmd.arg("-I")
            .arg("-B")
            .arg(staged.path())
            .env_clear()
            .env("PATH", path_env)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .current_dir(std::env::temp_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        apply_os_limits(&mut cmd, self.profile.memory_limit_bytes(), timeout_secs);
        #[cfg(not(unix))]
        let _ = timeout_secs;

        cmd
    }
}

#[async_trait]
impl SandboxRunner for IsolatedRunner {
    async fn run(&self, request: &RunRequest) -> RawExecutionResult {
        // GUARDRAIL: reject pathological inputs before touching the host
        if request.source.len() > self.profile.max_source_bytes {
            return RawExecutionResult::spawn_failure(format!(
                "source exceeds maximum size of {} bytes",
                self.profile.max_source_bytes
            ));
        }
        if request.stdin.len() > self.profile.max_input_bytes {
            return RawExecutionResult::spawn_failure(format!(
                "test input exceeds maximum size of {} bytes",
                self.profile.max_input_bytes
            ));
        }

        let program = preamble::compose(
            &request.source,
            request.timeout_secs,
            &self.profile,
            request.probe.as_ref(),
        );

        let staged = match self.stage(&program) {
            Ok(staged) => staged,
            Err(e) => {
                warn!(error = %e, "Failed to stage program");
                return RawExecutionResult::spawn_failure(format!("failed to stage program: {}", e));
            }
        };

        let result = self.execute(&staged, request).await;
        cleanup(staged);
        result
    }
}

impl IsolatedRunner {
    async fn execute(&self, staged: &NamedTempFile, request: &RunRequest) -> RawExecutionResult {
        let start = Instant::now();

        let mut child = match self.command(staged, request.timeout_secs).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(
                    command = %self.profile.python_command,
                    error = %e,
                    "Failed to spawn sandbox process"
                );
                return RawExecutionResult::spawn_failure(format!(
                    "failed to start {}: {}",
                    self.profile.python_command, e
                ));
            }
        };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.profile.max_output_bytes;

        let supervised = async {
            tokio::join!(
                feed_stdin(stdin, request.stdin.as_bytes()),
                read_capped(stdout, limit),
                read_capped(stderr, limit),
                child.wait(),
            )
        };

        // HARD TIMEOUT: enforced here, never cooperatively by the child
        let timeout = Duration::from_secs(request.timeout_secs);
        let outcome = tokio::time::timeout(timeout, supervised).await;

        match outcome {
            Ok((_, stdout, stderr, Ok(status))) => {
                let wall_time_ms = start.elapsed().as_millis() as u64;
                let result = finish(status, &stdout, &stderr, wall_time_ms);
                debug!(
                    exit_code = result.exit_code,
                    wall_time_ms,
                    stderr_bytes = result.stderr.len(),
                    "Sandbox process exited"
                );
                result
            }
            Ok((_, _, _, Err(e))) => {
                warn!(error = %e, "Failed to wait for sandbox process");
                RawExecutionResult::spawn_failure(format!("failed to wait for child: {}", e))
            }
            Err(_) => {
                // kill_on_drop also covers this when the caller cancels us
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Timed-out sandbox process already gone");
                }
                warn!(timeout_secs = request.timeout_secs, "Sandbox process timed out; killed");
                RawExecutionResult::timeout(request.timeout_secs)
            }
        }
    }
}

fn cleanup(staged: NamedTempFile) {
    let path = staged.path().to_path_buf();
    if let Err(e) = staged.close() {
        warn!(path = %path.display(), error = %e, "Failed to remove staged program");
    }
}

async fn feed_stdin(stdin: Option<ChildStdin>, data: &[u8]) {
    if let Some(mut stdin) = stdin {
        // The child may exit without reading; a broken pipe is expected
        let _ = stdin.write_all(data).await;
        let _ = stdin.shutdown().await;
    }
}

/// Read up to `limit` bytes, then drain the rest so the child never blocks
/// on a full pipe
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> Vec<u8> {
    let Some(mut reader) = reader else {
        return Vec::new();
    };

    let mut buffer = Vec::new();
    if (&mut reader)
        .take(limit as u64)
        .read_to_end(&mut buffer)
        .await
        .is_err()
    {
        return buffer;
    }
    let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
    buffer
}

fn finish(status: ExitStatus, stdout: &[u8], stderr: &[u8], wall_time_ms: u64) -> RawExecutionResult {
    let stdout = String::from_utf8_lossy(stdout).trim().to_string();
    let mut stderr = String::from_utf8_lossy(stderr).trim().to_string();

    let (exit_code, signal) = exit_details(status);
    if !status.success() && stderr.is_empty() {
        // A silent non-zero exit is still a runtime failure
        stderr = match signal {
            Some(sig) => format!("process killed by signal {}", sig),
            None => format!("process exited with status {}", exit_code),
        };
    }

    RawExecutionResult {
        stdout,
        stderr,
        exit_code,
        wall_time_ms,
        security_rejected: false,
        timed_out: false,
    }
}

fn exit_details(status: ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return (-sig, Some(sig));
        }
    }

    (-1, None)
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type RlimitResource = libc::__rlimit_resource_t;
#[cfg(all(unix, not(all(target_os = "linux", target_env = "gnu"))))]
type RlimitResource = libc::c_int;

/// Install the OS ceilings in the forked child. Failures are ignored:
/// a platform lacking a primitive still gets the interpreter-level layer.
#[cfg(unix)]
fn apply_os_limits(cmd: &mut Command, memory_bytes: u64, timeout_secs: u64) {
    let (cpu_soft, cpu_hard) = preamble::cpu_limits(timeout_secs);

    fn set_limit(resource: RlimitResource, soft: u64, hard: u64) {
        let limit = libc::rlimit {
            rlim_cur: soft as libc::rlim_t,
            rlim_max: hard as libc::rlim_t,
        };
        // SAFETY: setrlimit is async-signal-safe and `limit` outlives the call
        unsafe {
            libc::setrlimit(resource, &limit);
        }
    }

    // SAFETY: the closure only calls setrlimit, which is async-signal-safe
    // and does not allocate
    unsafe {
        cmd.pre_exec(move || {
            set_limit(libc::RLIMIT_AS, memory_bytes, memory_bytes);
            set_limit(libc::RLIMIT_CPU, cpu_soft, cpu_hard);
            set_limit(libc::RLIMIT_FSIZE, 0, 0);
            set_limit(libc::RLIMIT_NPROC, 0, 0);
            set_limit(libc::RLIMIT_CORE, 0, 0);
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_markers_are_unique() {
        let a = Probe::new("f()");
        let b = Probe::new("f()");
        assert_ne!(a.marker, b.marker);
    }

    #[test]
    fn test_probe_extract_takes_last_marked_line() {
        let probe = Probe {
            expression: "f()".to_string(),
            marker: "@@m@@".to_string(),
        };
        let stdout = "hello\n@@m@@1\nnoise\n@@m@@[1, 2]";
        assert_eq!(probe.extract(stdout), Some("[1, 2]"));
        assert_eq!(probe.extract("no marker here"), None);
    }

    #[tokio::test]
    async fn test_oversized_source_never_spawns() {
        let profile = SandboxProfile {
            max_source_bytes: 8,
            python_command: "/nonexistent/python".to_string(),
            ..Default::default()
        };
        let runner = IsolatedRunner::new(profile);

        let result = runner.run(&RunRequest::new("print('too long')", "", 1)).await;

        assert!(result.stderr.contains("maximum size"));
        assert_eq!(result.wall_time_ms, 0);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_oversized_input_never_spawns() {
        let profile = SandboxProfile {
            max_input_bytes: 4,
            python_command: "/nonexistent/python".to_string(),
            ..Default::default()
        };
        let runner = IsolatedRunner::new(profile);

        let result = runner.run(&RunRequest::new("print(1)", "123456", 1)).await;

        assert!(result.stderr.contains("test input exceeds"));
        assert_eq!(result.wall_time_ms, 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_data() {
        let profile = SandboxProfile {
            python_command: "/nonexistent/python-interpreter".to_string(),
            ..Default::default()
        };
        let runner = IsolatedRunner::new(profile);

        let result = runner.run(&RunRequest::new("print(1)", "", 1)).await;

        assert!(result.stderr.starts_with("failed to start"));
        assert_eq!(result.wall_time_ms, 0);
        assert!(!result.security_rejected);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_read_capped_truncates_and_drains() {
        let data = vec![b'x'; 100];
        let captured = read_capped(Some(&data[..]), 10).await;
        assert_eq!(captured.len(), 10);

        let captured = read_capped(None::<&[u8]>, 10).await;
        assert!(captured.is_empty());
    }
}
