// Sandbox profile for the isolated runner
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Resource ceilings and surface limits applied to every sandboxed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxProfile {
    /// Interpreter used for the child process
    pub python_command: String,
    /// Address-space ceiling (RLIMIT_AS)
    pub memory_limit_mb: u64,
    pub max_source_bytes: usize,
    pub max_input_bytes: usize,
    /// Per-stream capture cap; excess output is drained and dropped
    pub max_output_bytes: usize,
    /// Permits shared by all runs of one grader
    pub max_concurrent_sandboxes: usize,
    /// Modules the restricted `__import__` admits. Only modules whose
    /// attributes do not re-export `os`/`sys` belong here.
    pub allowed_modules: Vec<String>,
}

impl Default for SandboxProfile {
    fn default() -> Self {
        Self {
            python_command: "python3".to_string(),
            memory_limit_mb: 64,
            max_source_bytes: 1024 * 1024,
            max_input_bytes: 10 * 1024 * 1024,
            max_output_bytes: 1024 * 1024,
            max_concurrent_sandboxes: 4,
            allowed_modules: ["math", "cmath", "itertools", "heapq", "bisect", "operator"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl SandboxProfile {
    /// Load a profile from a JSON file; missing fields take defaults
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Sandbox config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let mut profile: SandboxProfile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        profile.apply_env_overrides();
        profile.validate()?;
        Ok(profile)
    }

    /// Load with default path (config/sandbox.json), falling back to
    /// built-in defaults when the file is absent
    pub fn load_default() -> Result<Self> {
        let default_path = Path::new("config/sandbox.json");
        if default_path.exists() {
            return Self::load(default_path);
        }

        let mut profile = Self::default();
        profile.apply_env_overrides();
        profile.validate()?;
        Ok(profile)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(command) = std::env::var("CODEGRADE_PYTHON") {
            if !command.trim().is_empty() {
                self.python_command = command;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.python_command.trim().is_empty() {
            bail!("python_command cannot be empty");
        }
        if self.memory_limit_mb == 0 {
            bail!("memory_limit_mb must be greater than zero");
        }
        if self.max_concurrent_sandboxes == 0 {
            bail!("max_concurrent_sandboxes must be greater than zero");
        }
        if let Some(bad) = self
            .allowed_modules
            .iter()
            .find(|m| m.is_empty() || !m.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            bail!("Invalid module name in allowed_modules: {:?}", bad);
        }
        Ok(())
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb * 1024 * 1024
    }
}
