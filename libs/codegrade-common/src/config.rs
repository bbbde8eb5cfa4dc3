use std::env;

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            default_timeout_secs: env::var("DEFAULT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            max_timeout_secs: env::var("MAX_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }

    /// Clamp a requested per-test timeout into `1..=max_timeout_secs`;
    /// zero means "use the default"
    pub fn effective_timeout_secs(&self, requested: u64) -> u64 {
        let requested = if requested == 0 {
            self.default_timeout_secs
        } else {
            requested
        };
        requested.clamp(1, self.max_timeout_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
