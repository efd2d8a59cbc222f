use std::path::Path;

use crate::error::ExecutorError;

use super::types::ExecutorConfig;

impl ExecutorConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ExecutorError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ExecutorError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `SPINDLE_EXECUTOR` -> `kind`
    /// - `SPINDLE_WORKER_THREADS` -> `worker_threads`
    /// - `SPINDLE_YIELD_BEFORE_EXECUTE` -> `yield_before_execute`
    /// - `SPINDLE_NEXT_EXEC_TIMEOUT_MS` -> `next_exec_timeout_ms`
    /// - `SPINDLE_DEFERRED_POLL_MS` -> `deferred_poll_ms`
    pub fn apply_env_overrides(&mut self) -> Result<(), ExecutorError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ExecutorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SPINDLE_EXECUTOR") {
            self.kind = v.parse()?;
        }
        if let Some(v) = lookup("SPINDLE_WORKER_THREADS") {
            self.worker_threads = parse_var("SPINDLE_WORKER_THREADS", &v)?;
        }
        if let Some(v) = lookup("SPINDLE_YIELD_BEFORE_EXECUTE") {
            self.yield_before_execute = parse_var("SPINDLE_YIELD_BEFORE_EXECUTE", &v)?;
        }
        if let Some(v) = lookup("SPINDLE_NEXT_EXEC_TIMEOUT_MS") {
            self.next_exec_timeout_ms = parse_var("SPINDLE_NEXT_EXEC_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("SPINDLE_DEFERRED_POLL_MS") {
            self.deferred_poll_ms = parse_var("SPINDLE_DEFERRED_POLL_MS", &v)?;
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ExecutorError> {
    value
        .trim()
        .parse()
        .map_err(|_| ExecutorError::Config(format!("invalid value '{value}' for {key}")))
}
