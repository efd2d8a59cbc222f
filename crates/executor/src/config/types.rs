use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;

/// Which executor variant to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    SingleThreaded,
    MultiThreaded,
    StaticSingleThreaded,
    Events,
}

impl ExecutorKind {
    pub const ALL: [ExecutorKind; 4] = [
        ExecutorKind::SingleThreaded,
        ExecutorKind::MultiThreaded,
        ExecutorKind::StaticSingleThreaded,
        ExecutorKind::Events,
    ];
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutorKind::SingleThreaded => write!(f, "single_threaded"),
            ExecutorKind::MultiThreaded => write!(f, "multi_threaded"),
            ExecutorKind::StaticSingleThreaded => write!(f, "static_single_threaded"),
            ExecutorKind::Events => write!(f, "events"),
        }
    }
}

impl FromStr for ExecutorKind {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "single_threaded" | "single" => Ok(ExecutorKind::SingleThreaded),
            "multi_threaded" | "multi" => Ok(ExecutorKind::MultiThreaded),
            "static_single_threaded" | "static" => Ok(ExecutorKind::StaticSingleThreaded),
            "events" => Ok(ExecutorKind::Events),
            other => Err(ExecutorError::Config(format!(
                "unknown executor kind '{other}'"
            ))),
        }
    }
}

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Executor variant.
    #[serde(default = "default_kind")]
    pub kind: ExecutorKind,

    /// Worker threads for the multi-threaded variant (0 = available parallelism).
    #[serde(default)]
    pub worker_threads: usize,

    /// Multi-threaded: yield the worker before executing a taken unit.
    #[serde(default)]
    pub yield_before_execute: bool,

    /// Multi-threaded: per-worker wait bound in milliseconds (negative = indefinite).
    #[serde(default = "default_next_exec_timeout_ms")]
    pub next_exec_timeout_ms: i64,

    /// Events: re-check interval for events parked on a disabled group.
    #[serde(default = "default_deferred_poll_ms")]
    pub deferred_poll_ms: u64,
}

fn default_kind() -> ExecutorKind {
    ExecutorKind::SingleThreaded
}

fn default_next_exec_timeout_ms() -> i64 {
    -1
}

fn default_deferred_poll_ms() -> u64 {
    10
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            worker_threads: 0,
            yield_before_execute: false,
            next_exec_timeout_ms: default_next_exec_timeout_ms(),
            deferred_poll_ms: default_deferred_poll_ms(),
        }
    }
}

impl ExecutorConfig {
    /// Default settings for `kind`.
    pub fn for_kind(kind: ExecutorKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// `None` when the per-worker wait is indefinite.
    pub fn next_exec_timeout(&self) -> Option<Duration> {
        u64::try_from(self.next_exec_timeout_ms)
            .ok()
            .map(Duration::from_millis)
    }

    pub fn deferred_poll(&self) -> Duration {
        Duration::from_millis(self.deferred_poll_ms)
    }

    /// Worker count for the multi-threaded variant: the configured value, or
    /// the available parallelism, never fewer than two.
    pub fn resolved_worker_threads(&self) -> usize {
        let n = if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
        } else {
            self.worker_threads
        };
        n.max(2)
    }
}
