use clap::Parser;

use spindle_executor::ExecutorKind;

/// Run a demo node (timer, topic, service) on a configurable executor.
///
/// Spins until Ctrl-C or until `--duration-ms` has elapsed, then prints the
/// executor metrics as JSON.
#[derive(Parser, Debug)]
#[command(name = "spindle", version, about)]
pub struct CliArgs {
    /// Path to an executor TOML config file.
    #[arg(long, env = "SPINDLE_CONFIG")]
    pub config: Option<String>,

    /// Executor variant: single, multi, static or events (overrides config).
    #[arg(long)]
    pub executor: Option<ExecutorKind>,

    /// Worker threads for the multi-threaded executor (0 = automatic).
    #[arg(long)]
    pub threads: Option<usize>,

    /// Stop after this many milliseconds (0 = run until Ctrl-C).
    #[arg(long, default_value_t = 0)]
    pub duration_ms: u64,

    /// Demo timer period in milliseconds.
    #[arg(long, default_value_t = 100)]
    pub period_ms: u64,
}
