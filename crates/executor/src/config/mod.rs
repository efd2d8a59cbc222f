//! Executor configuration.
//!
//! Parsed from TOML with `SPINDLE_*` environment overrides applied on top,
//! then validated.

mod loading;
mod types;
mod validation;


pub use types::{ExecutorConfig, ExecutorKind};
