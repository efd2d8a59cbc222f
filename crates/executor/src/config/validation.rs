use crate::error::ExecutorError;

use super::types::{ExecutorConfig, ExecutorKind};

impl ExecutorConfig {
    /// Validate field ranges.
    pub fn validate(&self) -> Result<(), ExecutorError> {
        self.validate_worker_threads()?;
        self.validate_deferred_poll()?;
        Ok(())
    }

    fn validate_worker_threads(&self) -> Result<(), ExecutorError> {
        if self.kind == ExecutorKind::MultiThreaded && self.worker_threads == 1 {
            return Err(ExecutorError::Config(
                "multi_threaded executor needs at least 2 worker threads (0 = automatic)".into(),
            ));
        }
        Ok(())
    }

    fn validate_deferred_poll(&self) -> Result<(), ExecutorError> {
        if self.kind == ExecutorKind::Events && self.deferred_poll_ms == 0 {
            return Err(ExecutorError::Config(
                "deferred_poll_ms must be positive for the events executor".into(),
            ));
        }
        Ok(())
    }
}
