use std::time::{Duration, Instant};

use tracing::warn;

use crate::any_executable::AnyExecutable;
use crate::callback_group::CallbackGroup;
use crate::error::ExecutorError;
use crate::guard_condition::GuardCondition;
use crate::sync::{lock, write};
use crate::Result;

use super::core::ExecutorBase;

/// Releases the group claimed for one execution, also on unwind.
struct ExecutionGuard<'a> {
    group: &'a CallbackGroup,
    wake: Option<&'a GuardCondition>,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.group.end_execution();
        if let Some(interrupt) = self.wake {
            interrupt.trigger();
        }
    }
}

impl ExecutorBase {
    /// Run one unit of work and release its group. Callback failures are
    /// returned to the spin caller.
    pub(crate) fn execute_any_executable(&self, executable: AnyExecutable) -> Result<()> {
        let AnyExecutable {
            entity,
            callback_group,
            data,
        } = executable;
        let kind = entity.kind();
        let _release = ExecutionGuard {
            group: &callback_group,
            wake: (self.release_wakes_waiters && callback_group.is_mutually_exclusive())
                .then_some(self.interrupt_guard.as_ref()),
        };

        let started = Instant::now();
        let result = entity.execute(data);
        write(&self.metrics).record_execution(kind, started.elapsed(), result.is_err());

        result.map_err(|source| {
            warn!(executor = %self.kind, entity = ?entity, error = %source, "callback failed");
            ExecutorError::Callback {
                entity: format!("{entity:?}"),
                source,
            }
        })
    }

    /// Wait up to `timeout` and execute at most one unit of work.
    pub(crate) fn spin_once_dispatch(&self, timeout: Option<Duration>) -> Result<()> {
        if let Some(executable) = self.get_next_executable(timeout)? {
            self.execute_any_executable(executable)?;
        }
        Ok(())
    }

    /// Wait and execute until cancelled or shut down.
    pub(crate) fn spin_loop(&self) -> Result<()> {
        while self.keep_spinning() {
            if let Some(executable) = self.get_next_executable(None)? {
                self.execute_any_executable(executable)?;
            }
        }
        Ok(())
    }

    /// Collect once without blocking and execute everything that was ready.
    /// With `exhaustive`, collect again while the last pass found work.
    /// `max_duration` of `None` means no limit.
    pub(crate) fn spin_some_loop(&self, max_duration: Option<Duration>, exhaustive: bool) -> Result<()> {
        let start = Instant::now();
        let within_budget = || max_duration.map_or(true, |max| start.elapsed() < max);

        self.wait_for_work(&mut lock(&self.wait_state), Some(Duration::ZERO));
        let mut just_waited = true;
        while self.keep_spinning() && within_budget() {
            let next = self.next_ready(&mut lock(&self.wait_state))?;
            match next {
                Some(executable) => {
                    self.execute_any_executable(executable)?;
                    just_waited = false;
                }
                None if exhaustive && !just_waited => {
                    self.wait_for_work(&mut lock(&self.wait_state), Some(Duration::ZERO));
                    just_waited = true;
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Execute the entries of the current ready list in order, or only the
    /// first one with `once`. Returns whether anything was executed.
    pub(crate) fn execute_ready(&self, once: bool) -> Result<bool> {
        let mut executed = false;
        while self.keep_spinning() {
            let next = self.next_ready(&mut lock(&self.wait_state))?;
            let Some(executable) = next else {
                break;
            };
            self.execute_any_executable(executable)?;
            executed = true;
            if once {
                break;
            }
        }
        Ok(executed)
    }

    /// One non-blocking collection pass followed by [`execute_ready`].
    ///
    /// [`execute_ready`]: Self::execute_ready
    pub(crate) fn collect_and_execute(&self, timeout: Option<Duration>, once: bool) -> Result<bool> {
        self.wait_for_work(&mut lock(&self.wait_state), timeout);
        self.execute_ready(once)
    }
}
