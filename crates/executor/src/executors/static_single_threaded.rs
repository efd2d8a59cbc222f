use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ExecutorKind;
use crate::context::Context;
use crate::executor::{Executor, ExecutorBase, RebuildPolicy};
use crate::Result;

/// Single-threaded executor that keeps its wait set across iterations and
/// rebuilds it only when notified of a structural change.
///
/// Each pass executes everything the wait found ready, in kind order:
/// timers, subscriptions, services, clients, waitables.
pub struct StaticSingleThreadedExecutor {
    base: ExecutorBase,
}

impl StaticSingleThreadedExecutor {
    pub fn new(context: &Arc<Context>) -> Self {
        Self {
            base: ExecutorBase::new(
                ExecutorKind::StaticSingleThreaded,
                context,
                RebuildPolicy::OnNotify,
                false,
            ),
        }
    }
}

impl Executor for StaticSingleThreadedExecutor {
    fn base(&self) -> &ExecutorBase {
        &self.base
    }

    fn spin(&self) -> Result<()> {
        let _spin = self.base.begin_spin("spin")?;
        while self.base.keep_spinning() {
            self.base.collect_and_execute(None, false)?;
        }
        Ok(())
    }

    fn spin_once_impl(&self, timeout: Option<Duration>) -> Result<()> {
        self.base.collect_and_execute(timeout, true)?;
        Ok(())
    }

    fn spin_some_impl(&self, max_duration: Option<Duration>, exhaustive: bool) -> Result<()> {
        let start = Instant::now();
        let within_budget = || max_duration.map_or(true, |max| start.elapsed() < max);
        while self.base.keep_spinning() && within_budget() {
            let work_available = self.base.collect_and_execute(Some(Duration::ZERO), false)?;
            if !work_available || !exhaustive {
                break;
            }
        }
        Ok(())
    }
}
