use std::sync::Arc;
use std::time::Duration;

use crate::config::ExecutorKind;
use crate::context::Context;
use crate::executor::{Executor, ExecutorBase, RebuildPolicy};
use crate::Result;

/// Executes everything on the thread that spins it.
pub struct SingleThreadedExecutor {
    base: ExecutorBase,
}

impl SingleThreadedExecutor {
    pub fn new(context: &Arc<Context>) -> Self {
        Self {
            base: ExecutorBase::new(
                ExecutorKind::SingleThreaded,
                context,
                RebuildPolicy::OnVersionChange,
                false,
            ),
        }
    }
}

impl Executor for SingleThreadedExecutor {
    fn base(&self) -> &ExecutorBase {
        &self.base
    }

    fn spin(&self) -> Result<()> {
        let _spin = self.base.begin_spin("spin")?;
        self.base.spin_loop()
    }

    fn spin_once_impl(&self, timeout: Option<Duration>) -> Result<()> {
        self.base.spin_once_dispatch(timeout)
    }

    fn spin_some_impl(&self, max_duration: Option<Duration>, exhaustive: bool) -> Result<()> {
        self.base.spin_some_loop(max_duration, exhaustive)
    }
}
