use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{ExecutorConfig, ExecutorKind};
use crate::context::Context;
use crate::error::ExecutorError;
use crate::executor::{Executor, ExecutorBase, RebuildPolicy};
use crate::sync::lock;
use crate::Result;

/// Executes work on a fixed pool of worker threads.
///
/// Workers take turns waiting; a unit of a mutually exclusive group is
/// skipped while another unit of the same group runs, and picked up again
/// once the group is released. Reentrant groups run in parallel.
pub struct MultiThreadedExecutor {
    base: ExecutorBase,
    number_of_threads: usize,
    yield_before_execute: bool,
    next_exec_timeout: Option<Duration>,
}

impl MultiThreadedExecutor {
    /// `number_of_threads == 0` uses the available parallelism; the pool
    /// never has fewer than two workers.
    pub fn new(context: &Arc<Context>, number_of_threads: usize) -> Self {
        let config = ExecutorConfig {
            worker_threads: number_of_threads,
            ..ExecutorConfig::for_kind(ExecutorKind::MultiThreaded)
        };
        Self::with_config(context, &config)
    }

    pub fn with_config(context: &Arc<Context>, config: &ExecutorConfig) -> Self {
        Self {
            base: ExecutorBase::new(
                ExecutorKind::MultiThreaded,
                context,
                RebuildPolicy::OnVersionChange,
                true,
            ),
            number_of_threads: config.resolved_worker_threads(),
            yield_before_execute: config.yield_before_execute,
            next_exec_timeout: config.next_exec_timeout(),
        }
    }

    pub fn number_of_threads(&self) -> usize {
        self.number_of_threads
    }

    fn run_worker(&self, index: usize) -> Result<()> {
        let _stop_on_panic = CancelOnUnwind(&self.base);
        debug!(worker = index, "worker started");
        while self.base.keep_spinning() {
            let Some(executable) = self.base.get_next_executable(self.next_exec_timeout)? else {
                continue;
            };
            if self.yield_before_execute {
                thread::yield_now();
            }
            self.base.execute_any_executable(executable)?;
        }
        debug!(worker = index, "worker stopped");
        Ok(())
    }
}

/// Stops the remaining workers if a callback panics on this one.
struct CancelOnUnwind<'a>(&'a ExecutorBase);

impl Drop for CancelOnUnwind<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            warn!("worker panicked, stopping executor");
            self.0.cancel();
        }
    }
}

impl Executor for MultiThreadedExecutor {
    fn base(&self) -> &ExecutorBase {
        &self.base
    }

    fn spin(&self) -> Result<()> {
        let _spin = self.base.begin_spin("spin")?;
        let threads = self.number_of_threads;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("spindle-worker-{i}"))
            .build()
            .map_err(|e| ExecutorError::ThreadPool(e.to_string()))?;
        info!(executor = %self.base.kind(), threads, "spinning on worker pool");

        let first_error: Mutex<Option<ExecutorError>> = Mutex::new(None);
        pool.scope(|scope| {
            for index in 0..threads {
                let first_error = &first_error;
                scope.spawn(move |_| {
                    if let Err(err) = self.run_worker(index) {
                        lock(first_error).get_or_insert(err);
                        self.base.cancel();
                    }
                });
            }
        });

        match first_error
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn spin_once_impl(&self, timeout: Option<Duration>) -> Result<()> {
        self.base.spin_once_dispatch(timeout)
    }

    fn spin_some_impl(&self, max_duration: Option<Duration>, exhaustive: bool) -> Result<()> {
        self.base.spin_some_loop(max_duration, exhaustive)
    }
}
