//! Executor core: spin state, cancellation, wait-and-dispatch.
//!
//! Split into focused submodules:
//! - `core`: shared executor state, spin state machine, attach/detach
//! - `scheduling`: wait set refresh, the blocking wait, ready-list extraction
//! - `execution`: running one unit of work and the spin loops built on it

mod core;
mod execution;
mod scheduling;

use std::future::Future;
use std::sync::Arc;
use std::task::Poll;
use std::time::{Duration, Instant};

use crate::callback_group::CallbackGroup;
use crate::config::ExecutorKind;
use crate::future::{interrupt_waker, poll_once, FutureReturn};
use crate::metrics::ExecutorMetrics;
use crate::node::Node;
use crate::Result;

pub use self::core::ExecutorBase;
pub(crate) use self::core::RebuildPolicy;

/// Common surface of every executor variant.
///
/// Variants provide the spin loops; attach/detach, cancellation and the
/// bounded spin entry points are shared.
pub trait Executor: Send + Sync {
    fn base(&self) -> &ExecutorBase;

    /// Block, waiting for and executing work, until cancelled or the context
    /// is shut down.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::AlreadySpinning`](crate::ExecutorError::AlreadySpinning)
    /// if a spin is active; otherwise the first callback or contract error.
    fn spin(&self) -> Result<()>;

    /// Body of [`spin_once`](Executor::spin_once); the caller holds the spin.
    fn spin_once_impl(&self, timeout: Option<Duration>) -> Result<()>;

    /// Body of [`spin_some`](Executor::spin_some) and
    /// [`spin_all`](Executor::spin_all); the caller holds the spin.
    fn spin_some_impl(&self, max_duration: Option<Duration>, exhaustive: bool) -> Result<()>;

    fn kind(&self) -> ExecutorKind {
        self.base().kind()
    }

    /// Attach `node` and its automatically added groups.
    fn add_node(&self, node: &Arc<Node>) -> Result<()> {
        self.base().add_node(node)
    }

    /// Detach `node`. With `notify`, a blocked wait is woken to pick up the
    /// change immediately.
    fn remove_node(&self, node: &Arc<Node>, notify: bool) -> Result<()> {
        self.base().remove_node(node, notify)
    }

    fn add_callback_group(&self, group: &Arc<CallbackGroup>, node: &Arc<Node>) -> Result<()> {
        self.base().add_callback_group(group, node)
    }

    fn remove_callback_group(&self, group: &Arc<CallbackGroup>) -> Result<()> {
        self.base().remove_callback_group(group)
    }

    fn is_spinning(&self) -> bool {
        self.base().is_spinning()
    }

    /// Stop the active spin, or pre-arm the next one.
    fn cancel(&self) {
        self.base().cancel();
    }

    /// Wait up to `timeout` (`None` = indefinitely) and execute at most one
    /// unit of work.
    fn spin_once(&self, timeout: Option<Duration>) -> Result<()> {
        let _spin = self.base().begin_spin("spin_once")?;
        self.spin_once_impl(timeout)
    }

    /// Execute the work ready now, without waiting for more. A zero
    /// `max_duration` means no limit.
    fn spin_some(&self, max_duration: Duration) -> Result<()> {
        let _spin = self.base().begin_spin("spin_some")?;
        self.spin_some_impl(duration_limit(max_duration), false)
    }

    /// Like [`spin_some`](Executor::spin_some), but keeps collecting while
    /// work keeps arriving. A zero `max_duration` means no limit.
    fn spin_all(&self, max_duration: Duration) -> Result<()> {
        let _spin = self.base().begin_spin("spin_all")?;
        self.spin_some_impl(duration_limit(max_duration), true)
    }

    /// Spin until `future` resolves, `timeout` elapses (`None` = never) or
    /// the spin is interrupted.
    fn spin_until_future_complete<F>(
        &self,
        future: &mut F,
        timeout: Option<Duration>,
    ) -> Result<FutureReturn<F::Output>>
    where
        Self: Sized,
        F: Future + Unpin,
    {
        spin_executor_until_future_complete(self, future, timeout)
    }

    fn metrics(&self) -> ExecutorMetrics {
        self.base().metrics()
    }
}

impl dyn Executor {
    /// See [`Executor::spin_until_future_complete`].
    pub fn spin_until_future_complete<F>(
        &self,
        future: &mut F,
        timeout: Option<Duration>,
    ) -> Result<FutureReturn<F::Output>>
    where
        F: Future + Unpin,
    {
        spin_executor_until_future_complete(self, future, timeout)
    }
}

fn duration_limit(max_duration: Duration) -> Option<Duration> {
    (!max_duration.is_zero()).then_some(max_duration)
}

/// Spin `executor` until `future` resolves. An already resolved future
/// returns before any wait and without taking the spin.
pub fn spin_executor_until_future_complete<E, F>(
    executor: &E,
    future: &mut F,
    timeout: Option<Duration>,
) -> Result<FutureReturn<F::Output>>
where
    E: Executor + ?Sized,
    F: Future + Unpin,
{
    let base = executor.base();
    let waker = interrupt_waker(&base.interrupt_guard);
    if let Poll::Ready(output) = poll_once(future, &waker) {
        return Ok(FutureReturn::Success(output));
    }

    let _spin = base.begin_spin("spin_until_future_complete")?;
    let end = timeout.map(|t| Instant::now() + t);
    while base.keep_spinning() {
        let remaining = match end {
            None => None,
            Some(end) => {
                let now = Instant::now();
                if now >= end {
                    return Ok(FutureReturn::Timeout);
                }
                Some(end - now)
            }
        };
        executor.spin_once_impl(remaining)?;
        if let Poll::Ready(output) = poll_once(future, &waker) {
            return Ok(FutureReturn::Success(output));
        }
    }
    Ok(FutureReturn::Interrupted)
}

/// Attach `node`, spin until `future` resolves, then detach it again.
pub fn spin_node_until_future_complete<E, F>(
    executor: &E,
    node: &Arc<Node>,
    future: &mut F,
    timeout: Option<Duration>,
) -> Result<FutureReturn<F::Output>>
where
    E: Executor + ?Sized,
    F: Future + Unpin,
{
    executor.add_node(node)?;
    let result = spin_executor_until_future_complete(executor, future, timeout);
    let detached = executor.remove_node(node, true);
    let output = result?;
    detached?;
    Ok(output)
}

/// [`spin_node_until_future_complete`] on a temporary single-threaded
/// executor.
pub fn spin_until_future_complete<F>(
    node: &Arc<Node>,
    future: &mut F,
    timeout: Option<Duration>,
) -> Result<FutureReturn<F::Output>>
where
    F: Future + Unpin,
{
    let executor = crate::executors::SingleThreadedExecutor::new(node.context());
    spin_node_until_future_complete(&executor, node, future, timeout)
}

/// Attach `node`, execute the work ready now, detach it.
pub fn spin_node_some<E>(executor: &E, node: &Arc<Node>) -> Result<()>
where
    E: Executor + ?Sized,
{
    executor.add_node(node)?;
    let result = executor.spin_some(Duration::ZERO);
    let detached = executor.remove_node(node, true);
    result?;
    detached
}

/// Attach `node`, execute at most one unit of work, detach it.
pub fn spin_node_once<E>(executor: &E, node: &Arc<Node>, timeout: Option<Duration>) -> Result<()>
where
    E: Executor + ?Sized,
{
    executor.add_node(node)?;
    let result = executor.spin_once(timeout);
    let detached = executor.remove_node(node, true);
    result?;
    detached
}
