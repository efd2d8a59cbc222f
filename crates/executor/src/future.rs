//! Result types and waker plumbing for `spin_until_future_complete`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, Waker};

use futures::task::ArcWake;
use serde::{Deserialize, Serialize};

use crate::guard_condition::GuardCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FutureReturnCode {
    Success,
    Interrupted,
    Timeout,
}

impl fmt::Display for FutureReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FutureReturnCode::Success => write!(f, "SUCCESS"),
            FutureReturnCode::Interrupted => write!(f, "INTERRUPTED"),
            FutureReturnCode::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Outcome of spinning until a future completes. Carries the future's
/// output on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FutureReturn<T> {
    Success(T),
    Interrupted,
    Timeout,
}

impl<T> FutureReturn<T> {
    pub fn code(&self) -> FutureReturnCode {
        match self {
            FutureReturn::Success(_) => FutureReturnCode::Success,
            FutureReturn::Interrupted => FutureReturnCode::Interrupted,
            FutureReturn::Timeout => FutureReturnCode::Timeout,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FutureReturn::Success(_))
    }

    pub fn into_output(self) -> Option<T> {
        match self {
            FutureReturn::Success(value) => Some(value),
            _ => None,
        }
    }
}

/// Wakes a blocked spin by triggering the executor's interrupt condition.
struct InterruptWaker {
    guard: Arc<GuardCondition>,
}

impl ArcWake for InterruptWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.guard.trigger();
    }
}

pub(crate) fn interrupt_waker(guard: &Arc<GuardCondition>) -> Waker {
    futures::task::waker(Arc::new(InterruptWaker {
        guard: Arc::clone(guard),
    }))
}

pub(crate) fn poll_once<F>(future: &mut F, waker: &Waker) -> Poll<F::Output>
where
    F: Future + Unpin,
{
    let mut cx = TaskContext::from_waker(waker);
    Pin::new(future).poll(&mut cx)
}
