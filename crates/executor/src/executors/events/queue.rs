use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::entity::EntityId;
use crate::sync::lock;

/// What an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventTarget {
    /// Readiness of one entity.
    Entity(EntityId),
    /// Interrupt or shutdown: re-check the spin state.
    Interrupt,
    /// Structural change of an attached node: refresh the entity map.
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExecutorEvent {
    pub(crate) target: EventTarget,
    /// Number of readiness signals this event stands for.
    pub(crate) count: usize,
}

impl ExecutorEvent {
    pub(crate) fn entity(id: EntityId, count: usize) -> Self {
        Self {
            target: EventTarget::Entity(id),
            count,
        }
    }
}

/// FIFO of readiness events, filled from on-ready callbacks on arbitrary
/// threads and drained by the spinning thread.
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    events: Mutex<VecDeque<ExecutorEvent>>,
    available: Condvar,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, event: ExecutorEvent) {
        lock(&self.events).push_back(event);
        self.available.notify_one();
    }

    pub(crate) fn try_pop(&self) -> Option<ExecutorEvent> {
        lock(&self.events).pop_front()
    }

    /// Pop the oldest event, waiting up to `timeout` (`None` = indefinitely)
    /// for one to arrive.
    pub(crate) fn pop_timeout(&self, timeout: Option<Duration>) -> Option<ExecutorEvent> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut events = lock(&self.events);
        loop {
            if let Some(event) = events.pop_front() {
                return Some(event);
            }
            match deadline {
                None => {
                    events = self
                        .available
                        .wait(events)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    events = self
                        .available
                        .wait_timeout(events, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.events).len()
    }
}
