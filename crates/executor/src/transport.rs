//! In-process loopback standing in for the middleware transport.
//!
//! The executor only needs two things from a transport: a readiness source
//! per entity and a way to take the pending data. [`Inbox`] provides both:
//! a bounded queue whose guard condition stays latched while it is
//! non-empty.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tracing::trace;

use crate::guard_condition::GuardCondition;
use crate::sync::lock;

pub(crate) struct Inbox<T> {
    queue: Mutex<VecDeque<T>>,
    guard: Arc<GuardCondition>,
    depth: usize,
}

impl<T> Inbox<T> {
    /// `depth == 0` means unbounded; otherwise the oldest item is dropped
    /// once `depth` items are queued.
    pub(crate) fn new(depth: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            guard: GuardCondition::new(),
            depth,
        })
    }

    pub(crate) fn guard(&self) -> &Arc<GuardCondition> {
        &self.guard
    }

    pub(crate) fn push(&self, item: T) {
        {
            let mut queue = lock(&self.queue);
            if self.depth > 0 && queue.len() >= self.depth {
                queue.pop_front();
            }
            queue.push_back(item);
        }
        self.guard.trigger();
    }

    /// Pop the oldest item. The readiness latch is cleared under the queue
    /// lock once the queue drains, so a concurrent push always re-latches.
    pub(crate) fn pop(&self) -> Option<T> {
        let mut queue = lock(&self.queue);
        let item = queue.pop_front();
        if queue.is_empty() {
            self.guard.take_trigger();
        }
        item
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.queue).len()
    }
}

/// Named loopback topic. Publishing delivers a clone of the message to
/// every live subscription.
pub struct Topic<T> {
    inner: Arc<TopicInner<T>>,
}

struct TopicInner<T> {
    name: String,
    subscribers: Mutex<Vec<Weak<Inbox<T>>>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TopicInner {
                name: name.into(),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Deliver `message` to every live subscription. Returns how many
    /// received it.
    pub fn publish(&self, message: T) -> usize {
        let inboxes: Vec<Arc<Inbox<T>>> = {
            let mut subscribers = lock(&self.inner.subscribers);
            subscribers.retain(|w| w.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for inbox in &inboxes {
            inbox.push(message.clone());
        }
        trace!(topic = %self.inner.name, delivered = inboxes.len(), "published");
        inboxes.len()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers)
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    pub(crate) fn connect(&self, inbox: &Arc<Inbox<T>>) {
        lock(&self.inner.subscribers).push(Arc::downgrade(inbox));
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic").field("name", &self.inner.name).finish()
    }
}
