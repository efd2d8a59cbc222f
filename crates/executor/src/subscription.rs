use std::fmt;
use std::sync::{Arc, Mutex};

use crate::entity::{OnReadyCallback, Payload, ReadyLatch, Waitable};
use crate::error::{CallbackError, ExecutorError};
use crate::sync::lock;
use crate::transport::{Inbox, Topic};
use crate::wait_set::WaitContext;

type MessageCallback<T> = Box<dyn FnMut(T) + Send>;

/// Receives messages published on a [`Topic`] and hands each one to its
/// callback when executed.
pub struct Subscription<T> {
    topic: String,
    inbox: Arc<Inbox<T>>,
    latch: ReadyLatch,
    callback: Mutex<MessageCallback<T>>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    pub(crate) fn new<F>(topic: &Topic<T>, depth: usize, callback: F) -> Arc<Self>
    where
        F: FnMut(T) + Send + 'static,
    {
        let inbox = Inbox::new(depth);
        topic.connect(&inbox);
        Arc::new(Self {
            topic: topic.name().to_string(),
            inbox,
            latch: ReadyLatch::new(),
            callback: Mutex::new(Box::new(callback)),
        })
    }
}

impl<T> Subscription<T> {
    pub fn topic_name(&self) -> &str {
        &self.topic
    }

    /// Messages delivered but not yet taken.
    pub fn pending(&self) -> usize {
        self.inbox.len()
    }
}

impl<T: Send + 'static> Waitable for Subscription<T> {
    fn register_in_wait_context(&self, context: &mut WaitContext) {
        context.add_guard_condition(self.inbox.guard());
    }

    fn is_ready(&self, context: &WaitContext) -> bool {
        let ready = context.is_guard_ready(self.inbox.guard());
        if ready {
            self.latch.mark();
        }
        ready
    }

    fn take_data(&self) -> Result<Option<Payload>, ExecutorError> {
        self.latch.consume(&format!("subscription '{}'", self.topic))?;
        Ok(self.inbox.pop().map(|msg| Box::new(msg) as Payload))
    }

    fn execute(&self, data: Payload) -> Result<(), CallbackError> {
        let message = data
            .downcast::<T>()
            .map_err(|_| format!("subscription '{}': unexpected payload type", self.topic))?;
        let mut callback = lock(&self.callback);
        (callback)(*message);
        Ok(())
    }

    fn set_on_ready_callback(&self, callback: OnReadyCallback) {
        self.inbox
            .guard()
            .set_on_trigger_callback(Some(Arc::new(move |count| callback(count, 0))));
    }

    fn clear_on_ready_callback(&self) {
        self.inbox.guard().set_on_trigger_callback(None);
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish()
    }
}
