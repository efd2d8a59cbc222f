//! Request/response entities over the loopback transport.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::channel::oneshot;
use tracing::{debug, warn};

use crate::entity::{OnReadyCallback, Payload, ReadyLatch, Waitable};
use crate::error::{CallbackError, ExecutorError};
use crate::sync::lock;
use crate::transport::Inbox;
use crate::wait_set::WaitContext;

/// Resolves with the response to one request, or `Canceled` if the client
/// was dropped or the request pruned before the response arrived.
pub type ResponseFuture<Resp> = oneshot::Receiver<Resp>;

type Handler<Req, Resp> = Box<dyn FnMut(Req) -> Resp + Send>;

struct RequestEnvelope<Req, Resp> {
    sequence: i64,
    request: Req,
    reply_to: Weak<Inbox<(i64, Resp)>>,
}

/// Serves requests sent by [`Client`]s. Each request is answered by the
/// handler when the service is executed.
pub struct Service<Req, Resp> {
    name: String,
    requests: Arc<Inbox<RequestEnvelope<Req, Resp>>>,
    latch: ReadyLatch,
    handler: Mutex<Handler<Req, Resp>>,
}

impl<Req: Send + 'static, Resp: Send + 'static> Service<Req, Resp> {
    pub(crate) fn new<F>(name: impl Into<String>, handler: F) -> Arc<Self>
    where
        F: FnMut(Req) -> Resp + Send + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            requests: Inbox::new(0),
            latch: ReadyLatch::new(),
            handler: Mutex::new(Box::new(handler)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<Req: Send + 'static, Resp: Send + 'static> Waitable for Service<Req, Resp> {
    fn register_in_wait_context(&self, context: &mut WaitContext) {
        context.add_guard_condition(self.requests.guard());
    }

    fn is_ready(&self, context: &WaitContext) -> bool {
        let ready = context.is_guard_ready(self.requests.guard());
        if ready {
            self.latch.mark();
        }
        ready
    }

    fn take_data(&self) -> Result<Option<Payload>, ExecutorError> {
        self.latch.consume(&format!("service '{}'", self.name))?;
        Ok(self.requests.pop().map(|req| Box::new(req) as Payload))
    }

    fn execute(&self, data: Payload) -> Result<(), CallbackError> {
        let envelope = data
            .downcast::<RequestEnvelope<Req, Resp>>()
            .map_err(|_| format!("service '{}': unexpected payload type", self.name))?;
        let RequestEnvelope {
            sequence,
            request,
            reply_to,
        } = *envelope;
        let response = {
            let mut handler = lock(&self.handler);
            (handler)(request)
        };
        match reply_to.upgrade() {
            Some(inbox) => inbox.push((sequence, response)),
            None => debug!(service = %self.name, sequence, "client gone, response dropped"),
        }
        Ok(())
    }

    fn set_on_ready_callback(&self, callback: OnReadyCallback) {
        self.requests
            .guard()
            .set_on_trigger_callback(Some(Arc::new(move |count| callback(count, 0))));
    }

    fn clear_on_ready_callback(&self) {
        self.requests.guard().set_on_trigger_callback(None);
    }
}

impl<Req, Resp> fmt::Debug for Service<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service").field("name", &self.name).finish()
    }
}

/// Sends requests to one [`Service`] and resolves the returned futures when
/// responses are executed.
pub struct Client<Req, Resp> {
    service_name: String,
    service: Weak<Inbox<RequestEnvelope<Req, Resp>>>,
    responses: Arc<Inbox<(i64, Resp)>>,
    latch: ReadyLatch,
    next_sequence: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<Resp>>>,
}

impl<Req: Send + 'static, Resp: Send + 'static> Client<Req, Resp> {
    pub(crate) fn new(service: &Service<Req, Resp>) -> Arc<Self> {
        Arc::new(Self {
            service_name: service.name.clone(),
            service: Arc::downgrade(&service.requests),
            responses: Inbox::new(0),
            latch: ReadyLatch::new(),
            next_sequence: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Whether the target service still exists.
    pub fn service_is_ready(&self) -> bool {
        self.service.strong_count() > 0
    }

    /// Queue `request` for the service. The returned future resolves once
    /// the response has been executed by the executor spinning this client.
    pub fn async_send_request(&self, request: Req) -> Result<ResponseFuture<Resp>, ExecutorError> {
        let inbox = self
            .service
            .upgrade()
            .ok_or_else(|| ExecutorError::ServiceUnavailable {
                service: self.service_name.clone(),
            })?;
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(sequence, tx);
        inbox.push(RequestEnvelope {
            sequence,
            request,
            reply_to: Arc::downgrade(&self.responses),
        });
        Ok(rx)
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Drop every pending request; their futures resolve as canceled.
    pub fn prune_pending_requests(&self) -> usize {
        let mut pending = lock(&self.pending);
        let count = pending.len();
        pending.clear();
        count
    }
}

impl<Req: Send + 'static, Resp: Send + 'static> Waitable for Client<Req, Resp> {
    fn register_in_wait_context(&self, context: &mut WaitContext) {
        context.add_guard_condition(self.responses.guard());
    }

    fn is_ready(&self, context: &WaitContext) -> bool {
        let ready = context.is_guard_ready(self.responses.guard());
        if ready {
            self.latch.mark();
        }
        ready
    }

    fn take_data(&self) -> Result<Option<Payload>, ExecutorError> {
        self.latch
            .consume(&format!("client of '{}'", self.service_name))?;
        Ok(self.responses.pop().map(|resp| Box::new(resp) as Payload))
    }

    fn execute(&self, data: Payload) -> Result<(), CallbackError> {
        let (sequence, response) = *data
            .downcast::<(i64, Resp)>()
            .map_err(|_| format!("client of '{}': unexpected payload type", self.service_name))?;
        let sender = lock(&self.pending).remove(&sequence);
        match sender {
            Some(tx) => {
                if tx.send(response).is_err() {
                    debug!(service = %self.service_name, sequence, "response future dropped");
                }
            }
            None => warn!(
                service = %self.service_name,
                sequence,
                "response for unknown request"
            ),
        }
        Ok(())
    }

    fn set_on_ready_callback(&self, callback: OnReadyCallback) {
        self.responses
            .guard()
            .set_on_trigger_callback(Some(Arc::new(move |count| callback(count, 0))));
    }

    fn clear_on_ready_callback(&self) {
        self.responses.guard().set_on_trigger_callback(None);
    }
}

impl<Req, Resp> fmt::Debug for Client<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("service", &self.service_name)
            .finish()
    }
}
