//! Work owner: creates callback groups and the entities registered in them.
//!
//! A node keeps its default group alive; every other group and every
//! entity is owned by the caller and only referenced weakly, so dropping
//! the returned handle removes it from scheduling at the next rebuild.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::callback_group::{CallbackGroup, CallbackGroupType, StructureSignal};
use crate::context::Context;
use crate::entity::{Entity, Waitable};
use crate::error::ExecutorError;
use crate::guard_condition::GuardCondition;
use crate::service::{Client, Service};
use crate::subscription::Subscription;
use crate::sync::lock;
use crate::timer::Timer;
use crate::transport::Topic;
use crate::Result;

pub struct Node {
    id: Uuid,
    name: String,
    context: Arc<Context>,
    default_group: Arc<CallbackGroup>,
    groups: Mutex<Vec<Weak<CallbackGroup>>>,
    associated_with_executor: AtomicBool,
    structure: Arc<StructureSignal>,
}

impl Node {
    pub fn new(name: impl Into<String>, context: &Arc<Context>) -> Arc<Self> {
        let structure = StructureSignal::new();
        let default_group = CallbackGroup::new(
            CallbackGroupType::MutuallyExclusive,
            true,
            Arc::clone(&structure),
        );
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            context: Arc::clone(context),
            groups: Mutex::new(vec![Arc::downgrade(&default_group)]),
            default_group,
            associated_with_executor: AtomicBool::new(false),
            structure,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn default_callback_group(&self) -> Arc<CallbackGroup> {
        Arc::clone(&self.default_group)
    }

    /// Create a group owned by this node. If the node is already attached
    /// and `automatically_add_to_executor` is set, the executor picks the
    /// group up at its next rebuild.
    pub fn create_callback_group(
        &self,
        kind: CallbackGroupType,
        automatically_add_to_executor: bool,
    ) -> Arc<CallbackGroup> {
        let group = CallbackGroup::new(
            kind,
            automatically_add_to_executor,
            Arc::clone(&self.structure),
        );
        lock(&self.groups).push(Arc::downgrade(&group));
        debug!(node = %self.name, group = %group.id(), %kind, "callback group created");
        self.structure.bump();
        group
    }

    /// Live groups of this node, default group first.
    pub fn callback_groups(&self) -> Vec<Arc<CallbackGroup>> {
        let mut groups = lock(&self.groups);
        groups.retain(|w| w.strong_count() > 0);
        groups.iter().filter_map(Weak::upgrade).collect()
    }

    pub fn for_each_callback_group<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<CallbackGroup>),
    {
        for group in self.callback_groups() {
            f(&group);
        }
    }

    pub fn owns_group(&self, group: &CallbackGroup) -> bool {
        lock(&self.groups)
            .iter()
            .any(|w| std::ptr::eq(w.as_ptr(), group))
    }

    pub fn create_timer<F>(
        &self,
        period: Duration,
        group: Option<&Arc<CallbackGroup>>,
        callback: F,
    ) -> Result<Arc<Timer>>
    where
        F: FnMut() + Send + 'static,
    {
        let group = self.resolve_group(group)?;
        let timer = Timer::new(period, callback);
        group.add_entity(&Entity::Timer(Arc::clone(&timer)));
        Ok(timer)
    }

    /// Subscribe to `topic`. `depth` bounds the inbox (0 = unbounded).
    pub fn create_subscription<T, F>(
        &self,
        topic: &Topic<T>,
        depth: usize,
        group: Option<&Arc<CallbackGroup>>,
        callback: F,
    ) -> Result<Arc<Subscription<T>>>
    where
        T: Clone + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let group = self.resolve_group(group)?;
        let subscription = Subscription::new(topic, depth, callback);
        group.add_entity(&Entity::Subscription(subscription.clone()));
        Ok(subscription)
    }

    pub fn create_service<Req, Resp, F>(
        &self,
        name: &str,
        group: Option<&Arc<CallbackGroup>>,
        handler: F,
    ) -> Result<Arc<Service<Req, Resp>>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        F: FnMut(Req) -> Resp + Send + 'static,
    {
        let group = self.resolve_group(group)?;
        let service = Service::new(name, handler);
        group.add_entity(&Entity::Service(service.clone()));
        Ok(service)
    }

    pub fn create_client<Req, Resp>(
        &self,
        service: &Service<Req, Resp>,
        group: Option<&Arc<CallbackGroup>>,
    ) -> Result<Arc<Client<Req, Resp>>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let group = self.resolve_group(group)?;
        let client = Client::new(service);
        group.add_entity(&Entity::Client(client.clone()));
        Ok(client)
    }

    /// Register a user-defined waitable. Returns `false` if it was already
    /// registered in that group.
    pub fn add_waitable(
        &self,
        waitable: &Arc<dyn Waitable>,
        group: Option<&Arc<CallbackGroup>>,
    ) -> Result<bool> {
        let group = self.resolve_group(group)?;
        Ok(group.add_entity(&Entity::Waitable(Arc::clone(waitable))))
    }

    /// Unregister a waitable from every group of this node. Idempotent.
    pub fn remove_waitable(&self, waitable: &Arc<dyn Waitable>) -> bool {
        let id = Entity::Waitable(Arc::clone(waitable)).id();
        self.callback_groups()
            .iter()
            .fold(false, |removed, g| g.remove_entity(id) || removed)
    }

    /// Guard condition triggered on every structural change of this node.
    pub fn notify_guard_condition(&self) -> &Arc<GuardCondition> {
        self.structure.guard()
    }

    pub(crate) fn structure_signal(&self) -> &Arc<StructureSignal> {
        &self.structure
    }

    pub(crate) fn structure_generation(&self) -> u64 {
        self.structure.generation()
    }

    pub fn is_associated_with_executor(&self) -> bool {
        self.associated_with_executor.load(Ordering::SeqCst)
    }

    pub(crate) fn try_associate(&self) -> bool {
        self.associated_with_executor
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn dissociate(&self) {
        self.associated_with_executor.store(false, Ordering::SeqCst);
    }

    fn resolve_group(&self, group: Option<&Arc<CallbackGroup>>) -> Result<Arc<CallbackGroup>> {
        match group {
            None => Ok(Arc::clone(&self.default_group)),
            Some(g) if self.owns_group(g) => Ok(Arc::clone(g)),
            Some(g) => Err(ExecutorError::GroupNotOwnedByNode {
                group: g.id(),
                node: self.name.clone(),
            }),
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
