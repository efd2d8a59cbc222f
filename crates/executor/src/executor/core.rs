use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use crate::callback_group::CallbackGroup;
use crate::collection::EntityCollection;
use crate::config::ExecutorKind;
use crate::context::Context;
use crate::error::ExecutorError;
use crate::guard_condition::GuardCondition;
use crate::metrics::ExecutorMetrics;
use crate::node::Node;
use crate::sync::{lock, read};
use crate::wait_set::{ReadyEntry, WaitSet};
use crate::Result;

/// When the wait set is checked against the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RebuildPolicy {
    /// Compare structural generations before every wait.
    OnVersionChange,
    /// Rebuild only after an explicit structural-change notification.
    OnNotify,
}

/// Wait set and the ready list of its last wait. Held for the whole
/// wait-collect-take sequence, so takes are serialized across workers.
pub(crate) struct WaitState {
    pub(crate) wait_set: WaitSet,
    pub(crate) ready: VecDeque<ReadyEntry>,
    /// Collection version the ready list was collected against.
    pub(crate) ready_version: Option<u64>,
}

/// State and machinery shared by every executor variant.
pub struct ExecutorBase {
    pub(crate) kind: ExecutorKind,
    pub(crate) context: Arc<Context>,
    /// Set while a spin call is active.
    pub(crate) spinning: AtomicBool,
    /// Set by `cancel`, cleared when the spin it applies to ends.
    pub(crate) cancel_requested: AtomicBool,
    pub(crate) interrupt_guard: Arc<GuardCondition>,
    pub(crate) shutdown_guard: Arc<GuardCondition>,
    pub(crate) collection: Mutex<EntityCollection>,
    pub(crate) wait_state: Mutex<WaitState>,
    pub(crate) entities_need_rebuild: AtomicBool,
    pub(crate) rebuild_policy: RebuildPolicy,
    /// Wake the waiting worker whenever an exclusive group is released.
    pub(crate) release_wakes_waiters: bool,
    pub(crate) metrics: Arc<RwLock<ExecutorMetrics>>,
}

impl ExecutorBase {
    pub(crate) fn new(
        kind: ExecutorKind,
        context: &Arc<Context>,
        rebuild_policy: RebuildPolicy,
        release_wakes_waiters: bool,
    ) -> Self {
        let interrupt_guard = GuardCondition::new();
        let shutdown_guard = GuardCondition::new();
        context.register_shutdown_guard(&shutdown_guard);
        let wait_set = WaitSet::new(Arc::clone(&interrupt_guard), Arc::clone(&shutdown_guard));
        Self {
            kind,
            context: Arc::clone(context),
            spinning: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            interrupt_guard,
            shutdown_guard,
            collection: Mutex::new(EntityCollection::new()),
            wait_state: Mutex::new(WaitState {
                wait_set,
                ready: VecDeque::new(),
                ready_version: None,
            }),
            entities_need_rebuild: AtomicBool::new(true),
            rebuild_policy,
            release_wakes_waiters,
            metrics: Arc::new(RwLock::new(ExecutorMetrics::default())),
        }
    }

    pub fn kind(&self) -> ExecutorKind {
        self.kind
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn is_spinning(&self) -> bool {
        self.spinning.load(Ordering::SeqCst)
    }

    /// Stop the current spin, or the next one if none is active, and wake
    /// any blocked wait. Idempotent and callable from any thread.
    pub fn cancel(&self) {
        if !self.cancel_requested.swap(true, Ordering::SeqCst) {
            info!(executor = %self.kind, spinning = self.is_spinning(), "cancel requested");
        }
        self.interrupt_guard.trigger();
    }

    /// Whether the active spin should keep going.
    pub(crate) fn keep_spinning(&self) -> bool {
        self.context.ok() && !self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Move from idle to spinning, failing fast if already spinning.
    pub(crate) fn begin_spin(&self, operation: &'static str) -> Result<SpinGuard<'_>> {
        if self
            .spinning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ExecutorError::AlreadySpinning { operation });
        }
        debug!(executor = %self.kind, operation, "spin started");
        Ok(SpinGuard {
            base: self,
            operation,
        })
    }

    pub fn interrupt_guard_condition(&self) -> &Arc<GuardCondition> {
        &self.interrupt_guard
    }

    /// Attach `node` and wake the spinning thread to pick it up.
    pub fn add_node(&self, node: &Arc<Node>) -> Result<()> {
        self.attach_node(node)?;
        self.interrupt_guard.trigger();
        Ok(())
    }

    pub fn remove_node(&self, node: &Arc<Node>, notify: bool) -> Result<()> {
        self.detach_node(node)?;
        if notify {
            self.interrupt_guard.trigger();
        }
        Ok(())
    }

    pub fn add_callback_group(&self, group: &Arc<CallbackGroup>, node: &Arc<Node>) -> Result<()> {
        self.attach_group(group, node)?;
        self.interrupt_guard.trigger();
        Ok(())
    }

    pub fn remove_callback_group(&self, group: &Arc<CallbackGroup>) -> Result<()> {
        self.detach_group(group)?;
        self.interrupt_guard.trigger();
        Ok(())
    }

    // Collection mutations without waking anyone. Each marks the entities
    // for rebuild before the collection lock is released.

    pub(crate) fn attach_node(&self, node: &Arc<Node>) -> Result<()> {
        if !Arc::ptr_eq(node.context(), &self.context) {
            return Err(ExecutorError::InvalidArgument(format!(
                "node '{}' was created with a different context",
                node.name()
            )));
        }
        let mut collection = lock(&self.collection);
        collection.attach_owner(node)?;
        self.entities_need_rebuild.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn detach_node(&self, node: &Arc<Node>) -> Result<()> {
        let mut collection = lock(&self.collection);
        collection.detach_owner(node)?;
        self.entities_need_rebuild.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn attach_group(&self, group: &Arc<CallbackGroup>, node: &Arc<Node>) -> Result<()> {
        let mut collection = lock(&self.collection);
        collection.attach_group(group, node)?;
        self.entities_need_rebuild.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn detach_group(&self, group: &Arc<CallbackGroup>) -> Result<()> {
        let mut collection = lock(&self.collection);
        collection.detach_group(group)?;
        self.entities_need_rebuild.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Callback groups currently attached, in attach order.
    pub fn callback_groups(&self) -> Vec<Arc<CallbackGroup>> {
        lock(&self.collection).groups()
    }

    pub fn metrics(&self) -> ExecutorMetrics {
        read(&self.metrics).clone()
    }
}

impl Drop for ExecutorBase {
    fn drop(&mut self) {
        lock(&self.collection).clear();
        debug!(executor = %self.kind, "executor dropped, nodes released");
    }
}

/// Active spin. Dropping it returns the executor to idle and clears any
/// cancellation aimed at this spin.
pub(crate) struct SpinGuard<'a> {
    base: &'a ExecutorBase,
    operation: &'static str,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.base.cancel_requested.store(false, Ordering::SeqCst);
        self.base.spinning.store(false, Ordering::SeqCst);
        debug!(executor = %self.base.kind, operation = self.operation, "spin stopped");
    }
}
