//! Reactive executor: entities push readiness events into a queue instead
//! of being polled through a wait set.
//!
//! The entity map and the notification wiring change together. A refresh
//! publishes the new map under the state lock and only then installs the
//! on-ready callbacks of newly added entities, so an event can never refer
//! to an entity the map does not know yet.

mod queue;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::callback_group::CallbackGroup;
use crate::config::{ExecutorConfig, ExecutorKind};
use crate::context::Context;
use crate::entity::{Entity, EntityId, WeakEntity};
use crate::executor::{Executor, ExecutorBase, RebuildPolicy};
use crate::guard_condition::{GuardCondition, OnTriggerCallback};
use crate::node::Node;
use crate::sync::{lock, write};
use crate::timer::Timer;
use crate::wait_set::WaitContext;
use crate::Result;

use self::queue::{EventQueue, EventTarget, ExecutorEvent};

#[derive(Clone)]
struct EventEntity {
    entity: WeakEntity,
    group: Weak<CallbackGroup>,
}

#[derive(Default)]
struct EventsState {
    /// Collection version the map was built from.
    version: Option<u64>,
    entities: HashMap<EntityId, EventEntity>,
    timers: Vec<(Weak<Timer>, Weak<CallbackGroup>)>,
    notify_guards: Vec<Arc<GuardCondition>>,
    /// Events whose group was unavailable when they were dispatched.
    deferred: VecDeque<ExecutorEvent>,
}

pub struct EventsExecutor {
    base: ExecutorBase,
    queue: Arc<EventQueue>,
    interrupt_pending: Arc<AtomicBool>,
    notify_pending: Arc<AtomicBool>,
    state: Mutex<EventsState>,
    deferred_poll: Duration,
}

impl EventsExecutor {
    pub fn new(context: &Arc<Context>) -> Self {
        Self::with_config(context, &ExecutorConfig::for_kind(ExecutorKind::Events))
    }

    pub fn with_config(context: &Arc<Context>, config: &ExecutorConfig) -> Self {
        let executor = Self {
            base: ExecutorBase::new(
                ExecutorKind::Events,
                context,
                RebuildPolicy::OnVersionChange,
                false,
            ),
            queue: Arc::new(EventQueue::new()),
            interrupt_pending: Arc::new(AtomicBool::new(false)),
            notify_pending: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(EventsState::default()),
            deferred_poll: config.deferred_poll(),
        };
        let on_interrupt = coalescing_push(&executor.queue, &executor.interrupt_pending, EventTarget::Interrupt);
        executor
            .base
            .interrupt_guard
            .set_on_trigger_callback(Some(Arc::clone(&on_interrupt)));
        executor
            .base
            .shutdown_guard
            .set_on_trigger_callback(Some(on_interrupt));
        executor
    }

    /// Events queued and not yet dispatched.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Bring the entity map up to date with the collection, then rewire
    /// notifications for entities and nodes that came or went.
    fn refresh(&self) {
        let mut state = lock(&self.state);
        self.notify_pending.store(false, Ordering::SeqCst);
        for gc in &state.notify_guards {
            gc.take_trigger();
        }

        let (entries, guards, version) = {
            let mut collection = lock(&self.base.collection);
            let notified = self.base.entities_need_rebuild.swap(false, Ordering::SeqCst);
            if notified || collection.structure_changed() {
                collection.refresh();
            }
            if state.version == Some(collection.version()) {
                return;
            }
            (
                collection.entities(),
                collection.notify_guards(),
                collection.version(),
            )
        };

        let mut entities = HashMap::with_capacity(entries.len());
        let mut timers = Vec::new();
        let mut added = Vec::new();
        for entry in entries {
            let id = entry.entity.id();
            if let WeakEntity::Timer(timer) = &entry.entity {
                timers.push((timer.clone(), entry.group.clone()));
            }
            if !state.entities.contains_key(&id) {
                added.push(entry.entity.clone());
            }
            entities.insert(
                id,
                EventEntity {
                    entity: entry.entity,
                    group: entry.group,
                },
            );
        }
        let removed: Vec<WeakEntity> = state
            .entities
            .iter()
            .filter(|(id, _)| !entities.contains_key(id))
            .map(|(_, e)| e.entity.clone())
            .collect();

        let mut seen = HashSet::new();
        let guards: Vec<Arc<GuardCondition>> =
            guards.into_iter().filter(|gc| seen.insert(gc.id())).collect();
        let old_guards = std::mem::take(&mut state.notify_guards);

        // Publish first. Everything below may deliver events immediately.
        state.entities = entities;
        state.timers = timers;
        state.version = Some(version);

        for entity in removed.iter().filter_map(WeakEntity::upgrade) {
            entity.clear_on_ready_callback();
        }
        for entity in added.iter().filter_map(WeakEntity::upgrade) {
            let queue = Arc::clone(&self.queue);
            let id = entity.id();
            entity.set_on_ready_callback(Arc::new(move |count, _| {
                queue.push(ExecutorEvent::entity(id, count.max(1)));
            }));
        }
        for gc in &old_guards {
            if !guards.iter().any(|g| g.id() == gc.id()) {
                gc.set_on_trigger_callback(None);
            }
        }
        for gc in &guards {
            if !old_guards.iter().any(|g| g.id() == gc.id()) {
                gc.set_on_trigger_callback(Some(coalescing_push(
                    &self.queue,
                    &self.notify_pending,
                    EventTarget::Notify,
                )));
            }
        }
        state.notify_guards = guards;

        write(&self.base.metrics).record_rebuild();
        debug!(
            version,
            entities = state.entities.len(),
            timers = state.timers.len(),
            added = added.len(),
            removed = removed.len(),
            "event map refreshed"
        );
    }

    /// Put parked events back on the queue once their group is available.
    /// Events for entities that are gone are dropped.
    fn requeue_deferred(&self) {
        let ready: Vec<ExecutorEvent> = {
            let mut state = lock(&self.state);
            if state.deferred.is_empty() {
                return;
            }
            let parked = std::mem::take(&mut state.deferred);
            let mut ready = Vec::new();
            for event in parked {
                let EventTarget::Entity(id) = event.target else {
                    continue;
                };
                let group = state.entities.get(&id).and_then(|e| e.group.upgrade());
                match group {
                    Some(group) if group.is_available() => ready.push(event),
                    Some(_) => state.deferred.push_back(event),
                    None => {}
                }
            }
            ready
        };
        for event in ready {
            self.queue.push(event);
        }
    }

    fn has_deferred(&self) -> bool {
        !lock(&self.state).deferred.is_empty()
    }

    /// Live timers whose group can currently be taken from.
    fn active_timers(&self) -> Vec<(Arc<Timer>, Arc<CallbackGroup>)> {
        lock(&self.state)
            .timers
            .iter()
            .filter_map(|(t, g)| Some((t.upgrade()?, g.upgrade()?)))
            .filter(|(t, g)| g.can_be_taken_from() && !t.is_canceled())
            .collect()
    }

    fn next_timer_deadline(&self) -> Option<Instant> {
        self.active_timers()
            .iter()
            .map(|(t, _)| t.next_call())
            .min()
    }

    fn count_ready_timers(&self) -> usize {
        let now = Instant::now();
        self.active_timers()
            .iter()
            .filter(|(t, _)| t.is_due(now))
            .count()
    }

    /// Execute the most overdue timer, if any is due.
    fn execute_due_timer(&self) -> Result<bool> {
        let now = Instant::now();
        let due = self
            .active_timers()
            .into_iter()
            .filter(|(t, _)| t.is_due(now))
            .min_by_key(|(t, _)| t.next_call());
        match due {
            Some((timer, group)) => self.poll_and_execute(Entity::Timer(timer), group),
            None => Ok(false),
        }
    }

    fn dispatch_event(&self, event: ExecutorEvent) -> Result<bool> {
        match event.target {
            EventTarget::Interrupt => {
                self.interrupt_pending.store(false, Ordering::SeqCst);
                self.base.interrupt_guard.take_trigger();
                self.base.shutdown_guard.take_trigger();
                Ok(false)
            }
            EventTarget::Notify => {
                self.refresh();
                Ok(false)
            }
            EventTarget::Entity(id) => self.dispatch_entity(id, event.count),
        }
    }

    /// Execute at most one unit for an entity event; the rest of its count
    /// is queued again.
    fn dispatch_entity(&self, id: EntityId, count: usize) -> Result<bool> {
        let target = lock(&self.state).entities.get(&id).cloned();
        let Some(target) = target else {
            trace!(entity = %id, "event for unknown entity dropped");
            return Ok(false);
        };
        let (Some(entity), Some(group)) = (target.entity.upgrade(), target.group.upgrade()) else {
            return Ok(false);
        };
        if !group.can_be_taken_from() {
            trace!(entity = %id, group = %group.id(), "group unavailable, event parked");
            lock(&self.state)
                .deferred
                .push_back(ExecutorEvent::entity(id, count));
            return Ok(false);
        }
        if count > 1 {
            self.queue.push(ExecutorEvent::entity(id, count - 1));
        }
        self.poll_and_execute(entity, group)
    }

    /// Check one entity for readiness on its own and execute it if ready.
    fn poll_and_execute(&self, entity: Entity, group: Arc<CallbackGroup>) -> Result<bool> {
        let mut context = WaitContext::new();
        entity.register_in_wait_context(&mut context);
        context.capture();
        if !entity.is_ready(&context) {
            return Ok(false);
        }
        match self.base.take_executable(entity, group)? {
            Some(executable) => {
                self.base.execute_any_executable(executable)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Handle events and timers until one unit of work ran, an interrupt
    /// arrived, or `deadline` passed (`None` = no deadline).
    fn run_one(&self, deadline: Option<Instant>) -> Result<bool> {
        loop {
            if !self.base.keep_spinning() {
                return Ok(false);
            }
            self.requeue_deferred();
            if self.execute_due_timer()? {
                return Ok(true);
            }

            let now = Instant::now();
            let mut wait = deadline.map(|d| d.saturating_duration_since(now));
            if let Some(next) = self.next_timer_deadline() {
                wait = Some(shorter(wait, next.saturating_duration_since(now)));
            }
            if self.has_deferred() {
                wait = Some(shorter(wait, self.deferred_poll));
            }

            let event = self.queue.pop_timeout(wait);
            write(&self.base.metrics).record_wait(event.is_none());
            if let Some(event) = event {
                let interrupt = event.target == EventTarget::Interrupt;
                // Stale or parked entity events ran nothing; keep waiting.
                if self.dispatch_event(event)? {
                    return Ok(true);
                }
                if interrupt {
                    return Ok(false);
                }
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
        }
    }
}

fn shorter(current: Option<Duration>, candidate: Duration) -> Duration {
    current.map_or(candidate, |c| c.min(candidate))
}

/// On-trigger callback that queues one `target` event unless one is
/// already pending.
fn coalescing_push(
    queue: &Arc<EventQueue>,
    pending: &Arc<AtomicBool>,
    target: EventTarget,
) -> OnTriggerCallback {
    let queue = Arc::clone(queue);
    let pending = Arc::clone(pending);
    Arc::new(move |_count| {
        if !pending.swap(true, Ordering::SeqCst) {
            queue.push(ExecutorEvent { target, count: 1 });
        }
    })
}

impl Executor for EventsExecutor {
    fn base(&self) -> &ExecutorBase {
        &self.base
    }

    // The map is refreshed synchronously, so attach and detach never need
    // to wake the spinning thread.

    fn add_node(&self, node: &Arc<Node>) -> Result<()> {
        self.base.attach_node(node)?;
        self.refresh();
        Ok(())
    }

    fn remove_node(&self, node: &Arc<Node>, _notify: bool) -> Result<()> {
        self.base.detach_node(node)?;
        self.refresh();
        Ok(())
    }

    fn add_callback_group(&self, group: &Arc<CallbackGroup>, node: &Arc<Node>) -> Result<()> {
        self.base.attach_group(group, node)?;
        self.refresh();
        Ok(())
    }

    fn remove_callback_group(&self, group: &Arc<CallbackGroup>) -> Result<()> {
        self.base.detach_group(group)?;
        self.refresh();
        Ok(())
    }

    fn spin(&self) -> Result<()> {
        let _spin = self.base.begin_spin("spin")?;
        self.refresh();
        while self.base.keep_spinning() {
            self.run_one(None)?;
        }
        Ok(())
    }

    fn spin_once_impl(&self, timeout: Option<Duration>) -> Result<()> {
        self.refresh();
        self.run_one(timeout.map(|t| Instant::now() + t))?;
        Ok(())
    }

    /// Work ready at the start bounds a non-exhaustive call: at most the
    /// events queued and the timers due when it began.
    fn spin_some_impl(&self, max_duration: Option<Duration>, exhaustive: bool) -> Result<()> {
        let start = Instant::now();
        let within_budget = || max_duration.map_or(true, |max| start.elapsed() < max);

        self.refresh();
        self.requeue_deferred();
        let mut events_at_start = self.queue.len();
        let timers_at_start = self.count_ready_timers();
        let mut events_handled = 0;
        let mut timers_executed = 0;

        while self.base.keep_spinning() && within_budget() {
            if exhaustive || events_handled < events_at_start {
                if let Some(event) = self.queue.try_pop() {
                    // The remainder of a multi-count event is requeued and
                    // still belongs to the work ready at start.
                    if matches!(event.target, EventTarget::Entity(_)) && event.count > 1 {
                        events_at_start += 1;
                    }
                    self.dispatch_event(event)?;
                    events_handled += 1;
                    continue;
                }
            }
            if (exhaustive || timers_executed < timers_at_start) && self.execute_due_timer()? {
                timers_executed += 1;
                continue;
            }
            break;
        }
        Ok(())
    }
}

impl Drop for EventsExecutor {
    fn drop(&mut self) {
        let state = lock(&self.state);
        for target in state.entities.values() {
            if let Some(entity) = target.entity.upgrade() {
                entity.clear_on_ready_callback();
            }
        }
        for gc in &state.notify_guards {
            gc.set_on_trigger_callback(None);
        }
        self.base.interrupt_guard.set_on_trigger_callback(None);
        self.base.shutdown_guard.set_on_trigger_callback(None);
    }
}
