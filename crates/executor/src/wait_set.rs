//! Wait set builder and the multiplex wait.
//!
//! A [`WaitSet`] is derived from an [`EntityCollection`] at one structural
//! version. The expensive part (walking owners and groups, upgrading weak
//! references) only reruns when the version moves; every wait then
//! registers the entries whose group can currently be taken from, plus the
//! executor's own guard conditions, and blocks until one of them is ready.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::callback_group::CallbackGroup;
use crate::collection::{CollectedEntity, EntityCollection};
use crate::entity::{Entity, WeakEntity};
use crate::guard_condition::{GuardCondition, GuardId, WaitSignal};
use crate::sync::lock;

/// Registration target for one wait and, once the wait returns, the record
/// of what was ready.
#[derive(Debug)]
pub struct WaitContext {
    guards: Vec<Arc<GuardCondition>>,
    deadlines: Vec<Instant>,
    ready_guards: HashSet<GuardId>,
    now: Instant,
}

impl Default for WaitContext {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitContext {
    pub fn new() -> Self {
        Self {
            guards: Vec::new(),
            deadlines: Vec::new(),
            ready_guards: HashSet::new(),
            now: Instant::now(),
        }
    }

    pub fn add_guard_condition(&mut self, guard: &Arc<GuardCondition>) {
        self.guards.push(Arc::clone(guard));
    }

    /// Register a point in time at which the wait must return.
    pub fn add_deadline(&mut self, at: Instant) {
        self.deadlines.push(at);
    }

    /// Whether `guard` was latched when readiness was captured.
    pub fn is_guard_ready(&self, guard: &GuardCondition) -> bool {
        self.ready_guards.contains(&guard.id())
    }

    /// The instant at which readiness was captured.
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty() && self.deadlines.is_empty()
    }

    pub fn guard_count(&self) -> usize {
        self.guards.len()
    }

    /// Snapshot the latched guards and the clock without blocking. Returns
    /// whether anything registered is ready.
    pub fn capture(&mut self) -> bool {
        self.now = Instant::now();
        self.ready_guards = self
            .guards
            .iter()
            .filter(|g| g.is_triggered())
            .map(|g| g.id())
            .collect();
        !self.ready_guards.is_empty() || self.deadlines.iter().any(|d| *d <= self.now)
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().min().copied()
    }

    fn clear(&mut self) {
        self.guards.clear();
        self.deadlines.clear();
        self.ready_guards.clear();
    }
}

/// Outcome of [`WaitSet::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResultKind {
    Ready,
    Timeout,
    Empty,
}

/// An entity found ready by a wait, pending dispatch.
#[derive(Debug, Clone)]
pub(crate) struct ReadyEntry {
    pub(crate) entity: WeakEntity,
    pub(crate) group: Weak<CallbackGroup>,
}

/// Executor-owned guard conditions that were latched after a wait.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExecutorWakeups {
    pub(crate) interrupted: bool,
    pub(crate) shut_down: bool,
    pub(crate) structure_notified: bool,
}

pub struct WaitSet {
    signal: Arc<WaitSignal>,
    interrupt_guard: Arc<GuardCondition>,
    shutdown_guard: Arc<GuardCondition>,
    notify_guards: Vec<Arc<GuardCondition>>,
    entries: Vec<CollectedEntity>,
    built_version: Option<u64>,
    context: WaitContext,
    registered: Vec<(Entity, Arc<CallbackGroup>)>,
}

impl WaitSet {
    /// Create an empty wait set around the executor's interrupt and
    /// shutdown conditions; both are part of every wait.
    pub fn new(interrupt_guard: Arc<GuardCondition>, shutdown_guard: Arc<GuardCondition>) -> Self {
        Self {
            signal: Arc::new(WaitSignal::default()),
            interrupt_guard,
            shutdown_guard,
            notify_guards: Vec::new(),
            entries: Vec::new(),
            built_version: None,
            context: WaitContext::new(),
            registered: Vec::new(),
        }
    }

    /// Version of the collection this wait set was last built from.
    pub fn built_version(&self) -> Option<u64> {
        self.built_version
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Reuse the current layout if `collection` has not changed version,
    /// otherwise rebuild it. Returns whether a rebuild happened.
    pub fn build_or_reuse(&mut self, collection: &EntityCollection) -> bool {
        if self.built_version == Some(collection.version()) {
            return false;
        }
        let mut entries = collection.entities();
        entries.sort_by_key(|e| e.entity.kind());
        self.entries = entries;

        let mut seen = HashSet::from([self.interrupt_guard.id(), self.shutdown_guard.id()]);
        self.notify_guards = collection
            .notify_guards()
            .into_iter()
            .filter(|gc| seen.insert(gc.id()))
            .collect();

        self.built_version = Some(collection.version());
        debug!(
            version = collection.version(),
            entities = self.entries.len(),
            notify_guards = self.notify_guards.len(),
            "wait set rebuilt"
        );
        true
    }

    /// Register everything that may take part in the next wait. Entries of
    /// groups that cannot be taken from (disabled, or exclusive and busy)
    /// contribute nothing; expired entries are skipped, not pruned.
    pub(crate) fn prepare(&mut self) {
        self.context.clear();
        self.registered.clear();

        self.context.add_guard_condition(&self.interrupt_guard);
        self.context.add_guard_condition(&self.shutdown_guard);
        for gc in &self.notify_guards {
            self.context.add_guard_condition(gc);
        }

        for entry in &self.entries {
            let Some(group) = entry.group.upgrade() else {
                continue;
            };
            if !group.can_be_taken_from() {
                continue;
            }
            let Some(entity) = entry.entity.upgrade() else {
                continue;
            };
            entity.register_in_wait_context(&mut self.context);
            self.registered.push((entity, group));
        }
    }

    /// Block until a registered source is ready or `timeout` elapses
    /// (`None` waits indefinitely).
    pub(crate) fn wait(&mut self, timeout: Option<Duration>) -> WaitResultKind {
        if self.context.is_empty() {
            return WaitResultKind::Empty;
        }
        for gc in &self.context.guards {
            gc.attach(&self.signal);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut epoch = lock(&self.signal.epoch);
        loop {
            if self.context.capture() {
                return WaitResultKind::Ready;
            }
            let now = self.context.now();
            if deadline.is_some_and(|d| now >= d) {
                return WaitResultKind::Timeout;
            }
            let wake_at = [deadline, self.context.earliest_deadline()]
                .into_iter()
                .flatten()
                .min();
            epoch = match wake_at {
                None => self
                    .signal
                    .cond
                    .wait(epoch)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(at) => {
                    self.signal
                        .cond
                        .wait_timeout(epoch, at.saturating_duration_since(now))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Consume the executor-owned conditions latched by the last wait.
    pub(crate) fn take_executor_wakeups(&self) -> ExecutorWakeups {
        let mut wakeups = ExecutorWakeups::default();
        if self.context.is_guard_ready(&self.interrupt_guard) {
            wakeups.interrupted = self.interrupt_guard.take_trigger();
        }
        if self.context.is_guard_ready(&self.shutdown_guard) {
            wakeups.shut_down = self.shutdown_guard.take_trigger();
        }
        for gc in &self.notify_guards {
            if self.context.is_guard_ready(gc) && gc.take_trigger() {
                wakeups.structure_notified = true;
            }
        }
        wakeups
    }

    /// Check every registered entity against the last wait, in kind order,
    /// and release the strong references held for the wait.
    pub(crate) fn collect_ready(&mut self) -> VecDeque<ReadyEntry> {
        let ready = self
            .registered
            .iter()
            .filter(|(entity, _)| entity.is_ready(&self.context))
            .map(|(entity, group)| ReadyEntry {
                entity: entity.downgrade(),
                group: Arc::downgrade(group),
            })
            .collect();
        self.registered.clear();
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn wait_set() -> WaitSet {
        WaitSet::new(GuardCondition::new(), GuardCondition::new())
    }

    #[test]
    fn times_out_when_nothing_is_ready() {
        let mut ws = wait_set();
        ws.prepare();
        let start = Instant::now();
        assert_eq!(ws.wait(Some(Duration::from_millis(20))), WaitResultKind::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn zero_timeout_polls_without_blocking() {
        let mut ws = wait_set();
        ws.prepare();
        let start = Instant::now();
        assert_eq!(ws.wait(Some(Duration::ZERO)), WaitResultKind::Timeout);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn interrupt_wakes_indefinite_wait() {
        let interrupt = GuardCondition::new();
        let mut ws = WaitSet::new(Arc::clone(&interrupt), GuardCondition::new());
        ws.prepare();

        let trigger = Arc::clone(&interrupt);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.trigger();
        });

        assert_eq!(ws.wait(None), WaitResultKind::Ready);
        let wakeups = ws.take_executor_wakeups();
        assert!(wakeups.interrupted);
        assert!(!wakeups.shut_down);
        assert!(!interrupt.is_triggered());
        handle.join().unwrap();
    }

    #[test]
    fn wait_does_not_consume_guard() {
        let shutdown = GuardCondition::new();
        let mut ws = WaitSet::new(GuardCondition::new(), Arc::clone(&shutdown));
        shutdown.trigger();
        ws.prepare();
        assert_eq!(ws.wait(Some(Duration::ZERO)), WaitResultKind::Ready);
        assert!(shutdown.is_triggered());
        ws.prepare();
        assert_eq!(ws.wait(Some(Duration::ZERO)), WaitResultKind::Ready);
    }

    #[test]
    fn context_deadline_ends_wait() {
        let mut ctx = WaitContext::new();
        ctx.add_deadline(Instant::now() + Duration::from_millis(10));
        assert!(!ctx.capture());
        thread::sleep(Duration::from_millis(15));
        assert!(ctx.capture());
    }
}
