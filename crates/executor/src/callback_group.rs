//! Callback groups: exclusivity scopes over a set of entities.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::entity::{Entity, EntityId, WeakEntity};
use crate::guard_condition::GuardCondition;
use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackGroupType {
    /// At most one entity of the group executes at any instant.
    MutuallyExclusive,
    Reentrant,
}

impl fmt::Display for CallbackGroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackGroupType::MutuallyExclusive => write!(f, "mutually_exclusive"),
            CallbackGroupType::Reentrant => write!(f, "reentrant"),
        }
    }
}

/// Structural generation shared by a node and all of its groups. Every
/// change bumps the counter and triggers the node's notify guard condition
/// together with one listener guard per executor attachment.
#[derive(Debug)]
pub(crate) struct StructureSignal {
    generation: AtomicU64,
    guard: Arc<GuardCondition>,
    listeners: Mutex<Vec<Weak<GuardCondition>>>,
}

impl StructureSignal {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            generation: AtomicU64::new(0),
            guard: GuardCondition::new(),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// A guard condition of its own for one executor attachment. It stays
    /// registered for as long as the caller keeps it alive.
    pub(crate) fn listen(&self) -> Arc<GuardCondition> {
        let guard = GuardCondition::new();
        lock(&self.listeners).push(Arc::downgrade(&guard));
        guard
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn guard(&self) -> &Arc<GuardCondition> {
        &self.guard
    }

    pub(crate) fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.guard.trigger();
        self.wake();
    }

    /// Trigger every live listener without moving the generation.
    pub(crate) fn wake(&self) {
        let live: Vec<Arc<GuardCondition>> = {
            let mut listeners = lock(&self.listeners);
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for guard in live {
            guard.trigger();
        }
    }
}

pub struct CallbackGroup {
    id: Uuid,
    kind: CallbackGroupType,
    available: AtomicBool,
    executing: AtomicBool,
    automatically_add_to_executor: bool,
    associated_with_executor: AtomicBool,
    entities: Mutex<Vec<WeakEntity>>,
    structure: Arc<StructureSignal>,
}

impl CallbackGroup {
    pub(crate) fn new(
        kind: CallbackGroupType,
        automatically_add_to_executor: bool,
        structure: Arc<StructureSignal>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            kind,
            available: AtomicBool::new(true),
            executing: AtomicBool::new(false),
            automatically_add_to_executor,
            associated_with_executor: AtomicBool::new(false),
            entities: Mutex::new(Vec::new()),
            structure,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> CallbackGroupType {
        self.kind
    }

    pub fn is_mutually_exclusive(&self) -> bool {
        self.kind == CallbackGroupType::MutuallyExclusive
    }

    pub fn automatically_add_to_executor(&self) -> bool {
        self.automatically_add_to_executor
    }

    /// Suspend or resume the whole group. Takes effect at the next wait and
    /// the next dispatch decision. Resuming wakes the executors the group's
    /// node is attached to, so a blocked wait picks the group up again.
    pub fn set_available(&self, available: bool) {
        let was_available = self.available.swap(available, Ordering::SeqCst);
        if available && !was_available {
            self.structure.wake();
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Whether an entity of this group may be dispatched right now.
    pub fn can_be_taken_from(&self) -> bool {
        self.is_available() && (!self.is_mutually_exclusive() || !self.is_executing())
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    /// Claim the group for one execution. Always succeeds for reentrant
    /// groups; for exclusive groups only one claim is held at a time.
    pub(crate) fn try_begin_execution(&self) -> bool {
        if !self.is_mutually_exclusive() {
            return true;
        }
        self.executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_execution(&self) {
        if self.is_mutually_exclusive() {
            self.executing.store(false, Ordering::SeqCst);
        }
    }

    /// Add `entity` to the group. Adding an entity already present is a
    /// no-op and returns `false`.
    pub fn add_entity(&self, entity: &Entity) -> bool {
        let id = entity.id();
        {
            let mut entities = lock(&self.entities);
            if entities.iter().any(|e| e.id() == id && !e.is_expired()) {
                return false;
            }
            entities.push(entity.downgrade());
        }
        self.structure.bump();
        true
    }

    /// Remove the entity with `id`. Removing an absent entity returns
    /// `false` and changes nothing.
    pub fn remove_entity(&self, id: EntityId) -> bool {
        {
            let mut entities = lock(&self.entities);
            let before = entities.len();
            entities.retain(|e| e.id() != id);
            if entities.len() == before {
                return false;
            }
        }
        self.structure.bump();
        true
    }

    pub fn has_entity(&self, id: EntityId) -> bool {
        lock(&self.entities)
            .iter()
            .any(|e| e.id() == id && !e.is_expired())
    }

    pub fn entity_count(&self) -> usize {
        lock(&self.entities).iter().filter(|e| !e.is_expired()).count()
    }

    /// Live entities of the group. Expired references are pruned here.
    pub(crate) fn collect_entities(&self) -> Vec<WeakEntity> {
        let mut entities = lock(&self.entities);
        let before = entities.len();
        entities.retain(|e| !e.is_expired());
        if entities.len() != before {
            debug!(
                group = %self.id,
                pruned = before - entities.len(),
                "pruned expired entities"
            );
        }
        entities.clone()
    }

    pub(crate) fn structure(&self) -> &Arc<StructureSignal> {
        &self.structure
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
}

impl fmt::Debug for CallbackGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackGroup")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("available", &self.is_available())
            .field("executing", &self.is_executing())
            .finish()
    }
}
