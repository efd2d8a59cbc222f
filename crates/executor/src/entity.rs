//! Schedulable units of work.
//!
//! Every entity kind exposes the same capability set through [`Waitable`]:
//! register its readiness sources, report readiness against a completed
//! wait, take the pending payload, execute it. [`Entity`] is the closed set
//! of kinds the executor dispatches over.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::error::{CallbackError, ExecutorError};
use crate::timer::Timer;
use crate::wait_set::WaitContext;

/// Opaque data taken from an entity and handed back to its `execute`.
pub type Payload = Box<dyn Any + Send>;

/// Readiness push notification: `(event_count, internal_id)`.
pub type OnReadyCallback = Arc<dyn Fn(usize, i32) + Send + Sync>;

/// Capability set every schedulable entity implements.
///
/// The executor always calls `is_ready` and then, on the same wait pass,
/// `take_data`. Implementations own their readiness sources and must
/// consume them in `take_data` (for guard conditions, via
/// [`GuardCondition::take_trigger`](crate::GuardCondition::take_trigger)).
pub trait Waitable: Send + Sync {
    /// Add the readiness sources of this entity to `context`.
    fn register_in_wait_context(&self, context: &mut WaitContext);

    /// Whether a completed wait found this entity ready.
    fn is_ready(&self, context: &WaitContext) -> bool;

    /// Take the pending payload. `Ok(None)` means the readiness was consumed
    /// elsewhere and there is nothing to execute.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::TakeWithoutReady`] when called without a preceding
    /// successful `is_ready`.
    fn take_data(&self) -> Result<Option<Payload>, ExecutorError>;

    /// Run the entity's callback with a payload from `take_data`.
    fn execute(&self, data: Payload) -> Result<(), CallbackError>;

    /// Push readiness into `callback` instead of being polled.
    fn set_on_ready_callback(&self, callback: OnReadyCallback);

    fn clear_on_ready_callback(&self);
}

/// One-shot flag pairing `is_ready` with the following `take_data`.
#[derive(Debug, Default)]
pub struct ReadyLatch(AtomicBool);

impl ReadyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Consume the mark, failing with [`ExecutorError::TakeWithoutReady`]
    /// if `is_ready` never set it.
    pub fn consume(&self, entity: &str) -> Result<(), ExecutorError> {
        if self.0.swap(false, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExecutorError::TakeWithoutReady {
                entity: entity.to_string(),
            })
        }
    }
}

/// Entity kind. The ordering is the extraction order of a wait pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Timer,
    Subscription,
    Service,
    Client,
    Waitable,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Timer => write!(f, "timer"),
            EntityKind::Subscription => write!(f, "subscription"),
            EntityKind::Service => write!(f, "service"),
            EntityKind::Client => write!(f, "client"),
            EntityKind::Waitable => write!(f, "waitable"),
        }
    }
}

/// Identity of an entity: the address of its shared allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(usize);

impl EntityId {
    fn of<T: ?Sized>(ptr: *const T) -> Self {
        EntityId(ptr as *const () as usize)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A strong reference to one entity, tagged with its kind.
#[derive(Clone)]
pub enum Entity {
    Timer(Arc<Timer>),
    Subscription(Arc<dyn Waitable>),
    Service(Arc<dyn Waitable>),
    Client(Arc<dyn Waitable>),
    Waitable(Arc<dyn Waitable>),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Timer(_) => EntityKind::Timer,
            Entity::Subscription(_) => EntityKind::Subscription,
            Entity::Service(_) => EntityKind::Service,
            Entity::Client(_) => EntityKind::Client,
            Entity::Waitable(_) => EntityKind::Waitable,
        }
    }

    pub fn id(&self) -> EntityId {
        match self {
            Entity::Timer(t) => EntityId::of(Arc::as_ptr(t)),
            Entity::Subscription(w)
            | Entity::Service(w)
            | Entity::Client(w)
            | Entity::Waitable(w) => EntityId::of(Arc::as_ptr(w)),
        }
    }

    pub fn downgrade(&self) -> WeakEntity {
        match self {
            Entity::Timer(t) => WeakEntity::Timer(Arc::downgrade(t)),
            Entity::Subscription(w) => WeakEntity::Subscription(Arc::downgrade(w)),
            Entity::Service(w) => WeakEntity::Service(Arc::downgrade(w)),
            Entity::Client(w) => WeakEntity::Client(Arc::downgrade(w)),
            Entity::Waitable(w) => WeakEntity::Waitable(Arc::downgrade(w)),
        }
    }

    pub fn as_waitable(&self) -> &dyn Waitable {
        match self {
            Entity::Timer(t) => t.as_ref(),
            Entity::Subscription(w)
            | Entity::Service(w)
            | Entity::Client(w)
            | Entity::Waitable(w) => w.as_ref(),
        }
    }

    pub fn register_in_wait_context(&self, context: &mut WaitContext) {
        self.as_waitable().register_in_wait_context(context);
    }

    pub fn is_ready(&self, context: &WaitContext) -> bool {
        self.as_waitable().is_ready(context)
    }

    pub fn take_data(&self) -> Result<Option<Payload>, ExecutorError> {
        self.as_waitable().take_data()
    }

    pub fn execute(&self, data: Payload) -> Result<(), CallbackError> {
        self.as_waitable().execute(data)
    }

    pub fn set_on_ready_callback(&self, callback: OnReadyCallback) {
        self.as_waitable().set_on_ready_callback(callback);
    }

    pub fn clear_on_ready_callback(&self) {
        self.as_waitable().clear_on_ready_callback();
    }

    pub fn as_timer(&self) -> Option<&Arc<Timer>> {
        match self {
            Entity::Timer(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind(), self.id())
    }
}

/// Non-owning counterpart of [`Entity`]. Expiry is detected, never prevented.
#[derive(Clone)]
pub enum WeakEntity {
    Timer(Weak<Timer>),
    Subscription(Weak<dyn Waitable>),
    Service(Weak<dyn Waitable>),
    Client(Weak<dyn Waitable>),
    Waitable(Weak<dyn Waitable>),
}

impl WeakEntity {
    pub fn upgrade(&self) -> Option<Entity> {
        Some(match self {
            WeakEntity::Timer(t) => Entity::Timer(t.upgrade()?),
            WeakEntity::Subscription(w) => Entity::Subscription(w.upgrade()?),
            WeakEntity::Service(w) => Entity::Service(w.upgrade()?),
            WeakEntity::Client(w) => Entity::Client(w.upgrade()?),
            WeakEntity::Waitable(w) => Entity::Waitable(w.upgrade()?),
        })
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            WeakEntity::Timer(_) => EntityKind::Timer,
            WeakEntity::Subscription(_) => EntityKind::Subscription,
            WeakEntity::Service(_) => EntityKind::Service,
            WeakEntity::Client(_) => EntityKind::Client,
            WeakEntity::Waitable(_) => EntityKind::Waitable,
        }
    }

    pub fn id(&self) -> EntityId {
        match self {
            WeakEntity::Timer(t) => EntityId::of(t.as_ptr()),
            WeakEntity::Subscription(w)
            | WeakEntity::Service(w)
            | WeakEntity::Client(w)
            | WeakEntity::Waitable(w) => EntityId::of(w.as_ptr()),
        }
    }

    pub fn is_expired(&self) -> bool {
        match self {
            WeakEntity::Timer(t) => t.strong_count() == 0,
            WeakEntity::Subscription(w)
            | WeakEntity::Service(w)
            | WeakEntity::Client(w)
            | WeakEntity::Waitable(w) => w.strong_count() == 0,
        }
    }
}

impl fmt::Debug for WeakEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} (weak)", self.kind(), self.id())
    }
}
