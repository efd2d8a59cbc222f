//! Manually triggerable readiness source.
//!
//! A [`GuardCondition`] latches a boolean when triggered. Waits observe the
//! latch without clearing it; whoever owns the condition consumes it with
//! [`GuardCondition::take_trigger`]. Triggers that happen while nobody is
//! listening are therefore never lost.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

use crate::sync::lock;

/// Side effect invoked on every trigger, with the number of triggers it
/// accounts for. Used by the events executor to push readiness events.
pub type OnTriggerCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// Stable identity of a guard condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuardId(u64);

static NEXT_GUARD_ID: AtomicU64 = AtomicU64::new(1);

/// Wake-up primitive shared between a wait set and the guard conditions
/// registered in it.
#[derive(Debug, Default)]
pub(crate) struct WaitSignal {
    pub(crate) epoch: Mutex<u64>,
    pub(crate) cond: Condvar,
}

impl WaitSignal {
    pub(crate) fn notify(&self) {
        let mut epoch = lock(&self.epoch);
        *epoch = epoch.wrapping_add(1);
        self.cond.notify_all();
    }
}

#[derive(Default)]
struct CallbackSlot {
    on_trigger: Option<OnTriggerCallback>,
    unread: usize,
}

pub struct GuardCondition {
    id: GuardId,
    triggered: AtomicBool,
    listeners: Mutex<Vec<Weak<WaitSignal>>>,
    callback: Mutex<CallbackSlot>,
}

impl GuardCondition {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: GuardId(NEXT_GUARD_ID.fetch_add(1, Ordering::Relaxed)),
            triggered: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            callback: Mutex::new(CallbackSlot::default()),
        })
    }

    pub fn id(&self) -> GuardId {
        self.id
    }

    /// Latch the condition, run the on-trigger callback (or count the
    /// trigger as unread) and wake every wait set listening on it.
    pub fn trigger(&self) {
        self.triggered.store(true, Ordering::SeqCst);

        let callback = {
            let mut slot = lock(&self.callback);
            match &slot.on_trigger {
                Some(cb) => Some(Arc::clone(cb)),
                None => {
                    slot.unread += 1;
                    None
                }
            }
        };
        if let Some(cb) = callback {
            cb(1);
        }

        let listeners: Vec<Arc<WaitSignal>> = {
            let mut listeners = lock(&self.listeners);
            listeners.retain(|w| w.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for signal in listeners {
            signal.notify();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Consume the latch. Returns whether it was set.
    pub fn take_trigger(&self) -> bool {
        self.triggered.swap(false, Ordering::SeqCst)
    }

    /// Install or clear the on-trigger callback. Triggers that arrived while
    /// no callback was installed are flushed through the new one at once. A
    /// latch left set after an earlier callback saw it is reported once.
    pub fn set_on_trigger_callback(&self, callback: Option<OnTriggerCallback>) {
        let flush = {
            let mut slot = lock(&self.callback);
            slot.on_trigger = callback.clone();
            match callback {
                Some(cb) if slot.unread > 0 => {
                    let unread = std::mem::take(&mut slot.unread);
                    Some((cb, unread))
                }
                Some(cb) if self.is_triggered() => Some((cb, 1)),
                _ => None,
            }
        };
        if let Some((cb, unread)) = flush {
            cb(unread);
        }
    }

    pub(crate) fn attach(&self, signal: &Arc<WaitSignal>) {
        let mut listeners = lock(&self.listeners);
        let present = listeners
            .iter()
            .any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(signal)));
        if !present {
            listeners.retain(|w| w.strong_count() > 0);
            listeners.push(Arc::downgrade(signal));
        }
    }
}

impl fmt::Debug for GuardCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardCondition")
            .field("id", &self.id)
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
