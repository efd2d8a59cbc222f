use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::info;

use crate::guard_condition::GuardCondition;
use crate::sync::lock;

/// Process-wide init/shutdown state, injected into every executor and node.
///
/// Shutdown is delivered through guard conditions registered here, the
/// same mechanism executors use for cancellation.
#[derive(Debug)]
pub struct Context {
    shut_down: AtomicBool,
    shutdown_guards: Mutex<Vec<Weak<GuardCondition>>>,
}

impl Context {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shut_down: AtomicBool::new(false),
            shutdown_guards: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(&self) -> bool {
        !self.shut_down.load(Ordering::SeqCst)
    }

    /// Shut the context down and wake every registered wait. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let guards: Vec<Arc<GuardCondition>> = {
            let mut guards = lock(&self.shutdown_guards);
            let live = guards.iter().filter_map(Weak::upgrade).collect();
            guards.clear();
            live
        };
        info!(guards = guards.len(), "context shut down");
        for gc in guards {
            gc.trigger();
        }
    }

    /// Register a guard condition to trigger on shutdown. Triggers it at
    /// once if the context is already shut down.
    pub fn register_shutdown_guard(&self, guard: &Arc<GuardCondition>) {
        {
            let mut guards = lock(&self.shutdown_guards);
            if self.ok() {
                guards.retain(|w| w.strong_count() > 0);
                guards.push(Arc::downgrade(guard));
                return;
            }
        }
        guard.trigger();
    }
}
