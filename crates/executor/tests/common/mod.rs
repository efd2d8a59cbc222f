#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use spindle_executor::{
    build_executor, CallbackError, Context, Executor, ExecutorConfig, ExecutorError, ExecutorKind,
    GuardCondition, OnReadyCallback, Payload, ReadyLatch, WaitContext, Waitable,
};

static TRACING: Once = Once::new();

/// Route executor logs to the test output. `RUST_LOG` selects the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Tracks how many executions overlap, possibly across several waitables.
#[derive(Debug, Default)]
pub struct ConcurrencyTracker {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ConcurrencyTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Highest number of concurrent executions observed.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Waitable driven by its own guard condition, with execution accounting.
pub struct TestWaitable {
    guard: Arc<GuardCondition>,
    latch: ReadyLatch,
    count: AtomicUsize,
    tracker: Arc<ConcurrencyTracker>,
    execute_time: Duration,
    retrigger_until: usize,
}

impl TestWaitable {
    pub fn new() -> Arc<Self> {
        Self::with_behavior(ConcurrencyTracker::new(), Duration::ZERO, 0)
    }

    /// Triggers itself again from its callback until it has run `total`
    /// times.
    pub fn retriggering(total: usize) -> Arc<Self> {
        Self::with_behavior(ConcurrencyTracker::new(), Duration::ZERO, total)
    }

    /// Each execution reports to `tracker` and sleeps for `execute_time`.
    pub fn with_behavior(
        tracker: Arc<ConcurrencyTracker>,
        execute_time: Duration,
        retrigger_until: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            guard: GuardCondition::new(),
            latch: ReadyLatch::new(),
            count: AtomicUsize::new(0),
            tracker,
            execute_time,
            retrigger_until,
        })
    }

    pub fn trigger(&self) {
        self.guard.trigger();
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn as_waitable(self: &Arc<Self>) -> Arc<dyn Waitable> {
        self.clone()
    }
}

impl Waitable for TestWaitable {
    fn register_in_wait_context(&self, context: &mut WaitContext) {
        context.add_guard_condition(&self.guard);
    }

    fn is_ready(&self, context: &WaitContext) -> bool {
        let ready = context.is_guard_ready(&self.guard);
        if ready {
            self.latch.mark();
        }
        ready
    }

    fn take_data(&self) -> Result<Option<Payload>, ExecutorError> {
        self.latch.consume("test waitable")?;
        self.guard.take_trigger();
        Ok(Some(Box::new(())))
    }

    fn execute(&self, _data: Payload) -> Result<(), CallbackError> {
        self.tracker.enter();
        if !self.execute_time.is_zero() {
            thread::sleep(self.execute_time);
        }
        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        self.tracker.exit();
        if count < self.retrigger_until {
            self.guard.trigger();
        }
        Ok(())
    }

    fn set_on_ready_callback(&self, callback: OnReadyCallback) {
        self.guard
            .set_on_trigger_callback(Some(Arc::new(move |n| callback(n, 0))));
    }

    fn clear_on_ready_callback(&self) {
        self.guard.set_on_trigger_callback(None);
    }
}

pub fn make_executor(kind: ExecutorKind, context: &Arc<Context>) -> Arc<dyn Executor> {
    init_tracing();
    build_executor(&ExecutorConfig::for_kind(kind), context)
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Run `executor.spin()` on a background thread.
pub fn spin_in_background(executor: &Arc<dyn Executor>) -> thread::JoinHandle<spindle_executor::Result<()>> {
    let executor = Arc::clone(executor);
    thread::spawn(move || executor.spin())
}
