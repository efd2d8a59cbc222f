use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::entity::{OnReadyCallback, Payload, ReadyLatch, Waitable};
use crate::error::{CallbackError, ExecutorError};
use crate::sync::lock;
use crate::wait_set::WaitContext;

type TimerCallback = Box<dyn FnMut() + Send>;

/// Periodic entity. Ready once its deadline has passed; taking its data
/// advances the deadline by whole periods.
pub struct Timer {
    period: Duration,
    next_call: Mutex<Instant>,
    canceled: AtomicBool,
    latch: ReadyLatch,
    callback: Mutex<TimerCallback>,
}

impl Timer {
    pub fn new<F>(period: Duration, callback: F) -> Arc<Self>
    where
        F: FnMut() + Send + 'static,
    {
        Arc::new(Self {
            period,
            next_call: Mutex::new(Instant::now() + period),
            canceled: AtomicBool::new(false),
            latch: ReadyLatch::new(),
            callback: Mutex::new(Box::new(callback)),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Restart the period from now and clear cancellation.
    pub fn reset(&self) {
        *lock(&self.next_call) = Instant::now() + self.period;
        self.canceled.store(false, Ordering::SeqCst);
    }

    pub fn next_call(&self) -> Instant {
        *lock(&self.next_call)
    }

    pub fn time_until_trigger(&self) -> Duration {
        self.next_call().saturating_duration_since(Instant::now())
    }

    pub fn is_due(&self, now: Instant) -> bool {
        !self.is_canceled() && now >= self.next_call()
    }

    /// Claim the current expiry. Returns `false` if the timer is canceled or
    /// not yet due, for example because another worker claimed it first.
    pub fn call(&self) -> bool {
        if self.is_canceled() {
            return false;
        }
        let now = Instant::now();
        let mut next = lock(&self.next_call);
        if now < *next {
            return false;
        }
        if self.period.is_zero() {
            *next = now;
        } else {
            let behind = (now - *next).as_nanos();
            let skipped = behind / self.period.as_nanos() + 1;
            let advance = self.period.as_nanos() * skipped;
            *next += Duration::from_nanos(u64::try_from(advance).unwrap_or(u64::MAX));
        }
        true
    }
}

impl Waitable for Timer {
    fn register_in_wait_context(&self, context: &mut WaitContext) {
        if !self.is_canceled() {
            context.add_deadline(self.next_call());
        }
    }

    fn is_ready(&self, context: &WaitContext) -> bool {
        let due = self.is_due(context.now());
        if due {
            self.latch.mark();
        }
        due
    }

    fn take_data(&self) -> Result<Option<Payload>, ExecutorError> {
        self.latch.consume("timer")?;
        Ok(self.call().then(|| Box::new(()) as Payload))
    }

    fn execute(&self, _data: Payload) -> Result<(), CallbackError> {
        let mut callback = lock(&self.callback);
        (callback)();
        Ok(())
    }

    // Timers are driven by their deadline in every executor variant.
    fn set_on_ready_callback(&self, _callback: OnReadyCallback) {}

    fn clear_on_ready_callback(&self) {}
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("period", &self.period)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn call_claims_each_expiry_once() {
        let timer = Timer::new(Duration::from_millis(5), || {});
        assert!(!timer.call());
        thread::sleep(Duration::from_millis(7));
        assert!(timer.call());
        assert!(!timer.call());
    }

    #[test]
    fn take_requires_ready_check() {
        let timer = Timer::new(Duration::from_millis(1), || {});
        thread::sleep(Duration::from_millis(3));
        let err = timer.take_data().unwrap_err();
        assert!(matches!(err, ExecutorError::TakeWithoutReady { .. }));
        assert!(timer.is_due(Instant::now()), "a rejected take must not claim the expiry");

        let mut ctx = WaitContext::new();
        timer.register_in_wait_context(&mut ctx);
        ctx.capture();
        assert!(timer.is_ready(&ctx));
        assert!(timer.take_data().unwrap().is_some());
        assert!(matches!(
            timer.take_data(),
            Err(ExecutorError::TakeWithoutReady { .. })
        ));
    }

    #[test]
    fn missed_periods_are_skipped() {
        let timer = Timer::new(Duration::from_millis(2), || {});
        thread::sleep(Duration::from_millis(11));
        assert!(timer.call());
        assert!(timer.next_call() > Instant::now());
    }

    #[test]
    fn canceled_timer_is_never_due() {
        let timer = Timer::new(Duration::from_millis(1), || {});
        timer.cancel();
        thread::sleep(Duration::from_millis(3));
        assert!(!timer.is_due(Instant::now()));
        assert!(!timer.call());

        let mut ctx = WaitContext::new();
        timer.register_in_wait_context(&mut ctx);
        assert!(ctx.is_empty());

        timer.reset();
        assert!(!timer.is_canceled());
        assert!(timer.time_until_trigger() <= Duration::from_millis(1));
    }

    #[test]
    fn execute_runs_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let timer = Timer::new(Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(2));
        let mut ctx = WaitContext::new();
        timer.register_in_wait_context(&mut ctx);
        ctx.capture();
        assert!(timer.is_ready(&ctx));
        let data = timer.take_data().unwrap().expect("timer should be due");
        timer.execute(data).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
