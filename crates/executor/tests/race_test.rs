mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use spindle_executor::{
    CallbackGroupType, Context, Executor, ExecutorKind, MultiThreadedExecutor, Node,
};

use common::{
    init_tracing, make_executor, spin_in_background, wait_until, ConcurrencyTracker, TestWaitable,
};

/// Nodes come and go from another thread while the executor spins.
fn add_and_remove_nodes_while_spinning(kind: ExecutorKind) {
    let context = Context::new();
    let executor = make_executor(kind, &context);
    let anchor = Node::new("anchor", &context);
    executor.add_node(&anchor).unwrap();
    let handle = spin_in_background(&executor);
    assert!(wait_until(Duration::from_secs(5), || executor.is_spinning()));

    let stress = {
        let executor = Arc::clone(&executor);
        let context = Arc::clone(&context);
        thread::spawn(move || {
            for i in 0..50 {
                let node = Node::new(format!("temp_{i}"), &context);
                let waitable = TestWaitable::new();
                node.add_waitable(&waitable.as_waitable(), None).unwrap();
                executor.add_node(&node).unwrap();
                waitable.trigger();
                thread::sleep(Duration::from_micros(200));
                executor.remove_node(&node, true).unwrap();
            }
        })
    };
    stress.join().unwrap();

    executor.cancel();
    handle.join().unwrap().unwrap();
    assert!(!anchor.default_callback_group().is_executing());
}

/// A node attached while the executor blocks in a wait is picked up.
fn node_added_during_spin_is_served(kind: ExecutorKind) {
    let context = Context::new();
    let executor = make_executor(kind, &context);
    let handle = spin_in_background(&executor);
    assert!(wait_until(Duration::from_secs(5), || executor.is_spinning()));

    let node = Node::new("late", &context);
    let waitable = TestWaitable::new();
    node.add_waitable(&waitable.as_waitable(), None).unwrap();
    executor.add_node(&node).unwrap();
    waitable.trigger();

    assert!(wait_until(Duration::from_secs(5), || waitable.count() == 1));
    executor.cancel();
    handle.join().unwrap().unwrap();
}

/// Entities created on an attached node while spinning are picked up.
fn entity_added_during_spin_is_served(kind: ExecutorKind) {
    let context = Context::new();
    let executor = make_executor(kind, &context);
    let node = Node::new("growing", &context);
    executor.add_node(&node).unwrap();
    let handle = spin_in_background(&executor);
    assert!(wait_until(Duration::from_secs(5), || executor.is_spinning()));

    let waitable = TestWaitable::new();
    node.add_waitable(&waitable.as_waitable(), None).unwrap();
    waitable.trigger();

    assert!(wait_until(Duration::from_secs(5), || waitable.count() == 1));
    executor.cancel();
    handle.join().unwrap().unwrap();
}

/// Fresh executors spun and cancelled while another thread attaches,
/// with background load.
fn repeated_attach_while_starting(kind: ExecutorKind) {
    let stop = Arc::new(AtomicBool::new(false));
    let load: Vec<_> = (0..2)
        .map(|_| {
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut x = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    x = x.wrapping_mul(31).wrapping_add(7);
                    std::hint::black_box(x);
                }
            })
        })
        .collect();

    for i in 0..20 {
        let context = Context::new();
        let executor = make_executor(kind, &context);
        let handle = spin_in_background(&executor);
        let attacher = {
            let executor = Arc::clone(&executor);
            let context = Arc::clone(&context);
            thread::spawn(move || {
                let node = Node::new(format!("attach_{i}"), &context);
                executor.add_node(&node).unwrap();
                node
            })
        };
        let _node = attacher.join().unwrap();
        executor.cancel();
        handle.join().unwrap().unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    for worker in load {
        worker.join().unwrap();
    }
}

macro_rules! for_each_executor {
    ($($test:ident),* $(,)?) => {
        mod single_threaded {
            $(#[test] fn $test() { super::$test(super::ExecutorKind::SingleThreaded) })*
        }
        mod multi_threaded {
            $(#[test] fn $test() { super::$test(super::ExecutorKind::MultiThreaded) })*
        }
        mod static_single_threaded {
            $(#[test] fn $test() { super::$test(super::ExecutorKind::StaticSingleThreaded) })*
        }
        mod events {
            $(#[test] fn $test() { super::$test(super::ExecutorKind::Events) })*
        }
    };
}

for_each_executor!(
    add_and_remove_nodes_while_spinning,
    node_added_during_spin_is_served,
    entity_added_during_spin_is_served,
    repeated_attach_while_starting,
);

fn spin_multi_threaded(
    kind: CallbackGroupType,
    execute_time: Duration,
    runs_each: usize,
) -> (Arc<ConcurrencyTracker>, Vec<Arc<TestWaitable>>) {
    init_tracing();
    let context = Context::new();
    let node = Node::new("workers", &context);
    let group = node.create_callback_group(kind, true);
    let tracker = ConcurrencyTracker::new();
    let waitables: Vec<_> = (0..2)
        .map(|_| TestWaitable::with_behavior(Arc::clone(&tracker), execute_time, runs_each))
        .collect();
    for waitable in &waitables {
        node.add_waitable(&waitable.as_waitable(), Some(&group)).unwrap();
    }

    let executor: Arc<dyn Executor> = Arc::new(MultiThreadedExecutor::new(&context, 4));
    executor.add_node(&node).unwrap();
    let handle = spin_in_background(&executor);
    for waitable in &waitables {
        waitable.trigger();
    }
    let done = wait_until(Duration::from_secs(10), || {
        waitables.iter().all(|w| w.count() >= runs_each.max(1))
    });
    executor.cancel();
    handle.join().unwrap().unwrap();
    assert!(done, "workers did not finish the expected runs");
    (tracker, waitables)
}

#[test]
fn multi_threaded_exclusive_group_never_overlaps() {
    let (tracker, waitables) =
        spin_multi_threaded(CallbackGroupType::MutuallyExclusive, Duration::from_millis(2), 10);
    assert_eq!(tracker.max_active(), 1);
    assert!(waitables.iter().all(|w| w.count() >= 10));
}

#[test]
fn multi_threaded_reentrant_group_runs_in_parallel() {
    let (tracker, _) =
        spin_multi_threaded(CallbackGroupType::Reentrant, Duration::from_millis(50), 0);
    assert_eq!(tracker.max_active(), 2);
}
