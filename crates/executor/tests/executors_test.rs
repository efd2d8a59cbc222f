mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use spindle_executor::{
    spin_node_once, spin_node_some, CallbackGroupType, Context, ExecutorError, ExecutorKind,
    FutureReturn, FutureReturnCode, Node, Topic, WaitContext, Waitable,
};

use common::{make_executor, spin_in_background, wait_until, TestWaitable};

fn detach_on_destruction(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("detach", &context);
    {
        let executor = make_executor(kind, &context);
        executor.add_node(&node).unwrap();
        assert!(node.is_associated_with_executor());
    }
    assert!(!node.is_associated_with_executor());
    assert!(!node.default_callback_group().is_associated_with_executor());

    let executor = make_executor(kind, &context);
    executor.add_node(&node).unwrap();
}

fn add_temporary_node(kind: ExecutorKind) {
    let context = Context::new();
    let executor = make_executor(kind, &context);
    let node = Node::new("temporary", &context);
    executor.add_node(&node).unwrap();
    executor.spin_some(Duration::ZERO).unwrap();
    executor.remove_node(&node, true).unwrap();
    assert!(!node.is_associated_with_executor());

    let err = executor.remove_node(&node, true).unwrap_err();
    assert!(matches!(err, ExecutorError::NodeNotAttached { .. }));
}

fn empty_executor(kind: ExecutorKind) {
    let context = Context::new();
    let executor = make_executor(kind, &context);
    executor.spin_some(Duration::ZERO).unwrap();
    executor.spin_all(Duration::from_millis(10)).unwrap();
    executor.spin_once(Some(Duration::from_millis(10))).unwrap();
    assert_eq!(executor.metrics().total_executions(), 0);
}

fn add_node_two_executors(kind: ExecutorKind) {
    let context = Context::new();
    let first = make_executor(kind, &context);
    let second = make_executor(kind, &context);
    let node = Node::new("shared", &context);

    first.add_node(&node).unwrap();
    let err = second.add_node(&node).unwrap_err();
    assert!(matches!(err, ExecutorError::NodeAlreadyAttached { .. }));

    first.remove_node(&node, true).unwrap();
    second.add_node(&node).unwrap();
}

fn spin_with_timer(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("timer", &context);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let _timer = node
        .create_timer(Duration::from_millis(1), None, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let executor = make_executor(kind, &context);
    executor.add_node(&node).unwrap();
    let handle = spin_in_background(&executor);

    assert!(wait_until(Duration::from_secs(5), || fired.load(Ordering::SeqCst) > 0));
    let cancelled = Instant::now();
    executor.cancel();
    handle.join().unwrap().unwrap();
    assert!(cancelled.elapsed() < Duration::from_millis(50));
    assert!(!executor.is_spinning());
}

fn spin_while_already_spinning(kind: ExecutorKind) {
    let context = Context::new();
    let executor = make_executor(kind, &context);
    let handle = spin_in_background(&executor);
    assert!(wait_until(Duration::from_secs(5), || executor.is_spinning()));

    let err = executor.spin_once(Some(Duration::ZERO)).unwrap_err();
    assert!(matches!(err, ExecutorError::AlreadySpinning { .. }));
    let err = executor.spin_some(Duration::ZERO).unwrap_err();
    assert!(matches!(err, ExecutorError::AlreadySpinning { .. }));

    executor.cancel();
    handle.join().unwrap().unwrap();
}

fn cancel_before_spin(kind: ExecutorKind) {
    let context = Context::new();
    let executor = make_executor(kind, &context);
    executor.cancel();
    let start = Instant::now();
    executor.spin().unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(!executor.is_spinning());
}

fn future_already_complete(kind: ExecutorKind) {
    let context = Context::new();
    let executor = make_executor(kind, &context);
    let start = Instant::now();
    let mut future = futures::future::ready(7);
    let result = spindle_executor::spin_executor_until_future_complete(&*executor, &mut future, Some(Duration::from_secs(1)))
        .unwrap();
    assert_eq!(result, FutureReturn::Success(7));
    assert!(start.elapsed() < Duration::from_millis(500));
}

fn future_times_out(kind: ExecutorKind) {
    let context = Context::new();
    let executor = make_executor(kind, &context);
    let start = Instant::now();
    let mut future = futures::future::pending::<()>();
    let result = spindle_executor::spin_executor_until_future_complete(&*executor, &mut future, Some(Duration::from_millis(50)))
        .unwrap();
    assert_eq!(result.code(), FutureReturnCode::Timeout);
    assert!(start.elapsed() >= Duration::from_millis(50));
}

fn future_interrupted_by_shutdown(kind: ExecutorKind) {
    let context = Context::new();
    let executor = make_executor(kind, &context);
    let shutdown = {
        let context = Arc::clone(&context);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            context.shutdown();
        })
    };
    let mut future = futures::future::pending::<()>();
    let result = spindle_executor::spin_executor_until_future_complete(&*executor, &mut future, None)
        .unwrap();
    assert_eq!(result.code(), FutureReturnCode::Interrupted);
    shutdown.join().unwrap();
}

fn future_interrupted_by_cancel(kind: ExecutorKind) {
    let context = Context::new();
    let executor = make_executor(kind, &context);
    let canceller = {
        let executor = Arc::clone(&executor);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            executor.cancel();
        })
    };
    let mut future = futures::future::pending::<()>();
    let result = spindle_executor::spin_executor_until_future_complete(&*executor, &mut future, Some(Duration::from_secs(10)))
        .unwrap();
    assert_eq!(result.code(), FutureReturnCode::Interrupted);
    canceller.join().unwrap();
}

fn service_response_completes_future(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("calc", &context);
    let service = node
        .create_service("add", None, |(a, b): (i32, i32)| a + b)
        .unwrap();
    let client = node.create_client(&service, None).unwrap();
    let executor = make_executor(kind, &context);
    executor.add_node(&node).unwrap();

    let mut response = client.async_send_request((2, 3)).unwrap();
    let result = spindle_executor::spin_executor_until_future_complete(&*executor, &mut response, Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(result, FutureReturn::Success(Ok(5)));
    assert_eq!(client.pending_requests(), 0);
}

fn spin_some_runs_ready_work(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("some", &context);
    let waitable = TestWaitable::new();
    node.add_waitable(&waitable.as_waitable(), None).unwrap();
    let executor = make_executor(kind, &context);
    executor.add_node(&node).unwrap();

    waitable.trigger();
    executor.spin_some(Duration::ZERO).unwrap();
    assert_eq!(waitable.count(), 1);

    executor.spin_some(Duration::ZERO).unwrap();
    assert_eq!(waitable.count(), 1);
}

fn spin_all_follows_new_work(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("all", &context);
    let waitable = TestWaitable::retriggering(3);
    node.add_waitable(&waitable.as_waitable(), None).unwrap();
    let executor = make_executor(kind, &context);
    executor.add_node(&node).unwrap();

    waitable.trigger();
    executor.spin_all(Duration::from_secs(1)).unwrap();
    assert_eq!(waitable.count(), 3);
}

fn subscription_receives_published_messages(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("listener", &context);
    let topic = Topic::new("chatter");
    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let _subscription = node
        .create_subscription(&topic, 0, None, move |msg: String| {
            sink.lock().unwrap().push(msg);
        })
        .unwrap();
    let executor = make_executor(kind, &context);
    executor.add_node(&node).unwrap();

    for i in 0..3 {
        assert_eq!(topic.publish(format!("hello {i}")), 1);
    }
    executor.spin_all(Duration::from_secs(1)).unwrap();
    assert_eq!(
        *received.lock().unwrap(),
        vec!["hello 0", "hello 1", "hello 2"]
    );
}

fn disabled_group_keeps_its_event(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("missing_event", &context);
    let group = node.create_callback_group(CallbackGroupType::MutuallyExclusive, true);
    let waitable = TestWaitable::new();
    node.add_waitable(&waitable.as_waitable(), Some(&group)).unwrap();
    let executor = make_executor(kind, &context);
    executor.add_node(&node).unwrap();

    group.set_available(false);
    waitable.trigger();
    executor.spin_once(Some(Duration::from_millis(50))).unwrap();
    assert_eq!(waitable.count(), 0);

    group.set_available(true);
    executor.spin_once(Some(Duration::from_secs(1))).unwrap();
    assert_eq!(waitable.count(), 1);

    executor.spin_some(Duration::ZERO).unwrap();
    assert_eq!(waitable.count(), 1);
}

/// Availability toggled while `spin()` blocks: nothing runs while the group
/// is disabled, the armed trigger runs exactly once after re-enable.
fn group_reenabled_while_spinning(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("toggled", &context);
    let group = node.create_callback_group(CallbackGroupType::MutuallyExclusive, true);
    let waitable = TestWaitable::new();
    node.add_waitable(&waitable.as_waitable(), Some(&group)).unwrap();
    let executor = make_executor(kind, &context);
    executor.add_node(&node).unwrap();
    let handle = spin_in_background(&executor);
    assert!(wait_until(Duration::from_secs(5), || executor.is_spinning()));

    group.set_available(false);
    waitable.trigger();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(waitable.count(), 0);

    group.set_available(true);
    assert!(wait_until(Duration::from_secs(2), || waitable.count() == 1));
    thread::sleep(Duration::from_millis(20));
    assert_eq!(waitable.count(), 1);

    executor.cancel();
    handle.join().unwrap().unwrap();
}

fn detached_node_work_is_not_dispatched(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("detached", &context);
    let waitables: Vec<_> = (0..3).map(|_| TestWaitable::new()).collect();
    for waitable in &waitables {
        node.add_waitable(&waitable.as_waitable(), None).unwrap();
    }
    let executor = make_executor(kind, &context);
    executor.add_node(&node).unwrap();
    for waitable in &waitables {
        waitable.trigger();
    }
    let total = || waitables.iter().map(|w| w.count()).sum::<usize>();

    executor.spin_once(Some(Duration::from_secs(1))).unwrap();
    assert_eq!(total(), 1);

    executor.remove_node(&node, true).unwrap();
    executor.spin_once(Some(Duration::from_millis(20))).unwrap();
    executor.spin_once(Some(Duration::from_millis(20))).unwrap();
    assert_eq!(total(), 1);
}

/// A node moved to a second executor runs there only; the first executor
/// neither runs nor trips over the work it had already found ready.
fn moved_node_runs_on_new_executor(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("moved", &context);
    let waitables: Vec<_> = (0..3).map(|_| TestWaitable::new()).collect();
    for waitable in &waitables {
        node.add_waitable(&waitable.as_waitable(), None).unwrap();
    }
    let first = make_executor(kind, &context);
    let second = make_executor(kind, &context);
    first.add_node(&node).unwrap();
    for waitable in &waitables {
        waitable.trigger();
    }
    let total = || waitables.iter().map(|w| w.count()).sum::<usize>();

    first.spin_once(Some(Duration::from_secs(1))).unwrap();
    assert_eq!(total(), 1);

    first.remove_node(&node, true).unwrap();
    second.add_node(&node).unwrap();
    second.spin_once(Some(Duration::from_secs(1))).unwrap();
    assert_eq!(total(), 2);

    first.spin_once(Some(Duration::ZERO)).unwrap();
    assert_eq!(total(), 2);

    second.spin_some(Duration::ZERO).unwrap();
    assert_eq!(total(), 3);
}

fn destroyed_node_is_pruned(kind: ExecutorKind) {
    let context = Context::new();
    let executor = make_executor(kind, &context);
    {
        let doomed = Node::new("doomed", &context);
        let waitable = TestWaitable::new();
        doomed.add_waitable(&waitable.as_waitable(), None).unwrap();
        executor.add_node(&doomed).unwrap();
        waitable.trigger();
    }
    executor.spin_some(Duration::ZERO).unwrap();

    let node = Node::new("fresh", &context);
    let waitable = TestWaitable::new();
    node.add_waitable(&waitable.as_waitable(), None).unwrap();
    executor.add_node(&node).unwrap();
    waitable.trigger();
    executor.spin_some(Duration::ZERO).unwrap();
    assert_eq!(waitable.count(), 1);
}

fn exclusive_group_runs_one_per_spin_once(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("exclusive", &context);
    let waitables: Vec<_> = (0..3).map(|_| TestWaitable::new()).collect();
    for waitable in &waitables {
        node.add_waitable(&waitable.as_waitable(), None).unwrap();
    }
    let executor = make_executor(kind, &context);
    executor.add_node(&node).unwrap();

    for waitable in &waitables {
        waitable.trigger();
    }
    let total = || waitables.iter().map(|w| w.count()).sum::<usize>();
    for expected in 1..=3 {
        executor.spin_once(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(total(), expected);
    }
}

fn callback_group_added_explicitly(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("manual", &context);
    let group = node.create_callback_group(CallbackGroupType::Reentrant, false);
    let waitable = TestWaitable::new();
    node.add_waitable(&waitable.as_waitable(), Some(&group)).unwrap();
    let executor = make_executor(kind, &context);
    executor.add_node(&node).unwrap();

    waitable.trigger();
    executor.spin_some(Duration::ZERO).unwrap();
    assert_eq!(waitable.count(), 0);

    executor.add_callback_group(&group, &node).unwrap();
    assert!(group.is_associated_with_executor());
    executor.spin_some(Duration::ZERO).unwrap();
    assert_eq!(waitable.count(), 1);

    executor.remove_callback_group(&group).unwrap();
    assert!(!group.is_associated_with_executor());
    let err = executor.remove_callback_group(&group).unwrap_err();
    assert!(matches!(err, ExecutorError::CallbackGroupNotAttached { .. }));
}

fn spin_node_helpers(kind: ExecutorKind) {
    let context = Context::new();
    let node = Node::new("helpers", &context);
    let waitable = TestWaitable::new();
    node.add_waitable(&waitable.as_waitable(), None).unwrap();
    let executor = make_executor(kind, &context);

    waitable.trigger();
    spin_node_once(&*executor, &node, Some(Duration::from_secs(1))).unwrap();
    assert_eq!(waitable.count(), 1);
    assert!(!node.is_associated_with_executor());

    waitable.trigger();
    spin_node_some(&*executor, &node).unwrap();
    assert_eq!(waitable.count(), 2);
    assert!(!node.is_associated_with_executor());
}

#[test]
fn double_take_data_is_rejected() {
    let context = Context::new();
    let node = Node::new("double_take", &context);
    let topic = Topic::new("numbers");
    let subscription = node
        .create_subscription(&topic, 0, None, |_: u32| {})
        .unwrap();
    topic.publish(1);
    topic.publish(2);

    let mut wait_context = WaitContext::new();
    subscription.register_in_wait_context(&mut wait_context);
    assert!(wait_context.capture());
    assert!(subscription.is_ready(&wait_context));
    assert!(subscription.take_data().unwrap().is_some());

    let err = subscription.take_data().unwrap_err();
    assert!(matches!(err, ExecutorError::TakeWithoutReady { .. }));
    assert_eq!(subscription.pending(), 1);
}

#[test]
fn static_executors_sharing_a_node_each_see_its_changes() {
    let context = Context::new();
    let node = Node::new("split", &context);
    let a = node.create_callback_group(CallbackGroupType::MutuallyExclusive, false);
    let b = node.create_callback_group(CallbackGroupType::MutuallyExclusive, false);
    let first = make_executor(ExecutorKind::StaticSingleThreaded, &context);
    let second = make_executor(ExecutorKind::StaticSingleThreaded, &context);
    first.add_callback_group(&a, &node).unwrap();
    second.add_callback_group(&b, &node).unwrap();
    first.spin_once(Some(Duration::ZERO)).unwrap();
    second.spin_once(Some(Duration::ZERO)).unwrap();

    let waitable = TestWaitable::new();
    node.add_waitable(&waitable.as_waitable(), Some(&b)).unwrap();
    first.spin_once(Some(Duration::ZERO)).unwrap();
    waitable.trigger();
    for _ in 0..5 {
        second.spin_once(Some(Duration::from_millis(10))).unwrap();
    }
    assert_eq!(waitable.count(), 1);
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
    detach_on_destruction,
    add_temporary_node,
    empty_executor,
    add_node_two_executors,
    spin_with_timer,
    spin_while_already_spinning,
    cancel_before_spin,
    future_already_complete,
    future_times_out,
    future_interrupted_by_shutdown,
    future_interrupted_by_cancel,
    service_response_completes_future,
    spin_some_runs_ready_work,
    spin_all_follows_new_work,
    subscription_receives_published_messages,
    disabled_group_keeps_its_event,
    group_reenabled_while_spinning,
    detached_node_work_is_not_dispatched,
    moved_node_runs_on_new_executor,
    destroyed_node_is_pruned,
    exclusive_group_runs_one_per_spin_once,
    callback_group_added_explicitly,
    spin_node_helpers,
);
