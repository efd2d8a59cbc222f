//! Demo workload: a ticking timer publishing to a topic, a subscriber in a
//! reentrant group and a squaring service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use spindle_executor::{
    CallbackGroupType, Client, Context, Node, Service, Subscription, Timer, Topic,
};

/// Handles that keep the demo entities registered. Dropping this removes
/// them from scheduling.
pub struct DemoNode {
    pub node: Arc<Node>,
    pub client: Arc<Client<u64, u64>>,
    _timer: Arc<Timer>,
    _subscription: Arc<Subscription<u64>>,
    _service: Arc<Service<u64, u64>>,
}

pub fn build(context: &Arc<Context>, period: Duration) -> Result<DemoNode> {
    let node = Node::new("demo", context);
    let ticks: Topic<u64> = Topic::new("ticks");

    let counter = AtomicU64::new(0);
    let publisher = ticks.clone();
    let timer = node.create_timer(period, None, move || {
        let tick = counter.fetch_add(1, Ordering::Relaxed) + 1;
        let delivered = publisher.publish(tick);
        debug!(tick, delivered, "tick published");
    })?;

    let listeners = node.create_callback_group(CallbackGroupType::Reentrant, true);
    let subscription = node.create_subscription(&ticks, 10, Some(&listeners), |tick: u64| {
        info!(tick, "tick received");
    })?;

    let service = node.create_service("square", None, |value: u64| value.saturating_mul(value))?;
    let client = node.create_client(&service, Some(&listeners))?;

    Ok(DemoNode {
        node,
        client,
        _timer: timer,
        _subscription: subscription,
        _service: service,
    })
}
