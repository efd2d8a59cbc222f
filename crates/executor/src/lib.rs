pub mod any_executable;
pub mod callback_group;
pub mod collection;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod executor;
pub mod executors;
pub mod future;
pub mod guard_condition;
pub mod metrics;
pub mod node;
pub mod service;
pub mod subscription;
mod sync;
pub mod timer;
pub mod transport;
pub mod wait_set;

pub use any_executable::AnyExecutable;
pub use callback_group::{CallbackGroup, CallbackGroupType};
pub use collection::EntityCollection;
pub use config::{ExecutorConfig, ExecutorKind};
pub use context::Context;
pub use entity::{Entity, EntityId, EntityKind, OnReadyCallback, Payload, ReadyLatch, Waitable, WeakEntity};
pub use error::{CallbackError, ExecutorError};
pub use executor::{
    spin_executor_until_future_complete, spin_node_once, spin_node_some,
    spin_node_until_future_complete, spin_until_future_complete, Executor, ExecutorBase,
};
pub use executors::{
    build_executor, EventsExecutor, MultiThreadedExecutor, SingleThreadedExecutor,
    StaticSingleThreadedExecutor,
};
pub use future::{FutureReturn, FutureReturnCode};
pub use guard_condition::{GuardCondition, GuardId, OnTriggerCallback};
pub use metrics::ExecutorMetrics;
pub use node::Node;
pub use service::{Client, ResponseFuture, Service};
pub use subscription::Subscription;
pub use timer::Timer;
pub use transport::Topic;
pub use wait_set::{WaitContext, WaitResultKind, WaitSet};

pub type Result<T> = std::result::Result<T, ExecutorError>;
