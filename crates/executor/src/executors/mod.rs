//! The four executor variants and a config-driven factory.

mod events;
mod multi_threaded;
mod single_threaded;
mod static_single_threaded;

use std::sync::Arc;

use tracing::info;

use crate::config::{ExecutorConfig, ExecutorKind};
use crate::context::Context;
use crate::executor::Executor;

pub use events::EventsExecutor;
pub use multi_threaded::MultiThreadedExecutor;
pub use single_threaded::SingleThreadedExecutor;
pub use static_single_threaded::StaticSingleThreadedExecutor;

/// Build the variant selected by `config`.
pub fn build_executor(config: &ExecutorConfig, context: &Arc<Context>) -> Arc<dyn Executor> {
    info!(executor = %config.kind, "building executor");
    match config.kind {
        ExecutorKind::SingleThreaded => Arc::new(SingleThreadedExecutor::new(context)),
        ExecutorKind::MultiThreaded => Arc::new(MultiThreadedExecutor::with_config(context, config)),
        ExecutorKind::StaticSingleThreaded => Arc::new(StaticSingleThreadedExecutor::new(context)),
        ExecutorKind::Events => Arc::new(EventsExecutor::with_config(context, config)),
    }
}
