mod cli;
mod demo;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{info, warn};

use spindle_executor::{build_executor, Context, ExecutorConfig, FutureReturn};

use crate::cli::CliArgs;

fn load_config(args: &CliArgs) -> Result<ExecutorConfig> {
    let mut config = match &args.config {
        Some(path) => ExecutorConfig::from_file(path)
            .with_context(|| format!("failed to load executor config from {path}"))?,
        None => {
            let mut config = ExecutorConfig::default();
            config
                .apply_env_overrides()
                .context("invalid SPINDLE_* environment override")?;
            config
        }
    };
    if let Some(kind) = args.executor {
        config.kind = kind;
    }
    if let Some(threads) = args.threads {
        config.worker_threads = threads;
    }
    config.validate().context("invalid executor config")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    let context = Context::new();
    let executor = build_executor(&config, &context);
    let demo = demo::build(&context, Duration::from_millis(args.period_ms.max(1)))?;
    executor.add_node(&demo.node)?;

    // One request/response round trip before the main spin.
    let mut response = demo.client.async_send_request(12)?;
    match spindle_executor::spin_executor_until_future_complete(&*executor, &mut response, Some(Duration::from_secs(5)))? {
        FutureReturn::Success(Ok(value)) => info!(request = 12, response = value, "service replied"),
        FutureReturn::Success(Err(_)) => warn!("service request was dropped"),
        other => warn!(code = %other.code(), "service did not reply"),
    }

    info!(executor = %config.kind, "spinning, press Ctrl-C to stop");
    let spinner = {
        let executor = Arc::clone(&executor);
        tokio::task::spawn_blocking(move || executor.spin())
    };

    if args.duration_ms > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(args.duration_ms)) => {
                info!(duration_ms = args.duration_ms, "run duration elapsed");
                executor.cancel();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                context.shutdown();
            }
        }
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl_c")?;
        info!("interrupted, shutting down");
        context.shutdown();
    }

    spinner.await.context("spin task panicked")??;
    executor.remove_node(&demo.node, false)?;

    let metrics = executor.metrics();
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    info!(executions = metrics.total_executions(), "spindle exited cleanly");
    Ok(())
}
