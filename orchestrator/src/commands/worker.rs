use std::future::Future;

use anyhow::Result;
use serde_json::Value;
use tokio::time::Duration;

use workless::store::{Connector, RedisConnector};
use workless::{PoolConfig, Registry, WorkerPool, WorkerReport, resolve_config_source};

use super::shared::load_settings;

pub(crate) async fn run_worker(
    config: Option<String>,
    queue: Option<String>,
    concurrency: Option<usize>,
) -> Result<()> {
    let (resolved, source) = resolve_config_source(config.as_deref());
    if let Some(path) = resolved.as_deref() {
        tracing::info!(path = %path, "loading settings from {source}");
    } else {
        tracing::info!("no config file found; using defaults and WORKLESS_* environment");
    }
    let mut settings = load_settings(config.as_deref(), queue)?;
    if let Some(concurrency) = concurrency {
        settings.concurrency = concurrency;
    }

    let fetch_timeout = Duration::from_secs_f64(settings.fetch_timeout_seconds);
    let connector =
        RedisConnector::new(settings.redis_dsn.as_str())?.with_blocking_timeout(fetch_timeout);
    let pool = WorkerPool::new(
        connector,
        demo_registry(),
        PoolConfig::from_settings(&settings),
    )?;
    let grace = Duration::from_secs_f64(settings.shutdown_grace_period_seconds) + fetch_timeout;
    run_pool(pool, grace, wait_for_shutdown_signal()).await?;
    Ok(())
}

/// Handlers available to `worker run`.
fn demo_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register("Hello", |args: Vec<Value>| async move {
        let names: Vec<String> = args
            .iter()
            .map(|arg| match arg {
                Value::String(value) => value.clone(),
                other => other.to_string(),
            })
            .collect();
        println!("Hello, {}!", names.join(" "));
        Ok::<(), anyhow::Error>(())
    });
    registry
}

/// Runs `pool` until `shutdown` resolves, then stops it. If the loops have
/// not drained within `grace` they are abandoned and `None` is returned.
async fn run_pool<C, F>(
    mut pool: WorkerPool<C>,
    grace: Duration,
    shutdown: F,
) -> Result<Option<Vec<WorkerReport>>>
where
    C: Connector,
    F: Future<Output = ()>,
{
    pool.start().await?;
    shutdown.await;
    tracing::info!(pool = %pool.pool_id(), "shutdown requested; draining workers");

    match tokio::time::timeout(grace, pool.stop()).await {
        Ok(reports) => {
            let reports = reports?;
            for report in &reports {
                tracing::info!(
                    worker = %report.worker_id,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    retried = report.retried,
                    dead_lettered = report.dead_lettered,
                    "worker finished"
                );
            }
            Ok(Some(reports))
        }
        Err(_) => {
            tracing::warn!(
                grace_seconds = grace.as_secs_f64(),
                "workers did not drain within the grace period"
            );
            Ok(None)
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let sigint = signal(SignalKind::interrupt());
        let sigterm = signal(SignalKind::terminate());
        match (sigint, sigterm) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
