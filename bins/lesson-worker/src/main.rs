mod adapters;
mod collaborators;
mod config;
mod dispatch;
mod engine;
mod error;
mod hooks;
mod orchestrator;
mod pool;
mod progression;
mod worker;

#[cfg(test)]
mod testing;

use adapters::{CurriculumDir, LocaleCatalog, LogPlugins, RedisNotifier, RedisStore};
use collaborators::Collaborators;
use config::RunnerConfigManager;
use dispatch::BackendRegistry;
use lesson_common::config::Config;
use lesson_common::redis;
use lesson_common::types::RunRequest;
use orchestrator::Orchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Lesson worker booting...");

    let config = Config::from_env();

    // Load runner configurations
    let runners = RunnerConfigManager::load(&config.runners_path).map_err(|e| {
        error!("Failed to load runner configurations: {:#}", e);
        error!("Make sure {} exists", config.runners_path.display());
        e
    })?;
    info!("Loaded runner configurations for: {:?}", runners.list_runners());
    for id in runners.list_runners() {
        let runner = runners.get_config(&id)?;
        debug!(
            runner = %runner.id,
            kind = %runner.kind,
            command = %runner.command,
            timeout_ms = runner.timeout_ms,
            "Runner configuration"
        );
    }

    let backends = BackendRegistry::from_config(&runners);
    info!("Available runners: {:?}", backends.runner_ids());
    let backends = Arc::new(backends);

    // Connect to Redis
    let client = ::redis::Client::open(config.redis_url.as_str())?;
    let mut redis_conn = ::redis::aio::ConnectionManager::new(client).await?;
    info!("Connected to Redis: {}", config.redis_url);

    let translator = LocaleCatalog::load(&config.locales_dir)?;
    info!("Loaded locales: {:?}", translator.locales());

    let collaborators = Collaborators {
        content: Arc::new(CurriculumDir::new(&config.curriculum_dir)),
        store: Arc::new(RedisStore::new(redis_conn.clone())),
        notifier: Arc::new(RedisNotifier::new(redis_conn.clone())),
        plugins: Arc::new(LogPlugins),
        translator: Arc::new(translator),
    };
    let orchestrator = Orchestrator::new(collaborators, backends);

    // Every run's cancellation scope hangs off this token
    let root = CancellationToken::new();

    // Setup graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, cancelling live run...");
    };

    tokio::select! {
        _ = worker_loop(&mut redis_conn, &orchestrator, &root) => {},
        _ = shutdown => {},
    }
    root.cancel();

    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip_all)]
async fn worker_loop(
    redis_conn: &mut ::redis::aio::ConnectionManager,
    orchestrator: &Orchestrator,
    root: &CancellationToken,
) {
    loop {
        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_run(redis_conn, 5.0).await {
            Ok(Some(request)) => {
                info!(
                    run_id = %request.id,
                    project_id = %request.project_id,
                    requested_at = %request.requested_at,
                    "Received run request"
                );
                execute_run(redis_conn, orchestrator, root, &request).await;
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Run one request to completion while watching its cancellation flag
async fn execute_run(
    redis_conn: &mut ::redis::aio::ConnectionManager,
    orchestrator: &Orchestrator,
    root: &CancellationToken,
    request: &RunRequest,
) {
    // Flags raised before this request was queued belong to an earlier run
    match redis::clear_stale_cancel(redis_conn, request).await {
        Ok(true) => debug!(run_id = %request.id, "Dropped stale cancel flag"),
        Ok(false) => {}
        Err(e) => warn!(run_id = %request.id, error = %e, "Failed to clear stale cancel flag"),
    }

    let token = root.child_token();
    let poller = tokio::spawn(poll_cancel(
        redis_conn.clone(),
        request.project_id.clone(),
        token.clone(),
    ));

    let start = std::time::Instant::now();
    let progression = orchestrator.run(&request.project_id, &token).await;
    poller.abort();

    info!(
        run_id = %request.id,
        project_id = %request.project_id,
        progression = ?progression,
        cancelled = token.is_cancelled(),
        execution_ms = start.elapsed().as_millis(),
        "Run completed"
    );
}

async fn poll_cancel(
    mut redis_conn: ::redis::aio::ConnectionManager,
    project_id: String,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(CANCEL_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = interval.tick() => {}
        }

        match redis::take_cancel(&mut redis_conn, &project_id).await {
            Ok(true) => {
                info!(project_id = %project_id, "Cancellation requested");
                token.cancel();
                return;
            }
            Ok(false) => {}
            Err(e) => debug!(project_id = %project_id, error = %e, "Cancel flag check failed"),
        }
    }
}
