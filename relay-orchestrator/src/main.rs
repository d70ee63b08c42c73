use anyhow::{Context, Result};
use relay_bus::{ConsumerSettings, InMemoryBroker, SessionBroker, SessionConsumer};
use relay_runner::command::ProcessRunner;
use relay_runner::scheduler::check_runners;
use relay_runner::{Liveness, RunnerConfig, WorkerPool};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;

use crate::config::OrchestratorConfig;
use crate::repository::{InMemoryStore, Repositories};
use crate::service::{DeploymentStatusUpdater, RequestQueue, ResourceRequestSender};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "relay_orchestrator=info,relay_runner=info,relay_bus=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Relay Orchestrator...");

    let config = OrchestratorConfig::from_env();
    config.validate().context("Invalid orchestrator configuration")?;

    let repos = if config.uses_memory_store() {
        tracing::warn!("Using the in-memory store, nothing survives a restart");
        Repositories::in_memory(InMemoryStore::new())
    } else {
        tracing::info!("Connecting to database...");
        let pool = db::create_pool(&config.database_url)
            .await
            .context("Failed to create database pool")?;
        db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
        Repositories::postgres(pool)
    };
    let broker: Arc<dyn SessionBroker> = Arc::new(InMemoryBroker::new([
        config.resource_request_queue.as_str(),
        config.deployment_status_queue.as_str(),
    ]));
    let queue = RequestQueue::new(Arc::clone(&broker), config.resource_request_queue.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let liveness = Liveness::new();

    let updaters = start_updaters(&config, &repos, &queue, &broker, &shutdown_rx);

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let runners = if config.embedded_runners {
        let runner_config = RunnerConfig::from_env()
            .context("Failed to load runner configuration (set EMBEDDED_RUNNERS=false to serve the API only)")?;
        runner_config
            .validate()
            .context("Invalid runner configuration")?;

        let pool = WorkerPool::start(
            Arc::new(runner_config),
            Arc::clone(&broker),
            Arc::new(ProcessRunner),
            shutdown_rx.clone(),
        );
        tasks.push(tokio::spawn(check_runners(
            pool.workers(),
            liveness.clone(),
            config.watchdog_interval,
            shutdown_rx.clone(),
        )));
        Some(pool)
    } else {
        tracing::warn!(
            "Embedded runners disabled; the broker is in-process, so requests on '{}' stay queued until runners are enabled",
            config.resource_request_queue
        );
        None
    };

    let state = api::AppState {
        sender: Arc::new(ResourceRequestSender::new(repos.clone(), queue)),
        repos,
        liveness,
    };
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown requested");
        })
        .await
        .context("Server error")?;

    // Consumers settle the message in hand before stopping
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("Background tasks already stopped");
    }
    for task in updaters.into_iter().chain(tasks) {
        if let Err(e) = task.await {
            tracing::warn!("Background task panicked: {}", e);
        }
    }
    if let Some(pool) = runners {
        pool.join().await;
    }

    tracing::info!("Relay Orchestrator stopped");
    Ok(())
}

/// Spawns the deployment status consumers
fn start_updaters(
    config: &OrchestratorConfig,
    repos: &Repositories,
    queue: &RequestQueue,
    broker: &Arc<dyn SessionBroker>,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let updater = Arc::new(DeploymentStatusUpdater::new(repos.clone(), queue.clone()));

    (0..config.updater_consumers)
        .map(|index| {
            let consumer = SessionConsumer::new(
                format!("updater-{}", index),
                Arc::clone(broker),
                updater.clone(),
                ConsumerSettings::new(
                    config.deployment_status_queue.clone(),
                    config.updater_max_lock_renewal,
                ),
            );
            let shutdown = shutdown.clone();
            tokio::spawn(async move { consumer.run(shutdown).await })
        })
        .collect()
}
