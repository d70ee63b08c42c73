//! Worker pool
//!
//! Starts `number_processes` workers. Each worker owns its own credential and
//! session consumer and processes one resource request at a time; workers
//! share nothing but the broker and the command runner.

use anyhow::{Context, Result};
use relay_bus::{ConsumerSettings, SessionBroker, SessionConsumer};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};

use crate::command::CommandRunner;
use crate::config::RunnerConfig;
use crate::credential::Credential;
use crate::scheduler::watchdog::WorkerFlag;
use crate::service::{DeploymentService, RequestHandler};

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    flags: Vec<WorkerFlag>,
}

impl WorkerPool {
    /// Spawns the workers; they run until `shutdown` turns true
    pub fn start(
        config: Arc<RunnerConfig>,
        broker: Arc<dyn SessionBroker>,
        command_runner: Arc<dyn CommandRunner>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let count = config.number_processes.max(1);
        info!("Starting {} processes...", count);

        let mut handles = Vec::with_capacity(count);
        let mut flags = Vec::with_capacity(count);

        for index in 0..count {
            let flag = WorkerFlag::new();
            let guard = flag.guard();
            let config = Arc::clone(&config);
            let broker = Arc::clone(&broker);
            let command_runner = Arc::clone(&command_runner);
            let shutdown = shutdown.clone();

            let handle = tokio::spawn(
                async move {
                    let _guard = guard;
                    if let Err(e) = run_worker(index, config, broker, command_runner, shutdown).await {
                        error!("Runner {} failed: {:#}", index, e);
                    }
                }
                .instrument(info_span!("runner", index)),
            );

            handles.push(handle);
            flags.push(flag);
        }

        Self { handles, flags }
    }

    /// Alive flags of every worker, for `check_runners`
    pub fn workers(&self) -> Vec<WorkerFlag> {
        self.flags.clone()
    }

    pub fn alive_count(&self) -> usize {
        self.flags.iter().filter(|f| f.is_alive()).count()
    }

    /// Waits for every worker to stop
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Runner task panicked: {}", e);
            }
        }
    }
}

async fn run_worker(
    index: usize,
    config: Arc<RunnerConfig>,
    broker: Arc<dyn SessionBroker>,
    command_runner: Arc<dyn CommandRunner>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let credential = Arc::new(Credential::open(&config).context("Failed to open credential")?);

    let service = DeploymentService::new(
        Arc::clone(&config),
        Arc::clone(&credential),
        command_runner,
        Arc::clone(&broker),
    );
    let handler = Arc::new(RequestHandler::new(Arc::new(service)));
    let settings = ConsumerSettings::new(config.resource_request_queue.clone(), config.max_lock_renewal);
    let consumer = SessionConsumer::new(format!("runner-{}", index), broker, handler, settings);

    consumer.run(shutdown).await;

    credential.close();
    info!("Runner {} finished", index);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::{ScriptedRunner, ok};
    use crate::scheduler::{Liveness, check_runners};
    use relay_bus::{InMemoryBroker, OutgoingMessage};
    use relay_core::domain::status::Status;
    use relay_core::dto::status_update::DeploymentStatusUpdateMessage;
    use std::time::Duration;

    const REQUEST_QUEUE: &str = "resource-request";
    const STATUS_QUEUE: &str = "deployment-status-update";

    #[tokio::test]
    async fn test_pool_without_identity_trips_liveness() {
        let config = Arc::new(RunnerConfig {
            number_processes: 2,
            ..Default::default()
        });
        let broker = InMemoryBroker::new([REQUEST_QUEUE, STATUS_QUEUE]);
        let (_tx, rx) = watch::channel(false);

        let pool = WorkerPool::start(
            config,
            Arc::new(broker),
            Arc::new(ScriptedRunner::new(|_| ok(""))),
            rx.clone(),
        );
        let workers = pool.workers();
        pool.join().await;

        let liveness = Liveness::new();
        check_runners(workers, liveness.clone(), Duration::from_millis(10), rx).await;
        assert!(!liveness.is_alive());
    }

    #[tokio::test]
    async fn test_pool_processes_requests() {
        let config = Arc::new(RunnerConfig {
            vmss_msi_id: Some("msi".to_string()),
            number_processes: 2,
            ..Default::default()
        });
        let broker = InMemoryBroker::new([REQUEST_QUEUE, STATUS_QUEUE]);
        let body = r#"{
            "id": "0f8e7d6c-5b4a-4392-8170-6f5e4d3c2b1a",
            "action": "install",
            "stepId": "main",
            "operationId": "1a2b3c4d-5e6f-4a8b-9c0d-1e2f3a4b5c6d",
            "name": "tre-workspace-base",
            "version": "0.4.0"
        }"#;
        broker
            .send(
                REQUEST_QUEUE,
                OutgoingMessage::new(
                    body.as_bytes().to_vec(),
                    "0f8e7d6c-5b4a-4392-8170-6f5e4d3c2b1a",
                    "1a2b3c4d-5e6f-4a8b-9c0d-1e2f3a4b5c6d",
                ),
            )
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let pool = WorkerPool::start(
            config,
            Arc::new(broker.clone()),
            Arc::new(ScriptedRunner::new(|_| ok(""))),
            rx,
        );
        assert_eq!(pool.alive_count(), 2);

        let mut sent = Vec::new();
        for _ in 0..100 {
            sent = broker.pending_messages(STATUS_QUEUE).await.unwrap();
            if sent.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tx.send(true).unwrap();
        pool.join().await;

        assert_eq!(sent.len(), 2);
        let done = DeploymentStatusUpdateMessage::parse(&sent[1].body).unwrap();
        assert_eq!(done.status, Status::Deployed);
        assert!(broker.pending_messages(REQUEST_QUEUE).await.unwrap().is_empty());
    }
}
