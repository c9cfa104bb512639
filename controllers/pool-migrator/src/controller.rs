//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the pool client,
//! the migration orchestrator and the reconciler together, and runs the
//! ReplicaPool watcher next to the probe server.

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::probes::{self, ProbeState};
use crate::reconciler::Reconciler;
use crate::settings::Settings;
use crate::watcher::Watcher;
use crds::ReplicaPool;
use kube::{Api, Client};
use pool_client::{KubePoolClient, PoolClientTrait};
use pool_migration::MigrationOrchestrator;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for replica pool management.
pub struct Controller {
    replica_pool_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(settings: Settings) -> Result<Self, ControllerError> {
        info!("Initializing Pool Migrator");

        let kube_client = Client::try_default().await?;
        let pool_client: Arc<dyn PoolClientTrait> = Arc::new(KubePoolClient::new(kube_client.clone()));
        let orchestrator = Arc::new(MigrationOrchestrator::new(
            Arc::clone(&pool_client),
            settings.migration.clone(),
        ));
        let metrics = Arc::new(Metrics::new()?);

        let reconciler = Arc::new(Reconciler::new(
            kube_client.clone(),
            pool_client,
            orchestrator,
            Arc::clone(&metrics),
        ));

        let replica_pool_api: Api<ReplicaPool> = match settings.namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client, ns),
            None => Api::all(kube_client),
        };
        let watcher = Watcher::new(reconciler, replica_pool_api);

        let ready = Arc::new(AtomicBool::new(false));
        let probe_server = {
            let state = ProbeState {
                metrics,
                ready: Arc::clone(&ready),
            };
            let addr = settings.probe_addr;
            tokio::spawn(async move { probes::serve(addr, state).await })
        };

        let replica_pool_watcher = tokio::spawn(async move { watcher.watch_replica_pools().await });
        ready.store(true, Ordering::Release);

        Ok(Self {
            replica_pool_watcher,
            probe_server,
        })
    }

    /// Runs until the watcher or the probe server exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Pool Migrator running");

        tokio::select! {
            result = &mut self.replica_pool_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ReplicaPool watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("ReplicaPool watcher error: {}", e)))?;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))??;
            }
        }

        Err(ControllerError::Watch("background task exited unexpectedly".to_string()))
    }
}
