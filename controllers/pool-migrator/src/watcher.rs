//! Kubernetes resource watchers.
//!
//! Runs a `kube_runtime::Controller` over ReplicaPool resources. The
//! controller reconnects on its own and keeps watching indefinitely.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::ReplicaPool;
use futures::StreamExt;
use kube::Api;
use kube_runtime::{Controller, controller::Config as ControllerConfig, watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Watches ReplicaPool resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    replica_pool_api: Api<ReplicaPool>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, replica_pool_api: Api<ReplicaPool>) -> Self {
        Self {
            reconciler,
            replica_pool_api,
        }
    }

    /// Starts watching ReplicaPool resources. Only returns once the watch
    /// stream ends.
    pub async fn watch_replica_pools(&self) -> Result<(), ControllerError> {
        info!("Starting ReplicaPool watcher");

        let error_policy = |obj: Arc<ReplicaPool>, error: &ControllerError, ctx: Arc<Reconciler>| {
            ctx.error_action(&obj, error)
        };

        let reconcile = |obj: Arc<ReplicaPool>, ctx: Arc<Reconciler>| async move {
            debug!(
                name = %kube::ResourceExt::name_any(obj.as_ref()),
                "Reconciling ReplicaPool"
            );
            ctx.reconcile_replica_pool(obj).await
        };

        // Concurrency bounds reconciliations, not the runs they spawn.
        let controller_config = ControllerConfig::default()
            .debounce(Duration::from_secs(5))
            .concurrency(3);

        Controller::new(self.replica_pool_api.clone(), watcher::Config::default())
            .with_config(controller_config)
            .run(reconcile, error_policy, Arc::clone(&self.reconciler))
            .for_each(|res| async move {
                match res {
                    Ok((object, _)) => debug!(name = %object.name, "Reconciled ReplicaPool"),
                    Err(e) => error!("Controller error for ReplicaPool: {}", e),
                }
            })
            .await;

        Ok(())
    }
}
