//! Kubernetes pool client
//!
//! Pools are `ReplicationController` objects; workers are the pods matching a
//! pool's selector.

use crate::convert::{from_replication_controller, to_replication_controller, worker_from_pod};
use crate::error::PoolError;
use crate::models::{LabelSelector, Pool, WorkerInstance, selector_string};
use crate::pool_trait::PoolClientTrait;
use k8s_openapi::api::core::v1::{Pod, ReplicationController};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use tracing::debug;

/// Pool client backed by the Kubernetes API
#[derive(Clone)]
pub struct KubePoolClient {
    client: Client,
}

impl KubePoolClient {
    /// Wrap an existing Kubernetes client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the in-cluster or kubeconfig defaults
    pub async fn try_default() -> Result<Self, PoolError> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn pools(&self, namespace: &str) -> Api<ReplicationController> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn workers(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl PoolClientTrait for KubePoolClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Pool, PoolError> {
        debug!("Fetching pool {}/{}", namespace, name);
        match self.pools(namespace).get_opt(name).await? {
            Some(rc) => from_replication_controller(&rc),
            None => Err(PoolError::NotFound(format!("{namespace}/{name}"))),
        }
    }

    async fn create(&self, pool: &Pool) -> Result<Pool, PoolError> {
        if pool.resource_version.is_some() || pool.uid.is_some() {
            return Err(PoolError::InvalidRequest(format!(
                "pool {}/{} carries server-assigned metadata",
                pool.namespace, pool.name
            )));
        }
        debug!(
            "Creating pool {}/{} with {} replicas",
            pool.namespace, pool.name, pool.target_replicas
        );
        let rc = to_replication_controller(pool)?;
        let created = self
            .pools(&pool.namespace)
            .create(&PostParams::default(), &rc)
            .await
            .map_err(|e| PoolError::from_api(e, pool.pool_ref().id()))?;
        from_replication_controller(&created)
    }

    async fn update(&self, pool: &Pool) -> Result<Pool, PoolError> {
        debug!(
            "Updating pool {}/{} to {} replicas",
            pool.namespace, pool.name, pool.target_replicas
        );
        let rc = to_replication_controller(pool)?;
        let replaced = self
            .pools(&pool.namespace)
            .replace(&pool.name, &PostParams::default(), &rc)
            .await
            .map_err(|e| PoolError::from_api(e, pool.pool_ref().id()))?;
        from_replication_controller(&replaced)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), PoolError> {
        debug!("Deleting pool {}/{} (orphaning workers)", namespace, name);
        self.pools(namespace)
            .delete(name, &DeleteParams::orphan())
            .await
            .map_err(|e| PoolError::from_api(e, format!("{namespace}/{name}")))?;
        Ok(())
    }

    async fn list_workers(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<WorkerInstance>, PoolError> {
        let selector = selector_string(selector);
        let params = ListParams::default().labels(&selector);
        let pods = self.workers(namespace).list(&params).await?;
        debug!("Found {} workers in {} matching {}", pods.items.len(), namespace, selector);
        Ok(pods.items.iter().map(worker_from_pod).collect())
    }
}
