//! Mock PoolClient for unit testing
//!
//! This module provides an in-memory implementation of [`PoolClientTrait`]
//! that behaves like a replication controller manager: creating or scaling a
//! pool creates or removes matching workers, and the pool's observed state
//! catches up immediately unless the pool has been stalled.

use crate::error::PoolError;
use crate::models::*;
use crate::pool_trait::PoolClientTrait;
use chrono::{Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// A mutating call observed by the mock, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// Pool created with the given target
    Created { name: String, target: i32 },
    /// Pool replaced with the given target
    Updated { name: String, target: i32 },
    /// Pool deleted
    Deleted { name: String },
}

/// Operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolOp {
    Get,
    Create,
    Update,
    Delete,
    ListWorkers,
}

/// Mock PoolClient for testing
#[derive(Clone, Default)]
pub struct MockPoolClient {
    pools: Arc<Mutex<HashMap<PoolRef, Pool>>>,
    // Keyed by (namespace, name)
    workers: Arc<Mutex<BTreeMap<(String, String), WorkerInstance>>>,
    events: Arc<Mutex<Vec<PoolEvent>>>,
    stalled: Arc<Mutex<HashSet<PoolRef>>>,
    failures: Arc<Mutex<HashMap<PoolOp, String>>>,
    fresh_workers: Arc<Mutex<bool>>,
    next_id: Arc<Mutex<u64>>,
}

impl MockPoolClient {
    /// Create an empty mock
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a pool directly into the store (for test setup).
    ///
    /// Server-assigned fields are filled in and workers are reconciled, but
    /// no event is recorded.
    pub fn insert_pool(&self, mut pool: Pool) -> Pool {
        pool.uid = Some(format!("uid-{}", self.next_id()));
        pool.resource_version = Some(self.next_id().to_string());
        pool.generation = Some(1);
        self.settle(&mut pool);
        self.pools.lock().unwrap().insert(pool.pool_ref(), pool.clone());
        pool
    }

    /// Current stored copy of a pool
    pub fn pool(&self, namespace: &str, name: &str) -> Option<Pool> {
        self.pools
            .lock()
            .unwrap()
            .get(&PoolRef::new(namespace, name))
            .cloned()
    }

    /// Names of all pools in a namespace, sorted
    pub fn pool_names(&self, namespace: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .pools
            .lock()
            .unwrap()
            .keys()
            .filter(|r| r.namespace == namespace)
            .map(|r| r.name.clone())
            .collect();
        names.sort();
        names
    }

    /// All workers in a namespace, sorted by name
    pub fn workers(&self, namespace: &str) -> Vec<WorkerInstance> {
        self.workers
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, w)| w.clone())
            .collect()
    }

    /// Mutating calls seen so far
    pub fn events(&self) -> Vec<PoolEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Forget recorded events
    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Stop (or resume) the controller of a pool: a stalled pool keeps its
    /// declared target but never reports having reached it.
    /// Resuming a pool lets it catch up at once.
    pub fn set_stalled(&self, namespace: &str, name: &str, stalled: bool) {
        let pool_ref = PoolRef::new(namespace, name);
        if stalled {
            self.stalled.lock().unwrap().insert(pool_ref);
            return;
        }
        self.stalled.lock().unwrap().remove(&pool_ref);
        let Some(mut pool) = self.pools.lock().unwrap().remove(&pool_ref) else {
            return;
        };
        self.settle(&mut pool);
        self.pools.lock().unwrap().insert(pool_ref, pool);
    }

    /// New workers report containers that started just now instead of an
    /// hour ago.
    pub fn set_fresh_workers(&self, fresh: bool) {
        *self.fresh_workers.lock().unwrap() = fresh;
    }

    /// Override worker-level readiness of a worker
    pub fn set_worker_ready(&self, namespace: &str, name: &str, ready: bool) {
        if let Some(worker) = self
            .workers
            .lock()
            .unwrap()
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            worker.ready = ready;
        }
    }

    /// Make the next call of `op` fail with `message`
    pub fn fail_next(&self, op: PoolOp, message: impl Into<String>) {
        self.failures.lock().unwrap().insert(op, message.into());
    }

    fn check_failure(&self, op: PoolOp) -> Result<(), PoolError> {
        match self.failures.lock().unwrap().remove(&op) {
            Some(message) => Err(PoolError::InvalidRequest(message)),
            None => Ok(()),
        }
    }

    fn next_id(&self) -> u64 {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        *id
    }

    fn record(&self, event: PoolEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Act as the pool's controller: bring matching workers to the target
    /// and publish the observed state.
    fn settle(&self, pool: &mut Pool) {
        if self.stalled.lock().unwrap().contains(&pool.pool_ref()) {
            return;
        }
        self.reconcile_workers(pool);
        pool.observed_generation = pool.generation;
        pool.observed_replicas = pool.target_replicas;
    }

    fn reconcile_workers(&self, pool: &Pool) {
        let selector = effective_selector(pool);
        let mut workers = self.workers.lock().unwrap();
        let matching: Vec<(String, String)> = workers
            .iter()
            .filter(|((ns, _), w)| *ns == pool.namespace && selector_matches(&selector, &w.labels))
            .map(|(key, _)| key.clone())
            .collect();

        let target = pool.target_replicas.max(0) as usize;
        if matching.len() > target {
            for key in matching.iter().rev().take(matching.len() - target) {
                workers.remove(key);
            }
            return;
        }

        let running_since = if *self.fresh_workers.lock().unwrap() {
            Utc::now()
        } else {
            Utc::now() - Duration::hours(1)
        };
        for _ in matching.len()..target {
            let name = format!("{}-{}", pool.name, self.next_id());
            let worker = WorkerInstance {
                name: name.clone(),
                namespace: pool.namespace.clone(),
                labels: pool.template.labels.clone(),
                ready: true,
                declared_components: pool.template.containers.len(),
                components: pool
                    .template
                    .containers
                    .iter()
                    .map(|c| ComponentStatus {
                        name: c.name.clone(),
                        ready: true,
                        running_since: Some(running_since),
                    })
                    .collect(),
                started_at: Some(running_since),
            };
            workers.insert((pool.namespace.clone(), name), worker);
        }
    }
}

fn effective_selector(pool: &Pool) -> LabelSelector {
    if pool.selector.is_empty() {
        pool.template.labels.clone()
    } else {
        pool.selector.clone()
    }
}

#[async_trait::async_trait]
impl PoolClientTrait for MockPoolClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Pool, PoolError> {
        self.check_failure(PoolOp::Get)?;
        self.pool(namespace, name)
            .ok_or_else(|| PoolError::NotFound(format!("{namespace}/{name}")))
    }

    async fn create(&self, pool: &Pool) -> Result<Pool, PoolError> {
        self.check_failure(PoolOp::Create)?;
        if pool.resource_version.is_some() || pool.uid.is_some() {
            return Err(PoolError::InvalidRequest(format!(
                "pool {} carries server-assigned metadata",
                pool.pool_ref()
            )));
        }
        if self.pool(&pool.namespace, &pool.name).is_some() {
            return Err(PoolError::Conflict(format!("pool {} already exists", pool.pool_ref())));
        }

        let mut created = pool.clone();
        created.uid = Some(format!("uid-{}", self.next_id()));
        created.resource_version = Some(self.next_id().to_string());
        created.generation = Some(1);
        created.observed_generation = None;
        created.observed_replicas = 0;
        self.settle(&mut created);

        self.pools
            .lock()
            .unwrap()
            .insert(created.pool_ref(), created.clone());
        self.record(PoolEvent::Created {
            name: created.name.clone(),
            target: created.target_replicas,
        });
        Ok(created)
    }

    async fn update(&self, pool: &Pool) -> Result<Pool, PoolError> {
        self.check_failure(PoolOp::Update)?;
        let current = self
            .pool(&pool.namespace, &pool.name)
            .ok_or_else(|| PoolError::NotFound(pool.pool_ref().id()))?;
        if pool.resource_version.is_some() && pool.resource_version != current.resource_version {
            return Err(PoolError::Conflict(format!(
                "pool {} was modified concurrently",
                pool.pool_ref()
            )));
        }

        let spec_changed = pool.target_replicas != current.target_replicas
            || pool.selector != current.selector
            || pool.template != current.template;
        let mut updated = pool.clone();
        updated.uid = current.uid.clone();
        updated.resource_version = Some(self.next_id().to_string());
        updated.observed_generation = current.observed_generation;
        updated.observed_replicas = current.observed_replicas;
        updated.generation = match current.generation {
            Some(generation) if spec_changed => Some(generation + 1),
            other => other,
        };
        self.settle(&mut updated);

        self.pools
            .lock()
            .unwrap()
            .insert(updated.pool_ref(), updated.clone());
        self.record(PoolEvent::Updated {
            name: updated.name.clone(),
            target: updated.target_replicas,
        });
        Ok(updated)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), PoolError> {
        self.check_failure(PoolOp::Delete)?;
        self.pools
            .lock()
            .unwrap()
            .remove(&PoolRef::new(namespace, name))
            .ok_or_else(|| PoolError::NotFound(format!("{namespace}/{name}")))?;
        self.record(PoolEvent::Deleted { name: name.to_string() });
        Ok(())
    }

    async fn list_workers(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<WorkerInstance>, PoolError> {
        self.check_failure(PoolOp::ListWorkers)?;
        Ok(self
            .workers(namespace)
            .into_iter()
            .filter(|w| selector_matches(selector, &w.labels))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{Container, WorkerTemplate};

    fn pool(name: &str, generation: &str, replicas: i32) -> Pool {
        let labels: LabelSelector = [("app", "web"), ("deployment", generation)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut pool = Pool::new("default", name);
        pool.target_replicas = replicas;
        pool.selector = labels.clone();
        pool.template = WorkerTemplate {
            labels,
            containers: vec![Container {
                name: "web".to_string(),
                image: "web:1".to_string(),
                image_pull_policy: None,
                termination_message_path: None,
                command: vec![],
                args: vec![],
                working_dir: None,
                ports: vec![],
                env: vec![],
                volume_mounts: vec![],
                liveness_probe: None,
                readiness_probe: None,
                resources: None,
            }],
            ..WorkerTemplate::default()
        };
        pool
    }

    #[tokio::test]
    async fn test_create_scales_workers() {
        let mock = MockPoolClient::new();
        let created = mock.create(&pool("web", "g1", 3)).await.unwrap();
        assert!(created.has_desired_replicas());
        assert_eq!(mock.workers("default").len(), 3);

        let mut scaled = mock.get("default", "web").await.unwrap();
        scaled.target_replicas = 1;
        let scaled = mock.update(&scaled).await.unwrap();
        assert_eq!(scaled.generation, Some(2));
        assert_eq!(mock.workers("default").len(), 1);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let mock = MockPoolClient::new();
        let created = mock.create(&pool("web", "g1", 1)).await.unwrap();
        mock.update(&created).await.unwrap();
        let err = mock.update(&created).await.unwrap_err();
        assert!(matches!(err, PoolError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_stalled_pool_never_converges() {
        let mock = MockPoolClient::new();
        mock.set_stalled("default", "web", true);
        let created = mock.create(&pool("web", "g1", 2)).await.unwrap();
        assert!(!created.has_desired_replicas());
        assert!(mock.workers("default").is_empty());
    }

    #[tokio::test]
    async fn test_delete_orphans_and_recreate_adopts() {
        let mock = MockPoolClient::new();
        mock.create(&pool("web", "g1", 2)).await.unwrap();
        let before: Vec<String> = mock.workers("default").into_iter().map(|w| w.name).collect();

        mock.delete("default", "web").await.unwrap();
        assert_eq!(mock.workers("default").len(), 2);

        mock.create(&pool("web", "g1", 2)).await.unwrap();
        let after: Vec<String> = mock.workers("default").into_iter().map(|w| w.name).collect();
        assert_eq!(before, after);

        assert_eq!(
            mock.events(),
            vec![
                PoolEvent::Created { name: "web".to_string(), target: 2 },
                PoolEvent::Deleted { name: "web".to_string() },
                PoolEvent::Created { name: "web".to_string(), target: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let mock = MockPoolClient::new();
        mock.fail_next(PoolOp::Get, "boom");
        assert!(mock.get("default", "web").await.is_err());
        assert!(mock.get("default", "web").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_workers_filters_by_selector() {
        let mock = MockPoolClient::new();
        mock.create(&pool("web", "g1", 2)).await.unwrap();
        mock.create(&pool("web-tmp", "g2", 1)).await.unwrap();

        let g2 = pool("x", "g2", 0).selector;
        assert_eq!(mock.list_workers("default", &g2).await.unwrap().len(), 1);
        assert!(mock.list_workers("other", &g2).await.unwrap().is_empty());
    }
}
