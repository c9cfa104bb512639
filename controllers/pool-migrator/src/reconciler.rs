//! ReplicaPool reconciler
//!
//! Each ReplicaPool owns the pool of the same name in its namespace:
//!
//! - no pool yet: create it from the spec;
//! - pool already matches the spec: report it as ready;
//! - anything else: hand the spec to the migration orchestrator in a spawned
//!   task, so a cross-scale that takes minutes does not hold up other
//!   resources.
//!
//! A pool with a run in flight is skipped until that run ends. Failed runs
//! are retried forward, spaced by a Fibonacci backoff per pool. The status
//! records the generation a run migrates to, so a retry carries on with the
//! replacement pool the failed run left behind. Deleting the ReplicaPool
//! deletes the pool through a finalizer.

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::status::{failed_status, migrating_status, ready_status, status_needs_update, status_patch};
use chrono::Utc;
use crds::{PoolConfig, ReplicaPool, ReplicaPoolStatus};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::finalizer::{Event as FinalizerEvent, finalizer};
use pool_client::{Pool, PoolClientTrait, PoolRef};
use pool_migration::{
    GenerationId, MigrationError, MigrationOrchestrator, MigrationOutcome, create_pool,
    delete_pool, pool_exists, pool_in_sync,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Finalizer that deletes the pool together with its ReplicaPool.
pub const POOL_FINALIZER: &str = "poolshift.microscaler.io/pool-cleanup";

/// Recheck interval for a pool whose run is still in flight.
const IN_FLIGHT_REQUEUE: Duration = Duration::from_secs(30);

/// Requeue interval after a reconciliation error.
const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Backoff state for one pool's failed runs
#[derive(Debug)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
    retry_at: Option<Instant>,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(1, 10), // 1 minute min, 10 minutes max
            error_count: 0,
            retry_at: None,
        }
    }

    /// Record a failure at `now` and return the delay before the next attempt.
    fn increment_error(&mut self, now: Instant) -> Duration {
        self.error_count += 1;
        let delay = self.backoff.next_backoff();
        self.retry_at = Some(now + delay);
        delay
    }

    /// Time left until the next attempt is due, if any.
    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.retry_at
            .and_then(|at| at.checked_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.retry_at = None;
        self.backoff.reset();
    }
}

/// Pools with a run in flight.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    pools: Arc<Mutex<HashSet<PoolRef>>>,
}

impl InFlight {
    /// Claim `pool_ref`. `None` if a run for it is already in flight.
    pub fn try_acquire(&self, pool_ref: &PoolRef) -> Option<InFlightGuard> {
        let mut pools = self.pools.lock().ok()?;
        pools.insert(pool_ref.clone()).then(|| InFlightGuard {
            pools: Arc::clone(&self.pools),
            pool_ref: pool_ref.clone(),
        })
    }

    pub fn contains(&self, pool_ref: &PoolRef) -> bool {
        self.pools.lock().is_ok_and(|pools| pools.contains(pool_ref))
    }
}

/// Releases its pool when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    pools: Arc<Mutex<HashSet<PoolRef>>>,
    pool_ref: PoolRef,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut pools) = self.pools.lock() {
            pools.remove(&self.pool_ref);
        }
    }
}

/// What a reconciliation has to do for a pool.
#[derive(Debug)]
pub enum PoolPlan {
    /// The pool does not exist yet
    Create,
    /// The pool already matches the spec
    InSync(Pool),
    /// The spec has to be applied by the orchestrator
    Apply,
}

/// Decide what `desired` requires of the pool at `pool_ref`.
pub async fn plan_pool(
    client: &dyn PoolClientTrait,
    pool_ref: &PoolRef,
    desired: &PoolConfig,
) -> Result<PoolPlan, MigrationError> {
    if !pool_exists(client, pool_ref).await? {
        return Ok(PoolPlan::Create);
    }
    if pool_in_sync(client, pool_ref, desired).await? {
        let pool = client.get(&pool_ref.namespace, &pool_ref.name).await?;
        return Ok(PoolPlan::InSync(pool));
    }
    Ok(PoolPlan::Apply)
}

/// Generation id for the next run: the pending one recorded in `status` when
/// its replacement pool can be carried on, a fresh one otherwise.
pub async fn run_generation(
    orchestrator: &MigrationOrchestrator,
    pool_ref: &PoolRef,
    desired: &PoolConfig,
    status: Option<&ReplicaPoolStatus>,
) -> Result<GenerationId, MigrationError> {
    let pending = status.and_then(|s| s.pending_generation.as_deref());
    orchestrator.resume_generation(pool_ref, desired, pending).await
}

/// The pool a ReplicaPool owns.
pub fn pool_ref_of(replica_pool: &ReplicaPool) -> PoolRef {
    PoolRef::new(
        replica_pool.namespace().unwrap_or_else(|| "default".to_string()),
        replica_pool.name_any(),
    )
}

/// Reconciles ReplicaPool resources.
#[derive(Clone)]
pub struct Reconciler {
    kube_client: Client,
    pool_client: Arc<dyn PoolClientTrait>,
    orchestrator: Arc<MigrationOrchestrator>,
    metrics: Arc<Metrics>,
    in_flight: InFlight,
    /// Error count tracking per pool (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    pub fn new(
        kube_client: Client,
        pool_client: Arc<dyn PoolClientTrait>,
        orchestrator: Arc<MigrationOrchestrator>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            kube_client,
            pool_client,
            orchestrator,
            metrics,
            in_flight: InFlight::default(),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reconcile one ReplicaPool, routing deletions through the finalizer.
    pub async fn reconcile_replica_pool(&self, replica_pool: Arc<ReplicaPool>) -> Result<Action, ControllerError> {
        let api = self.replica_pools(&pool_ref_of(&replica_pool).namespace);
        finalizer(&api, POOL_FINALIZER, replica_pool, |event| async move {
            match event {
                FinalizerEvent::Apply(replica_pool) => self.apply(&replica_pool).await,
                FinalizerEvent::Cleanup(replica_pool) => self.cleanup(&replica_pool).await,
            }
        })
        .await
        .map_err(|e| ControllerError::Finalizer(Box::new(e)))
    }

    /// Requeue policy for failed reconciliations.
    pub fn error_action(&self, replica_pool: &ReplicaPool, error: &ControllerError) -> Action {
        error!(
            pool = %pool_ref_of(replica_pool),
            error = %error,
            "ReplicaPool reconciliation failed"
        );
        Action::requeue(ERROR_REQUEUE)
    }

    async fn apply(&self, replica_pool: &ReplicaPool) -> Result<Action, ControllerError> {
        let pool_ref = pool_ref_of(replica_pool);
        let desired = &replica_pool.spec.config;
        let current_status = replica_pool.status.as_ref();

        if let Err(e) = desired.validate() {
            warn!(pool = %pool_ref, error = %e, "ReplicaPool spec is invalid, waiting for a change");
            self.write_status(&pool_ref, current_status, failed_status(current_status, e.to_string()))
                .await?;
            return Ok(Action::await_change());
        }

        if self.in_flight.contains(&pool_ref) {
            debug!(pool = %pool_ref, "Run already in flight, skipping");
            return Ok(Action::requeue(IN_FLIGHT_REQUEUE));
        }

        if let Some(remaining) = self.retry_pending(&pool_ref.id()) {
            debug!(pool = %pool_ref, retry_in = ?remaining, "Backing off after failed run");
            return Ok(Action::requeue(remaining));
        }

        let pending = current_status.and_then(|s| s.pending_generation.clone());
        match plan_pool(self.pool_client.as_ref(), &pool_ref, desired).await? {
            PoolPlan::Create => {
                let pool = create_pool(self.pool_client.as_ref(), &pool_ref, desired).await?;
                self.metrics.pools_created.inc();
                self.write_status(&pool_ref, current_status, ready_status(&pool)).await?;
                Ok(Action::await_change())
            }
            PoolPlan::InSync(pool) if pending.is_none() => {
                debug!(pool = %pool_ref, "Pool already matches its spec");
                self.write_status(&pool_ref, current_status, ready_status(&pool)).await?;
                Ok(Action::await_change())
            }
            // An unfinished migration still has a replacement to settle.
            PoolPlan::InSync(_) | PoolPlan::Apply => {
                let Some(guard) = self.in_flight.try_acquire(&pool_ref) else {
                    return Ok(Action::requeue(IN_FLIGHT_REQUEUE));
                };
                let started = migrating_status(current_status, pending);
                self.write_status(&pool_ref, current_status, started.clone())
                    .await?;
                self.metrics.migrations_started.inc();
                info!(pool = %pool_ref, "Starting run towards new spec");

                let this = self.clone();
                let desired = desired.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    this.run(pool_ref, desired, started).await;
                });
                Ok(Action::await_change())
            }
        }
    }

    /// Drive one run to its end and report the result on the ReplicaPool.
    async fn run(&self, pool_ref: PoolRef, desired: PoolConfig, started: ReplicaPoolStatus) {
        let key = pool_ref.id();
        let result = match self.migrate(&pool_ref, &desired, &started).await {
            Ok(outcome) => {
                self.metrics.record_outcome(&outcome);
                self.reset_error(&key);
                info!(
                    pool = %pool_ref,
                    replicas = outcome.pool.target_replicas,
                    scale_steps = outcome.scale_steps(),
                    "Pool matches its spec"
                );
                Ok(outcome.pool)
            }
            Err(e) => {
                self.metrics.migrations_failed.inc();
                let (retry_in, error_count) = self.increment_error(&key);
                warn!(
                    pool = %pool_ref,
                    error = %e,
                    error_count,
                    retry_in = ?retry_in,
                    "Run failed, will carry it forward after backoff"
                );
                Err(e.to_string())
            }
        };

        // The ReplicaPool may have changed or gone away during the run.
        let api = self.replica_pools(&pool_ref.namespace);
        match api.get_opt(&pool_ref.name).await {
            Ok(Some(latest)) => {
                let current = latest.status.as_ref();
                let status = match &result {
                    Ok(pool) => ready_status(pool),
                    Err(message) => failed_status(current, message.clone()),
                };
                if let Err(e) = self.write_status(&pool_ref, current, status).await {
                    error!(pool = %pool_ref, error = %e, "Failed to report run result");
                }
            }
            Ok(None) => debug!(pool = %pool_ref, "ReplicaPool deleted during run"),
            Err(e) => error!(pool = %pool_ref, error = %e, "Failed to read ReplicaPool after run"),
        }
    }

    /// Record the generation the run migrates to, then apply the spec with it.
    async fn migrate(
        &self,
        pool_ref: &PoolRef,
        desired: &PoolConfig,
        started: &ReplicaPoolStatus,
    ) -> Result<MigrationOutcome, ControllerError> {
        let generation = run_generation(&self.orchestrator, pool_ref, desired, Some(started)).await?;
        let mut recorded = started.clone();
        recorded.pending_generation = Some(generation.to_string());
        self.write_status(pool_ref, Some(started), recorded).await?;

        Ok(self
            .orchestrator
            .apply_with_generation(pool_ref, desired, generation.as_str())
            .await?)
    }

    async fn cleanup(&self, replica_pool: &ReplicaPool) -> Result<Action, ControllerError> {
        let pool_ref = pool_ref_of(replica_pool);
        self.delete_if_present(&pool_ref).await?;

        let pending = replica_pool
            .status
            .as_ref()
            .and_then(|s| s.pending_generation.as_deref())
            .and_then(|raw| GenerationId::parse(raw).ok());
        if let Some(generation) = pending {
            let replacement = pool_ref.with_name(generation.replacement_name(&pool_ref.name));
            self.delete_if_present(&replacement).await?;
        }

        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(&pool_ref.id());
        }
        Ok(Action::await_change())
    }

    async fn delete_if_present(&self, pool_ref: &PoolRef) -> Result<(), ControllerError> {
        match delete_pool(self.pool_client.as_ref(), pool_ref).await {
            Ok(()) => Ok(()),
            Err(MigrationError::Pool(e)) if e.is_not_found() => {
                debug!(pool = %pool_ref, "Pool already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_status(
        &self,
        pool_ref: &PoolRef,
        current: Option<&ReplicaPoolStatus>,
        desired: ReplicaPoolStatus,
    ) -> Result<(), ControllerError> {
        if !status_needs_update(current, &desired) {
            return Ok(());
        }
        let patch = status_patch(&desired, Utc::now());
        self.replica_pools(&pool_ref.namespace)
            .patch_status(&pool_ref.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(pool = %pool_ref, phase = ?desired.phase, "Updated ReplicaPool status");
        Ok(())
    }

    fn replica_pools(&self, namespace: &str) -> Api<ReplicaPool> {
        Api::namespaced(self.kube_client.clone(), namespace)
    }

    /// Time left before a failed pool may be retried
    fn retry_pending(&self, resource_key: &str) -> Option<Duration> {
        let states = self.backoff_states.lock().ok()?;
        states.get(resource_key)?.remaining(Instant::now())
    }

    /// Record a failed run; returns (retry delay, error count)
    fn increment_error(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                let delay = state.increment_error(Instant::now());
                (delay, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, retrying without backoff", e);
                (Duration::ZERO, 0)
            }
        }
    }

    /// Reset error count for a pool (on a successful run)
    fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pool_client::MockPoolClient;
    use pool_migration::MigrationConfig;

    fn config(image: &str) -> PoolConfig {
        PoolConfig::from_yaml(&format!(
            r#"
replicas: 2
template:
  labels: {{ app: web }}
  containers:
    - name: web
      image: {image}
"#
        ))
        .unwrap()
    }

    #[test]
    fn test_backoff_state_schedules_retries() {
        let now = Instant::now();
        let mut state = BackoffState::new();
        assert_eq!(state.remaining(now), None);

        assert_eq!(state.increment_error(now), Duration::from_secs(60));
        assert_eq!(state.remaining(now), Some(Duration::from_secs(60)));
        assert_eq!(state.remaining(now + Duration::from_secs(45)), Some(Duration::from_secs(15)));
        assert_eq!(state.remaining(now + Duration::from_secs(60)), None);

        assert_eq!(state.increment_error(now), Duration::from_secs(60));
        assert_eq!(state.increment_error(now), Duration::from_secs(120));
        assert_eq!(state.error_count, 3);

        state.reset();
        assert_eq!(state.error_count, 0);
        assert_eq!(state.remaining(now), None);
        assert_eq!(state.increment_error(now), Duration::from_secs(60));
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let in_flight = InFlight::default();
        let web = PoolRef::new("default", "web");
        let api = PoolRef::new("default", "api");

        let guard = in_flight.try_acquire(&web).unwrap();
        assert!(in_flight.contains(&web));
        assert!(in_flight.try_acquire(&web).is_none());

        let other = in_flight.try_acquire(&api);
        assert!(other.is_some());

        drop(guard);
        assert!(!in_flight.contains(&web));
        assert!(in_flight.try_acquire(&web).is_some());
    }

    #[tokio::test]
    async fn test_plan_for_missing_pool_is_create() {
        let mock = MockPoolClient::new();
        let plan = plan_pool(&mock, &PoolRef::new("default", "web"), &config("web:1"))
            .await
            .unwrap();
        assert!(matches!(plan, PoolPlan::Create));
    }

    #[tokio::test]
    async fn test_plan_follows_spec_changes() {
        let mock = MockPoolClient::new();
        let pool_ref = PoolRef::new("default", "web");
        create_pool(&mock, &pool_ref, &config("web:1")).await.unwrap();

        match plan_pool(&mock, &pool_ref, &config("web:1")).await.unwrap() {
            PoolPlan::InSync(pool) => assert_eq!(pool.target_replicas, 2),
            other => panic!("expected InSync, got {other:?}"),
        }
        assert!(matches!(
            plan_pool(&mock, &pool_ref, &config("web:2")).await.unwrap(),
            PoolPlan::Apply
        ));
    }

    async fn interrupted_run(
        mock: &Arc<MockPoolClient>,
        orchestrator: &MigrationOrchestrator,
        pool_ref: &PoolRef,
    ) -> ReplicaPoolStatus {
        let pool = create_pool(mock.as_ref(), pool_ref, &config("web:1")).await.unwrap();
        let started = migrating_status(Some(&ready_status(&pool)), Some("g2".to_string()));

        mock.set_stalled("default", "web", true);
        let err = orchestrator
            .apply_with_generation(pool_ref, &config("web:2"), "g2")
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        mock.set_stalled("default", "web", false);
        assert_eq!(mock.pool_names("default"), vec!["web".to_string(), "web-g2".to_string()]);

        failed_status(Some(&started), err.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_carries_on_with_pending_replacement() {
        let mock = Arc::new(MockPoolClient::new());
        let orchestrator = MigrationOrchestrator::new(mock.clone(), MigrationConfig::default());
        let pool_ref = PoolRef::new("default", "web");
        let failed = interrupted_run(&mock, &orchestrator, &pool_ref).await;

        let generation = run_generation(&orchestrator, &pool_ref, &config("web:2"), Some(&failed))
            .await
            .unwrap();
        assert_eq!(generation.as_str(), "g2");

        let outcome = orchestrator
            .apply_with_generation(&pool_ref, &config("web:2"), generation.as_str())
            .await
            .unwrap();
        assert_eq!(outcome.pool.target_replicas, 2);
        assert_eq!(mock.pool_names("default"), vec!["web".to_string()]);
        assert_eq!(mock.workers("default").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_spec_change_retires_pending_replacement() {
        let mock = Arc::new(MockPoolClient::new());
        let orchestrator = MigrationOrchestrator::new(mock.clone(), MigrationConfig::default());
        let pool_ref = PoolRef::new("default", "web");
        let failed = interrupted_run(&mock, &orchestrator, &pool_ref).await;

        let generation = run_generation(&orchestrator, &pool_ref, &config("web:3"), Some(&failed))
            .await
            .unwrap();
        assert_ne!(generation.as_str(), "g2");
        assert_eq!(mock.pool_names("default"), vec!["web".to_string()]);

        orchestrator
            .apply_with_generation(&pool_ref, &config("web:3"), generation.as_str())
            .await
            .unwrap();
        assert_eq!(mock.pool_names("default"), vec!["web".to_string()]);
        assert_eq!(mock.workers("default").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_left_after_swap_is_deleted_without_its_workers() {
        let mock = Arc::new(MockPoolClient::new());
        let orchestrator = MigrationOrchestrator::new(mock.clone(), MigrationConfig::default());
        let pool_ref = PoolRef::new("default", "web");
        create_pool(mock.as_ref(), &pool_ref, &config("web:1")).await.unwrap();
        orchestrator
            .apply_with_generation(&pool_ref, &config("web:2"), "g2")
            .await
            .unwrap();

        // A run that stopped between recreating the pool and deleting the replacement.
        let mut leftover = mock.pool("default", "web").unwrap();
        leftover.name = "web-g2".to_string();
        mock.insert_pool(leftover);
        let status = ReplicaPoolStatus {
            pending_generation: Some("g2".to_string()),
            ..ReplicaPoolStatus::default()
        };

        let generation = run_generation(&orchestrator, &pool_ref, &config("web:2"), Some(&status))
            .await
            .unwrap();
        assert_ne!(generation.as_str(), "g2");
        assert_eq!(mock.pool_names("default"), vec!["web".to_string()]);
        assert_eq!(mock.workers("default").len(), 2);
    }

    #[tokio::test]
    async fn test_run_without_pending_generation_gets_a_fresh_one() {
        let mock = Arc::new(MockPoolClient::new());
        let orchestrator = MigrationOrchestrator::new(mock.clone(), MigrationConfig::default());
        let pool_ref = PoolRef::new("default", "web");

        let first = run_generation(&orchestrator, &pool_ref, &config("web:1"), None)
            .await
            .unwrap();
        let second = run_generation(&orchestrator, &pool_ref, &config("web:1"), None)
            .await
            .unwrap();
        assert_ne!(first, second);
        assert!(mock.events().is_empty());
    }
}
