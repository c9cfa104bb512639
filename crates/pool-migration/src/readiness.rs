//! Readiness oracle
//!
//! A pool has converged when its controller reports the declared number of
//! replicas for the latest spec, and exactly that many matching workers are
//! ready with every component running for at least the settle duration.

use chrono::{DateTime, Utc};
use pool_client::{Pool, PoolClientTrait, PoolError, PoolRef, WorkerInstance};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Ready and non-ready worker counts for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerCounts {
    /// Ready workers whose components have all settled
    pub ready: usize,
    /// Workers failing their worker-level readiness check
    pub non_ready: usize,
}

/// Count workers the way convergence needs them counted.
///
/// A worker without a ready flag is non-ready. A ready worker that reports no
/// component statuses yet is skipped. A ready worker counts as ready only if
/// it reports every declared component, and each one is ready, running, and
/// has been running since at least `settle` before `now`. Ready workers that
/// have not settled count as neither.
pub fn count_workers(workers: &[WorkerInstance], now: DateTime<Utc>, settle: Duration) -> WorkerCounts {
    let settle = chrono::Duration::from_std(settle).unwrap_or(chrono::Duration::MAX);
    let settled_before = now.checked_sub_signed(settle).unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut counts = WorkerCounts::default();
    for worker in workers {
        if !worker.ready {
            counts.non_ready += 1;
            continue;
        }
        if worker.components.is_empty() {
            continue;
        }
        let settled = worker.components.len() >= worker.declared_components
            && worker.components.iter().all(|c| {
                c.ready && c.running_since.is_some_and(|since| since <= settled_before)
            });
        if settled {
            counts.ready += 1;
        }
    }
    counts
}

/// Decides whether pools have converged, re-reading them from the API.
#[derive(Clone)]
pub struct ReadinessOracle {
    client: Arc<dyn PoolClientTrait>,
    settle: Duration,
}

impl std::fmt::Debug for ReadinessOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessOracle")
            .field("settle", &self.settle)
            .finish_non_exhaustive()
    }
}

impl ReadinessOracle {
    pub fn new(client: Arc<dyn PoolClientTrait>, settle: Duration) -> Self {
        Self { client, settle }
    }

    /// Whether the pool has converged.
    pub async fn pool_converged(&self, pool_ref: &PoolRef) -> Result<bool, PoolError> {
        Ok(self.snapshot(pool_ref).await?.is_some())
    }

    /// The freshly read pool if it has converged, `None` otherwise.
    pub async fn snapshot(&self, pool_ref: &PoolRef) -> Result<Option<Pool>, PoolError> {
        let pool = self.client.get(&pool_ref.namespace, &pool_ref.name).await?;
        if !pool.has_desired_replicas() {
            debug!(
                pool = %pool_ref,
                target = pool.target_replicas,
                observed = pool.observed_replicas,
                "Pool controller has not caught up"
            );
            return Ok(None);
        }
        Ok(self.workers_ready(&pool).await?.then_some(pool))
    }

    /// Whether exactly the declared number of the pool's workers are ready.
    pub async fn workers_ready(&self, pool: &Pool) -> Result<bool, PoolError> {
        let workers = self.client.list_workers(&pool.namespace, &pool.selector).await?;
        let counts = count_workers(&workers, Utc::now(), self.settle);
        debug!(
            pool = %pool.pool_ref(),
            ready = counts.ready,
            non_ready = counts.non_ready,
            target = pool.target_replicas,
            "Checked worker readiness"
        );
        Ok(counts.non_ready == 0 && i32::try_from(counts.ready).is_ok_and(|r| r == pool.target_replicas))
    }

    /// Both pools, freshly read, once both have converged.
    pub async fn crossed(
        &self,
        original: &PoolRef,
        replacement: &PoolRef,
    ) -> Result<Option<(Pool, Pool)>, PoolError> {
        let Some(original) = self.snapshot(original).await? else {
            return Ok(None);
        };
        let Some(replacement) = self.snapshot(replacement).await? else {
            return Ok(None);
        };
        Ok(Some((original, replacement)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pool_client::ComponentStatus;
    use std::collections::BTreeMap;

    const SETTLE: Duration = Duration::from_secs(30);

    fn worker(ready: bool, components: &[(bool, Option<i64>)]) -> WorkerInstance {
        let now = Utc::now();
        WorkerInstance {
            name: "w".to_string(),
            namespace: "default".to_string(),
            labels: BTreeMap::new(),
            ready,
            declared_components: components.len(),
            components: components
                .iter()
                .map(|(ready, age)| ComponentStatus {
                    name: "c".to_string(),
                    ready: *ready,
                    running_since: age.map(|secs| now - chrono::Duration::seconds(secs)),
                })
                .collect(),
            started_at: Some(now),
        }
    }

    #[test]
    fn test_settled_worker_is_ready() {
        let counts = count_workers(&[worker(true, &[(true, Some(31)), (true, Some(600))])], Utc::now(), SETTLE);
        assert_eq!(counts, WorkerCounts { ready: 1, non_ready: 0 });
    }

    #[test]
    fn test_unsettled_worker_counts_as_neither() {
        let counts = count_workers(&[worker(true, &[(true, Some(5))])], Utc::now(), SETTLE);
        assert_eq!(counts, WorkerCounts::default());
    }

    #[test]
    fn test_unready_worker_is_non_ready() {
        let counts = count_workers(&[worker(false, &[(true, Some(600))])], Utc::now(), SETTLE);
        assert_eq!(counts, WorkerCounts { ready: 0, non_ready: 1 });
    }

    #[test]
    fn test_component_not_running_or_not_ready() {
        let workers = [
            worker(true, &[(true, None)]),
            worker(true, &[(false, Some(600))]),
        ];
        assert_eq!(count_workers(&workers, Utc::now(), SETTLE), WorkerCounts::default());
    }

    #[test]
    fn test_missing_component_status_blocks_readiness() {
        let mut w = worker(true, &[(true, Some(600))]);
        w.declared_components = 2;
        assert_eq!(count_workers(&[w], Utc::now(), SETTLE).ready, 0);
    }

    #[test]
    fn test_worker_without_component_statuses_is_skipped() {
        let counts = count_workers(&[worker(true, &[])], Utc::now(), SETTLE);
        assert_eq!(counts, WorkerCounts::default());
    }
}
