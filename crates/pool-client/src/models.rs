//! Pool and worker models
//!
//! These types are the client's view of a replication controller and its
//! pods, reduced to what pool management and migration need.

use crate::error::PoolError;
use chrono::{DateTime, Utc};
use crds::WorkerTemplate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Equality-based label selector (`key=value` for every entry).
pub type LabelSelector = BTreeMap<String, String>;

/// Render a selector in the `k1=v1,k2=v2` form accepted by list calls.
pub fn selector_string(selector: &LabelSelector) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether `labels` contains every entry of `selector`.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Namespace-qualified pool identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolRef {
    /// Namespace
    pub namespace: String,
    /// Pool name
    pub name: String,
}

impl PoolRef {
    /// Create a reference from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a `namespace/name` id.
    pub fn parse_id(id: &str) -> Result<Self, PoolError> {
        match id.split('/').collect::<Vec<_>>().as_slice() {
            [namespace, name] if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(*namespace, *name))
            }
            _ => Err(PoolError::InvalidRequest(format!("invalid pool id: {id:?}"))),
        }
    }

    /// The `namespace/name` id.
    pub fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// A sibling reference in the same namespace.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for PoolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl From<&Pool> for PoolRef {
    fn from(pool: &Pool) -> Self {
        Self::new(pool.namespace.clone(), pool.name.clone())
    }
}

/// A replica pool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pool {
    /// Namespace
    pub namespace: String,
    /// Pool name
    pub name: String,
    /// Declared (desired) replica count
    pub target_replicas: i32,
    /// Replica count last observed by the pool's controller
    pub observed_replicas: i32,
    /// Object generation, bumped on every spec change
    pub generation: Option<i64>,
    /// Generation last acted on by the pool's controller
    pub observed_generation: Option<i64>,
    /// Optimistic-concurrency version token
    pub resource_version: Option<String>,
    /// Server-assigned identity
    pub uid: Option<String>,
    /// Object labels
    pub labels: BTreeMap<String, String>,
    /// Object annotations
    pub annotations: BTreeMap<String, String>,
    /// Worker selector
    pub selector: LabelSelector,
    /// Worker template
    pub template: WorkerTemplate,
}

impl Pool {
    /// An empty pool with the given identity
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Identity of this pool
    pub fn pool_ref(&self) -> PoolRef {
        PoolRef::from(self)
    }

    /// Whether the pool's controller has acted on the latest spec and
    /// reports as many replicas as are declared.
    pub fn has_desired_replicas(&self) -> bool {
        let generation_observed = match (self.observed_generation, self.generation) {
            (Some(observed), Some(desired)) => observed >= desired,
            (_, None) => true,
            (None, Some(_)) => false,
        };
        generation_observed && self.observed_replicas == self.target_replicas
    }
}

/// Status of one sub-component (container) of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// Component name
    pub name: String,
    /// Whether the component passes its readiness checks
    pub ready: bool,
    /// When the component entered the running state; `None` if not running
    pub running_since: Option<DateTime<Utc>>,
}

/// A worker (pod) owned by a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInstance {
    /// Worker name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Worker labels (matched against pool selectors)
    pub labels: BTreeMap<String, String>,
    /// Worker-level readiness
    pub ready: bool,
    /// Number of components the worker declares
    pub declared_components: usize,
    /// Reported component statuses
    pub components: Vec<ComponentStatus>,
    /// When the worker started
    pub started_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_ref_round_trip() {
        let pool_ref = PoolRef::parse_id("prod/web").unwrap();
        assert_eq!(pool_ref, PoolRef::new("prod", "web"));
        assert_eq!(pool_ref.id(), "prod/web");
        assert_eq!(pool_ref.with_name("web-1").to_string(), "prod/web-1");
    }

    #[test]
    fn test_pool_ref_rejects_malformed_ids() {
        for id in ["web", "a/b/c", "/web", "prod/", ""] {
            assert!(PoolRef::parse_id(id).is_err(), "expected {id:?} to be rejected");
        }
    }

    #[test]
    fn test_selector_helpers() {
        let selector: LabelSelector = [("app", "web"), ("deployment", "g1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(selector_string(&selector), "app=web,deployment=g1");

        let mut labels = selector.clone();
        labels.insert("extra".to_string(), "x".to_string());
        assert!(selector_matches(&selector, &labels));

        labels.insert("deployment".to_string(), "g2".to_string());
        assert!(!selector_matches(&selector, &labels));
    }

    #[test]
    fn test_has_desired_replicas_waits_for_generation() {
        let mut pool = Pool::new("default", "web");
        pool.target_replicas = 2;
        pool.observed_replicas = 2;
        pool.generation = Some(3);
        pool.observed_generation = Some(2);
        assert!(!pool.has_desired_replicas());

        pool.observed_generation = Some(3);
        assert!(pool.has_desired_replicas());

        pool.observed_replicas = 1;
        assert!(!pool.has_desired_replicas());
    }
}
