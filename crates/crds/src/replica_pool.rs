//! ReplicaPool CRD
//!
//! Declares a replica pool. The pool migrator keeps the underlying
//! replication controller in line with this spec, migrating workers without
//! downtime when the worker template changes.

use crate::pool_config::PoolConfig;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ReplicaPoolSpec is the declarative pool configuration
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "poolshift.microscaler.io",
    version = "v1alpha1",
    kind = "ReplicaPool",
    namespaced,
    status = "ReplicaPoolStatus",
    shortname = "rpool",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaPoolSpec {
    /// Desired pool state
    #[serde(flatten)]
    pub config: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum PoolPhase {
    /// Not yet reconciled
    #[default]
    Pending,

    /// Cross-scaling towards a new worker template
    Migrating,

    /// Pool matches the spec
    Ready,

    /// Last reconciliation failed; will be retried
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaPoolStatus {
    /// Reconciliation phase
    pub phase: PoolPhase,

    /// Generation id of the workers currently serving
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,

    /// Declared replica count of the live pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Generation id of a migration started but not yet finished. A retry
    /// carries on with its replacement pool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_generation: Option<String>,

    /// Last reconciliation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,

    /// Error message if reconciliation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
