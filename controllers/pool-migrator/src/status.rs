//! ReplicaPool status helpers
//!
//! Statuses are compared without their timestamp, and `lastReconciled` is
//! only written alongside a real change. Otherwise every status patch would
//! wake the watcher again and the controller would reconcile in a loop.

use chrono::{DateTime, Utc};
use crds::{PoolPhase, ReplicaPoolStatus};
use pool_client::Pool;
use pool_migration::spec_writer::generation_of;

/// Status of a pool that matches its spec.
pub fn ready_status(pool: &Pool) -> ReplicaPoolStatus {
    ReplicaPoolStatus {
        phase: PoolPhase::Ready,
        generation_id: generation_of(pool).map(|g| g.to_string()),
        replicas: Some(pool.target_replicas),
        pending_generation: None,
        last_reconciled: None,
        error: None,
    }
}

/// Status while a run is in progress. Generation and replicas of the
/// previous status stay visible until the run ends; `pending_generation`
/// names the generation the run migrates to, once it is known.
pub fn migrating_status(
    current: Option<&ReplicaPoolStatus>,
    pending_generation: Option<String>,
) -> ReplicaPoolStatus {
    ReplicaPoolStatus {
        phase: PoolPhase::Migrating,
        generation_id: current.and_then(|s| s.generation_id.clone()),
        replicas: current.and_then(|s| s.replicas),
        pending_generation,
        last_reconciled: None,
        error: None,
    }
}

/// Status after a failed run or an unusable spec.
pub fn failed_status(current: Option<&ReplicaPoolStatus>, error: impl Into<String>) -> ReplicaPoolStatus {
    ReplicaPoolStatus {
        phase: PoolPhase::Failed,
        generation_id: current.and_then(|s| s.generation_id.clone()),
        replicas: current.and_then(|s| s.replicas),
        pending_generation: current.and_then(|s| s.pending_generation.clone()),
        last_reconciled: None,
        error: Some(error.into()),
    }
}

/// Whether `current` differs from `desired` in anything but the timestamp.
pub fn status_needs_update(current: Option<&ReplicaPoolStatus>, desired: &ReplicaPoolStatus) -> bool {
    let Some(current) = current else {
        return true;
    };
    current.phase != desired.phase
        || current.generation_id != desired.generation_id
        || current.replicas != desired.replicas
        || current.pending_generation != desired.pending_generation
        || current.error != desired.error
}

/// PascalCase phase name, as the CRD schema expects.
pub fn phase_str(phase: &PoolPhase) -> &'static str {
    match phase {
        PoolPhase::Pending => "Pending",
        PoolPhase::Migrating => "Migrating",
        PoolPhase::Ready => "Ready",
        PoolPhase::Failed => "Failed",
    }
}

/// Merge patch for the status subresource.
///
/// Absent fields are written as `null` so a merge patch clears them, e.g. the
/// error of a previous failure.
pub fn status_patch(status: &ReplicaPoolStatus, now: DateTime<Utc>) -> serde_json::Value {
    serde_json::json!({
        "status": {
            "phase": phase_str(&status.phase),
            "generationId": status.generation_id,
            "replicas": status.replicas,
            "pendingGeneration": status.pending_generation,
            "lastReconciled": now.to_rfc3339(),
            "error": status.error,
        }
    })
}
