//! Prometheus counters for pool reconciliation.

use crate::error::ControllerError;
use pool_migration::{MigrationOutcome, MigrationPath};
use prometheus::{IntCounter, Registry, TextEncoder};

/// Counters exposed on `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub pools_created: IntCounter,
    pub migrations_started: IntCounter,
    pub migrations_completed: IntCounter,
    pub migrations_failed: IntCounter,
    pub in_place_updates: IntCounter,
    pub scale_steps: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| -> Result<IntCounter, ControllerError> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            pools_created: counter("poolshift_pools_created_total", "Pools created from a ReplicaPool")?,
            migrations_started: counter(
                "poolshift_migrations_started_total",
                "Runs started to bring a pool to its spec",
            )?,
            migrations_completed: counter(
                "poolshift_migrations_completed_total",
                "Runs that brought a pool to its spec",
            )?,
            migrations_failed: counter("poolshift_migrations_failed_total", "Runs that ended in an error")?,
            in_place_updates: counter(
                "poolshift_in_place_updates_total",
                "Completed runs that wrote the live pool directly",
            )?,
            scale_steps: counter(
                "poolshift_scale_steps_total",
                "Target changes made while cross-scaling two pools",
            )?,
            registry,
        })
    }

    /// Count a successful run.
    pub fn record_outcome(&self, outcome: &MigrationOutcome) {
        self.migrations_completed.inc();
        match &outcome.path {
            MigrationPath::InPlace => self.in_place_updates.inc(),
            MigrationPath::Migrated { steps, .. } => {
                self.scale_steps.inc_by(u64::try_from(steps.len()).unwrap_or(u64::MAX));
            }
        }
    }

    /// Render all counters in the Prometheus text format.
    pub fn render(&self) -> Result<String, ControllerError> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pool_client::Pool;
    use pool_migration::{GenerationId, PoolRole, ScaleStep};

    fn outcome(path: MigrationPath) -> MigrationOutcome {
        MigrationOutcome {
            pool: Pool::new("default", "web"),
            path,
        }
    }

    #[test]
    fn test_record_outcome() {
        let metrics = Metrics::new().unwrap();
        metrics.record_outcome(&outcome(MigrationPath::InPlace));
        metrics.record_outcome(&outcome(MigrationPath::Migrated {
            generation: GenerationId::parse("g2").unwrap(),
            steps: vec![
                ScaleStep { role: PoolRole::Replacement, target: 1 },
                ScaleStep { role: PoolRole::Original, target: 0 },
            ],
        }));

        assert_eq!(metrics.migrations_completed.get(), 2);
        assert_eq!(metrics.in_place_updates.get(), 1);
        assert_eq!(metrics.scale_steps.get(), 2);
        assert_eq!(metrics.migrations_failed.get(), 0);
    }

    #[test]
    fn test_render_lists_every_counter() {
        let metrics = Metrics::new().unwrap();
        metrics.migrations_failed.inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("poolshift_migrations_failed_total 1"));
        for name in [
            "poolshift_pools_created_total",
            "poolshift_migrations_started_total",
            "poolshift_migrations_completed_total",
            "poolshift_in_place_updates_total",
            "poolshift_scale_steps_total",
        ] {
            assert!(text.contains(name), "missing {name}");
        }
    }
}
