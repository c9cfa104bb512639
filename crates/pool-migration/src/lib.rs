//! Poolshift migration engine
//!
//! Applies a new [`PoolConfig`](crds::PoolConfig) to a live replica pool.
//! Changes that leave the worker template untouched are written in place.
//! Anything else is rolled out by creating a temporary replacement pool,
//! cross-scaling the two pools one worker at a time while waiting for every
//! step to settle, and finally handing the original pool's name to the
//! replacement.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use crds::PoolConfig;
//! use pool_client::{KubePoolClient, PoolRef};
//! use pool_migration::{MigrationConfig, MigrationOrchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(KubePoolClient::try_default().await?);
//! let orchestrator = MigrationOrchestrator::new(client, MigrationConfig::default());
//!
//! let desired = PoolConfig::from_yaml(&std::fs::read_to_string("web.yaml")?)?;
//! let outcome = orchestrator.apply(&PoolRef::new("default", "web"), &desired).await?;
//! println!("{} now runs {} workers", outcome.pool.pool_ref(), outcome.pool.target_replicas);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod lifecycle;
pub mod metadata;
pub mod orchestrator;
pub mod poller;
pub mod readiness;
pub mod spec_writer;

pub use error::MigrationError;
pub use lifecycle::{create_pool, delete_pool, pool_exists, pool_in_sync, read_pool_config};
pub use metadata::GenerationId;
pub use orchestrator::{
    MigrationConfig, MigrationOrchestrator, MigrationOutcome, MigrationPath, MigrationPhase,
    PoolRole, ScaleStep,
};
pub use poller::{PollError, poll};
pub use readiness::ReadinessOracle;
