//! Controller-specific error types.
//!
//! Errors from the pool client and the migration engine are wrapped as-is;
//! the variants here cover what only the controller itself can get wrong.

use kube::Error as KubeError;
use kube_runtime::finalizer;
use pool_client::PoolError;
use pool_migration::MigrationError;
use thiserror::Error;

/// Errors that can occur in the Pool Migrator.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Pool API error
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Migration engine error
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    /// Adding, running, or removing the cleanup finalizer failed
    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<finalizer::Error<ControllerError>>),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe server failed
    #[error("Probe server error: {0}")]
    Server(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
