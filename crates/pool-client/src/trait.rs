//! PoolClient trait for mocking
//!
//! This trait abstracts the pool-management API so the migration engine can
//! run against a live cluster or an in-memory mock.

use crate::error::PoolError;
use crate::models::{LabelSelector, Pool, WorkerInstance};

/// Trait for pool-management API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Every operation reports a missing object as [`PoolError::NotFound`].
#[async_trait::async_trait]
pub trait PoolClientTrait: Send + Sync {
    /// Fetch a pool by name
    async fn get(&self, namespace: &str, name: &str) -> Result<Pool, PoolError>;

    /// Create a pool; `resource_version` and `uid` must be unset
    async fn create(&self, pool: &Pool) -> Result<Pool, PoolError>;

    /// Replace a pool; the pool's `resource_version` guards against lost updates
    async fn update(&self, pool: &Pool) -> Result<Pool, PoolError>;

    /// Delete a pool, leaving its workers running
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), PoolError>;

    /// List workers whose labels match every entry of the selector
    async fn list_workers(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<WorkerInstance>, PoolError>;
}
