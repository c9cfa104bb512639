//! Pool lifecycle operations outside of migrations

use crate::error::MigrationError;
use crate::metadata::GenerationId;
use crate::spec_writer::{DEFAULT_REPLICAS, config_in_sync, materialize, read_config};
use crds::PoolConfig;
use pool_client::{Pool, PoolClientTrait, PoolRef};
use tracing::info;

/// Create a new pool from `config` under a fresh generation id and return it
/// as stored.
pub async fn create_pool(
    client: &dyn PoolClientTrait,
    pool_ref: &PoolRef,
    config: &PoolConfig,
) -> Result<Pool, MigrationError> {
    let generation = GenerationId::generate();
    let replicas = config.replicas.unwrap_or(DEFAULT_REPLICAS);
    let pool = materialize(pool_ref, config, &generation, replicas)?;

    client.create(&pool).await?;
    info!(pool = %pool_ref, %generation, replicas, "Created pool");
    Ok(client.get(&pool_ref.namespace, &pool_ref.name).await?)
}

/// Read a pool back as configuration, without migration metadata.
pub async fn read_pool_config(
    client: &dyn PoolClientTrait,
    pool_ref: &PoolRef,
) -> Result<PoolConfig, MigrationError> {
    let pool = client.get(&pool_ref.namespace, &pool_ref.name).await?;
    Ok(read_config(&pool))
}

/// Delete a pool.
pub async fn delete_pool(client: &dyn PoolClientTrait, pool_ref: &PoolRef) -> Result<(), MigrationError> {
    client.delete(&pool_ref.namespace, &pool_ref.name).await?;
    info!(pool = %pool_ref, "Deleted pool");
    Ok(())
}

/// Whether a pool exists. Errors other than not-found are returned.
pub async fn pool_exists(client: &dyn PoolClientTrait, pool_ref: &PoolRef) -> Result<bool, MigrationError> {
    match client.get(&pool_ref.namespace, &pool_ref.name).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Whether the pool already matches `desired`, so applying it would change
/// nothing.
pub async fn pool_in_sync(
    client: &dyn PoolClientTrait,
    pool_ref: &PoolRef,
    desired: &PoolConfig,
) -> Result<bool, MigrationError> {
    let pool = client.get(&pool_ref.namespace, &pool_ref.name).await?;
    Ok(config_in_sync(&pool, desired))
}
