//! Replica Pool API Client
//!
//! Narrow client for the pool-management API used by the Poolshift migration
//! engine. A pool is a Kubernetes `ReplicationController`; its workers are the
//! pods matching the pool's selector.
//!
//! # Example
//!
//! ```no_run
//! use pool_client::{KubePoolClient, PoolClientTrait, PoolRef};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubePoolClient::try_default().await?;
//!
//! let pool = client.get("default", "web").await?;
//! let workers = client.list_workers("default", &pool.selector).await?;
//! println!("{} has {} workers", PoolRef::from(&pool), workers.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod convert;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod pool_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubePoolClient;
pub use error::PoolError;
pub use models::*;
pub use pool_trait::PoolClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockPoolClient, PoolEvent, PoolOp};
