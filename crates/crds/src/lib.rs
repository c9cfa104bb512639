//! Poolshift CRD Definitions
//!
//! Kubernetes Custom Resource Definitions and the typed worker template
//! shared by the pool client, the migration engine and the controller.

pub mod error;
pub mod pool_config;
pub mod quantity;
pub mod replica_pool;
pub mod template;

pub use error::*;
pub use pool_config::*;
pub use quantity::*;
pub use replica_pool::*;
pub use template::*;
