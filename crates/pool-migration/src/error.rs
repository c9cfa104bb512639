//! Migration errors

use crate::poller::PollError;
use crds::SpecError;
use pool_client::PoolError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while applying a configuration to a pool
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Pool API error, surfaced unchanged
    #[error("Pool API error: {0}")]
    Pool(#[from] PoolError),

    /// A convergence check did not succeed before its deadline
    #[error("Timed out after {0:?} waiting for pools to converge")]
    Timeout(Duration),

    /// Invalid declarative configuration
    #[error("Invalid pool configuration: {0}")]
    Spec(#[from] SpecError),

    /// Reserved annotation holds something unusable
    #[error("Invalid annotation {key}={value:?}: {reason}")]
    InvalidAnnotation {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// Request rejected before any remote call
    #[error("Validation failed: {0}")]
    Validation(String),
}

impl MigrationError {
    /// Whether the error was raised before touching the pool API.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Spec(_) | Self::Validation(_) | Self::InvalidAnnotation { .. }
        )
    }

    /// Whether the error is a convergence deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<PollError<PoolError>> for MigrationError {
    fn from(e: PollError<PoolError>) -> Self {
        match e {
            PollError::Timeout(after) => Self::Timeout(after),
            PollError::Condition(e) => Self::Pool(e),
        }
    }
}
