//! Pool client errors

use thiserror::Error;

/// Errors that can occur when talking to the pool-management API
#[derive(Debug, Error)]
pub enum PoolError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Pool or worker does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object already exists or was modified concurrently
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid request (e.g., malformed identity)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Object could not be converted to or from the API representation
    #[error("Conversion error: {0}")]
    Conversion(String),
}

impl PoolError {
    /// Whether this error means the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Classify an API failure for the object `id`: 404 becomes `NotFound`,
    /// 409 becomes `Conflict`, anything else stays a Kubernetes error.
    pub(crate) fn from_api(error: kube::Error, id: String) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound(id),
            kube::Error::Api(response) if response.code == 409 => {
                Self::Conflict(format!("{id}: {}", response.message))
            }
            other => Self::Kube(other),
        }
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Conversion(e.to_string())
    }
}
