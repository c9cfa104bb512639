//! Declarative specification errors

use thiserror::Error;

/// Errors raised while parsing or validating a declarative pool specification.
///
/// These are always raised before any remote call is made.
#[derive(Debug, Error)]
pub enum SpecError {
    /// Resource quantity could not be parsed
    #[error("invalid resource quantity: {0:?}")]
    InvalidQuantity(String),

    /// Template is missing or structurally invalid
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    /// Replica count out of range
    #[error("invalid replica count: {0}")]
    InvalidReplicas(i32),

    /// YAML document could not be decoded
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON document could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
