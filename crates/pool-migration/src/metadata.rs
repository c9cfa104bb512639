//! Reserved labels and annotations, and generation ids

use crate::error::MigrationError;
use std::fmt;
use uuid::Uuid;

/// Worker-template label carrying the generation id. Part of every pool
/// selector, so two generations never share workers.
pub const GENERATION_LABEL: &str = "deployment";

/// Annotation holding the user-requested replica count while the pool's
/// live target is being stepped.
pub const ORIGINAL_REPLICAS_ANNOTATION: &str = "kubectl.kubernetes.io/original-replicas";

/// Ownership marker written on every managed pool. Pools created by earlier
/// tooling carry the same key.
pub const OWNED_ANNOTATION: &str = "terraform.io/owned";

/// JSON of the worker template last written by the migrator, without the
/// generation label. Compared against the desired template to classify a
/// change, since the live template also carries server-side defaults.
pub const APPLIED_TEMPLATE_ANNOTATION: &str = "poolshift.microscaler.io/applied-template";

/// Annotations that never show up in user-visible reads.
pub const RESERVED_ANNOTATIONS: [&str; 3] = [
    ORIGINAL_REPLICAS_ANNOTATION,
    OWNED_ANNOTATION,
    APPLIED_TEMPLATE_ANNOTATION,
];

/// Token distinguishing one pool incarnation's workers from another's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationId(String);

impl GenerationId {
    /// A fresh random (UUID v4) id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept an existing id; blank ids are rejected.
    pub fn parse(raw: &str) -> Result<Self, MigrationError> {
        if raw.trim().is_empty() {
            return Err(MigrationError::Validation(
                "generation id must not be blank".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the temporary pool that carries this generation for `pool_name`.
    pub fn replacement_name(&self, pool_name: &str) -> String {
        format!("{pool_name}-{}", self.0)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique_uuids() {
        let a = GenerationId::generate();
        let b = GenerationId::generate();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_blank_ids_rejected() {
        for raw in ["", "   ", "\t"] {
            let err = GenerationId::parse(raw).unwrap_err();
            assert!(err.is_validation());
        }
        assert_eq!(GenerationId::parse("g1").unwrap().as_str(), "g1");
    }

    #[test]
    fn test_replacement_name() {
        let id = GenerationId::parse("4f1c").unwrap();
        assert_eq!(id.replacement_name("web"), "web-4f1c");
    }
}
