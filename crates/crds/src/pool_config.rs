//! Declarative pool configuration
//!
//! `PoolConfig` is the user-facing description of a replica pool: desired
//! replica count, object labels and annotations, and the worker template.
//! It is the spec of the `ReplicaPool` custom resource and can also be read
//! from standalone YAML or JSON documents.

use crate::error::SpecError;
use crate::template::WorkerTemplate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired state of a replica pool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Desired number of workers (defaults to 1 when a new pool is created)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Labels on the pool object
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations on the pool object
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Worker template
    pub template: WorkerTemplate,
}

impl PoolConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(document: &str) -> Result<Self, SpecError> {
        let config: Self = serde_yaml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(document: &str) -> Result<Self, SpecError> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate an already-decoded configuration tree.
    pub fn from_value(tree: serde_json::Value) -> Result<Self, SpecError> {
        let config: Self = serde_json::from_value(tree)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate replica count and template.
    pub fn validate(&self) -> Result<(), SpecError> {
        if let Some(replicas) = self.replicas {
            if replicas < 0 {
                return Err(SpecError::InvalidReplicas(replicas));
            }
        }
        self.template.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{EnvVarSource, ProbeHandler, PullPolicy, VolumeSource};

    const WEB_POOL: &str = r#"
replicas: 3
labels:
  app: web
annotations:
  team: payments
template:
  labels:
    app: web
  volumes:
    - name: cache
      emptyDir: {}
    - name: creds
      secret:
        secretName: web-creds
  containers:
    - name: web
      image: registry.local/web:1.4.2
      imagePullPolicy: Always
      ports:
        - containerPort: 8080
      env:
        - name: MODE
          value: production
        - name: POD_NAME
          valueFrom:
            fieldRef:
              fieldPath: metadata.name
      volumeMounts:
        - name: cache
          mountPath: /var/cache/web
      readinessProbe:
        periodSeconds: 5
        httpGet:
          path: /healthz
          port: 8080
      resources:
        limits:
          cpu: 500m
          memory: 256Mi
"#;

    #[test]
    fn test_parse_full_yaml() {
        let config = PoolConfig::from_yaml(WEB_POOL).unwrap();
        assert_eq!(config.replicas, Some(3));
        assert_eq!(config.labels.get("app").map(String::as_str), Some("web"));

        let template = &config.template;
        assert_eq!(template.volumes.len(), 2);
        assert_eq!(template.volumes[0].source, VolumeSource::EmptyDir { medium: None });
        assert_eq!(
            template.volumes[1].source,
            VolumeSource::Secret { secret_name: "web-creds".to_string() }
        );

        let web = &template.containers[0];
        assert_eq!(web.image_pull_policy, Some(PullPolicy::Always));
        assert_eq!(
            web.env[1].value_from,
            Some(EnvVarSource::FieldRef { field_path: "metadata.name".to_string() })
        );
        let probe = web.readiness_probe.as_ref().unwrap();
        assert_eq!(probe.period_seconds, Some(5));
        assert!(matches!(probe.handler, ProbeHandler::HttpGet { port: 8080, .. }));
        let limits = web.resources.as_ref().unwrap().limits.as_ref().unwrap();
        assert_eq!(limits.memory.as_ref().unwrap().as_str(), "256Mi");
    }

    #[test]
    fn test_bad_quantity_rejected_at_parse() {
        let doc = r#"
template:
  containers:
    - name: web
      image: web:1
      resources:
        requests:
          cpu: one-core
"#;
        let err = PoolConfig::from_yaml(doc).unwrap_err();
        assert!(err.to_string().contains("one-core"));
    }

    #[test]
    fn test_missing_template_rejected() {
        assert!(PoolConfig::from_yaml("replicas: 2\n").is_err());
    }

    #[test]
    fn test_negative_replicas_rejected() {
        let doc = r#"{"replicas": -1, "template": {"containers": [{"name": "a", "image": "a:1"}]}}"#;
        assert!(matches!(PoolConfig::from_json(doc), Err(SpecError::InvalidReplicas(-1))));
    }

    #[test]
    fn test_mount_of_undeclared_volume_rejected() {
        let doc = serde_json::json!({
            "template": {
                "containers": [{
                    "name": "a",
                    "image": "a:1",
                    "volumeMounts": [{"name": "missing", "mountPath": "/data"}]
                }]
            }
        });
        let err = PoolConfig::from_value(doc).unwrap_err();
        assert!(matches!(err, SpecError::InvalidTemplate(_)));
    }

    #[test]
    fn test_serialization_is_stable() {
        let config = PoolConfig::from_yaml(WEB_POOL).unwrap();
        let json = serde_json::to_value(&config.template).unwrap();
        let reparsed: WorkerTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(reparsed, config.template);
    }
}
