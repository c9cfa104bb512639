//! Conversions between pool models and Kubernetes objects
//!
//! The worker template is serialized in the same camelCase shape the API
//! uses for pod specs, so the template is moved through JSON rather than
//! field by field. Only the handful of places where the shapes differ are
//! patched up here.

use crate::error::PoolError;
use crate::models::{ComponentStatus, Pool, WorkerInstance};
use chrono::{DateTime, Utc};
use crds::WorkerTemplate;
use k8s_openapi::api::core::v1::{
    Pod, PodTemplateSpec, ReplicationController, ReplicationControllerSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::{Map, Value, json};

/// Build the pod template for a worker template.
pub fn to_pod_template(template: &WorkerTemplate) -> Result<PodTemplateSpec, PoolError> {
    let mut spec = match serde_json::to_value(template)? {
        Value::Object(map) => map,
        other => {
            return Err(PoolError::Conversion(format!(
                "worker template serialized to {other}"
            )));
        }
    };
    spec.remove("labels");
    if let Some(Value::Array(secrets)) = spec.remove("imagePullSecrets") {
        let refs: Vec<Value> = secrets.into_iter().map(|name| json!({ "name": name })).collect();
        spec.insert("imagePullSecrets".to_string(), Value::Array(refs));
    }

    let pod_template = json!({
        "metadata": { "labels": template.labels },
        "spec": spec,
    });
    Ok(serde_json::from_value(pod_template)?)
}

/// Read a worker template back from a pod template.
///
/// Fields the API server defaults but the template does not model are dropped.
pub fn from_pod_template(pod_template: &PodTemplateSpec) -> Result<WorkerTemplate, PoolError> {
    let mut spec = match serde_json::to_value(&pod_template.spec)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Some(Value::Array(refs)) = spec.remove("imagePullSecrets") {
        let names: Vec<Value> = refs
            .into_iter()
            .filter_map(|r| r.get("name").cloned())
            .collect();
        spec.insert("imagePullSecrets".to_string(), Value::Array(names));
    }
    let labels = pod_template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    spec.insert("labels".to_string(), serde_json::to_value(labels)?);
    spec.entry("containers").or_insert_with(|| Value::Array(Vec::new()));

    Ok(serde_json::from_value(Value::Object(spec))?)
}

/// Build the replication controller for a pool.
pub fn to_replication_controller(pool: &Pool) -> Result<ReplicationController, PoolError> {
    Ok(ReplicationController {
        metadata: ObjectMeta {
            name: Some(pool.name.clone()),
            namespace: Some(pool.namespace.clone()),
            labels: non_empty(&pool.labels),
            annotations: non_empty(&pool.annotations),
            resource_version: pool.resource_version.clone(),
            uid: pool.uid.clone(),
            ..ObjectMeta::default()
        },
        spec: Some(ReplicationControllerSpec {
            replicas: Some(pool.target_replicas),
            selector: non_empty(&pool.selector),
            template: Some(to_pod_template(&pool.template)?),
            ..ReplicationControllerSpec::default()
        }),
        status: None,
    })
}

/// Read a pool from a replication controller.
pub fn from_replication_controller(rc: &ReplicationController) -> Result<Pool, PoolError> {
    let metadata = &rc.metadata;
    let name = metadata
        .name
        .clone()
        .ok_or_else(|| PoolError::Conversion("replication controller has no name".to_string()))?;
    let spec = rc.spec.clone().unwrap_or_default();
    let template = match &spec.template {
        Some(t) => from_pod_template(t)?,
        None => WorkerTemplate::default(),
    };

    Ok(Pool {
        namespace: metadata.namespace.clone().unwrap_or_else(|| "default".to_string()),
        name,
        target_replicas: spec.replicas.unwrap_or(1),
        observed_replicas: rc.status.as_ref().map_or(0, |s| s.replicas),
        generation: metadata.generation,
        observed_generation: rc.status.as_ref().and_then(|s| s.observed_generation),
        resource_version: metadata.resource_version.clone(),
        uid: metadata.uid.clone(),
        labels: metadata.labels.clone().unwrap_or_default(),
        annotations: metadata.annotations.clone().unwrap_or_default(),
        selector: spec.selector.unwrap_or_default(),
        template,
    })
}

/// Read a worker from a pod.
pub fn worker_from_pod(pod: &Pod) -> WorkerInstance {
    let status = pod.status.as_ref();
    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        });

    let components = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| ComponentStatus {
                    name: cs.name.clone(),
                    ready: cs.ready,
                    running_since: cs
                        .state
                        .as_ref()
                        .and_then(|state| state.running.as_ref())
                        .and_then(|running| running.started_at.as_ref())
                        .and_then(timestamp),
                })
                .collect()
        })
        .unwrap_or_default();

    WorkerInstance {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        ready,
        declared_components: pod.spec.as_ref().map_or(0, |s| s.containers.len()),
        components,
        started_at: status.and_then(|s| s.start_time.as_ref()).and_then(timestamp),
    }
}

/// API timestamps serialize as RFC 3339 strings.
fn timestamp<T: Serialize>(time: &T) -> Option<DateTime<Utc>> {
    match serde_json::to_value(time).ok()? {
        Value::String(raw) => DateTime::parse_from_rfc3339(&raw)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

fn non_empty<K: Clone + Ord, V: Clone>(
    map: &std::collections::BTreeMap<K, V>,
) -> Option<std::collections::BTreeMap<K, V>> {
    (!map.is_empty()).then(|| map.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{Container, PoolConfig, VolumeSource};
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStatus, PodCondition, PodSpec, PodStatus,
    };

    fn web_template() -> WorkerTemplate {
        PoolConfig::from_yaml(
            r#"
template:
  labels: { app: web }
  imagePullSecrets: [regcred]
  volumes:
    - name: ebs
      awsElasticBlockStore: { volumeID: vol-123, readOnly: true }
  containers:
    - name: web
      image: web:2
      volumeMounts: [{ name: ebs, mountPath: /data }]
      livenessProbe:
        tcpSocket: { port: 8080 }
"#,
        )
        .unwrap()
        .template
    }

    #[test]
    fn test_pod_template_round_trip() {
        let template = web_template();
        let pod_template = to_pod_template(&template).unwrap();

        let spec = pod_template.spec.as_ref().unwrap();
        assert_eq!(spec.containers[0].image.as_deref(), Some("web:2"));
        let secrets = serde_json::to_value(&spec.image_pull_secrets).unwrap();
        assert_eq!(secrets, json!([{ "name": "regcred" }]));
        let volumes = serde_json::to_value(&spec.volumes).unwrap();
        assert_eq!(volumes[0]["awsElasticBlockStore"]["volumeID"], "vol-123");

        assert_eq!(from_pod_template(&pod_template).unwrap(), template);
    }

    #[test]
    fn test_replication_controller_round_trip() {
        let mut pool = Pool::new("prod", "web");
        pool.target_replicas = 3;
        pool.selector.insert("app".to_string(), "web".to_string());
        pool.annotations.insert("team".to_string(), "payments".to_string());
        pool.template = web_template();

        let rc = to_replication_controller(&pool).unwrap();
        assert_eq!(rc.spec.as_ref().unwrap().replicas, Some(3));

        let back = from_replication_controller(&rc).unwrap();
        assert_eq!(back.name, "web");
        assert_eq!(back.target_replicas, 3);
        assert_eq!(back.selector, pool.selector);
        assert_eq!(back.annotations, pool.annotations);
        assert_eq!(back.template, pool.template);
        assert_eq!(back.observed_replicas, 0);
    }

    #[test]
    fn test_defaulted_fields_are_ignored() {
        let mut pod_template = to_pod_template(&web_template()).unwrap();
        if let Some(spec) = pod_template.spec.as_mut() {
            spec.scheduler_name = Some("default-scheduler".to_string());
            spec.containers[0].termination_message_policy = Some("File".to_string());
        }
        assert_eq!(from_pod_template(&pod_template).unwrap(), web_template());
    }

    #[test]
    fn test_worker_from_pod() {
        let started: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let pod: Pod = serde_json::from_value(json!({
            "metadata": { "name": "web-abc", "namespace": "prod", "labels": { "app": "web" } },
            "spec": { "containers": [{ "name": "web", "image": "web:2" }] },
            "status": {
                "startTime": "2024-05-01T09:59:50Z",
                "conditions": [{ "type": "Ready", "status": "True" }],
                "containerStatuses": [{
                    "name": "web",
                    "ready": true,
                    "restartCount": 0,
                    "image": "web:2",
                    "imageID": "",
                    "state": { "running": { "startedAt": "2024-05-01T10:00:00Z" } }
                }]
            }
        }))
        .unwrap();

        let worker = worker_from_pod(&pod);
        assert_eq!(worker.name, "web-abc");
        assert!(worker.ready);
        assert_eq!(worker.declared_components, 1);
        assert_eq!(worker.components[0].running_since, Some(started));
        assert!(worker.started_at.is_some());
    }

    #[test]
    fn test_worker_without_status_is_not_ready() {
        let pod = Pod {
            spec: Some(PodSpec {
                containers: vec![k8s_openapi::api::core::v1::Container {
                    name: "web".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "False".to_string(),
                    ..Default::default()
                }]),
                container_statuses: Some(vec![ContainerStatus {
                    name: "web".to_string(),
                    ready: false,
                    state: Some(ContainerState {
                        running: Some(ContainerStateRunning::default()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let worker = worker_from_pod(&pod);
        assert!(!worker.ready);
        assert_eq!(worker.components[0].running_since, None);
    }

    #[test]
    fn test_secret_volume_survives() {
        let mut template = web_template();
        template.volumes[0].source = VolumeSource::Secret { secret_name: "tls".to_string() };
        template.containers.push(Container {
            name: "sidecar".to_string(),
            image: "proxy:1".to_string(),
            image_pull_policy: None,
            termination_message_path: None,
            command: vec![],
            args: vec![],
            working_dir: None,
            ports: vec![],
            env: vec![],
            volume_mounts: vec![],
            liveness_probe: None,
            readiness_probe: None,
            resources: None,
        });
        let pod_template = to_pod_template(&template).unwrap();
        assert_eq!(from_pod_template(&pod_template).unwrap(), template);
    }
}
