//! Worker template
//!
//! Typed description of the workers a pool creates. Volume sources, probe
//! handlers and environment sources are tagged variants so that every
//! template that deserializes successfully names exactly one source per item.

use crate::error::SpecError;
use crate::quantity::Quantity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Pod template for the workers of a pool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerTemplate {
    /// Labels applied to every worker (the generation label is added by the migrator)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Node selector
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Volumes available to the containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Names of secrets used to pull images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,

    /// Containers (at least one)
    pub containers: Vec<Container>,

    /// Restart policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,

    /// DNS policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<DnsPolicy>,

    /// Service account the workers run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// Pin workers to a node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// Grace period before a terminating worker is killed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,

    /// Maximum worker lifetime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_deadline_seconds: Option<i64>,
}

/// A named volume.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name, referenced by volume mounts
    pub name: String,

    /// Where the volume's data comes from
    #[serde(flatten)]
    pub source: VolumeSource,
}

/// Volume source. Exactly one per volume.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    /// Directory on the host
    #[serde(rename_all = "camelCase")]
    HostPath {
        /// Path on the host
        path: String,
    },
    /// Scratch directory sharing the worker's lifetime
    #[serde(rename_all = "camelCase")]
    EmptyDir {
        /// Storage medium ("" or "Memory")
        #[serde(default, skip_serializing_if = "Option::is_none")]
        medium: Option<String>,
    },
    /// GCE persistent disk
    #[serde(rename_all = "camelCase")]
    GcePersistentDisk {
        /// Disk name
        pd_name: String,
        /// Filesystem type
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fs_type: Option<String>,
        /// Partition number
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partition: Option<i32>,
        /// Mount read-only
        #[serde(default)]
        read_only: bool,
    },
    /// AWS EBS volume
    #[serde(rename_all = "camelCase")]
    AwsElasticBlockStore {
        /// Volume id
        #[serde(rename = "volumeID")]
        volume_id: String,
        /// Filesystem type
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fs_type: Option<String>,
        /// Partition number
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partition: Option<i32>,
        /// Mount read-only
        #[serde(default)]
        read_only: bool,
    },
    /// Git repository checkout
    #[serde(rename_all = "camelCase")]
    GitRepo {
        /// Repository URL
        repository: String,
        /// Commit hash
        #[serde(default, skip_serializing_if = "Option::is_none")]
        revision: Option<String>,
        /// Target directory
        #[serde(default, skip_serializing_if = "Option::is_none")]
        directory: Option<String>,
    },
    /// Secret projected as files
    #[serde(rename_all = "camelCase")]
    Secret {
        /// Secret name
        secret_name: String,
    },
    /// ConfigMap projected as files
    #[serde(rename_all = "camelCase")]
    ConfigMap {
        /// ConfigMap name
        name: String,
    },
    /// Persistent volume claim
    #[serde(rename_all = "camelCase")]
    PersistentVolumeClaim {
        /// Claim name
        claim_name: String,
        /// Mount read-only
        #[serde(default)]
        read_only: bool,
    },
}

/// A worker container.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name, unique within the template
    pub name: String,

    /// Image reference
    pub image: String,

    /// Image pull policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<PullPolicy>,

    /// Path of the termination message file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_message_path: Option<String>,

    /// Entrypoint override
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    /// Arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Exposed ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,

    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Volume mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,

    /// Liveness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,

    /// Readiness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    /// CPU/memory limits and requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// Container port.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port inside the container
    pub container_port: i32,
    /// Port on the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<i32>,
    /// Host IP to bind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    /// Protocol (defaults to TCP)
    #[serde(default)]
    pub protocol: Protocol,
}

/// Environment variable.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Literal value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Value taken from another object; wins over `value`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

/// Source of an environment variable value.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EnvVarSource {
    /// Field of the worker object
    #[serde(rename_all = "camelCase")]
    FieldRef {
        /// Field path, e.g. `metadata.name`
        field_path: String,
    },
    /// Key of a ConfigMap
    ConfigMapKeyRef {
        /// ConfigMap name
        name: String,
        /// Key within the ConfigMap
        key: String,
    },
    /// Key of a Secret
    SecretKeyRef {
        /// Secret name
        name: String,
        /// Key within the Secret
        key: String,
    },
}

/// Volume mount.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Name of a declared volume
    pub name: String,
    /// Mount path inside the container
    pub mount_path: String,
    /// Mount read-only
    #[serde(default)]
    pub read_only: bool,
}

/// Liveness or readiness probe.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    /// Delay before the first probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,
    /// Probe timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
    /// Interval between probes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,
    /// Consecutive successes required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<i32>,
    /// Consecutive failures tolerated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<i32>,
    /// What the probe does
    #[serde(flatten)]
    pub handler: ProbeHandler,
}

/// Probe action. Exactly one per probe.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ProbeHandler {
    /// Run a command in the container
    Exec {
        /// Command line
        command: Vec<String>,
    },
    /// HTTP GET against the container
    #[serde(rename_all = "camelCase")]
    HttpGet {
        /// Request path
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        /// Target port
        port: i32,
        /// Host header / address
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
        /// URI scheme
        #[serde(default)]
        scheme: UriScheme,
        /// Extra request headers
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        http_headers: Vec<HttpHeader>,
    },
    /// TCP connect to the container
    TcpSocket {
        /// Target port
        port: i32,
    },
}

/// HTTP header used by an HTTP probe.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct HttpHeader {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

/// CPU/memory limits and requests.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Upper bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceList>,
    /// Scheduling requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceList>,
}

/// CPU and memory quantities.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct ResourceList {
    /// CPU quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Quantity>,
    /// Memory quantity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Quantity>,
}

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            /// Wire representation
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            /// Parse the wire representation
            pub fn parse(raw: &str) -> Option<Self> {
                match raw {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Worker restart policy
    RestartPolicy { #[default] Always => "Always", OnFailure => "OnFailure", Never => "Never" }
}

string_enum! {
    /// Worker DNS policy
    DnsPolicy {
        #[default] ClusterFirst => "ClusterFirst",
        ClusterFirstWithHostNet => "ClusterFirstWithHostNet",
        Default => "Default",
        None => "None",
    }
}

string_enum! {
    /// Image pull policy
    PullPolicy { Always => "Always", #[default] IfNotPresent => "IfNotPresent", Never => "Never" }
}

string_enum! {
    /// Port protocol
    Protocol { #[default] Tcp => "TCP", Udp => "UDP", Sctp => "SCTP" }
}

string_enum! {
    /// HTTP probe scheme
    UriScheme { #[default] Http => "HTTP", Https => "HTTPS" }
}

impl WorkerTemplate {
    /// Structural validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.containers.is_empty() {
            return Err(SpecError::InvalidTemplate("at least one container is required".to_string()));
        }

        let mut volume_names = BTreeSet::new();
        for volume in &self.volumes {
            if volume.name.is_empty() {
                return Err(SpecError::InvalidTemplate("volume name must not be empty".to_string()));
            }
            if !volume_names.insert(volume.name.as_str()) {
                return Err(SpecError::InvalidTemplate(format!("duplicate volume {:?}", volume.name)));
            }
        }

        let mut container_names = BTreeSet::new();
        for container in &self.containers {
            if container.name.is_empty() {
                return Err(SpecError::InvalidTemplate("container name must not be empty".to_string()));
            }
            if container.image.is_empty() {
                return Err(SpecError::InvalidTemplate(format!(
                    "container {:?} has no image",
                    container.name
                )));
            }
            if !container_names.insert(container.name.as_str()) {
                return Err(SpecError::InvalidTemplate(format!(
                    "duplicate container {:?}",
                    container.name
                )));
            }
            for port in &container.ports {
                check_port(&container.name, port.container_port)?;
                if let Some(host_port) = port.host_port {
                    check_port(&container.name, host_port)?;
                }
            }
            for mount in &container.volume_mounts {
                if !volume_names.contains(mount.name.as_str()) {
                    return Err(SpecError::InvalidTemplate(format!(
                        "container {:?} mounts undeclared volume {:?}",
                        container.name, mount.name
                    )));
                }
            }
            for env in &container.env {
                if env.name.is_empty() {
                    return Err(SpecError::InvalidTemplate(format!(
                        "container {:?} has an unnamed env var",
                        container.name
                    )));
                }
            }
            for probe in [&container.liveness_probe, &container.readiness_probe].into_iter().flatten() {
                match &probe.handler {
                    ProbeHandler::HttpGet { port, .. } | ProbeHandler::TcpSocket { port } => {
                        check_port(&container.name, *port)?;
                    }
                    ProbeHandler::Exec { command } if command.is_empty() => {
                        return Err(SpecError::InvalidTemplate(format!(
                            "container {:?} has an exec probe without a command",
                            container.name
                        )));
                    }
                    ProbeHandler::Exec { .. } => {}
                }
            }
        }

        Ok(())
    }
}

fn check_port(container: &str, port: i32) -> Result<(), SpecError> {
    if (1..=65535).contains(&port) {
        Ok(())
    } else {
        Err(SpecError::InvalidTemplate(format!(
            "container {container:?} uses out-of-range port {port}"
        )))
    }
}
