//! Cluster Custom Resource Definition
//!
//! Only the parts of a Cluster the topology controller reads or writes are
//! modeled: the topology section, the two references the controller fills
//! in once objects exist, and topology status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ObjectMetaTemplate, ObjectReference};
use super::variables::ClusterVariable;

/// Condition type reporting the outcome of the last topology reconcile
pub const TOPOLOGY_RECONCILED_CONDITION: &str = "TopologyReconciled";

/// Specification for a Cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    plural = "clusters",
    namespaced,
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.topology.class"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.topology.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Suspends reconciliation of this Cluster
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,

    /// Infrastructure cluster object, set by the topology controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    /// Control plane object, set by the topology controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_ref: Option<ObjectReference>,

    /// Managed topology; absent for Clusters not built from a ClusterClass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<Topology>,
}

/// Managed topology of a Cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    /// Name of the ClusterClass in the Cluster's namespace
    pub class: String,

    /// Kubernetes version of the control plane and workers
    pub version: String,

    /// Control plane topology
    #[serde(default)]
    pub control_plane: ControlPlaneTopology,

    /// Worker topology
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<WorkersTopology>,

    /// Variable values for this Cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<ClusterVariable>,
}

impl Topology {
    /// Worker-group topologies (empty when no workers are declared)
    pub fn machine_deployments(&self) -> &[MachineDeploymentTopology] {
        self.workers
            .as_ref()
            .map(|w| w.machine_deployments.as_slice())
            .unwrap_or_default()
    }
}

/// Control plane topology
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneTopology {
    /// Metadata propagated onto the control plane
    #[serde(default)]
    pub metadata: ObjectMetaTemplate,

    /// Number of control plane replicas; provider default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// Worker topology
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkersTopology {
    /// Worker groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub machine_deployments: Vec<MachineDeploymentTopology>,
}

/// One worker group of a Cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentTopology {
    /// Metadata propagated onto the MachineDeployment
    #[serde(default)]
    pub metadata: ObjectMetaTemplate,

    /// Worker class from the ClusterClass
    pub class: String,

    /// Worker group name, unique within the Cluster
    pub name: String,

    /// Number of machines; provider default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Per-group variable overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<MachineDeploymentVariables>,
}

/// Per-group variable overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentVariables {
    /// Values replacing Cluster-level values of the same name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<ClusterVariable>,
}

/// Status of a Cluster as reported by the topology controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Generation last processed by the topology controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions (TopologyReconciled)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Non-blocking lifecycle hooks already delivered for this Cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lifecycle_hooks_called: Vec<String>,
}
