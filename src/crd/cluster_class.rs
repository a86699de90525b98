//! ClusterClass Custom Resource Definition
//!
//! A ClusterClass is the reusable shape shared by many Clusters: which
//! templates produce the infrastructure cluster, the control plane and each
//! worker class, and which variables a Cluster may set.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{LocalObjectTemplate, ObjectMetaTemplate, ObjectReference};
use super::variables::ClusterClassVariable;

/// Specification for a ClusterClass
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "ClusterClass",
    plural = "clusterclasses",
    shortname = "cc",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterClassSpec {
    /// Template for the infrastructure cluster object
    #[serde(default)]
    pub infrastructure: LocalObjectTemplate,

    /// Template for the control plane object
    #[serde(default)]
    pub control_plane: ControlPlaneClass,

    /// Worker classes
    #[serde(default)]
    pub workers: WorkersClass,

    /// Variables Clusters using this class may set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<ClusterClassVariable>,
}

/// Control plane part of a ClusterClass
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneClass {
    /// Metadata propagated onto the generated control plane
    #[serde(default)]
    pub metadata: ObjectMetaTemplate,

    /// Reference to the control plane template
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_: Option<ObjectReference>,

    /// Machine infrastructure template for control plane machines, when the
    /// control plane provider runs machines itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_infrastructure: Option<LocalObjectTemplate>,
}

/// Worker part of a ClusterClass
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkersClass {
    /// MachineDeployment classes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub machine_deployments: Vec<MachineDeploymentClass>,
}

/// A worker class Clusters can instantiate as MachineDeployments
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentClass {
    /// Class name referenced from `Cluster.spec.topology.workers`
    pub class: String,

    /// Templates for the MachineDeployment's machines
    #[serde(default)]
    pub template: MachineDeploymentClassTemplate,
}

/// Templates making up a worker class
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentClassTemplate {
    /// Metadata propagated onto generated MachineDeployments
    #[serde(default)]
    pub metadata: ObjectMetaTemplate,

    /// Bootstrap config template
    #[serde(default)]
    pub bootstrap: LocalObjectTemplate,

    /// Infrastructure machine template
    #[serde(default)]
    pub infrastructure: LocalObjectTemplate,
}

impl ClusterClassSpec {
    /// Look up a worker class by name
    pub fn machine_deployment_class(&self, class: &str) -> Option<&MachineDeploymentClass> {
        self.workers
            .machine_deployments
            .iter()
            .find(|md| md.class == class)
    }

    /// Reference to the control plane machine infrastructure template, if declared
    pub fn control_plane_machine_infrastructure(&self) -> Option<&ObjectReference> {
        self.control_plane
            .machine_infrastructure
            .as_ref()
            .and_then(|t| t.ref_.as_ref())
    }
}
