//! Builtin variables passed to patch extensions
//!
//! Extensions receive a synthetic `builtin` variable next to the user
//! variables describing the Cluster and the object being patched. Names
//! starting with `builtin` are reserved so user variables can never shadow
//! it.

use serde::Serialize;

use crate::crd::{Cluster, ClusterVariable, MachineDeploymentTopology};
use crate::{Result, BUILTIN_VARIABLE_PREFIX};

/// Value of the `builtin` variable
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Builtins {
    /// Cluster-level values, always present
    pub cluster: ClusterBuiltins,

    /// Control plane values, present for control-plane-owned objects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<ControlPlaneBuiltins>,

    /// Worker group values, present for worker-owned objects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_deployment: Option<MachineDeploymentBuiltins>,
}

/// Cluster-level builtins
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterBuiltins {
    /// Cluster name
    pub name: String,
    /// Cluster namespace
    pub namespace: String,
    /// Topology values
    pub topology: ClusterTopologyBuiltins,
}

/// Topology builtins
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTopologyBuiltins {
    /// Desired Kubernetes version
    pub version: String,
    /// ClusterClass name
    pub class: String,
}

/// Control plane builtins
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneBuiltins {
    /// Version the control plane is being moved to
    pub version: String,
    /// Desired replicas, when set on the topology
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// Worker group builtins
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentBuiltins {
    /// Version the worker group is being moved to
    pub version: String,
    /// Worker class
    pub class: String,
    /// Generated MachineDeployment name
    pub name: String,
    /// Worker group name in the topology
    pub topology_name: String,
    /// Desired replicas, when set on the topology
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

impl Builtins {
    /// Cluster-level builtins for a Cluster with a topology
    pub fn for_cluster(cluster: &Cluster, namespace: &str, version: &str) -> Self {
        let class = cluster
            .spec
            .topology
            .as_ref()
            .map(|t| t.class.clone())
            .unwrap_or_default();
        Self {
            cluster: ClusterBuiltins {
                name: cluster.metadata.name.clone().unwrap_or_default(),
                namespace: namespace.to_string(),
                topology: ClusterTopologyBuiltins {
                    version: version.to_string(),
                    class,
                },
            },
            control_plane: None,
            machine_deployment: None,
        }
    }

    /// Extend with control plane values
    pub fn with_control_plane(mut self, version: &str, replicas: Option<i32>) -> Self {
        self.control_plane = Some(ControlPlaneBuiltins {
            version: version.to_string(),
            replicas,
        });
        self
    }

    /// Extend with worker group values
    pub fn with_machine_deployment(
        mut self,
        md: &MachineDeploymentTopology,
        name: &str,
        version: &str,
    ) -> Self {
        self.machine_deployment = Some(MachineDeploymentBuiltins {
            version: version.to_string(),
            class: md.class.clone(),
            name: name.to_string(),
            topology_name: md.name.clone(),
            replicas: md.replicas,
        });
        self
    }

    /// Render as the `builtin` variable
    pub fn to_variable(&self) -> Result<ClusterVariable> {
        Ok(ClusterVariable::new(
            BUILTIN_VARIABLE_PREFIX,
            serde_json::to_value(self)?,
        ))
    }
}
