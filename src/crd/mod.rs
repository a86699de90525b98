//! Custom Resource Definitions for managed topologies
//!
//! A [`ClusterClass`] is the reusable shape; a [`Cluster`] with a topology is
//! one instance of it. Generated objects (infrastructure clusters, control
//! planes, MachineDeployments, templates) are provider-specific and handled as
//! `DynamicObject`s, so only these two kinds are typed here.

mod cluster;
mod cluster_class;
mod types;
mod variables;

pub use cluster::{
    Cluster, ClusterSpec, ClusterStatus, ControlPlaneTopology, MachineDeploymentTopology,
    MachineDeploymentVariables, Topology, WorkersTopology, TOPOLOGY_RECONCILED_CONDITION,
};
pub use cluster_class::{
    ClusterClass, ClusterClassSpec, ControlPlaneClass, MachineDeploymentClass,
    MachineDeploymentClassTemplate, WorkersClass,
};
pub use types::{
    split_api_version, Condition, ConditionStatus, LocalObjectTemplate, ObjectMetaTemplate,
    ObjectReference,
};
pub use variables::{ClusterClassVariable, ClusterVariable, JsonSchemaProps, VariableSchema};

use schemars::gen::SchemaGenerator;
use schemars::schema::{Schema, SchemaObject};

/// Schema for fields holding arbitrary JSON
///
/// Variable values and schema declarations are free-form; the API server is
/// told to keep them verbatim and validation happens in this crate instead.
pub(crate) fn arbitrary_json(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject::default();
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}
