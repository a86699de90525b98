//! Kind families of generated objects
//!
//! The controller handles arbitrary provider kinds as [`DynamicObject`]s. What
//! it needs to know about each one depends only on the role the object plays
//! in the topology (its family), not on the concrete kind: where it keeps
//! references to other objects, which labels mark it as ours, and which
//! fields may never be changed after creation.

use std::collections::BTreeMap;

use kube::api::{DynamicObject, GroupVersionKind, ObjectMeta};
use kube::core::TypeMeta;
use kube::ResourceExt;
use serde_json::{Map, Value};

use crate::crd::ObjectReference;
use crate::{Error, Result, CLUSTER_NAME_LABEL, DEPLOYMENT_NAME_LABEL, TOPOLOGY_OWNED_LABEL};

/// Kind of the worker-group object generated per topology entry
pub const MACHINE_DEPLOYMENT_KIND: &str = "MachineDeployment";

/// A field that holds an [`ObjectReference`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReferenceField {
    /// Short name used in errors and logs
    pub name: &'static str,
    /// Path below the object root
    pub path: &'static [&'static str],
}

/// Capabilities shared by every kind playing the same topology role
pub trait KindFamily: Send + Sync {
    /// Family name, used in errors and logs
    fn name(&self) -> &'static str;

    /// Fields holding references to other objects
    fn reference_fields(&self) -> &'static [ReferenceField] {
        &[]
    }

    /// Fields that must never change once the object exists
    fn immutable_fields(&self) -> &'static [&'static [&'static str]] {
        &[]
    }

    /// Whether a changed object is replaced under a new name rather than
    /// updated in place
    fn rotates_on_change(&self) -> bool {
        false
    }

    /// Labels marking an object as generated for a Cluster
    fn owner_labels(&self, cluster: &str, topology_name: Option<&str>) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([
            (CLUSTER_NAME_LABEL.to_string(), cluster.to_string()),
            (TOPOLOGY_OWNED_LABEL.to_string(), String::new()),
        ]);
        if let Some(name) = topology_name {
            labels.insert(DEPLOYMENT_NAME_LABEL.to_string(), name.to_string());
        }
        labels
    }
}

/// `Cluster.spec.infrastructureRef`
pub const CLUSTER_INFRASTRUCTURE_REF: ReferenceField = ReferenceField {
    name: "infrastructureRef",
    path: &["spec", "infrastructureRef"],
};

/// `Cluster.spec.controlPlaneRef`
pub const CLUSTER_CONTROL_PLANE_REF: ReferenceField = ReferenceField {
    name: "controlPlaneRef",
    path: &["spec", "controlPlaneRef"],
};

/// Provider infrastructure cluster (DockerCluster, AWSCluster, ...)
pub struct InfrastructureClusterFamily;

impl KindFamily for InfrastructureClusterFamily {
    fn name(&self) -> &'static str {
        "InfrastructureCluster"
    }
}

/// Control plane provider object (KubeadmControlPlane, ...)
pub struct ControlPlaneFamily;

/// `ControlPlane.spec.machineTemplate.infrastructureRef`
pub const CONTROL_PLANE_INFRASTRUCTURE_REF: ReferenceField = ReferenceField {
    name: "machineTemplate.infrastructureRef",
    path: &["spec", "machineTemplate", "infrastructureRef"],
};

impl KindFamily for ControlPlaneFamily {
    fn name(&self) -> &'static str {
        "ControlPlane"
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        &[CONTROL_PLANE_INFRASTRUCTURE_REF]
    }
}

/// Worker MachineDeployment
pub struct MachineDeploymentFamily;

/// `MachineDeployment.spec.template.spec.bootstrap.configRef`
pub const MACHINE_DEPLOYMENT_BOOTSTRAP_REF: ReferenceField = ReferenceField {
    name: "bootstrap.configRef",
    path: &["spec", "template", "spec", "bootstrap", "configRef"],
};

/// `MachineDeployment.spec.template.spec.infrastructureRef`
pub const MACHINE_DEPLOYMENT_INFRASTRUCTURE_REF: ReferenceField = ReferenceField {
    name: "infrastructureRef",
    path: &["spec", "template", "spec", "infrastructureRef"],
};

impl KindFamily for MachineDeploymentFamily {
    fn name(&self) -> &'static str {
        MACHINE_DEPLOYMENT_KIND
    }

    fn reference_fields(&self) -> &'static [ReferenceField] {
        &[MACHINE_DEPLOYMENT_BOOTSTRAP_REF, MACHINE_DEPLOYMENT_INFRASTRUCTURE_REF]
    }

    fn immutable_fields(&self) -> &'static [&'static [&'static str]] {
        &[&["spec", "clusterName"], &["spec", "selector"]]
    }
}

/// Machine and bootstrap templates cloned from the ClusterClass
pub struct TemplateFamily;

impl KindFamily for TemplateFamily {
    fn name(&self) -> &'static str {
        "Template"
    }

    fn immutable_fields(&self) -> &'static [&'static [&'static str]] {
        &[&["spec"]]
    }

    fn rotates_on_change(&self) -> bool {
        true
    }
}

/// GroupVersionKind of the MachineDeployment kind
pub fn machine_deployment_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk(crate::CLUSTER_API_GROUP, "v1beta1", MACHINE_DEPLOYMENT_KIND)
}

/// Build an empty object of the given type
pub fn new_object(api_version: &str, kind: &str, namespace: &str, name: &str) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Value::Object(Map::new()),
    }
}

/// GroupVersionKind of a live object
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind> {
    let types = obj.types.as_ref().ok_or_else(|| {
        Error::internal("gvk_of", format!("object {} has no apiVersion/kind", obj.name_any()))
    })?;
    let (group, version) = crate::crd::split_api_version(&types.api_version);
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Kind of an object, or an empty string when unset
pub fn kind_of(obj: &DynamicObject) -> &str {
    obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default()
}

/// Look up a nested value
pub fn get_path<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

/// Set a nested value, creating intermediate objects as needed
///
/// Fails when an intermediate value exists but is not an object.
pub fn set_path(value: &mut Value, path: &[&str], new: Value) -> Result<()> {
    let Some((last, parents)) = path.split_last() else {
        *value = new;
        return Ok(());
    };
    let mut current = value;
    for key in parents {
        let map = current
            .as_object_mut()
            .ok_or_else(|| Error::internal("set_path", format!("{key} has a non-object parent")))?;
        current = map
            .entry((*key).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let map = current
        .as_object_mut()
        .ok_or_else(|| Error::internal("set_path", format!("{last} has a non-object parent")))?;
    map.insert((*last).to_string(), new);
    Ok(())
}

/// Read a reference field from an object
///
/// Returns `Ok(None)` when the field is absent and an error when it is
/// present but not a reference.
pub fn get_reference(
    obj: &DynamicObject,
    field: &ReferenceField,
) -> Result<Option<ObjectReference>> {
    match get_path(&obj.data, field.path) {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => serde_json::from_value(raw.clone()).map(Some).map_err(|e| {
            Error::serialization(format!(
                "{} of {} {} is not a valid reference: {e}",
                field.name,
                kind_of(obj),
                obj.name_any()
            ))
        }),
    }
}

/// Write a reference field on an object
pub fn set_reference(
    obj: &mut DynamicObject,
    field: &ReferenceField,
    reference: &ObjectReference,
) -> Result<()> {
    set_path(&mut obj.data, field.path, serde_json::to_value(reference)?)
}

/// Copy a family's immutable fields from the live object into the desired one
///
/// Fields the live object does not have are left as desired.
pub fn preserve_immutable_fields(
    family: &dyn KindFamily,
    live: &DynamicObject,
    desired: &mut DynamicObject,
) -> Result<()> {
    for path in family.immutable_fields() {
        if let Some(value) = get_path(&live.data, path) {
            set_path(&mut desired.data, path, value.clone())?;
        }
    }
    Ok(())
}

/// Add labels to an object, keeping any it already has
pub fn add_labels(obj: &mut DynamicObject, labels: &BTreeMap<String, String>) {
    obj.labels_mut()
        .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
}
