//! Snapshot of everything a Cluster currently owns
//!
//! The reader follows the references stored on the Cluster and on the
//! objects it owns, and lists worker MachineDeployments by label. Anything
//! half-linked (a reference to a missing object, a managed object without
//! the labels or references it must carry) fails the read: reconciling from
//! a partial picture could create duplicates or delete live workers.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::DynamicObject;
use kube::ResourceExt;
use tracing::debug;

use crate::crd::{Cluster, ClusterClass, ObjectReference};
use crate::field::{FieldError, FieldErrorList, FieldPath};
use crate::objects::{
    get_path, get_reference, kind_of, machine_deployment_gvk, ControlPlaneFamily, KindFamily,
    MachineDeploymentFamily, ReferenceField, CONTROL_PLANE_INFRASTRUCTURE_REF,
    MACHINE_DEPLOYMENT_BOOTSTRAP_REF, MACHINE_DEPLOYMENT_INFRASTRUCTURE_REF,
};
use crate::store::ObjectStore;
use crate::{Error, Result, DEPLOYMENT_NAME_LABEL};

/// Live objects owned by a Cluster
#[derive(Clone, Debug)]
pub struct ClusterState {
    /// The Cluster itself
    pub cluster: Cluster,
    /// Infrastructure cluster, once created
    pub infrastructure_cluster: Option<DynamicObject>,
    /// Control plane and its machine template
    pub control_plane: ControlPlaneState,
    /// Managed worker groups keyed by topology name
    pub machine_deployments: BTreeMap<String, MachineDeploymentState>,
}

/// Live control plane
#[derive(Clone, Debug, Default)]
pub struct ControlPlaneState {
    /// Control plane object, once created
    pub object: Option<DynamicObject>,
    /// Machine template referenced by the control plane; present iff the
    /// class declares one and the control plane exists
    pub infrastructure_machine_template: Option<DynamicObject>,
}

impl ControlPlaneState {
    /// Kubernetes version the control plane is at or moving to
    pub fn version(&self) -> Option<&str> {
        self.object
            .as_ref()
            .and_then(|cp| get_path(&cp.data, &["spec", "version"]))
            .and_then(|v| v.as_str())
    }

    /// Whether the control plane reports itself initialized
    pub fn is_initialized(&self) -> bool {
        self.object
            .as_ref()
            .and_then(|cp| get_path(&cp.data, &["status", "initialized"]))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Live worker group
#[derive(Clone, Debug)]
pub struct MachineDeploymentState {
    /// The MachineDeployment
    pub object: DynamicObject,
    /// Bootstrap config template it references
    pub bootstrap_template: DynamicObject,
    /// Infrastructure machine template it references
    pub infrastructure_machine_template: DynamicObject,
}

impl ClusterState {
    /// State of a Cluster that owns nothing yet
    pub fn empty(cluster: &Cluster) -> Self {
        Self {
            cluster: cluster.clone(),
            infrastructure_cluster: None,
            control_plane: ControlPlaneState::default(),
            machine_deployments: BTreeMap::new(),
        }
    }

    /// Whether neither the infrastructure cluster nor the control plane exist
    pub fn is_unprovisioned(&self) -> bool {
        self.infrastructure_cluster.is_none() && self.control_plane.object.is_none()
    }
}

/// Reads [`ClusterState`] from an [`ObjectStore`]
pub struct CurrentStateReader {
    store: Arc<dyn ObjectStore>,
}

impl CurrentStateReader {
    /// Create a reader over a store
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Read everything the Cluster currently owns
    ///
    /// A Cluster without a bound class owns nothing by definition and yields
    /// [`ClusterState::empty`].
    pub async fn read(
        &self,
        cluster: &Cluster,
        class: Option<&ClusterClass>,
    ) -> Result<ClusterState> {
        let bound = cluster
            .spec
            .topology
            .as_ref()
            .is_some_and(|t| !t.class.is_empty());
        let Some(class) = class.filter(|_| bound) else {
            return Ok(ClusterState::empty(cluster));
        };

        let namespace = cluster.namespace().unwrap_or_default();
        let mut state = ClusterState::empty(cluster);

        if let Some(reference) = &cluster.spec.infrastructure_ref {
            state.infrastructure_cluster = Some(self.fetch(reference, &namespace).await?);
        }

        if let Some(reference) = &cluster.spec.control_plane_ref {
            state.control_plane = self.read_control_plane(reference, class, &namespace).await?;
        }

        state.machine_deployments = self.read_machine_deployments(cluster, &namespace).await?;

        debug!(
            cluster = %cluster.name_any(),
            infrastructure = state.infrastructure_cluster.is_some(),
            control_plane = state.control_plane.object.is_some(),
            machine_deployments = state.machine_deployments.len(),
            "read current state"
        );
        Ok(state)
    }

    async fn read_control_plane(
        &self,
        reference: &ObjectReference,
        class: &ClusterClass,
        namespace: &str,
    ) -> Result<ControlPlaneState> {
        let object = self.fetch(reference, namespace).await?;

        let infrastructure_machine_template =
            if class.spec.control_plane_machine_infrastructure().is_some() {
                let mut referenced = self
                    .fetch_referenced(&ControlPlaneFamily, &object, namespace)
                    .await?;
                Some(take_referenced(
                    &mut referenced,
                    &object,
                    &CONTROL_PLANE_INFRASTRUCTURE_REF,
                )?)
            } else {
                None
            };

        Ok(ControlPlaneState {
            object: Some(object),
            infrastructure_machine_template,
        })
    }

    async fn read_machine_deployments(
        &self,
        cluster: &Cluster,
        namespace: &str,
    ) -> Result<BTreeMap<String, MachineDeploymentState>> {
        let selector = MachineDeploymentFamily.owner_labels(&cluster.name_any(), None);
        let objects = self
            .store
            .list(&machine_deployment_gvk(), namespace, &selector)
            .await?;

        let mut states = BTreeMap::new();
        for object in objects {
            let md_name = object.name_any();
            let Some(topology_name) = object.labels().get(DEPLOYMENT_NAME_LABEL).cloned() else {
                let path = FieldPath::new(["metadata", "labels"]).key(DEPLOYMENT_NAME_LABEL);
                let error = FieldError::required(
                    &path,
                    "managed MachineDeployment has no worker group name",
                );
                return Err(Error::invalid("MachineDeployment", md_name, error.into()));
            };
            if states.contains_key(&topology_name) {
                let path = FieldPath::new(["metadata", "labels"]).key(DEPLOYMENT_NAME_LABEL);
                return Err(Error::invalid(
                    "MachineDeployment",
                    md_name,
                    FieldError::duplicate(&path, format!("\"{topology_name}\"")).into(),
                ));
            }

            let mut referenced = self
                .fetch_referenced(&MachineDeploymentFamily, &object, namespace)
                .await?;
            let bootstrap_template =
                take_referenced(&mut referenced, &object, &MACHINE_DEPLOYMENT_BOOTSTRAP_REF)?;
            let infrastructure_machine_template = take_referenced(
                &mut referenced,
                &object,
                &MACHINE_DEPLOYMENT_INFRASTRUCTURE_REF,
            )?;

            states.insert(
                topology_name,
                MachineDeploymentState {
                    object,
                    bootstrap_template,
                    infrastructure_machine_template,
                },
            );
        }
        Ok(states)
    }

    /// Fetch every object `object` points at through its family's reference
    /// fields, keyed by field name
    ///
    /// Every reference field must be set and resolve.
    async fn fetch_referenced(
        &self,
        family: &dyn KindFamily,
        object: &DynamicObject,
        namespace: &str,
    ) -> Result<BTreeMap<&'static str, DynamicObject>> {
        let mut referenced = BTreeMap::new();
        for field in family.reference_fields() {
            let reference = require_reference(object, field)?;
            referenced.insert(field.name, self.fetch(&reference, namespace).await?);
        }
        Ok(referenced)
    }

    /// Fetch a referenced object; a dangling reference is an error
    async fn fetch(&self, reference: &ObjectReference, namespace: &str) -> Result<DynamicObject> {
        let namespace = reference.namespace_or(namespace);
        self.store
            .get(&reference.gvk(), namespace, &reference.name)
            .await?
            .ok_or_else(|| Error::not_found(&reference.kind, namespace, &reference.name))
    }
}

fn take_referenced(
    referenced: &mut BTreeMap<&'static str, DynamicObject>,
    owner: &DynamicObject,
    field: &ReferenceField,
) -> Result<DynamicObject> {
    referenced.remove(field.name).ok_or_else(|| {
        Error::internal(
            "current_state",
            format!(
                "{} is not a reference field of {} {}",
                field.name,
                kind_of(owner),
                owner.name_any()
            ),
        )
    })
}

fn require_reference(obj: &DynamicObject, field: &ReferenceField) -> Result<ObjectReference> {
    get_reference(obj, field)?.ok_or_else(|| {
        let path = FieldPath::new(field.path.iter().copied());
        let kind = obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
        let errs: FieldErrorList =
            FieldError::required(&path, format!("{} must be set", field.name)).into();
        Error::invalid(kind, obj.name_any(), errs)
    })
}
