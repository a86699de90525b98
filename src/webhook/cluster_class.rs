//! ClusterClass admission
//!
//! Validation rejects classes that are malformed or whose change would
//! strand live Clusters; defaulting fills in reference namespaces. Both read
//! a snapshot of Clusters and decide on it, so a Cluster binding to a class
//! while that class is being changed can slip through; the reconciler then
//! reports the broken reference on the Cluster.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use super::check::{
    removed_worker_classes, template_slots, validate_class, CompatibilityPolicy,
    ReferenceCompatibility,
};
use super::WebhookState;
use crate::client::TopologyClient;
use crate::crd::{Cluster, ClusterClass};
use crate::field::{FieldError, FieldErrorList, FieldPath};
use crate::{Error, Result};

/// Most Clusters named when a delete is refused
const MAX_NAMED_CLUSTERS: usize = 5;

/// Admission checks for ClusterClass create, update and delete
pub struct ClusterClassValidator {
    client: Arc<dyn TopologyClient>,
    policy: Arc<dyn CompatibilityPolicy>,
}

impl ClusterClassValidator {
    /// Validator using [`ReferenceCompatibility`] for updates
    pub fn new(client: Arc<dyn TopologyClient>) -> Self {
        Self {
            client,
            policy: Arc::new(ReferenceCompatibility),
        }
    }

    /// Replace the update compatibility rules
    pub fn with_policy(mut self, policy: Arc<dyn CompatibilityPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Validate a create (`old` is `None`) or an update
    pub async fn validate(&self, old: Option<&ClusterClass>, new: &ClusterClass) -> Result<()> {
        match old {
            None => self.validate_create(new),
            Some(old) => self.validate_update(old, new).await,
        }
    }

    /// Checks a new class must pass on its own
    pub fn validate_create(&self, class: &ClusterClass) -> Result<()> {
        validate_class(class).into_result("ClusterClass", &class.name_any())
    }

    /// Create checks plus compatibility with the old version and with every
    /// Cluster using a worker class the update removes
    pub async fn validate_update(&self, old: &ClusterClass, new: &ClusterClass) -> Result<()> {
        let mut errs = validate_class(new);
        errs.append(self.policy.check(&old.spec, &new.spec));

        let removed = removed_worker_classes(&old.spec, &new.spec);
        if !removed.is_empty() {
            debug!(class = %new.name_any(), ?removed, "worker classes removed, checking Clusters");
            let path = FieldPath::new(["spec", "workers", "machineDeployments"]);
            for cluster in self.clusters_using(new).await? {
                for md in topology_workers(&cluster) {
                    if removed.contains(&md.class) {
                        errs.push(FieldError::forbidden(
                            &path,
                            format!(
                                "worker class \"{}\" is used by Cluster {}/{} \
                                 in worker group \"{}\"",
                                md.class,
                                cluster.namespace().unwrap_or_default(),
                                cluster.name_any(),
                                md.name
                            ),
                        ));
                    }
                }
            }
        }

        errs.into_result("ClusterClass", &new.name_any())
    }

    /// A class may only be deleted when no Cluster uses it
    pub async fn validate_delete(&self, class: &ClusterClass) -> Result<()> {
        let users: Vec<String> = self
            .clusters_using(class)
            .await?
            .iter()
            .map(|c| c.name_any())
            .collect();
        if users.is_empty() {
            return Ok(());
        }

        let mut named = users
            .iter()
            .take(MAX_NAMED_CLUSTERS)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if users.len() > MAX_NAMED_CLUSTERS {
            named.push_str(&format!(" and {} more", users.len() - MAX_NAMED_CLUSTERS));
        }
        let errs = FieldErrorList::from(FieldError::forbidden(
            &FieldPath::root(),
            format!("ClusterClass is used by Clusters: {named}"),
        ));
        Err(Error::invalid("ClusterClass", class.name_any(), errs))
    }

    async fn clusters_using(&self, class: &ClusterClass) -> Result<Vec<Cluster>> {
        let namespace = class.namespace().unwrap_or_default();
        let name = class.name_any();
        let clusters = self.client.list_clusters(&namespace).await?;
        Ok(clusters
            .into_iter()
            .filter(|c| c.spec.topology.as_ref().is_some_and(|t| t.class == name))
            .collect())
    }
}

fn topology_workers(cluster: &Cluster) -> &[crate::crd::MachineDeploymentTopology] {
    cluster
        .spec
        .topology
        .as_ref()
        .map(|t| t.machine_deployments())
        .unwrap_or_default()
}

/// Fills in defaults on ClusterClass admission
pub struct ClusterClassDefaulter;

impl ClusterClassDefaulter {
    /// JSON patch setting every empty reference namespace to the class's
    pub fn patch(class: &ClusterClass) -> json_patch::Patch {
        let namespace = class.namespace().unwrap_or_default();
        let ops = template_slots(&class.spec)
            .into_iter()
            .filter_map(|slot| {
                let reference = slot.reference?;
                if reference.namespace.as_deref().is_some_and(|ns| !ns.is_empty()) {
                    return None;
                }
                let mut tokens = slot.tokens;
                tokens.push("namespace".to_string());
                Some(PatchOperation::Add(AddOperation {
                    path: PointerBuf::from_tokens(tokens),
                    value: serde_json::Value::String(namespace.clone()),
                }))
            })
            .collect();
        json_patch::Patch(ops)
    }

    /// Apply the defaults in place
    pub fn default_namespaces(class: &mut ClusterClass) {
        let namespace = class.namespace().unwrap_or_default();
        let spec = &mut class.spec;
        let mut refs: Vec<&mut Option<crate::crd::ObjectReference>> = vec![
            &mut spec.infrastructure.ref_,
            &mut spec.control_plane.ref_,
        ];
        if let Some(machine_infra) = spec.control_plane.machine_infrastructure.as_mut() {
            refs.push(&mut machine_infra.ref_);
        }
        for md in spec.workers.machine_deployments.iter_mut() {
            refs.push(&mut md.template.bootstrap.ref_);
            refs.push(&mut md.template.infrastructure.ref_);
        }
        for reference in refs.into_iter().flatten() {
            if reference.namespace.as_deref().unwrap_or_default().is_empty() {
                reference.namespace = Some(namespace.clone());
            }
        }
    }
}

/// Handle validating admission review for ClusterClasses
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<ClusterClass>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<ClusterClass> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(review_cluster_class(&state.validator, &req).await.into_review())
}

async fn review_cluster_class(
    validator: &ClusterClassValidator,
    request: &AdmissionRequest<ClusterClass>,
) -> AdmissionResponse {
    let uid = request.uid.clone();
    let result = match (&request.operation, &request.object, &request.old_object) {
        (Operation::Create, Some(new), _) => validator.validate_create(new),
        (Operation::Update, Some(new), Some(old)) => validator.validate_update(old, new).await,
        (Operation::Delete, _, Some(old)) => validator.validate_delete(old).await,
        _ => {
            debug!(uid = %uid, operation = ?request.operation, "Nothing to validate, allowing");
            return AdmissionResponse::from(request);
        }
    };

    match result {
        Ok(()) => {
            info!(
                uid = %uid,
                class = %request.name,
                operation = ?request.operation,
                "ClusterClass admitted"
            );
            AdmissionResponse::from(request)
        }
        Err(e) => {
            warn!(uid = %uid, class = %request.name, error = %e, "ClusterClass denied");
            AdmissionResponse::from(request).deny(e.to_string())
        }
    }
}

/// Handle mutating admission review for ClusterClasses
pub async fn mutate_handler(
    Json(body): Json<AdmissionReview<ClusterClass>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<ClusterClass> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(default_cluster_class(&req).into_review())
}

fn default_cluster_class(request: &AdmissionRequest<ClusterClass>) -> AdmissionResponse {
    let Some(class) = &request.object else {
        return AdmissionResponse::from(request);
    };
    let patch = ClusterClassDefaulter::patch(class);
    if patch.0.is_empty() {
        return AdmissionResponse::from(request);
    }

    debug!(uid = %request.uid, ops = patch.0.len(), "Defaulting ClusterClass reference namespaces");
    match AdmissionResponse::from(request).with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %request.uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}
