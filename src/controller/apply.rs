//! Converging live objects onto the desired state
//!
//! Objects are created when absent and updated only when some desired field
//! differs from the live one. Updates merge the desired content over the live
//! object, so fields other controllers own survive, and never touch the
//! fields a kind declares immutable.

use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::client::TopologyClient;
use crate::crd::Cluster;
use crate::current_state::ClusterState;
use crate::desired_state::DesiredState;
use crate::objects::{
    gvk_of, kind_of, machine_deployment_gvk, preserve_immutable_fields, ControlPlaneFamily,
    InfrastructureClusterFamily, KindFamily, MachineDeploymentFamily, TemplateFamily,
};
use crate::store::ObjectStore;
use crate::Result;

/// What happened to one object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object did not exist and was created
    Created,
    /// The object differed and was updated
    Updated,
    /// The object already matched
    Unchanged,
}

/// Counts of what one pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Objects created
    pub created: usize,
    /// Objects updated
    pub updated: usize,
    /// Objects already up to date
    pub unchanged: usize,
    /// Objects deleted
    pub deleted: usize,
}

impl ApplySummary {
    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Created => self.created += 1,
            ApplyOutcome::Updated => self.updated += 1,
            ApplyOutcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Write the desired state
///
/// Referenced objects are written before their referrers: templates before
/// the control plane and MachineDeployments, the infrastructure cluster and
/// control plane before the Cluster's references to them.
pub async fn apply_desired_state(
    store: &dyn ObjectStore,
    client: &dyn TopologyClient,
    cluster: &Cluster,
    current: &ClusterState,
    desired: &DesiredState,
) -> Result<ApplySummary> {
    let mut summary = ApplySummary::default();

    summary.record(
        reconcile_object(
            store,
            &InfrastructureClusterFamily,
            current.infrastructure_cluster.as_ref(),
            &desired.infrastructure_cluster.object,
        )
        .await?,
    );

    if let Some(template) = &desired.control_plane_machine_template {
        summary.record(reconcile_template(store, &template.object).await?);
    }
    summary.record(
        reconcile_object(
            store,
            &ControlPlaneFamily,
            current.control_plane.object.as_ref(),
            &desired.control_plane.object,
        )
        .await?,
    );

    let infrastructure_ref = desired.infrastructure_ref();
    let control_plane_ref = desired.control_plane_ref();
    if cluster.spec.infrastructure_ref.as_ref() != Some(&infrastructure_ref)
        || cluster.spec.control_plane_ref.as_ref() != Some(&control_plane_ref)
    {
        client
            .patch_cluster_spec_refs(
                &desired.namespace,
                &desired.cluster_name,
                &infrastructure_ref,
                &control_plane_ref,
            )
            .await?;
        debug!(cluster = %desired.cluster_name, "updated cluster references");
    }

    for (name, md) in &desired.machine_deployments {
        summary.record(reconcile_template(store, &md.bootstrap_template.object).await?);
        let infra = &md.infrastructure_machine_template.object;
        summary.record(reconcile_template(store, infra).await?);
        let live = current.machine_deployments.get(name).map(|s| &s.object);
        summary.record(reconcile_object(store, &MachineDeploymentFamily, live, &md.object).await?);
    }

    for (name, state) in &current.machine_deployments {
        if desired.machine_deployments.contains_key(name) {
            continue;
        }
        info!(
            cluster = %desired.cluster_name,
            machine_deployment = %name,
            "deleting removed worker group"
        );
        store
            .delete(&machine_deployment_gvk(), &desired.namespace, &state.object.name_any())
            .await?;
        for template in [&state.bootstrap_template, &state.infrastructure_machine_template] {
            let namespace = template.namespace().unwrap_or_else(|| desired.namespace.clone());
            store
                .delete(&gvk_of(template)?, &namespace, &template.name_any())
                .await?;
        }
        summary.deleted += 1;
    }

    Ok(summary)
}

/// Templates are addressed by content-derived name, so the live object is
/// looked up by the desired name
async fn reconcile_template(
    store: &dyn ObjectStore,
    desired: &DynamicObject,
) -> Result<ApplyOutcome> {
    let namespace = desired.namespace().unwrap_or_default();
    let live = store
        .get(&gvk_of(desired)?, &namespace, &desired.name_any())
        .await?;
    reconcile_object(store, &TemplateFamily, live.as_ref(), desired).await
}

/// Create, update or leave one object
pub async fn reconcile_object(
    store: &dyn ObjectStore,
    family: &dyn KindFamily,
    live: Option<&DynamicObject>,
    desired: &DynamicObject,
) -> Result<ApplyOutcome> {
    let adopted;
    let live = match live {
        Some(live) => live,
        None => match store.create(desired).await {
            Ok(_) => {
                debug!(kind = kind_of(desired), name = %desired.name_any(), "created");
                return Ok(ApplyOutcome::Created);
            }
            Err(e) if e.is_conflict() => {
                // Created by an earlier pass that failed before recording it.
                let namespace = desired.namespace().unwrap_or_default();
                match store.get(&gvk_of(desired)?, &namespace, &desired.name_any()).await? {
                    Some(existing) => {
                        adopted = existing;
                        &adopted
                    }
                    None => return Err(e),
                }
            }
            Err(e) => return Err(e),
        },
    };

    let mut desired = desired.clone();
    preserve_immutable_fields(family, live, &mut desired)?;
    if is_subset(&desired.data, &live.data)
        && map_is_subset(desired.labels(), live.labels())
        && map_is_subset(desired.annotations(), live.annotations())
    {
        return Ok(ApplyOutcome::Unchanged);
    }

    let mut merged = live.clone();
    merged
        .labels_mut()
        .extend(desired.labels().iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
        .annotations_mut()
        .extend(desired.annotations().iter().map(|(k, v)| (k.clone(), v.clone())));
    merge(&mut merged.data, desired.data);
    store.update(&merged).await?;
    debug!(kind = kind_of(&merged), name = %merged.name_any(), family = family.name(), "updated");
    Ok(ApplyOutcome::Updated)
}

/// Whether every field set in `desired` has the same value in `live`
fn is_subset(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(d), Value::Object(l)) => d
            .iter()
            .all(|(k, v)| l.get(k).is_some_and(|lv| is_subset(v, lv))),
        _ => desired == live,
    }
}

fn map_is_subset(
    desired: &std::collections::BTreeMap<String, String>,
    live: &std::collections::BTreeMap<String, String>,
) -> bool {
    desired.iter().all(|(k, v)| live.get(k) == Some(v))
}

/// Merge `desired` into `live`: objects recursively, anything else replaced
fn merge(live: &mut Value, desired: Value) {
    match (live, desired) {
        (Value::Object(l), Value::Object(d)) => {
            for (k, v) in d {
                match l.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        l.insert(k, v);
                    }
                }
            }
        }
        (live, desired) => *live = desired,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::new_object;
    use crate::store::{MemoryObjectStore, StoreWrite};
    use serde_json::json;

    fn docker_cluster(spec: Value) -> DynamicObject {
        let mut obj = new_object(
            "infrastructure.cluster.x-k8s.io/v1beta1",
            "DockerCluster",
            "fleet",
            "prod",
        );
        obj.data = json!({ "spec": spec });
        obj
    }

    #[test]
    fn subset_ignores_fields_only_the_live_object_has() {
        let desired = json!({"spec": {"a": 1}});
        let live = json!({"spec": {"a": 1, "b": 2}, "status": {"ready": true}});
        assert!(is_subset(&desired, &live));
        assert!(!is_subset(&json!({"spec": {"a": 2}}), &live));
        assert!(!is_subset(&json!({"spec": {"c": 1}}), &live));
    }

    #[test]
    fn merge_keeps_foreign_fields() {
        let mut live = json!({"spec": {"a": 1, "b": 2, "list": [1, 2]}});
        merge(&mut live, json!({"spec": {"a": 3, "list": [9]}}));
        assert_eq!(live, json!({"spec": {"a": 3, "b": 2, "list": [9]}}));
    }

    /// Story: Identical objects are never rewritten
    #[tokio::test]
    async fn story_unchanged_objects_are_left_alone() {
        let store = MemoryObjectStore::recording();
        let desired = docker_cluster(json!({"a": 1}));
        let first = reconcile_object(&store, &InfrastructureClusterFamily, None, &desired)
            .await
            .unwrap();
        assert_eq!(first, ApplyOutcome::Created);

        let live = store.objects_of_kind("DockerCluster").await.remove(0);
        let second = reconcile_object(
            &store,
            &InfrastructureClusterFamily,
            Some(&live),
            &docker_cluster(json!({"a": 1})),
        )
        .await
        .unwrap();
        assert_eq!(second, ApplyOutcome::Unchanged);
        assert_eq!(store.writes().await.len(), 1);
    }

    #[tokio::test]
    async fn changed_objects_are_merged_and_updated() {
        let store = MemoryObjectStore::recording();
        let mut seeded =
            docker_cluster(json!({"a": 1, "controlPlaneEndpoint": {"host": "10.0.0.1"}}));
        seeded.labels_mut().insert("team".into(), "infra".into());
        store.insert(seeded).await.unwrap();
        let live = store.objects_of_kind("DockerCluster").await.remove(0);

        let outcome = reconcile_object(
            &store,
            &InfrastructureClusterFamily,
            Some(&live),
            &docker_cluster(json!({"a": 2})),
        )
        .await
        .unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);

        let updated = store.objects_of_kind("DockerCluster").await.remove(0);
        assert_eq!(updated.data["spec"]["a"], 2);
        assert_eq!(updated.data["spec"]["controlPlaneEndpoint"]["host"], "10.0.0.1");
        assert_eq!(updated.labels()["team"], "infra");
    }

    #[tokio::test]
    async fn immutable_fields_are_never_overwritten() {
        let store = MemoryObjectStore::recording();
        let mut md =
            new_object(crate::CLUSTER_API_VERSION, "MachineDeployment", "fleet", "prod-md1");
        md.data = json!({"spec": {"clusterName": "prod", "replicas": 1}});
        store.insert(md.clone()).await.unwrap();
        let live = store.objects_of_kind("MachineDeployment").await.remove(0);

        md.data = json!({"spec": {"clusterName": "renamed", "replicas": 3}});
        reconcile_object(&store, &MachineDeploymentFamily, Some(&live), &md)
            .await
            .unwrap();

        let updated = store.objects_of_kind("MachineDeployment").await.remove(0);
        assert_eq!(updated.data["spec"]["clusterName"], "prod");
        assert_eq!(updated.data["spec"]["replicas"], 3);
    }

    #[tokio::test]
    async fn objects_left_over_from_a_failed_pass_are_adopted() {
        let store = MemoryObjectStore::recording();
        store.insert(docker_cluster(json!({"a": 1}))).await.unwrap();

        let desired = docker_cluster(json!({"a": 1}));
        let outcome = reconcile_object(&store, &InfrastructureClusterFamily, None, &desired)
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn templates_are_looked_up_by_name() {
        let store = MemoryObjectStore::recording();
        let mut template = new_object(
            "infrastructure.cluster.x-k8s.io/v1beta1",
            "DockerMachineTemplate",
            "fleet",
            "prod-md1-infra-1a2b3c4d",
        );
        template.data = json!({"spec": {"template": {"spec": {}}}});

        assert_eq!(reconcile_template(&store, &template).await.unwrap(), ApplyOutcome::Created);
        assert_eq!(reconcile_template(&store, &template).await.unwrap(), ApplyOutcome::Unchanged);
        assert_eq!(
            store.writes().await,
            vec![StoreWrite::Create {
                kind: "DockerMachineTemplate".to_string(),
                name: "prod-md1-infra-1a2b3c4d".to_string()
            }]
        );
    }
}
