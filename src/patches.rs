//! Patch generation and topology validation through runtime extensions
//!
//! Extensions serving GeneratePatches are called one after another in
//! registration order. Each sees every patchable object with all earlier
//! patches already applied, so the result is a fold over the registry. Once
//! all patches are in, every ValidateTopology extension sees the final set.

use std::collections::HashMap;

use kube::api::DynamicObject;
use kube::ResourceExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::desired_state::{DesiredState, ItemTarget};
use crate::objects::kind_of;
use crate::runtime::hooks::{
    GeneratePatchesRequest, GeneratePatchesRequestItem, GeneratePatchesResponse, HolderReference,
    ValidateTopologyRequest, ValidateTopologyRequestItem,
};
use crate::runtime::{ExtensionRegistration, FailurePolicy, Hook, RuntimeClient};
use crate::{Error, Result, CLUSTER_API_VERSION};

/// Run every GeneratePatches extension over the desired state
///
/// Returns the number of patches applied.
pub async fn generate_patches(
    runtime: &RuntimeClient,
    desired: &mut DesiredState,
) -> Result<usize> {
    let mut applied = 0;
    for extension in runtime.registry().for_hook(Hook::GeneratePatches) {
        let mut targets: HashMap<String, ItemTarget> = HashMap::new();
        let mut items = Vec::new();
        for target in desired.patch_targets() {
            let Some(item) = desired.target(&target) else {
                continue;
            };
            let uid = Uuid::new_v4().to_string();
            items.push(GeneratePatchesRequestItem {
                uid: uid.clone(),
                holder_reference: item.holder.clone(),
                object: serde_json::to_value(&item.object)?,
                variables: item.variables.clone(),
            });
            targets.insert(uid, target);
        }
        let request = GeneratePatchesRequest {
            variables: desired.variables.clone(),
            items,
        };

        let Some(response) = runtime
            .call::<_, GeneratePatchesResponse>(extension, Hook::GeneratePatches, &request)
            .await?
        else {
            continue;
        };

        for item in response.items {
            let Some(target) = targets.get(&item.uid) else {
                item_failure(
                    extension,
                    Error::extension(
                        &extension.name,
                        Hook::GeneratePatches.name(),
                        format!("response references unknown item {}", item.uid),
                    ),
                )?;
                continue;
            };
            if let Some(message) = item.error {
                item_failure(
                    extension,
                    Error::extension(&extension.name, Hook::GeneratePatches.name(), message),
                )?;
                continue;
            }
            let Some(patch) = item.patch else {
                continue;
            };
            let Some(desired_item) = desired.target_mut(target) else {
                continue;
            };
            match apply_patch(&desired_item.object, &patch) {
                Ok(patched) => {
                    desired_item.object = patched;
                    applied += 1;
                }
                Err(e) => item_failure(extension, e)?,
            }
        }
        debug!(extension = %extension.name, applied, "GeneratePatches folded");
    }
    Ok(applied)
}

/// Apply a patch to a copy of an object
///
/// A patch may change anything except what identifies the object.
pub fn apply_patch(object: &DynamicObject, patch: &json_patch::Patch) -> Result<DynamicObject> {
    let target = format!("{} {}", kind_of(object), object.name_any());
    let mut value = serde_json::to_value(object)?;
    json_patch::patch(&mut value, &patch.0).map_err(|e| Error::patch(&target, e.to_string()))?;
    let patched: DynamicObject = serde_json::from_value(value)
        .map_err(|e| Error::patch(&target, format!("patched object is malformed: {e}")))?;

    let identity = |o: &DynamicObject| {
        (
            o.types.as_ref().map(|t| t.api_version.clone()),
            kind_of(o).to_string(),
            o.metadata.name.clone(),
            o.metadata.namespace.clone(),
        )
    };
    if identity(&patched) != identity(object) {
        return Err(Error::patch(
            &target,
            "patch must not change apiVersion, kind, name or namespace",
        ));
    }
    Ok(patched)
}

fn item_failure(extension: &ExtensionRegistration, err: Error) -> Result<()> {
    match extension.failure_policy {
        FailurePolicy::Fail => Err(err),
        FailurePolicy::Ignore => {
            warn!(extension = %extension.name, error = %err, "Skipping failed patch item");
            Ok(())
        }
    }
}

/// Ask every ValidateTopology extension to accept the final object set
pub async fn validate_topology(runtime: &RuntimeClient, desired: &DesiredState) -> Result<()> {
    if runtime.registry().for_hook(Hook::ValidateTopology).next().is_none() {
        return Ok(());
    }

    let mut items = Vec::new();
    for target in desired.patch_targets() {
        if let Some(item) = desired.target(&target) {
            items.push(ValidateTopologyRequestItem {
                holder_reference: item.holder.clone(),
                object: serde_json::to_value(&item.object)?,
                variables: item.variables.clone(),
            });
        }
    }
    for (name, md) in &desired.machine_deployments {
        items.push(ValidateTopologyRequestItem {
            holder_reference: HolderReference {
                api_version: CLUSTER_API_VERSION.to_string(),
                kind: "Cluster".to_string(),
                namespace: desired.namespace.clone(),
                name: desired.cluster_name.clone(),
                field_path: format!("spec.topology.workers.machineDeployments[{name}]"),
            },
            object: serde_json::to_value(&md.object)?,
            variables: md.bootstrap_template.variables.clone(),
        });
    }

    let request = ValidateTopologyRequest {
        variables: desired.variables.clone(),
        items,
    };
    runtime
        .call_non_blocking(Hook::ValidateTopology, &request)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::current_state::ClusterState;
    use crate::desired_state::{read_blueprint, ResolvedVariables};
    use crate::runtime::client::MockExtensionTransport;
    use crate::runtime::{ExtensionRegistry, ExtensionTransport};
    use crate::test_fixtures::{cluster, seeded_store, VERSION};
    use serde_json::{json, Value};
    use std::sync::Arc;

    async fn desired() -> DesiredState {
        let store = seeded_store().await;
        let class = crate::test_fixtures::cluster_class();
        let blueprint = read_blueprint(&store, &class).await.unwrap();
        let cluster = cluster();
        let current = ClusterState::empty(&cluster);
        let variables = ResolvedVariables::resolve(&cluster, &class).unwrap();
        DesiredState::compute(&cluster, &blueprint, &current, &variables, VERSION).unwrap()
    }

    fn registration(name: &str, policy: FailurePolicy, hook: Hook) -> ExtensionRegistration {
        ExtensionRegistration {
            name: name.to_string(),
            endpoint: name.to_string(),
            timeout_seconds: 5,
            failure_policy: policy,
            hooks: vec![hook],
        }
    }

    fn runtime(
        transport: impl ExtensionTransport + 'static,
        regs: Vec<ExtensionRegistration>,
    ) -> RuntimeClient {
        RuntimeClient::new(Arc::new(transport), ExtensionRegistry::new(regs).unwrap())
    }

    fn uid_of(request: &Value, kind: &str) -> String {
        request["items"]
            .as_array()
            .unwrap()
            .iter()
            .find(|item| item["object"]["kind"] == kind)
            .map(|item| item["uid"].as_str().unwrap().to_string())
            .unwrap()
    }

    /// Story: Later extensions see and build on earlier patches
    #[tokio::test]
    async fn story_patches_fold_in_registration_order() {
        let mut transport = MockExtensionTransport::new();
        transport.expect_call().returning(|endpoint, _, request, _| {
            let uid = uid_of(request, "DockerCluster");
            let item = request["items"]
                .as_array()
                .unwrap()
                .iter()
                .find(|i| i["uid"] == uid.as_str())
                .unwrap();
            let tag = item["object"]["spec"]["loadBalancer"]["imageTag"].clone();
            let next = match endpoint {
                "first" => {
                    assert_eq!(tag, "v1");
                    "v2"
                }
                _ => {
                    assert_eq!(tag, "v2");
                    "v3"
                }
            };
            Ok(json!({
                "status": "Success",
                "items": [{
                    "uid": uid,
                    "patch": [{
                        "op": "replace",
                        "path": "/spec/loadBalancer/imageTag",
                        "value": next
                    }]
                }]
            }))
        });
        let runtime = runtime(
            transport,
            vec![
                registration("first", FailurePolicy::Fail, Hook::GeneratePatches),
                registration("second", FailurePolicy::Fail, Hook::GeneratePatches),
            ],
        );

        let mut desired = desired().await;
        let applied = generate_patches(&runtime, &mut desired).await.unwrap();
        assert_eq!(applied, 2);
        assert_eq!(
            desired.infrastructure_cluster.object.data["spec"]["loadBalancer"]["imageTag"],
            "v3"
        );
    }

    /// Story: An item error is skipped under Ignore and fatal under Fail
    #[tokio::test]
    async fn story_item_errors_follow_the_failure_policy() {
        let respond = |_: &str, _: Hook, request: &Value, _: std::time::Duration| {
            Ok(json!({
                "status": "Success",
                "items": [
                    {"uid": uid_of(request, "DockerCluster"), "error": "cannot render"},
                    {"uid": uid_of(request, "KubeadmControlPlane"),
                     "patch": [{
                         "op": "add",
                         "path": "/spec/rolloutStrategy",
                         "value": "RollingUpdate"
                     }]}
                ]
            }))
        };

        let mut transport = MockExtensionTransport::new();
        transport.expect_call().returning(respond);
        let lenient = runtime(
            transport,
            vec![registration("ext", FailurePolicy::Ignore, Hook::GeneratePatches)],
        );
        let mut desired_state = desired().await;
        assert_eq!(generate_patches(&lenient, &mut desired_state).await.unwrap(), 1);
        assert_eq!(
            desired_state.control_plane.object.data["spec"]["rolloutStrategy"],
            "RollingUpdate"
        );

        let mut transport = MockExtensionTransport::new();
        transport.expect_call().returning(respond);
        let strict = runtime(
            transport,
            vec![registration("ext", FailurePolicy::Fail, Hook::GeneratePatches)],
        );
        let mut desired_state = desired().await;
        let err = generate_patches(&strict, &mut desired_state).await.unwrap_err();
        assert!(err.to_string().contains("cannot render"));
    }

    #[tokio::test]
    async fn patches_cannot_rename_objects() {
        let mut transport = MockExtensionTransport::new();
        transport.expect_call().returning(|_, _, request, _| {
            Ok(json!({
                "items": [{
                    "uid": uid_of(request, "DockerCluster"),
                    "patch": [{"op": "replace", "path": "/metadata/name", "value": "hijacked"}]
                }]
            }))
        });
        let runtime = runtime(
            transport,
            vec![registration("ext", FailurePolicy::Fail, Hook::GeneratePatches)],
        );
        let mut desired = desired().await;
        let err = generate_patches(&runtime, &mut desired).await.unwrap_err();
        assert!(matches!(err, Error::Patch { .. }));
        assert_eq!(desired.infrastructure_cluster.object.name_any(), "prod");
    }

    #[tokio::test]
    async fn unknown_uids_are_item_failures() {
        let mut transport = MockExtensionTransport::new();
        transport
            .expect_call()
            .returning(|_, _, _, _| Ok(json!({"items": [{"uid": "nope", "patch": []}]})));
        let runtime = runtime(
            transport,
            vec![registration("ext", FailurePolicy::Fail, Hook::GeneratePatches)],
        );
        let mut desired = desired().await;
        let err = generate_patches(&runtime, &mut desired).await.unwrap_err();
        assert!(err.to_string().contains("unknown item nope"));
    }

    #[test]
    fn failed_patch_operations_leave_the_object_untouched() {
        let object = crate::objects::new_object("v1", "ConfigMap", "fleet", "cm");
        let patch: json_patch::Patch =
            serde_json::from_value(json!([{"op": "remove", "path": "/spec/missing"}])).unwrap();
        let err = apply_patch(&object, &patch).unwrap_err();
        assert!(err.to_string().contains("ConfigMap cm"));
    }

    /// Story: A rejected topology stops the pass
    #[tokio::test]
    async fn story_validate_topology_sees_every_object_and_can_reject() {
        let mut transport = MockExtensionTransport::new();
        transport.expect_call().returning(|_, hook, request, _| {
            assert_eq!(hook, Hook::ValidateTopology);
            assert_eq!(request["kind"], "ValidateTopologyRequest");
            let kinds: Vec<&str> = request["items"]
                .as_array()
                .unwrap()
                .iter()
                .map(|i| i["object"]["kind"].as_str().unwrap())
                .collect();
            assert!(kinds.contains(&"MachineDeployment"));
            assert!(kinds.contains(&"KubeadmConfigTemplate"));
            Ok(json!({"status": "Failure", "message": "too many workers"}))
        });
        let runtime = runtime(
            transport,
            vec![registration("policy", FailurePolicy::Fail, Hook::ValidateTopology)],
        );
        let desired = desired().await;
        let err = validate_topology(&runtime, &desired).await.unwrap_err();
        assert!(err.to_string().contains("too many workers"));
    }

    #[tokio::test]
    async fn validate_topology_without_extensions_accepts() {
        let runtime = runtime(MockExtensionTransport::new(), vec![]);
        let desired = desired().await;
        assert!(validate_topology(&runtime, &desired).await.is_ok());
    }
}
