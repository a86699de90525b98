//! Runtime hook definitions and wire types
//!
//! Every request and response is a self-contained JSON document so an
//! extension can act statelessly. Requests are wrapped in an envelope with
//! `apiVersion` and `kind` (`<Hook>Request`) before being sent.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crd::{Cluster, ClusterVariable};

/// API version of every hook request and response
pub const HOOKS_API_VERSION: &str = "hooks.runtime.cluster.x-k8s.io/v1alpha1";

/// A point in the topology lifecycle where extensions are called
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Hook {
    /// Before any object of a new Cluster is created; may hold creation
    BeforeClusterCreate,
    /// Before the control plane version changes; may hold the upgrade
    BeforeClusterUpgrade,
    /// Once, after the control plane first reports initialized
    AfterControlPlaneInitialized,
    /// Customizes every generated object
    GeneratePatches,
    /// Accepts or rejects the fully patched object set
    ValidateTopology,
}

impl Hook {
    /// Hook name as used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeforeClusterCreate => "BeforeClusterCreate",
            Self::BeforeClusterUpgrade => "BeforeClusterUpgrade",
            Self::AfterControlPlaneInitialized => "AfterControlPlaneInitialized",
            Self::GeneratePatches => "GeneratePatches",
            Self::ValidateTopology => "ValidateTopology",
        }
    }

    /// Whether responses may ask the controller to wait
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::BeforeClusterCreate | Self::BeforeClusterUpgrade)
    }

    /// Kind of the request envelope
    pub fn request_kind(&self) -> String {
        format!("{}Request", self.name())
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome reported by an extension
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum ResponseStatus {
    /// The extension handled the request
    #[default]
    Success,
    /// The extension failed to handle the request
    Failure,
}

/// Fields common to every response
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResponseMeta {
    /// Outcome
    #[serde(default)]
    pub status: ResponseStatus,
    /// Human-readable detail, required on failure
    #[serde(default)]
    pub message: String,
}

/// A response type carrying [`ResponseMeta`]
pub trait HookResponse: DeserializeOwned + Send {
    /// Common response fields
    fn meta(&self) -> &ResponseMeta;
}

/// Response of a blocking hook
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingResponse {
    /// Common fields
    #[serde(flatten)]
    pub meta: ResponseMeta,
    /// Seconds to wait before proceeding; zero lets the step proceed
    #[serde(default)]
    pub retry_after_seconds: u32,
}

impl HookResponse for BlockingResponse {
    fn meta(&self) -> &ResponseMeta {
        &self.meta
    }
}

/// Response of a non-blocking hook
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NonBlockingResponse {
    /// Common fields
    #[serde(flatten)]
    pub meta: ResponseMeta,
}

impl HookResponse for NonBlockingResponse {
    fn meta(&self) -> &ResponseMeta {
        &self.meta
    }
}

/// Request for [`Hook::BeforeClusterCreate`]
#[derive(Clone, Debug, Serialize)]
pub struct BeforeClusterCreateRequest {
    /// The Cluster about to be created
    pub cluster: Cluster,
}

/// Request for [`Hook::BeforeClusterUpgrade`]
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeClusterUpgradeRequest {
    /// The Cluster about to be upgraded
    pub cluster: Cluster,
    /// Current control plane version
    pub from_kubernetes_version: String,
    /// Desired version
    pub to_kubernetes_version: String,
}

/// Request for [`Hook::AfterControlPlaneInitialized`]
#[derive(Clone, Debug, Serialize)]
pub struct AfterControlPlaneInitializedRequest {
    /// The Cluster whose control plane came up
    pub cluster: Cluster,
}

/// Identifies the object holding a patched template and where it is held
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderReference {
    /// API version of the holder
    pub api_version: String,
    /// Kind of the holder
    pub kind: String,
    /// Namespace of the holder
    pub namespace: String,
    /// Name of the holder
    pub name: String,
    /// Field of the holder that references the object
    pub field_path: String,
}

/// One object to patch
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePatchesRequestItem {
    /// Identifier echoed back in the response
    pub uid: String,
    /// Where the object is held
    pub holder_reference: HolderReference,
    /// The object, including all patches applied so far
    pub object: Value,
    /// Variables specific to this item (worker group overrides, builtins)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<ClusterVariable>,
}

/// Request for [`Hook::GeneratePatches`]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GeneratePatchesRequest {
    /// Cluster-level variables
    #[serde(default)]
    pub variables: Vec<ClusterVariable>,
    /// Objects to patch
    pub items: Vec<GeneratePatchesRequestItem>,
}

/// Patch (or failure) for one requested item
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GeneratePatchesResponseItem {
    /// Identifier of the request item
    pub uid: String,
    /// RFC 6902 patch to apply to the object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<json_patch::Patch>,
    /// Why the item could not be patched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of [`Hook::GeneratePatches`]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct GeneratePatchesResponse {
    /// Common fields
    #[serde(flatten)]
    pub meta: ResponseMeta,
    /// Per-item results; items may be omitted when unchanged
    #[serde(default)]
    pub items: Vec<GeneratePatchesResponseItem>,
}

impl HookResponse for GeneratePatchesResponse {
    fn meta(&self) -> &ResponseMeta {
        &self.meta
    }
}

/// One object of the topology to validate
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTopologyRequestItem {
    /// Where the object is held
    pub holder_reference: HolderReference,
    /// The fully patched object
    pub object: Value,
    /// Variables specific to this item
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<ClusterVariable>,
}

/// Request for [`Hook::ValidateTopology`]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ValidateTopologyRequest {
    /// Cluster-level variables
    #[serde(default)]
    pub variables: Vec<ClusterVariable>,
    /// Every object of the topology
    pub items: Vec<ValidateTopologyRequestItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_create_and_upgrade_gates_block() {
        assert!(Hook::BeforeClusterCreate.is_blocking());
        assert!(Hook::BeforeClusterUpgrade.is_blocking());
        assert!(!Hook::AfterControlPlaneInitialized.is_blocking());
        assert!(!Hook::GeneratePatches.is_blocking());
        assert_eq!(Hook::GeneratePatches.request_kind(), "GeneratePatchesRequest");
    }

    #[test]
    fn blocking_response_reads_flattened_meta() {
        let resp: BlockingResponse = serde_json::from_value(json!({
            "status": "Success",
            "message": "waiting for quota",
            "retryAfterSeconds": 30
        }))
        .unwrap();
        assert_eq!(resp.meta.status, ResponseStatus::Success);
        assert_eq!(resp.retry_after_seconds, 30);
    }

    #[test]
    fn failure_status_round_trips_the_wire_name() {
        let resp: NonBlockingResponse =
            serde_json::from_value(json!({"status": "Failure", "message": "boom"})).unwrap();
        assert_eq!(resp.meta().status, ResponseStatus::Failure);
        assert_eq!(resp.meta().message, "boom");
    }

    #[test]
    fn patch_items_carry_either_a_patch_or_an_error() {
        let resp: GeneratePatchesResponse = serde_json::from_value(json!({
            "status": "Success",
            "items": [
                {"uid": "a", "patch": [{"op": "add", "path": "/spec/x", "value": 1}]},
                {"uid": "b", "error": "cannot render"}
            ]
        }))
        .unwrap();
        assert!(resp.items[0].patch.is_some());
        assert_eq!(resp.items[1].error.as_deref(), Some("cannot render"));
    }
}
