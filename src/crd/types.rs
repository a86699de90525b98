//! Shared types for topology CRDs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::api::{DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another object by apiVersion, kind and name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent (e.g., "infrastructure.cluster.x-k8s.io/v1beta1")
    #[serde(default)]
    pub api_version: String,

    /// Kind of the referent
    #[serde(default)]
    pub kind: String,

    /// Name of the referent
    #[serde(default)]
    pub name: String,

    /// Namespace of the referent; empty means the referrer's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectReference {
    /// Build a reference to a live object
    pub fn to_object(obj: &DynamicObject) -> Self {
        let (api_version, kind) = obj
            .types
            .as_ref()
            .map(|t| (t.api_version.clone(), t.kind.clone()))
            .unwrap_or_default();
        Self {
            api_version,
            kind,
            name: obj.name_any(),
            namespace: obj.namespace(),
        }
    }

    /// API group of the referent (empty for the core group)
    pub fn group(&self) -> &str {
        split_api_version(&self.api_version).0
    }

    /// GroupVersionKind of the referent
    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = split_api_version(&self.api_version);
        GroupVersionKind::gvk(group, version, &self.kind)
    }

    /// Namespace of the referent, falling back to the referrer's namespace
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => default,
        }
    }
}

impl std::fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => write!(f, "{} {}/{}", self.kind, ns, self.name),
            _ => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Split an apiVersion into group and version
///
/// Core resources (e.g., "v1") have an empty group.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.rfind('/') {
        Some(idx) => (&api_version[..idx], &api_version[idx + 1..]),
        None => ("", api_version),
    }
}

/// A template reference held by a ClusterClass
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct LocalObjectTemplate {
    /// Reference to the template object
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub ref_: Option<ObjectReference>,
}

/// Labels and annotations propagated onto generated objects
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ObjectMetaTemplate {
    /// Labels to add
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Annotations to add
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMetaTemplate {
    /// Merge `other` on top of `self`; keys in `other` win
    pub fn merged(&self, other: &ObjectMetaTemplate) -> ObjectMetaTemplate {
        let mut out = self.clone();
        out.labels
            .extend(other.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        out.annotations
            .extend(other.annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }
}

/// Condition status values
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., TopologyReconciled)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// Insert or replace a condition of the same type
    ///
    /// The transition time is kept when the status did not change.
    pub fn upsert(conditions: &mut Vec<Condition>, mut condition: Condition) {
        match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => conditions.push(condition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_split_group_and_version() {
        let r = ObjectReference {
            api_version: "infrastructure.cluster.x-k8s.io/v1beta1".to_string(),
            kind: "DockerClusterTemplate".to_string(),
            name: "infra".to_string(),
            namespace: None,
        };
        assert_eq!(r.group(), "infrastructure.cluster.x-k8s.io");
        let gvk = r.gvk();
        assert_eq!(gvk.version, "v1beta1");
        assert_eq!(gvk.kind, "DockerClusterTemplate");
        assert_eq!(r.namespace_or("default"), "default");
        assert_eq!(r.to_string(), "DockerClusterTemplate infra");
    }

    #[test]
    fn core_api_versions_have_empty_group() {
        assert_eq!(split_api_version("v1"), ("", "v1"));
    }

    #[test]
    fn upsert_keeps_transition_time_when_status_is_unchanged() {
        let mut conditions = vec![Condition::new(
            "TopologyReconciled",
            ConditionStatus::True,
            "Reconciled",
            "",
        )];
        let original = conditions[0].last_transition_time;

        Condition::upsert(
            &mut conditions,
            Condition::new("TopologyReconciled", ConditionStatus::True, "Reconciled", "again"),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, original);
        assert_eq!(conditions[0].message, "again");

        Condition::upsert(
            &mut conditions,
            Condition::new("Other", ConditionStatus::False, "X", ""),
        );
        assert_eq!(conditions.len(), 2);
    }

    #[test]
    fn meta_templates_merge_with_later_keys_winning() {
        let mut base = ObjectMetaTemplate::default();
        base.labels.insert("a".into(), "class".into());
        base.labels.insert("b".into(), "class".into());
        let mut top = ObjectMetaTemplate::default();
        top.labels.insert("b".into(), "topology".into());

        let merged = base.merged(&top);
        assert_eq!(merged.labels["a"], "class");
        assert_eq!(merged.labels["b"], "topology");
    }
}
