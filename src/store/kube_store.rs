//! API server backed object store

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use tracing::{debug, info};

use super::{label_selector, ObjectStore};
use crate::objects::gvk_of;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// [`ObjectStore`] backed by `Api<DynamicObject>`
pub struct KubeObjectStore {
    client: Client,
    field_manager: String,
    retry: RetryConfig,
}

impl KubeObjectStore {
    /// Create a store writing as the given field manager
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            retry: RetryConfig::with_max_attempts(3),
        }
    }

    /// Resolve the API resource for a kind
    ///
    /// Falls back to a derived plural when discovery does not know the kind
    /// yet, which happens right after a provider CRD is installed.
    async fn api_resource(&self, gvk: &GroupVersionKind) -> ApiResource {
        match kube::discovery::pinned_kind(&self.client, gvk).await {
            Ok((ar, _caps)) => ar,
            Err(e) => {
                debug!(
                    group = %gvk.group,
                    version = %gvk.version,
                    kind = %gvk.kind,
                    error = %e,
                    "Kind not found in discovery, using fallback pluralization"
                );
                ApiResource::from_gvk_with_plural(gvk, &pluralize_kind(&gvk.kind))
            }
        }
    }

    async fn api(&self, gvk: &GroupVersionKind, namespace: &str) -> Api<DynamicObject> {
        let ar = self.api_resource(gvk).await;
        Api::namespaced_with(self.client.clone(), namespace, &ar)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let api = self.api(gvk, namespace).await;
        let op = format!("get {} {namespace}/{name}", gvk.kind);
        let obj = retry_with_backoff(&self.retry, &op, || api.get_opt(name)).await?;
        Ok(obj)
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.api(gvk, namespace).await;
        let params = ListParams::default().labels(&label_selector(labels));
        let op = format!("list {} in {namespace}", gvk.kind);
        let list = retry_with_backoff(&self.retry, &op, || api.list(&params)).await?;
        Ok(list.items)
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let gvk = gvk_of(obj)?;
        let namespace = obj.namespace().unwrap_or_default();
        let api = self.api(&gvk, &namespace).await;
        let created = api
            .create(&self.post_params(), obj)
            .await
            .map_err(|e| Error::from_write(&gvk.kind, &obj.name_any(), e))?;
        info!(
            kind = %gvk.kind,
            name = %created.name_any(),
            namespace = %namespace,
            "Created object"
        );
        Ok(created)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let gvk = gvk_of(obj)?;
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let api = self.api(&gvk, &namespace).await;
        let updated = api
            .replace(&name, &self.post_params(), obj)
            .await
            .map_err(|e| Error::from_write(&gvk.kind, &name, e))?;
        info!(kind = %gvk.kind, name = %name, namespace = %namespace, "Updated object");
        Ok(updated)
    }

    async fn delete(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<()> {
        let api = self.api(gvk, namespace).await;
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(kind = %gvk.kind, name = %name, namespace = %namespace, "Deleted object");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(Error::from_write(&gvk.kind, name, e)),
        }
    }
}

/// Known Cluster API and provider kind plurals
///
/// Kubernetes plurals are lowercase with no separators; kinds not listed
/// here fall back to English pluralization rules.
const KIND_PLURALS: &[(&str, &str)] = &[
    ("cluster", "clusters"),
    ("clusterclass", "clusterclasses"),
    ("machine", "machines"),
    ("machinedeployment", "machinedeployments"),
    ("machineset", "machinesets"),
    ("kubeadmcontrolplane", "kubeadmcontrolplanes"),
    ("kubeadmcontrolplanetemplate", "kubeadmcontrolplanetemplates"),
    ("kubeadmconfig", "kubeadmconfigs"),
    ("kubeadmconfigtemplate", "kubeadmconfigtemplates"),
    ("dockercluster", "dockerclusters"),
    ("dockerclustertemplate", "dockerclustertemplates"),
    ("dockermachinetemplate", "dockermachinetemplates"),
    ("awscluster", "awsclusters"),
    ("awsclustertemplate", "awsclustertemplates"),
    ("awsmachinetemplate", "awsmachinetemplates"),
];

/// Convert a kind to its resource plural
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{lower}es")
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{lower}s")
    }
}
