//! Typed access to Clusters and ClusterClasses

use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Cluster, ClusterClass, ClusterStatus, ObjectReference};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, Result};

/// Operations the controller and admission webhook perform on the two
/// topology CRDs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TopologyClient: Send + Sync {
    /// Fetch a Cluster, `None` when it does not exist
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>>;

    /// Fetch a ClusterClass, `None` when it does not exist
    async fn get_cluster_class(&self, namespace: &str, name: &str) -> Result<Option<ClusterClass>>;

    /// List every Cluster in a namespace
    async fn list_clusters(&self, namespace: &str) -> Result<Vec<Cluster>>;

    /// Set the Cluster's infrastructure and control plane references
    async fn patch_cluster_spec_refs(
        &self,
        namespace: &str,
        name: &str,
        infrastructure_ref: &ObjectReference,
        control_plane_ref: &ObjectReference,
    ) -> Result<()>;

    /// Replace the Cluster's status
    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ClusterStatus,
    ) -> Result<()>;
}

/// [`TopologyClient`] backed by typed kube APIs
pub struct KubeTopologyClient {
    client: Client,
    field_manager: String,
    retry: RetryConfig,
}

impl KubeTopologyClient {
    /// Create a client writing as the given field manager
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            retry: RetryConfig::with_max_attempts(3),
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TopologyClient for KubeTopologyClient {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(retry_with_backoff(&self.retry, "get_cluster", || api.get_opt(name)).await?)
    }

    async fn get_cluster_class(&self, namespace: &str, name: &str) -> Result<Option<ClusterClass>> {
        let api: Api<ClusterClass> = Api::namespaced(self.client.clone(), namespace);
        Ok(retry_with_backoff(&self.retry, "get_cluster_class", || api.get_opt(name)).await?)
    }

    async fn list_clusters(&self, namespace: &str) -> Result<Vec<Cluster>> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default();
        let list = retry_with_backoff(&self.retry, "list_clusters", || api.list(&params)).await?;
        Ok(list.items)
    }

    async fn patch_cluster_spec_refs(
        &self,
        namespace: &str,
        name: &str,
        infrastructure_ref: &ObjectReference,
        control_plane_ref: &ObjectReference,
    ) -> Result<()> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "spec": {
                "infrastructureRef": infrastructure_ref,
                "controlPlaneRef": control_plane_ref,
            }
        });
        api.patch(name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_write("Cluster", name, e))?;
        Ok(())
    }

    async fn patch_cluster_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ClusterStatus,
    ) -> Result<()> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_write("Cluster", name, e))?;
        Ok(())
    }
}
