//! Object store abstraction
//!
//! Generated objects are provider kinds the controller only knows by
//! apiVersion and kind, so all reads and writes of them go through
//! [`ObjectStore`] on [`DynamicObject`]s. [`KubeObjectStore`] talks to the API
//! server; [`MemoryObjectStore`] keeps everything in memory for tests and dry
//! runs.

mod kube_store;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind};

#[cfg(test)]
use mockall::automock;

use crate::Result;

pub use kube_store::{pluralize_kind, KubeObjectStore};
pub use memory::{MemoryObjectStore, StoreWrite};

/// Read/write access to arbitrary namespaced objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// List objects of a kind in a namespace carrying all the given labels
    ///
    /// A label with an empty value matches on presence alone.
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>>;

    /// Create an object; fails with a conflict if it already exists
    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object; fails with a conflict if its resourceVersion is stale
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Delete an object; deleting a missing object succeeds
    async fn delete(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<()>;
}

/// Render labels as a selector string
///
/// Empty values become existence requirements.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| {
            if v.is_empty() {
                k.clone()
            } else {
                format!("{k}={v}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether an object's labels satisfy a selector built by [`label_selector`]
pub fn labels_match(
    obj_labels: &BTreeMap<String, String>,
    selector: &BTreeMap<String, String>,
) -> bool {
    selector.iter().all(|(k, v)| match obj_labels.get(k) {
        Some(actual) => v.is_empty() || actual == v,
        None => false,
    })
}
