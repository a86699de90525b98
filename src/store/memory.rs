//! In-memory object store

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use tokio::sync::RwLock;

use super::{labels_match, ObjectStore};
use crate::objects::gvk_of;
use crate::{Error, Result};

/// Objects are keyed by group, kind, namespace and name; the version is not
/// part of identity.
type Key = (String, String, String, String);

fn key(gvk: &GroupVersionKind, namespace: &str, name: &str) -> Key {
    (
        gvk.group.clone(),
        gvk.kind.clone(),
        namespace.to_string(),
        name.to_string(),
    )
}

/// A write recorded by [`MemoryObjectStore`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreWrite {
    /// An object was created
    Create {
        /// Kind of the object
        kind: String,
        /// Name of the object
        name: String,
    },
    /// An object was replaced
    Update {
        /// Kind of the object
        kind: String,
        /// Name of the object
        name: String,
    },
    /// An object was deleted
    Delete {
        /// Kind of the object
        kind: String,
        /// Name of the object
        name: String,
    },
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, DynamicObject>,
    resource_version: u64,
    /// `None` unless the store was built with [`MemoryObjectStore::recording`]
    writes: Option<Vec<StoreWrite>>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn record(&mut self, write: StoreWrite) {
        if let Some(writes) = &mut self.writes {
            writes.push(write);
        }
    }
}

/// [`ObjectStore`] keeping objects in memory
///
/// Assigns resourceVersions and enforces them on update the way the API
/// server does. A store built with [`MemoryObjectStore::recording`] also keeps
/// every successful write in order; that log is never trimmed, so it is meant
/// for tests, not for long-lived dry runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    inner: RwLock<Inner>,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that logs its writes
    pub fn recording() -> Self {
        Self {
            inner: RwLock::new(Inner {
                writes: Some(Vec::new()),
                ..Default::default()
            }),
        }
    }

    /// Seed an object without recording a write
    pub async fn insert(&self, mut obj: DynamicObject) -> Result<()> {
        let gvk = gvk_of(&obj)?;
        let mut inner = self.inner.write().await;
        obj.metadata.resource_version = Some(inner.next_version());
        let k = key(&gvk, &obj.namespace().unwrap_or_default(), &obj.name_any());
        inner.objects.insert(k, obj);
        Ok(())
    }

    /// Every write made through the [`ObjectStore`] interface, in order
    ///
    /// Always empty unless the store is [recording](Self::recording).
    pub async fn writes(&self) -> Vec<StoreWrite> {
        self.inner.read().await.writes.clone().unwrap_or_default()
    }

    /// Every stored object of a kind, in name order
    pub async fn objects_of_kind(&self, kind: &str) -> Vec<DynamicObject> {
        self.inner
            .read()
            .await
            .objects
            .iter()
            .filter(|((_, k, _, _), _)| k == kind)
            .map(|(_, obj)| obj.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let inner = self.inner.read().await;
        Ok(inner.objects.get(&key(gvk, namespace, name)).cloned())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        let inner = self.inner.read().await;
        Ok(inner
            .objects
            .iter()
            .filter(|((group, kind, ns, _), obj)| {
                *group == gvk.group
                    && *kind == gvk.kind
                    && ns == namespace
                    && labels_match(obj.labels(), labels)
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let gvk = gvk_of(obj)?;
        let name = obj.name_any();
        let k = key(&gvk, &obj.namespace().unwrap_or_default(), &name);

        let mut inner = self.inner.write().await;
        if inner.objects.contains_key(&k) {
            return Err(Error::conflict(&gvk.kind, &name));
        }
        let mut created = obj.clone();
        created.metadata.resource_version = Some(inner.next_version());
        inner.objects.insert(k, created.clone());
        inner.record(StoreWrite::Create {
            kind: gvk.kind,
            name,
        });
        Ok(created)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let gvk = gvk_of(obj)?;
        let name = obj.name_any();
        let namespace = obj.namespace().unwrap_or_default();
        let k = key(&gvk, &namespace, &name);

        let mut inner = self.inner.write().await;
        let Some(live) = inner.objects.get(&k) else {
            return Err(Error::not_found(&gvk.kind, &namespace, &name));
        };
        if obj.metadata.resource_version.is_some()
            && obj.metadata.resource_version != live.metadata.resource_version
        {
            return Err(Error::conflict(&gvk.kind, &name));
        }
        let mut updated = obj.clone();
        updated.metadata.resource_version = Some(inner.next_version());
        inner.objects.insert(k, updated.clone());
        inner.record(StoreWrite::Update {
            kind: gvk.kind,
            name,
        });
        Ok(updated)
    }

    async fn delete(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.objects.remove(&key(gvk, namespace, name)).is_some() {
            inner.record(StoreWrite::Delete {
                kind: gvk.kind.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::new_object;

    fn template(name: &str) -> DynamicObject {
        new_object(
            "infrastructure.cluster.x-k8s.io/v1beta1",
            "DockerMachineTemplate",
            "fleet",
            name,
        )
    }

    fn gvk() -> GroupVersionKind {
        GroupVersionKind::gvk("infrastructure.cluster.x-k8s.io", "v1beta1", "DockerMachineTemplate")
    }

    #[tokio::test]
    async fn create_then_get() {
        let store = MemoryObjectStore::new();
        store.create(&template("a")).await.unwrap();

        let got = store.get(&gvk(), "fleet", "a").await.unwrap().unwrap();
        assert_eq!(got.name_any(), "a");
        assert!(got.metadata.resource_version.is_some());
        assert!(store.get(&gvk(), "other", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn creating_twice_conflicts() {
        let store = MemoryObjectStore::new();
        store.create(&template("a")).await.unwrap();
        let err = store.create(&template("a")).await.unwrap_err();
        assert!(err.is_conflict());
    }

    /// Writes based on an old read lose, like on the API server.
    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let store = MemoryObjectStore::new();
        let first = store.create(&template("a")).await.unwrap();
        store.update(&first).await.unwrap();

        let err = store.update(&first).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_labels() {
        let store = MemoryObjectStore::new();
        let mut owned = template("owned");
        owned.labels_mut().insert("owned".to_string(), String::new());
        store.insert(owned).await.unwrap();
        store.insert(template("plain")).await.unwrap();

        let selector = BTreeMap::from([("owned".to_string(), String::new())]);
        let found = store.list(&gvk(), "fleet", &selector).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name_any(), "owned");
    }

    #[tokio::test]
    async fn writes_are_recorded_in_order_and_seeding_is_not() {
        let store = MemoryObjectStore::recording();
        store.insert(template("seed")).await.unwrap();
        store.create(&template("a")).await.unwrap();
        store.delete(&gvk(), "fleet", "seed").await.unwrap();
        store.delete(&gvk(), "fleet", "missing").await.unwrap();

        assert_eq!(
            store.writes().await,
            vec![
                StoreWrite::Create {
                    kind: "DockerMachineTemplate".to_string(),
                    name: "a".to_string()
                },
                StoreWrite::Delete {
                    kind: "DockerMachineTemplate".to_string(),
                    name: "seed".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn plain_store_keeps_no_write_log() {
        let store = MemoryObjectStore::new();
        store.create(&template("a")).await.unwrap();
        store.delete(&gvk(), "fleet", "a").await.unwrap();
        assert!(store.writes().await.is_empty());
    }
}
