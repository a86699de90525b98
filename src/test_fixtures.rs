//! Shared builders for unit tests

use kube::api::{DynamicObject, ObjectMeta};
use serde_json::json;

use crate::crd::{
    Cluster, ClusterClass, ClusterClassSpec, ClusterClassVariable, ClusterSpec, ControlPlaneClass,
    LocalObjectTemplate, MachineDeploymentClass, MachineDeploymentClassTemplate,
    MachineDeploymentTopology, ObjectReference, Topology, VariableSchema, WorkersClass,
    WorkersTopology,
};
use crate::objects::new_object;
use crate::store::MemoryObjectStore;

pub const NS: &str = "fleet";
pub const VERSION: &str = "v1.31.0";

pub const INFRA_API: &str = "infrastructure.cluster.x-k8s.io/v1beta1";
pub const CONTROL_PLANE_API: &str = "controlplane.cluster.x-k8s.io/v1beta1";
pub const BOOTSTRAP_API: &str = "bootstrap.cluster.x-k8s.io/v1beta1";

pub fn reference(api_version: &str, kind: &str, name: &str) -> ObjectReference {
    ObjectReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        namespace: None,
    }
}

fn local(api_version: &str, kind: &str, name: &str) -> LocalObjectTemplate {
    LocalObjectTemplate {
        ref_: Some(reference(api_version, kind, name)),
    }
}

/// "quick-start" class with a control plane machine template, one worker
/// class and an integer `cpu` variable defaulting to 1
pub fn cluster_class() -> ClusterClass {
    let mut class = ClusterClass::new(
        "quick-start",
        ClusterClassSpec {
            infrastructure: local(INFRA_API, "DockerClusterTemplate", "quick-start"),
            control_plane: ControlPlaneClass {
                ref_: Some(reference(
                    CONTROL_PLANE_API,
                    "KubeadmControlPlaneTemplate",
                    "quick-start-cp",
                )),
                machine_infrastructure: Some(local(
                    INFRA_API,
                    "DockerMachineTemplate",
                    "quick-start-cp-machines",
                )),
                ..Default::default()
            },
            workers: WorkersClass {
                machine_deployments: vec![MachineDeploymentClass {
                    class: "default-worker".to_string(),
                    template: MachineDeploymentClassTemplate {
                        bootstrap: local(
                            BOOTSTRAP_API,
                            "KubeadmConfigTemplate",
                            "quick-start-worker",
                        ),
                        infrastructure: local(
                            INFRA_API,
                            "DockerMachineTemplate",
                            "quick-start-worker",
                        ),
                        ..Default::default()
                    },
                }],
            },
            variables: vec![ClusterClassVariable {
                name: "cpu".to_string(),
                required: true,
                schema: VariableSchema {
                    open_api_v3_schema: serde_json::from_value(
                        json!({"type": "integer", "default": 1, "minimum": 1}),
                    )
                    .unwrap(),
                },
            }],
        },
    );
    class.metadata.namespace = Some(NS.to_string());
    class
}

/// Cluster "prod" bound to "quick-start" with one worker group "md1"
pub fn cluster() -> Cluster {
    let mut cluster = Cluster::new(
        "prod",
        ClusterSpec {
            topology: Some(Topology {
                class: "quick-start".to_string(),
                version: VERSION.to_string(),
                workers: Some(WorkersTopology {
                    machine_deployments: vec![MachineDeploymentTopology {
                        class: "default-worker".to_string(),
                        name: "md1".to_string(),
                        replicas: Some(2),
                        ..Default::default()
                    }],
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    cluster.metadata = ObjectMeta {
        name: Some("prod".to_string()),
        namespace: Some(NS.to_string()),
        generation: Some(1),
        ..Default::default()
    };
    cluster
}

fn template(api_version: &str, kind: &str, name: &str, spec: serde_json::Value) -> DynamicObject {
    let mut obj = new_object(api_version, kind, NS, name);
    obj.data = json!({"spec": {"template": {"spec": spec}}});
    obj
}

/// Every template [`cluster_class`] references
pub fn class_templates() -> Vec<DynamicObject> {
    vec![
        template(
            INFRA_API,
            "DockerClusterTemplate",
            "quick-start",
            json!({"loadBalancer": {"imageTag": "v1"}}),
        ),
        template(
            CONTROL_PLANE_API,
            "KubeadmControlPlaneTemplate",
            "quick-start-cp",
            json!({"kubeadmConfigSpec": {"clusterConfiguration": {}}}),
        ),
        template(
            INFRA_API,
            "DockerMachineTemplate",
            "quick-start-cp-machines",
            json!({"extraMounts": []}),
        ),
        template(
            BOOTSTRAP_API,
            "KubeadmConfigTemplate",
            "quick-start-worker",
            json!({"joinConfiguration": {"nodeRegistration": {}}}),
        ),
        template(
            INFRA_API,
            "DockerMachineTemplate",
            "quick-start-worker",
            json!({"extraMounts": [], "customImage": "kindest/node"}),
        ),
    ]
}

/// Memory store holding every class template
pub async fn seeded_store() -> MemoryObjectStore {
    let store = MemoryObjectStore::recording();
    for obj in class_templates() {
        store.insert(obj).await.unwrap();
    }
    store
}
