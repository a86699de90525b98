//! Admission webhooks for ClusterClasses
//!
//! - POST /validate/clusterclasses - refuse unsafe creates, updates and deletes
//! - POST /mutate/clusterclasses - default template reference namespaces

pub mod check;
pub mod cluster_class;

use std::sync::Arc;

use axum::{routing::post, Router};

pub use check::{CompatibilityPolicy, ReferenceCompatibility};
pub use cluster_class::{ClusterClassDefaulter, ClusterClassValidator};

/// Shared state for webhook handlers
pub struct WebhookState {
    /// ClusterClass validation
    pub validator: ClusterClassValidator,
}

impl WebhookState {
    /// Create webhook state around a validator
    pub fn new(validator: ClusterClassValidator) -> Self {
        Self { validator }
    }
}

/// Create the webhook router with the validation and mutation endpoints
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate/clusterclasses", post(cluster_class::validate_handler))
        .route("/mutate/clusterclasses", post(cluster_class::mutate_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockTopologyClient;
    use crate::crd::ClusterClass;
    use crate::test_fixtures::{cluster, cluster_class};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router(clusters: Vec<crate::crd::Cluster>) -> Router {
        let mut client = MockTopologyClient::new();
        client
            .expect_list_clusters()
            .returning(move |_| Ok(clusters.clone()));
        webhook_router(Arc::new(WebhookState::new(ClusterClassValidator::new(
            Arc::new(client),
        ))))
    }

    fn review(operation: &str, object: Option<&ClusterClass>, old: Option<&ClusterClass>) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "cluster.x-k8s.io", "version": "v1beta1", "kind": "ClusterClass"},
                "resource": {
                    "group": "cluster.x-k8s.io",
                    "version": "v1beta1",
                    "resource": "clusterclasses"
                },
                "name": "quick-start",
                "namespace": "fleet",
                "operation": operation,
                "userInfo": {"username": "admin"},
                "object": object,
                "oldObject": old,
                "dryRun": false
            }
        })
    }

    async fn post(router: Router, uri: &str, body: Value) -> Value {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let review: Value = serde_json::from_slice(&bytes).unwrap();
        review["response"].clone()
    }

    /// Story: A well-formed ClusterClass is admitted
    #[tokio::test]
    async fn story_valid_create_is_allowed() {
        let class = cluster_class();
        let response = post(
            router(vec![]),
            "/validate/clusterclasses",
            review("CREATE", Some(&class), None),
        )
        .await;
        assert_eq!(response["allowed"], true);
        assert_eq!(response["uid"], "705ab4f5-6393-11e8-b7cc-42010a800002");
    }

    /// Story: Deleting a class a Cluster uses is denied with the reason
    #[tokio::test]
    async fn story_delete_of_used_class_is_denied() {
        let class = cluster_class();
        let response = post(
            router(vec![cluster()]),
            "/validate/clusterclasses",
            review("DELETE", None, Some(&class)),
        )
        .await;
        assert_eq!(response["allowed"], false);
        assert!(response["status"]["message"]
            .as_str()
            .unwrap()
            .contains("used by Clusters: prod"));
    }

    #[tokio::test]
    async fn mutation_returns_a_json_patch() {
        let class = cluster_class();
        let response = post(
            router(vec![]),
            "/mutate/clusterclasses",
            review("CREATE", Some(&class), None),
        )
        .await;
        assert_eq!(response["allowed"], true);
        assert_eq!(response["patchType"], "JSONPatch");
        assert!(response["patch"].is_string());
    }
}
